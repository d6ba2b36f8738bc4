//! Restrict filter expressions.
//!
//! The host filters collections with a small SQL-like language bound to
//! bracketed property names:
//!
//! ```text
//! [Start] <= '03/14/2025 09:00' AND [End] >= '03/07/2025 09:00'
//! [MessageClass] >= 'IPM.Appointment' AND [MessageClass] < 'IPM.Appointment{'
//! ```
//!
//! Literals are single-quoted (`''` escapes a quote), numbers, or
//! `true`/`false`. Text comparison is case-insensitive. Date literals use the
//! host's locale-independent `MM/DD/YYYY HH:MM` form.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};

use super::{HostError, Variant};

/// Format used for date literals inside filter expressions.
pub const DATE_LITERAL_FORMAT: &str = "%m/%d/%Y %H:%M";

const DATE_ONLY_LITERAL_FORMAT: &str = "%m/%d/%Y";

pub fn format_date_literal(value: NaiveDateTime) -> String {
    value.format(DATE_LITERAL_FORMAT).to_string()
}

pub fn parse_date_literal(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATE_LITERAL_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_ONLY_LITERAL_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Quote a text literal for use in a filter expression.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Number(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        property: String,
        op: CmpOp,
        value: Literal,
    },
}

impl Expr {
    /// Evaluate against an item. `lookup` returns [`Variant::Empty`] for
    /// properties the item does not have; those never match.
    pub fn matches(&self, lookup: &dyn Fn(&str) -> Variant) -> bool {
        match self {
            Self::And(a, b) => a.matches(lookup) && b.matches(lookup),
            Self::Or(a, b) => a.matches(lookup) || b.matches(lookup),
            Self::Not(inner) => !inner.matches(lookup),
            Self::Compare {
                property,
                op,
                value,
            } => compare_literal(&lookup(property), value)
                .map(|ordering| op.accepts(ordering))
                .unwrap_or(false),
        }
    }

    /// The tightest date that `property` is bounded above by, if every
    /// matching item must satisfy such a bound.
    pub fn upper_bound(&self, property: &str) -> Option<NaiveDateTime> {
        match self {
            Self::And(a, b) => match (a.upper_bound(property), b.upper_bound(property)) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            },
            Self::Or(a, b) => match (a.upper_bound(property), b.upper_bound(property)) {
                (Some(x), Some(y)) => Some(x.max(y)),
                _ => None,
            },
            Self::Not(_) => None,
            Self::Compare {
                property: p,
                op: CmpOp::Le | CmpOp::Lt | CmpOp::Eq,
                value: Literal::Text(text),
            } if p.eq_ignore_ascii_case(property) => parse_date_literal(text),
            Self::Compare { .. } => None,
        }
    }

    /// Mirror of [`Expr::upper_bound`] for `>=`, `>` and `=` comparisons.
    pub fn lower_bound(&self, property: &str) -> Option<NaiveDateTime> {
        match self {
            Self::And(a, b) => match (a.lower_bound(property), b.lower_bound(property)) {
                (Some(x), Some(y)) => Some(x.max(y)),
                (x, y) => x.or(y),
            },
            Self::Or(a, b) => match (a.lower_bound(property), b.lower_bound(property)) {
                (Some(x), Some(y)) => Some(x.min(y)),
                _ => None,
            },
            Self::Not(_) => None,
            Self::Compare {
                property: p,
                op: CmpOp::Ge | CmpOp::Gt | CmpOp::Eq,
                value: Literal::Text(text),
            } if p.eq_ignore_ascii_case(property) => parse_date_literal(text),
            Self::Compare { .. } => None,
        }
    }
}

/// Total order used by filters and by collection sorting.
pub fn compare_variants(a: &Variant, b: &Variant) -> Ordering {
    match (a, b) {
        (Variant::Empty, Variant::Empty) => Ordering::Equal,
        (Variant::Empty, _) => Ordering::Less,
        (_, Variant::Empty) => Ordering::Greater,
        (Variant::Date(x), Variant::Date(y)) => x.cmp(y),
        (Variant::Int(x), Variant::Int(y)) => x.cmp(y),
        (Variant::Bool(x), Variant::Bool(y)) => x.cmp(y),
        (Variant::Text(x), Variant::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (x, y) => x.type_name().cmp(y.type_name()),
    }
}

fn compare_literal(actual: &Variant, literal: &Literal) -> Option<Ordering> {
    match (actual, literal) {
        (Variant::Empty, _) => None,
        (Variant::Date(d), Literal::Text(text)) => parse_date_literal(text).map(|l| d.cmp(&l)),
        (Variant::Text(t), Literal::Text(text)) => {
            Some(t.to_lowercase().cmp(&text.to_lowercase()))
        }
        (Variant::Int(i), Literal::Number(n)) => Some(i.cmp(n)),
        (Variant::Int(i), Literal::Text(text)) => text.trim().parse::<i64>().ok().map(|n| i.cmp(&n)),
        (Variant::Bool(b), Literal::Bool(l)) => Some(b.cmp(l)),
        (Variant::Bool(b), Literal::Number(n)) => Some(b.cmp(&(*n != 0))),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Property(String),
    Text(String),
    Number(i64),
    Word(String),
    Op(CmpOp),
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, HostError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '[' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(invalid("unterminated property name")),
                    }
                }
                if name.trim().is_empty() {
                    return Err(invalid("empty property name"));
                }
                tokens.push(Token::Property(name.trim().to_string()));
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => text.push(ch),
                        None => return Err(invalid("unterminated text literal")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '<' => {
                chars.next();
                let op = match chars.peek() {
                    Some('=') => {
                        chars.next();
                        CmpOp::Le
                    }
                    Some('>') => {
                        chars.next();
                        CmpOp::Ne
                    }
                    _ => CmpOp::Lt,
                };
                tokens.push(Token::Op(op));
            }
            '>' => {
                chars.next();
                let op = if chars.peek() == Some(&'=') {
                    chars.next();
                    CmpOp::Ge
                } else {
                    CmpOp::Gt
                };
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut digits = String::new();
                digits.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let number = digits
                    .parse::<i64>()
                    .map_err(|_| invalid(&format!("bad number '{}'", digits)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '@' => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if !(w.is_ascii_alphanumeric() || w == '@' || w == '_') {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                if word.starts_with('@') {
                    return Err(invalid("DASL (@SQL=) queries are not supported"));
                }
                tokens.push(Token::Word(word.to_ascii_uppercase()));
            }
            other => return Err(invalid(&format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, HostError> {
        let mut left = self.and_expr()?;
        while self.eat_word("OR") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, HostError> {
        let mut left = self.unary()?;
        while self.eat_word("AND") {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, HostError> {
        if self.eat_word("NOT") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(invalid("missing ')'")),
                }
            }
            Some(Token::Property(property)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    _ => return Err(invalid(&format!("expected operator after [{}]", property))),
                };
                let value = match self.next() {
                    Some(Token::Text(text)) => Literal::Text(text),
                    Some(Token::Number(n)) => Literal::Number(n),
                    Some(Token::Word(w)) if w == "TRUE" => Literal::Bool(true),
                    Some(Token::Word(w)) if w == "FALSE" => Literal::Bool(false),
                    _ => return Err(invalid(&format!("expected value for [{}]", property))),
                };
                Ok(Expr::Compare {
                    property,
                    op,
                    value,
                })
            }
            Some(token) => Err(invalid(&format!("unexpected token {:?}", token))),
            None => Err(invalid("unexpected end of filter")),
        }
    }
}

/// Parse a filter expression.
pub fn parse(input: &str) -> Result<Expr, HostError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(invalid("empty filter"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(invalid("trailing input after expression"));
    }
    Ok(expr)
}

fn invalid(message: &str) -> HostError {
    HostError::InvalidFilter(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn item(pairs: &[(&str, Variant)]) -> HashMap<String, Variant> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(filter: &str, props: &HashMap<String, Variant>) -> bool {
        let expr = parse(filter).unwrap();
        expr.matches(&|p| props.get(p).cloned().unwrap_or(Variant::Empty))
    }

    #[test]
    fn date_literal_uses_month_first_format() {
        assert_eq!(format_date_literal(dt("2025-03-07 09:05:00")), "03/07/2025 09:05");
        assert_eq!(
            parse_date_literal("03/07/2025 09:05"),
            Some(dt("2025-03-07 09:05:00"))
        );
        assert_eq!(parse_date_literal("03/07/2025"), Some(dt("2025-03-07 00:00:00")));
        assert_eq!(parse_date_literal("2025-03-07"), None);
    }

    #[test]
    fn message_class_range_selects_appointments_only() {
        let filter = "[MessageClass] >= 'IPM.Appointment' AND [MessageClass] < 'IPM.Appointment{'";
        let appt = item(&[("MessageClass", "IPM.Appointment".into())]);
        let custom = item(&[("MessageClass", "IPM.Appointment.Custom".into())]);
        let request = item(&[("MessageClass", "IPM.Schedule.Meeting.Request".into())]);
        let note = item(&[("MessageClass", "IPM.Note".into())]);

        assert!(eval(filter, &appt));
        assert!(eval(filter, &custom));
        assert!(!eval(filter, &request));
        assert!(!eval(filter, &note));
    }

    #[test]
    fn date_window_overlap() {
        let filter = "[Start] <= '03/14/2025 09:00' AND [End] >= '03/07/2025 09:00'";
        let inside = item(&[
            ("Start", dt("2025-03-10 10:00:00").into()),
            ("End", dt("2025-03-10 11:00:00").into()),
        ]);
        let before = item(&[
            ("Start", dt("2025-03-01 10:00:00").into()),
            ("End", dt("2025-03-01 11:00:00").into()),
        ]);
        let spanning = item(&[
            ("Start", dt("2025-03-06 10:00:00").into()),
            ("End", dt("2025-03-08 11:00:00").into()),
        ]);

        assert!(eval(filter, &inside));
        assert!(!eval(filter, &before));
        assert!(eval(filter, &spanning));
    }

    #[test]
    fn missing_property_never_matches() {
        let props = item(&[]);
        assert!(!eval("[Unread] = true", &props));
        assert!(!eval("[Subject] <> 'x'", &props));
    }

    #[test]
    fn or_not_and_parentheses() {
        let props = item(&[("Unread", true.into()), ("Importance", Variant::Int(2))]);
        assert!(eval("[Unread] = true AND ([Importance] = 2 OR [Importance] = 1)", &props));
        assert!(!eval("NOT [Unread] = true", &props));
        assert!(eval("[Importance] > 1", &props));
    }

    #[test]
    fn quoted_literals_escape_quotes() {
        let props = item(&[("Subject", "Bob's report".into())]);
        assert!(eval(&format!("[Subject] = {}", quote("bob's REPORT")), &props));
    }

    #[test]
    fn upper_bound_follows_conjunctions() {
        let expr = parse("[Start] <= '03/14/2025 09:00' AND [End] >= '03/07/2025 09:00'").unwrap();
        assert_eq!(expr.upper_bound("Start"), Some(dt("2025-03-14 09:00:00")));
        assert_eq!(expr.upper_bound("End"), None);

        let or = parse("[Start] <= '03/14/2025 09:00' OR [Subject] = 'x'").unwrap();
        assert_eq!(or.upper_bound("Start"), None);
        assert_eq!(expr.lower_bound("End"), Some(dt("2025-03-07 09:00:00")));
        assert_eq!(expr.lower_bound("Start"), None);
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(matches!(parse(""), Err(HostError::InvalidFilter(_))));
        assert!(matches!(parse("[Start <= 'x'"), Err(HostError::InvalidFilter(_))));
        assert!(matches!(parse("[Start] 'x'"), Err(HostError::InvalidFilter(_))));
        assert!(matches!(parse("[Subject] = 'open"), Err(HostError::InvalidFilter(_))));
        assert!(matches!(
            parse("@SQL=\"urn:schemas:httpmail:subject\" LIKE '%x%'"),
            Err(HostError::InvalidFilter(_))
        ));
        assert!(matches!(parse("[A] = 1 [B] = 2"), Err(HostError::InvalidFilter(_))));
    }
}
