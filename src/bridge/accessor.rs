//! Defensive property reads.
//!
//! Host items are polymorphic: a property that exists on one item kind may
//! be missing on another, and any read can throw. Every read here turns a
//! failure or a type mismatch into the caller's default.

use chrono::{Datelike, NaiveDateTime};

use crate::host::{Item, Variant};

/// Year the host uses for "no date".
const NULL_DATE_YEAR: i32 = 4501;

pub struct SafeAccessor<'a> {
    item: &'a dyn Item,
}

impl<'a> SafeAccessor<'a> {
    pub fn new(item: &'a dyn Item) -> Self {
        Self { item }
    }

    fn read(&self, property: &str) -> Option<Variant> {
        match self.item.get(property) {
            Ok(Variant::Empty) => None,
            Ok(value) => Some(value),
            Err(e) => {
                tracing::trace!(property, error = %e, "Property read failed");
                None
            }
        }
    }

    /// The raw value, or `default` when the read fails or is empty.
    pub fn get(&self, property: &str, default: Variant) -> Variant {
        self.read(property).unwrap_or(default)
    }

    pub fn optional_text(&self, property: &str) -> Option<String> {
        match self.read(property)? {
            Variant::Text(text) => Some(text),
            other => mismatch(property, "text", &other),
        }
    }

    pub fn text(&self, property: &str, default: &str) -> String {
        self.optional_text(property)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn bool(&self, property: &str, default: bool) -> bool {
        match self.read(property) {
            Some(Variant::Bool(value)) => value,
            Some(other) => mismatch(property, "bool", &other).unwrap_or(default),
            None => default,
        }
    }

    pub fn optional_int(&self, property: &str) -> Option<i64> {
        match self.read(property)? {
            Variant::Int(value) => Some(value),
            other => mismatch(property, "int", &other),
        }
    }

    pub fn int(&self, property: &str, default: i64) -> i64 {
        self.optional_int(property).unwrap_or(default)
    }

    pub fn optional_date(&self, property: &str) -> Option<NaiveDateTime> {
        match self.read(property)? {
            Variant::Date(value) if value.year() >= NULL_DATE_YEAR => None,
            Variant::Date(value) => Some(value),
            other => mismatch(property, "date", &other),
        }
    }
}

fn mismatch<T>(property: &str, expected: &str, actual: &Variant) -> Option<T> {
    tracing::trace!(
        property,
        expected,
        actual = actual.type_name(),
        "Property has unexpected type"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sandbox::ItemRecord;
    use crate::host::{FolderKind, HostConnector};
    use crate::host::sandbox::SandboxHost;

    fn item_with(record: ItemRecord) -> (SandboxHost, Box<dyn Item>) {
        let host = SandboxHost::new();
        let id = host.add_item(FolderKind::Inbox, record);
        let namespace = host.attach().unwrap().namespace("MAPI").unwrap();
        let item = namespace.item_from_id(&id).unwrap();
        (host, item)
    }

    #[test]
    fn missing_and_throwing_properties_yield_defaults() {
        let record = ItemRecord::new("IPM.Note")
            .with("Subject", "Hi")
            .failing("Body")
            .fatal("Unread");
        let (_host, item) = item_with(record);
        let access = SafeAccessor::new(item.as_ref());

        assert_eq!(access.text("Subject", "(No Subject)"), "Hi");
        assert_eq!(access.text("Body", ""), "");
        assert!(access.bool("Unread", true));
        assert_eq!(access.optional_text("Location"), None);
        assert_eq!(access.get("Location", Variant::Int(7)), Variant::Int(7));
    }

    #[test]
    fn type_mismatch_counts_as_failure() {
        let record = ItemRecord::new("IPM.Task")
            .with("Status", "done")
            .with("Complete", Variant::Int(1));
        let (_host, item) = item_with(record);
        let access = SafeAccessor::new(item.as_ref());

        assert_eq!(access.optional_int("Status"), None);
        assert!(!access.bool("Complete", false));
    }

    #[test]
    fn null_host_date_reads_as_none() {
        let null = NaiveDateTime::parse_from_str("4501-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let real = NaiveDateTime::parse_from_str("2025-01-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let record = ItemRecord::new("IPM.Task")
            .with("DueDate", null)
            .with("StartDate", real);
        let (_host, item) = item_with(record);
        let access = SafeAccessor::new(item.as_ref());

        assert_eq!(access.optional_date("DueDate"), None);
        assert_eq!(access.optional_date("StartDate"), Some(real));
    }
}
