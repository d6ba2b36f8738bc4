//! Item collections and lazy recurrence expansion.
//!
//! With recurrences enabled and an ascending `[Start]` sort, each series is
//! expanded one occurrence at a time and merged with the rest of the folder
//! in start order. Bounds are taken from the restriction chain: occurrences
//! ending before the `[End]` lower bound are skipped arithmetically, and
//! expansion stops past the `[Start]` upper bound. A series without an end
//! date and without an upper bound never runs out of occurrences.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;

use chrono::{Duration, NaiveDateTime};

use super::objects::SandboxItem;
use super::{ItemRecord, SandboxHost};
use crate::host::filter::{self, compare_variants, Expr};
use crate::host::{HostError, Item, Items, Variant};

type Occurrence = Option<(NaiveDateTime, NaiveDateTime)>;

pub(super) struct SandboxItems {
    host: SandboxHost,
    ids: Rc<Vec<String>>,
    filters: Vec<Rc<Expr>>,
    include_recurrences: bool,
    sort: Option<(String, bool)>,
}

impl SandboxItems {
    pub(super) fn new(host: SandboxHost, ids: Vec<String>) -> Self {
        Self {
            host,
            ids: Rc::new(ids),
            filters: Vec::new(),
            include_recurrences: false,
            sort: None,
        }
    }

    fn rows(&self) -> Vec<(String, Rc<ItemRecord>)> {
        let state = self.host.lock();
        self.ids
            .iter()
            .filter_map(|id| {
                state
                    .items
                    .get(id)
                    .map(|record| (id.clone(), Rc::new(record.clone())))
            })
            .collect()
    }

    fn passes(&self, record: &ItemRecord, occurrence: Occurrence) -> bool {
        let lookup = |property: &str| match (occurrence, property) {
            (Some((start, _)), "Start") => Variant::Date(start),
            (Some((_, end)), "End") => Variant::Date(end),
            _ => record.filter_value(property),
        };
        self.filters.iter().all(|f| f.matches(&lookup))
    }

    /// Recurrences are only expanded on an ascending `[Start]` sort.
    fn expands(&self) -> bool {
        self.include_recurrences
            && matches!(&self.sort, Some((p, false)) if p.eq_ignore_ascii_case("Start"))
    }

    fn bounds(&self) -> Bounds {
        Bounds {
            end_from: self.filters.iter().filter_map(|f| f.lower_bound("End")).max(),
            start_until: self.filters.iter().filter_map(|f| f.upper_bound("Start")).min(),
        }
    }

    fn stored(&self, entry_id: String, occurrence: Occurrence) -> Box<dyn Item> {
        Box::new(SandboxItem::stored(self.host.clone(), entry_id, occurrence))
    }
}

impl Items for SandboxItems {
    fn restrict(&self, filter: &str) -> Result<Box<dyn Items>, HostError> {
        let expr = filter::parse(filter)?;
        let mut filters = self.filters.clone();
        if !self.host.lock().ignore_restrictions {
            filters.push(Rc::new(expr));
        }
        Ok(Box::new(SandboxItems {
            host: self.host.clone(),
            ids: Rc::clone(&self.ids),
            filters,
            include_recurrences: self.include_recurrences,
            sort: self.sort.clone(),
        }))
    }

    fn set_include_recurrences(&mut self, include: bool) -> Result<(), HostError> {
        self.include_recurrences = include;
        Ok(())
    }

    fn sort(&mut self, property: &str, descending: bool) -> Result<(), HostError> {
        let name = property.trim().trim_start_matches('[').trim_end_matches(']');
        if name.is_empty() {
            return Err(HostError::Operation(format!("cannot sort by '{}'", property)));
        }
        self.sort = Some((name.to_string(), descending));
        Ok(())
    }

    fn count(&self) -> Result<usize, HostError> {
        {
            let mut state = self.host.lock();
            if state.count_failures > 0 {
                state.count_failures -= 1;
                return Err(HostError::Unavailable("the host is busy".into()));
            }
        }
        if self.expands() && self.bounds().start_until.is_none() {
            let endless = self
                .rows()
                .iter()
                .any(|(_, r)| r.recurrence.is_some_and(|rec| rec.until.is_none()));
            if endless {
                return Ok(i32::MAX as usize);
            }
        }
        Ok(self.iter().count())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<Box<dyn Item>, HostError>> + '_> {
        let rows = self.rows();
        if !self.expands() {
            let mut rows: Vec<_> = rows
                .into_iter()
                .filter(|(_, record)| self.passes(record, None))
                .collect();
            if let Some((property, descending)) = &self.sort {
                rows.sort_by(|a, b| {
                    compare_variants(&a.1.filter_value(property), &b.1.filter_value(property))
                });
                if *descending {
                    rows.reverse();
                }
            }
            return Box::new(
                rows.into_iter()
                    .map(|(id, _)| Ok::<_, HostError>(self.stored(id, None))),
            );
        }

        let expansion = Expansion::new(rows, self.bounds(), self.host.clone());
        Box::new(expansion.filter_map(move |(id, record, occurrence)| {
            if !self.passes(&record, occurrence) {
                return None;
            }
            if !record.is_appointment() {
                return Some(Err(HostError::Fatal(format!(
                    "cannot expand item of class '{}'",
                    record.message_class
                ))));
            }
            Some(Ok(self.stored(id, occurrence)))
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bounds {
    /// Occurrences ending before this are never produced.
    end_from: Option<NaiveDateTime>,
    /// Occurrences starting after this are never produced.
    start_until: Option<NaiveDateTime>,
}

/// Occurrence schedule of one recurring appointment.
struct Schedule {
    first: NaiveDateTime,
    duration: Duration,
    step: Duration,
    last_start: Option<NaiveDateTime>,
}

impl Schedule {
    fn of(record: &ItemRecord) -> Option<Self> {
        let recurrence = record.recurrence?;
        if !record.is_appointment() {
            return None;
        }
        let Variant::Date(first) = record.filter_value("Start") else {
            return None;
        };
        let duration = match record.filter_value("End") {
            Variant::Date(end) if end > first => end - first,
            _ => Duration::zero(),
        };
        Some(Self {
            first,
            duration,
            step: Duration::days(i64::from(recurrence.interval_days.max(1))),
            last_start: recurrence
                .until
                .and_then(|date| date.and_hms_opt(23, 59, 59)),
        })
    }

    /// First occurrence that ends at or after `end_from`.
    fn first_from(&self, end_from: Option<NaiveDateTime>) -> NaiveDateTime {
        let Some(limit) = end_from else {
            return self.first;
        };
        let gap = limit - (self.first + self.duration);
        if gap <= Duration::zero() {
            return self.first;
        }
        let step = self.step.num_seconds();
        let skipped = (gap.num_seconds() + step - 1) / step;
        self.first + Duration::seconds(skipped * step)
    }

    fn allows(&self, start: NaiveDateTime, start_until: Option<NaiveDateTime>) -> bool {
        self.last_start.map_or(true, |last| start <= last)
            && start_until.map_or(true, |until| start <= until)
    }
}

/// Occurrences of `record` overlapping `[from, to)`, or its own span when it
/// does not recur.
pub(super) fn occurrences_between(
    record: &ItemRecord,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let Some(schedule) = Schedule::of(record) else {
        return match (record.filter_value("Start"), record.filter_value("End")) {
            (Variant::Date(start), Variant::Date(end)) if start < to && end > from => {
                vec![(start, end)]
            }
            _ => Vec::new(),
        };
    };
    let mut out = Vec::new();
    let mut start = schedule.first_from(Some(from));
    while start < to && schedule.allows(start, None) {
        out.push((start, start + schedule.duration));
        start += schedule.step;
    }
    out
}

struct Pending {
    key: NaiveDateTime,
    seq: usize,
    row: usize,
    occurrence: Occurrence,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.key, self.seq).cmp(&(other.key, other.seq))
    }
}

struct Expansion {
    rows: Vec<(String, Rc<ItemRecord>, Option<Schedule>)>,
    heap: BinaryHeap<Reverse<Pending>>,
    bounds: Bounds,
    host: SandboxHost,
    seq: usize,
}

impl Expansion {
    fn new(rows: Vec<(String, Rc<ItemRecord>)>, bounds: Bounds, host: SandboxHost) -> Self {
        let mut expansion = Self {
            rows: Vec::with_capacity(rows.len()),
            heap: BinaryHeap::new(),
            bounds,
            host,
            seq: 0,
        };
        for (row, (id, record)) in rows.into_iter().enumerate() {
            let schedule = Schedule::of(&record);
            match &schedule {
                Some(schedule) => {
                    let first = schedule.first_from(bounds.end_from);
                    if schedule.allows(first, bounds.start_until) {
                        expansion.push(first, row, Some((first, first + schedule.duration)));
                    }
                }
                None => {
                    let key = match record.filter_value("Start") {
                        Variant::Date(start) => start,
                        _ => NaiveDateTime::MIN,
                    };
                    expansion.push(key, row, None);
                }
            }
            expansion.rows.push((id, record, schedule));
        }
        expansion
    }

    fn push(&mut self, key: NaiveDateTime, row: usize, occurrence: Occurrence) {
        self.heap.push(Reverse(Pending {
            key,
            seq: self.seq,
            row,
            occurrence,
        }));
        self.seq += 1;
    }
}

impl Iterator for Expansion {
    type Item = (String, Rc<ItemRecord>, Occurrence);

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(next) = self.heap.pop()?;
        let (id, record, schedule) = &self.rows[next.row];
        let item = (id.clone(), Rc::clone(record), next.occurrence);
        let following = match (schedule, next.occurrence) {
            (Some(schedule), Some((start, _))) => {
                let following = start + schedule.step;
                Some(
                    schedule
                        .allows(following, self.bounds.start_until)
                        .then_some((following, following + schedule.duration)),
                )
            }
            _ => None,
        };
        if let Some(following) = following {
            self.host.lock().materialized += 1;
            if let Some((start, end)) = following {
                self.push(start, next.row, Some((start, end)));
            }
        }
        Some(item)
    }
}
