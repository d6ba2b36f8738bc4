//! JSON fixtures that seed a [`SandboxHost`].
//!
//! ```json
//! {
//!   "current_user": "me@example.com",
//!   "inbox": [{ "Subject": "Hello", "SenderEmailAddress": "a@example.com",
//!               "ReceivedTime": "2025-03-07 09:30:00", "Unread": true }],
//!   "calendar": [{ "Subject": "Standup", "Start": "2025-03-03 09:00:00",
//!                  "End": "2025-03-03 09:15:00",
//!                  "recurrence": { "interval_days": 7 } }],
//!   "folders": { "Projects": [] },
//!   "stores": { "Archive": { "2019": [] } }
//! }
//! ```
//!
//! Snake-case keys configure the item; every other key is a host property.
//! Strings shaped `YYYY-MM-DD HH:MM:SS` become dates.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use super::sandbox::{ItemRecord, Recurrence, SandboxHost};
use super::{FolderKind, ItemKind, Variant};

const FIXTURE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub current_user: Option<String>,
    /// Name of the default store.
    pub store: Option<String>,
    pub inbox: Vec<FixtureItem>,
    pub calendar: Vec<FixtureItem>,
    pub tasks: Vec<FixtureItem>,
    pub drafts: Vec<FixtureItem>,
    pub sent_items: Vec<FixtureItem>,
    /// Subfolders of the inbox.
    pub folders: BTreeMap<String, Vec<FixtureItem>>,
    /// Additional stores, each a map of top-level folder name to items.
    pub stores: BTreeMap<String, BTreeMap<String, Vec<FixtureItem>>>,
    /// Registered free/busy strings by address.
    pub free_busy: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureItem {
    #[serde(default)]
    pub message_class: Option<String>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    /// Properties whose reads raise an ordinary host error.
    #[serde(default)]
    pub failing: Vec<String>,
    /// Properties whose reads raise a fatal host error.
    #[serde(default)]
    pub fatal: Vec<String>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl FixtureItem {
    fn into_record(self, kind: ItemKind, current_user: &str) -> Result<ItemRecord> {
        let mut record = match self.message_class {
            Some(class) if !class.eq_ignore_ascii_case(kind.message_class()) => {
                ItemRecord::new(class)
            }
            _ => ItemRecord::blank(kind, current_user),
        };
        for (name, value) in self.properties {
            let variant = to_variant(&value).with_context(|| format!("property '{}'", name))?;
            record = record.with(&name, variant);
        }
        if let Some(recurrence) = self.recurrence {
            record = record.recurring(recurrence);
        }
        for name in &self.failing {
            record = record.failing(name);
        }
        for name in &self.fatal {
            record = record.fatal(name);
        }
        Ok(record)
    }
}

fn to_variant(value: &Value) -> Result<Variant> {
    Ok(match value {
        Value::Null => Variant::Empty,
        Value::Bool(b) => Variant::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Variant::Int(i),
            None => bail!("only integer numbers are supported, got {}", n),
        },
        Value::String(s) => match NaiveDateTime::parse_from_str(s, FIXTURE_DATE_FORMAT) {
            Ok(date) => Variant::Date(date),
            Err(_) => Variant::Text(s.clone()),
        },
        Value::Array(_) | Value::Object(_) => bail!("nested values are not supported"),
    })
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse fixture")
    }

    /// Build a sandbox host holding the fixture's contents.
    pub fn into_host(self) -> Result<SandboxHost> {
        let host = match &self.store {
            Some(name) => SandboxHost::with_store(name),
            None => SandboxHost::new(),
        };
        if let Some(user) = &self.current_user {
            host.set_current_user(user);
        }
        let user = host.current_user();

        let defaults = [
            (FolderKind::Inbox, ItemKind::Mail, self.inbox),
            (FolderKind::Drafts, ItemKind::Mail, self.drafts),
            (FolderKind::SentItems, ItemKind::Mail, self.sent_items),
            (FolderKind::Calendar, ItemKind::Appointment, self.calendar),
            (FolderKind::Tasks, ItemKind::Task, self.tasks),
        ];
        for (folder, kind, items) in defaults {
            for item in items {
                let record = item
                    .into_record(kind, &user)
                    .with_context(|| format!("item in {}", folder.as_str()))?;
                host.add_item(folder, record);
            }
        }

        for (name, items) in self.folders {
            let folder = host.add_folder(FolderKind::Inbox, &name);
            for item in items {
                let record = item
                    .into_record(ItemKind::Mail, &user)
                    .with_context(|| format!("item in folder '{}'", name))?;
                host.add_item_to(&folder, record);
            }
        }

        for (store, folders) in self.stores {
            let root = host.add_store(&store);
            for (name, items) in folders {
                let folder = host.add_store_folder(&root, &name);
                for item in items {
                    let record = item
                        .into_record(ItemKind::Mail, &user)
                        .with_context(|| format!("item in '{}/{}'", store, name))?;
                    host.add_item_to(&folder, record);
                }
            }
        }

        for (address, slots) in &self.free_busy {
            host.set_free_busy(address, slots);
        }
        Ok(host)
    }
}

/// Load a fixture file into a new sandbox host.
pub fn load(path: &Path) -> Result<SandboxHost> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    Fixture::from_json(&content)?
        .into_host()
        .with_context(|| format!("Invalid fixture {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_default_folders_and_stores() {
        let host = Fixture::from_json(
            r#"{
                "current_user": "me@example.com",
                "inbox": [{ "Subject": "Hello", "Unread": true,
                            "ReceivedTime": "2025-03-07 09:30:00" }],
                "calendar": [{ "Subject": "Standup",
                               "Start": "2025-03-03 09:00:00",
                               "End": "2025-03-03 09:15:00",
                               "recurrence": { "interval_days": 7 } },
                             { "message_class": "IPM.Schedule.Meeting.Request",
                               "Subject": "Invite" }],
                "tasks": [{ "Subject": "File report", "fatal": ["DueDate"] }],
                "stores": { "Archive": { "2019": [{ "Subject": "Old" }] } }
            }"#,
        )
        .unwrap()
        .into_host()
        .unwrap();

        assert_eq!(host.current_user(), "me@example.com");
        let inbox = host.folder_items(FolderKind::Inbox);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].properties.get("Unread"), Some(&Variant::Bool(true)));
        assert!(matches!(
            inbox[0].properties.get("ReceivedTime"),
            Some(Variant::Date(_))
        ));

        let calendar = host.folder_items(FolderKind::Calendar);
        assert_eq!(calendar.len(), 2);
        assert!(calendar[0].recurrence.is_some());
        assert_eq!(calendar[1].message_class, "IPM.Schedule.Meeting.Request");

        let tasks = host.folder_items(FolderKind::Tasks);
        assert!(tasks[0].failing.contains_key("DueDate"));
    }

    #[test]
    fn rejects_nested_property_values() {
        let fixture = Fixture::from_json(r#"{ "inbox": [{ "Subject": ["a"] }] }"#).unwrap();
        assert!(fixture.into_host().is_err());
    }
}
