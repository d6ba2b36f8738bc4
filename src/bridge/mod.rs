//! Automation session over the host object graph.
//!
//! A [`Bridge`] owns the application handle and its `MAPI` namespace. It is
//! `!Send`: it lives and dies on the thread that connected it.
//!
//! Listings project each item and skip the ones that fail
//! ([`ItemOutcome`]). By-id operations dereference the EntryID directly and
//! report [`BridgeError::NotFound`] when it dangles.

pub mod accessor;
mod calendar;
mod mail;
mod tasks;

use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

pub use accessor::SafeAccessor;
pub use calendar::RecurrenceWindow;

use crate::host::{Application, Folder, FolderKind, HostConnector, HostError, Item, Namespace, Variant};
use crate::models::{OperationResult, DATE_FORMAT, TIMESTAMP_FORMAT};

/// Default cap on an unbounded calendar listing.
pub const DEFAULT_ALL_EVENTS_LIMIT: usize = 10_000;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Could not connect to or launch the host application: {0}")]
    Unavailable(#[source] HostError),

    #[error("{kind} not found: {entry_id}")]
    NotFound {
        kind: &'static str,
        entry_id: String,
    },

    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

impl BridgeError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn not_found(entity: Entity, entry_id: &str) -> Self {
        Self::NotFound {
            kind: entity.as_str(),
            entry_id: entry_id.to_string(),
        }
    }
}

/// Kinds of entity the tools address by EntryID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Email,
    Appointment,
    Task,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Appointment => "Appointment",
            Self::Task => "Task",
        }
    }

    /// Whether an item of `message_class` can be treated as this entity.
    fn accepts(&self, message_class: &str) -> bool {
        let class = message_class.to_ascii_lowercase();
        let appointment = class.starts_with("ipm.appointment");
        let task = class.starts_with("ipm.task");
        match self {
            Self::Email => !appointment && !task,
            Self::Appointment => appointment,
            Self::Task => task,
        }
    }
}

/// Why a listing left an item out.
#[derive(Debug)]
pub enum SkipReason {
    /// The item has no resolvable start time.
    NoStart,
    /// The host returned an item that does not overlap the requested window.
    OutsideWindow,
    /// Filtered out by the caller's criteria.
    Excluded,
    Failed(HostError),
}

/// Per-item result of a listing.
#[derive(Debug)]
pub enum ItemOutcome<T> {
    Projected(T),
    Skipped(SkipReason),
}

impl<T> ItemOutcome<T> {
    pub fn projected(self) -> Option<T> {
        match self {
            Self::Projected(value) => Some(value),
            Self::Skipped(_) => None,
        }
    }
}

impl<T> From<Result<T, HostError>> for ItemOutcome<T> {
    fn from(result: Result<T, HostError>) -> Self {
        match result {
            Ok(value) => Self::Projected(value),
            Err(e) => Self::Skipped(SkipReason::Failed(e)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Store name used for root-level folder lookups.
    pub account: Option<String>,
    /// Maximum number of occurrences returned by an unbounded calendar listing.
    pub all_events_limit: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            account: None,
            all_events_limit: DEFAULT_ALL_EVENTS_LIMIT,
        }
    }
}

pub struct Bridge {
    application: Rc<dyn Application>,
    namespace: Rc<dyn Namespace>,
    options: BridgeOptions,
}

impl Bridge {
    /// Attach to a running host, falling back to launching one.
    pub fn connect(connector: &dyn HostConnector, options: BridgeOptions) -> Result<Self, BridgeError> {
        let application = match connector.attach() {
            Ok(application) => {
                tracing::debug!("Attached to running host instance");
                application
            }
            Err(attach_error) => {
                tracing::info!(error = %attach_error, "No running host instance, launching one");
                connector.launch().map_err(|e| {
                    tracing::error!(error = %e, "Failed to launch host application");
                    BridgeError::Unavailable(e)
                })?
            }
        };
        let namespace = application.namespace("MAPI")?;
        Ok(Self {
            application,
            namespace,
            options,
        })
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub(crate) fn application(&self) -> &dyn Application {
        self.application.as_ref()
    }

    pub(crate) fn namespace(&self) -> &dyn Namespace {
        self.namespace.as_ref()
    }

    pub fn inbox(&self) -> Result<Box<dyn Folder>, BridgeError> {
        Ok(self.namespace.default_folder(FolderKind::Inbox)?)
    }

    pub fn calendar(&self) -> Result<Box<dyn Folder>, BridgeError> {
        Ok(self.namespace.default_folder(FolderKind::Calendar)?)
    }

    pub fn tasks(&self) -> Result<Box<dyn Folder>, BridgeError> {
        Ok(self.namespace.default_folder(FolderKind::Tasks)?)
    }

    /// Number of items in the default inbox. Used as the warm-up call.
    pub fn inbox_count(&self) -> Result<usize, BridgeError> {
        Ok(self.inbox()?.items()?.count()?)
    }

    /// Resolve a folder by name: an inbox subfolder first, then a top-level
    /// folder of the account's store.
    pub fn folder_by_name(&self, name: &str) -> Option<Box<dyn Folder>> {
        if let Some(folder) = self.inbox().ok().and_then(|inbox| inbox.subfolder(name).ok()) {
            return Some(folder);
        }
        self.root_store()?.subfolder(name).ok()
    }

    /// The store named after the configured account, else the first store.
    fn root_store(&self) -> Option<Box<dyn Folder>> {
        let mut stores = self.namespace.stores().ok()?;
        if let Some(account) = &self.options.account {
            let position = stores.iter().position(|store| {
                store
                    .name()
                    .is_ok_and(|name| name.eq_ignore_ascii_case(account))
            });
            if let Some(position) = position {
                return Some(stores.swap_remove(position));
            }
            tracing::debug!(account = %account, "No store matches the configured account");
        }
        (!stores.is_empty()).then(|| stores.swap_remove(0))
    }

    /// Dereference an EntryID of any kind. `None` when it does not resolve.
    pub fn item_by_id(&self, entry_id: &str) -> Option<Box<dyn Item>> {
        if entry_id.is_empty() {
            return None;
        }
        self.namespace.item_from_id(entry_id).ok()
    }

    fn require(&self, entity: Entity, entry_id: &str) -> Result<Box<dyn Item>, BridgeError> {
        let item = self
            .item_by_id(entry_id)
            .ok_or_else(|| BridgeError::not_found(entity, entry_id))?;
        let class = SafeAccessor::new(item.as_ref()).text("MessageClass", "");
        if !entity.accepts(&class) {
            tracing::debug!(entry_id, class = %class, entity = entity.as_str(), "EntryID refers to another kind of item");
            return Err(BridgeError::not_found(entity, entry_id));
        }
        Ok(item)
    }

    /// Delete an item of the given kind.
    fn delete_item(&self, entity: Entity, entry_id: &str) -> Result<OperationResult, BridgeError> {
        let mut item = self.require(entity, entry_id)?;
        let result = item.delete();
        mutation(entity, entry_id, result, format!("{} deleted", entity.as_str()))
    }
}

/// Map the outcome of a host mutation. A dangling EntryID stays a per-call
/// error; any other host failure becomes an unsuccessful result.
fn mutation(
    entity: Entity,
    entry_id: &str,
    result: Result<(), HostError>,
    done: impl Into<String>,
) -> Result<OperationResult, BridgeError> {
    match result {
        Ok(()) => Ok(OperationResult::ok(done)),
        Err(HostError::NotFound(_)) => Err(BridgeError::not_found(entity, entry_id)),
        Err(e) => {
            tracing::warn!(entity = entity.as_str(), entry_id, error = %e, "Host operation failed");
            Ok(OperationResult::failed(e.to_string()))
        }
    }
}

/// Write several properties, stopping at the first failure.
fn put_all(item: &mut dyn Item, values: Vec<(&str, Variant)>) -> Result<(), HostError> {
    for (property, value) in values {
        item.put(property, value)?;
    }
    Ok(())
}

fn required_text(item: &dyn Item, property: &str) -> Result<String, HostError> {
    match item.get(property)? {
        Variant::Text(text) => Ok(text),
        _ => Err(HostError::TypeMismatch {
            property: property.to_string(),
            expected: "text",
        }),
    }
}

fn required_bool(item: &dyn Item, property: &str) -> Result<bool, HostError> {
    match item.get(property)? {
        Variant::Bool(value) => Ok(value),
        _ => Err(HostError::TypeMismatch {
            property: property.to_string(),
            expected: "bool",
        }),
    }
}

/// Parse a caller-supplied `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn parse_timestamp(field: &str, value: &str) -> Result<NaiveDateTime, BridgeError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).map_err(|_| {
        BridgeError::validation(
            field,
            format!("'{}' is not a YYYY-MM-DD HH:MM:SS timestamp", value),
        )
    })
}

/// Parse a caller-supplied `YYYY-MM-DD` date.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, BridgeError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        BridgeError::validation(field, format!("'{}' is not a YYYY-MM-DD date", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kinds_accept_matching_classes() {
        assert!(Entity::Email.accepts("IPM.Note"));
        assert!(Entity::Email.accepts("IPM.Schedule.Meeting.Request"));
        assert!(!Entity::Email.accepts("IPM.Task"));
        assert!(Entity::Appointment.accepts("IPM.Appointment.Occurrence"));
        assert!(!Entity::Appointment.accepts("IPM.Schedule.Meeting.Request"));
        assert!(Entity::Task.accepts("ipm.task"));
    }

    #[test]
    fn validation_errors_name_the_field() {
        let err = parse_timestamp("start", "tomorrow").unwrap_err();
        assert!(matches!(&err, BridgeError::Validation { field, .. } if field == "start"));
        assert!(err.to_string().starts_with("Invalid start"));

        assert!(parse_date("due_date", "2025-13-01").is_err());
        assert_eq!(
            parse_date("due_date", "2025-01-01").unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }
}
