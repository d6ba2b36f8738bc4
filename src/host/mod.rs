//! Boundary to the native automation host.
//!
//! The host exposes a single-threaded object graph: an application object,
//! a namespace, folders, item collections and polymorphic items. Handles are
//! `Rc`-based and therefore `!Send`, so anything built from them stays on the
//! thread that created it.
//!
//! Two implementations of the thread-safe entry points exist:
//!
//! - [`AutomationRuntime`]: per-thread runtime initialization.
//! - [`HostConnector`]: attaching to or launching the host application.
//!
//! The [`sandbox`] module provides an in-process host used by tests and by
//! fixture-driven serving.

pub mod filter;
pub mod fixture;
pub mod sandbox;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Errors raised by host calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Property '{0}' is not available on this item")]
    MissingProperty(String),

    #[error("Property '{property}' is not a {expected}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
    },

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Host unavailable: {0}")]
    Unavailable(String),

    #[error("Host operation failed: {0}")]
    Operation(String),

    /// A severe host-level failure. Listings must still be able to skip it.
    #[error("Fatal host error: {0}")]
    Fatal(String),
}

/// A native property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Empty,
    Bool(bool),
    Int(i64),
    Text(String),
    Date(NaiveDateTime),
}

impl Variant {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
        }
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<NaiveDateTime> for Variant {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

/// Well-known default folders of the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderKind {
    DeletedItems,
    SentItems,
    Inbox,
    Calendar,
    Tasks,
    Drafts,
}

impl FolderKind {
    pub const ALL: [FolderKind; 6] = [
        Self::Inbox,
        Self::Calendar,
        Self::Tasks,
        Self::Drafts,
        Self::SentItems,
        Self::DeletedItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeletedItems => "Deleted Items",
            Self::SentItems => "Sent Items",
            Self::Inbox => "Inbox",
            Self::Calendar => "Calendar",
            Self::Tasks => "Tasks",
            Self::Drafts => "Drafts",
        }
    }

    /// The host's numeric folder constant.
    pub fn code(&self) -> i32 {
        match self {
            Self::DeletedItems => 3,
            Self::SentItems => 5,
            Self::Inbox => 6,
            Self::Calendar => 9,
            Self::Tasks => 13,
            Self::Drafts => 16,
        }
    }
}

/// Kinds of item the application can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Mail,
    Appointment,
    Task,
}

impl ItemKind {
    pub fn message_class(&self) -> &'static str {
        match self {
            Self::Mail => "IPM.Note",
            Self::Appointment => "IPM.Appointment",
            Self::Task => "IPM.Task",
        }
    }
}

/// Response to a meeting invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingResponse {
    Tentative,
    Accepted,
    Declined,
}

impl MeetingResponse {
    /// The host's response status code.
    pub fn code(&self) -> i64 {
        match self {
            Self::Tentative => 2,
            Self::Accepted => 3,
            Self::Declined => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Accepted => "accept",
            Self::Declined => "decline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "accept" => Some(Self::Accepted),
            "decline" => Some(Self::Declined),
            "tentative" => Some(Self::Tentative),
            _ => None,
        }
    }
}

/// Per-thread initialization of the automation runtime.
pub trait AutomationRuntime: Send + Sync {
    /// Initialize the runtime for the calling thread.
    fn initialize_thread(&self) -> Result<(), HostError>;

    /// Undo [`AutomationRuntime::initialize_thread`] for the calling thread.
    fn uninitialize_thread(&self);

    /// Release native handles that are no longer referenced.
    fn free_unused(&self) {}
}

/// Entry point to the host application.
pub trait HostConnector: Send + Sync {
    /// Attach to an already running host instance.
    fn attach(&self) -> Result<Rc<dyn Application>, HostError>;

    /// Launch a new host instance.
    fn launch(&self) -> Result<Rc<dyn Application>, HostError>;
}

pub trait Application {
    fn namespace(&self, name: &str) -> Result<Rc<dyn Namespace>, HostError>;

    /// Create an unsaved item. It receives an EntryID once saved or sent.
    fn create_item(&self, kind: ItemKind) -> Result<Box<dyn Item>, HostError>;
}

pub trait Namespace {
    fn default_folder(&self, kind: FolderKind) -> Result<Box<dyn Folder>, HostError>;

    /// O(1) dereference of an EntryID, independent of folder location.
    fn item_from_id(&self, entry_id: &str) -> Result<Box<dyn Item>, HostError>;

    /// Root folders of every store in the profile, in profile order.
    fn stores(&self) -> Result<Vec<Box<dyn Folder>>, HostError>;

    fn current_user_address(&self) -> Result<String, HostError>;

    /// Free/busy string for `address` starting at `start`, one character per
    /// `slot_minutes` slot. `None` when the address cannot be resolved.
    fn free_busy(
        &self,
        address: &str,
        start: NaiveDate,
        slot_minutes: u32,
    ) -> Result<Option<String>, HostError>;
}

pub trait Folder {
    fn entry_id(&self) -> Result<String, HostError>;

    fn name(&self) -> Result<String, HostError>;

    fn subfolder(&self, name: &str) -> Result<Box<dyn Folder>, HostError>;

    fn items(&self) -> Result<Box<dyn Items>, HostError>;
}

/// A host item collection.
///
/// `restrict` returns a new collection that inherits the recurrence and sort
/// settings of the receiver.
pub trait Items {
    fn restrict(&self, filter: &str) -> Result<Box<dyn Items>, HostError>;

    fn set_include_recurrences(&mut self, include: bool) -> Result<(), HostError>;

    /// Sort by a bracketed property name such as `[Start]`.
    fn sort(&mut self, property: &str, descending: bool) -> Result<(), HostError>;

    fn count(&self) -> Result<usize, HostError>;

    fn iter(&self) -> Box<dyn Iterator<Item = Result<Box<dyn Item>, HostError>> + '_>;
}

/// A polymorphic host item (mail, appointment, task, meeting artifact).
pub trait Item {
    fn get(&self, property: &str) -> Result<Variant, HostError>;

    fn put(&mut self, property: &str, value: Variant) -> Result<(), HostError>;

    fn save(&mut self) -> Result<(), HostError>;

    fn delete(&mut self) -> Result<(), HostError>;

    fn send(&mut self) -> Result<(), HostError>;

    fn reply(&self, reply_all: bool) -> Result<Box<dyn Item>, HostError>;

    fn forward(&self) -> Result<Box<dyn Item>, HostError>;

    fn move_to(&mut self, folder: &dyn Folder) -> Result<(), HostError>;

    /// Answer a meeting invitation. Returns the unsent response message.
    fn respond(&mut self, response: MeetingResponse) -> Result<Box<dyn Item>, HostError>;

    fn add_attachment(&mut self, path: &Path) -> Result<(), HostError>;

    fn attachment_count(&self) -> Result<usize, HostError>;

    /// Save every attachment into `dir` under its own file name, replacing
    /// files of the same name. Returns the written paths in attachment order.
    fn save_attachments(&self, dir: &Path) -> Result<Vec<PathBuf>, HostError>;

    /// Primary SMTP address of an Exchange sender.
    fn exchange_sender_address(&self) -> Result<String, HostError>;
}
