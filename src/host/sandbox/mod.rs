//! In-process automation host.
//!
//! [`SandboxHost`] plays the part of the host process: a shared store of
//! folders and items that every handle reads through. It reproduces the host
//! behaviors the bridge has to defend against:
//!
//! - polymorphic items whose properties may be missing or throw;
//! - meeting artifacts mixed into the calendar that fail when expanded;
//! - lazy recurrence expansion that never ends for a series without an end
//!   date unless the filter chain bounds `[Start]`;
//! - restrictions that are accepted but not applied;
//! - calls from threads that never initialized the runtime.

mod expand;
mod objects;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::{Application, AutomationRuntime, FolderKind, HostConnector, HostError, ItemKind, Variant};
use objects::SandboxApplication;

const DEFAULT_STORE: &str = "Mailbox";
const DEFAULT_USER: &str = "user@example.com";

/// A daily or weekly repeating series. `until` is inclusive; `None` never ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Recurrence {
    pub interval_days: u32,
    #[serde(default)]
    pub until: Option<NaiveDate>,
}

impl Recurrence {
    pub fn weekly() -> Self {
        Self {
            interval_days: 7,
            until: None,
        }
    }

    pub fn daily() -> Self {
        Self {
            interval_days: 1,
            until: None,
        }
    }

    pub fn until(mut self, date: NaiveDate) -> Self {
        self.until = Some(date);
        self
    }
}

/// The stored state of one item.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub message_class: String,
    pub properties: BTreeMap<String, Variant>,
    pub recurrence: Option<Recurrence>,
    /// Properties whose reads and writes raise the given error.
    pub failing: BTreeMap<String, HostError>,
    pub attachments: Vec<PathBuf>,
}

impl ItemRecord {
    pub fn new(message_class: impl Into<String>) -> Self {
        Self {
            message_class: message_class.into(),
            properties: BTreeMap::new(),
            recurrence: None,
            failing: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }

    /// A fresh item of `kind` carrying the defaults the host fills in.
    pub fn blank(kind: ItemKind, current_user: &str) -> Self {
        let record = Self::new(kind.message_class())
            .with("Subject", "")
            .with("Body", "");
        match kind {
            ItemKind::Mail => record
                .with("HTMLBody", "")
                .with("To", "")
                .with("CC", "")
                .with("BCC", "")
                .with("SenderName", "")
                .with("SenderEmailAddress", current_user)
                .with("SenderEmailType", "SMTP")
                .with("Unread", false)
                .with("ReceivedTime", Variant::Empty),
            ItemKind::Appointment => record
                .with("Location", "")
                .with("Start", Variant::Empty)
                .with("End", Variant::Empty)
                .with("AllDayEvent", false)
                .with("RequiredAttendees", "")
                .with("OptionalAttendees", "")
                .with("Organizer", current_user)
                .with("ResponseStatus", Variant::Int(1))
                .with("MeetingStatus", Variant::Int(0))
                .with("ResponseRequested", false),
            ItemKind::Task => record
                .with("DueDate", Variant::Empty)
                .with("Status", Variant::Int(0))
                .with("Importance", Variant::Int(1))
                .with("Complete", false)
                .with("PercentComplete", Variant::Int(0)),
        }
    }

    pub fn mail(subject: &str, sender: &str) -> Self {
        Self::blank(ItemKind::Mail, sender)
            .with("Subject", subject)
            .with("SenderName", sender)
    }

    pub fn appointment(
        subject: &str,
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    ) -> Self {
        Self::blank(ItemKind::Appointment, DEFAULT_USER)
            .with("Subject", subject)
            .with("Start", start)
            .with("End", end)
    }

    pub fn task(subject: &str) -> Self {
        Self::blank(ItemKind::Task, DEFAULT_USER).with("Subject", subject)
    }

    pub fn with(mut self, property: &str, value: impl Into<Variant>) -> Self {
        self.properties.insert(property.to_string(), value.into());
        self
    }

    pub fn without(mut self, property: &str) -> Self {
        self.properties.remove(property);
        self
    }

    pub fn attached(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    pub fn recurring(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    /// Make reads of `property` raise an ordinary host error.
    pub fn failing(mut self, property: &str) -> Self {
        self.failing.insert(
            property.to_string(),
            HostError::Operation(format!("reading '{}' failed", property)),
        );
        self
    }

    /// Make reads of `property` raise a fatal host error.
    pub fn fatal(mut self, property: &str) -> Self {
        self.failing.insert(
            property.to_string(),
            HostError::Fatal(format!("access violation reading '{}'", property)),
        );
        self
    }

    pub fn is_appointment(&self) -> bool {
        self.message_class
            .to_ascii_lowercase()
            .starts_with("ipm.appointment")
    }

    pub fn is_mail(&self) -> bool {
        self.message_class.to_ascii_lowercase().starts_with("ipm.note")
    }

    pub fn text(&self, property: &str) -> Option<&str> {
        match self.properties.get(property) {
            Some(Variant::Text(text)) => Some(text),
            _ => None,
        }
    }

    fn read(&self, property: &str) -> Result<Variant, HostError> {
        if let Some(error) = self.failing.get(property) {
            return Err(error.clone());
        }
        if property == "MessageClass" {
            return Ok(Variant::Text(self.message_class.clone()));
        }
        self.properties
            .get(property)
            .cloned()
            .ok_or_else(|| HostError::MissingProperty(property.to_string()))
    }

    fn write(&mut self, property: &str, value: Variant) -> Result<(), HostError> {
        if let Some(error) = self.failing.get(property) {
            return Err(error.clone());
        }
        if property == "MessageClass" {
            return Err(HostError::Operation("MessageClass is read-only".into()));
        }
        if property == "EntryID" {
            return Err(HostError::Operation("EntryID is read-only".into()));
        }
        self.properties.insert(property.to_string(), value);
        Ok(())
    }

    /// Value used when evaluating filters: failures read as empty.
    fn filter_value(&self, property: &str) -> Variant {
        self.read(property).unwrap_or(Variant::Empty)
    }
}

#[derive(Debug)]
struct FolderRecord {
    name: String,
    subfolders: Vec<String>,
    items: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct StoreState {
    folders: HashMap<String, FolderRecord>,
    stores: Vec<String>,
    defaults: HashMap<FolderKind, String>,
    items: HashMap<String, ItemRecord>,
    locations: HashMap<String, String>,
    current_user: String,
    free_busy: HashMap<String, String>,
    running: bool,
    launch_fails: bool,
    ignore_restrictions: bool,
    count_failures: u32,
    materialized: usize,
    live_handles: usize,
    require_runtime: bool,
    runtime_threads: HashSet<ThreadId>,
}

impl StoreState {
    fn new_folder(&mut self, parent: Option<&str>, name: &str) -> String {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        self.folders.insert(
            id.clone(),
            FolderRecord {
                name: name.to_string(),
                subfolders: Vec::new(),
                items: Vec::new(),
            },
        );
        if let Some(folder) = parent.and_then(|p| self.folders.get_mut(p)) {
            folder.subfolders.push(id.clone());
        }
        id
    }

    fn insert_item(&mut self, folder_id: &str, mut record: ItemRecord) -> String {
        let id = format!(
            "00000000{}",
            Uuid::new_v4().simple().to_string().to_uppercase()
        );
        record
            .properties
            .insert("EntryID".to_string(), Variant::Text(id.clone()));
        if let Some(folder) = self.folders.get_mut(folder_id) {
            folder.items.push(id.clone());
        }
        self.items.insert(id.clone(), record);
        self.locations.insert(id.clone(), folder_id.to_string());
        id
    }

    fn remove_item(&mut self, entry_id: &str) -> Option<ItemRecord> {
        let record = self.items.remove(entry_id)?;
        if let Some(folder_id) = self.locations.remove(entry_id) {
            if let Some(folder) = self.folders.get_mut(&folder_id) {
                folder.items.retain(|id| id != entry_id);
            }
        }
        Some(record)
    }

    fn move_item(&mut self, entry_id: &str, target: &str) -> Result<(), HostError> {
        if !self.folders.contains_key(target) {
            return Err(HostError::NotFound(target.to_string()));
        }
        let source = self
            .locations
            .get(entry_id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(entry_id.to_string()))?;
        if let Some(folder) = self.folders.get_mut(&source) {
            folder.items.retain(|id| id != entry_id);
        }
        if let Some(folder) = self.folders.get_mut(target) {
            folder.items.push(entry_id.to_string());
        }
        self.locations
            .insert(entry_id.to_string(), target.to_string());
        Ok(())
    }

    fn default_folder(&self, kind: FolderKind) -> Result<&str, HostError> {
        self.defaults
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| HostError::NotFound(kind.as_str().to_string()))
    }

    fn check_thread(&self) -> Result<(), HostError> {
        if self.require_runtime && !self.runtime_threads.contains(&thread::current().id()) {
            return Err(HostError::Fatal(
                "automation runtime is not initialized on this thread".into(),
            ));
        }
        Ok(())
    }
}

/// Shared handle to the sandbox store. Cloning shares the same store.
#[derive(Clone)]
pub struct SandboxHost {
    state: Arc<Mutex<StoreState>>,
}

impl Default for SandboxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxHost {
    pub fn new() -> Self {
        Self::with_store(DEFAULT_STORE)
    }

    /// A running host whose default store is named `store`.
    pub fn with_store(store: &str) -> Self {
        let mut state = StoreState {
            folders: HashMap::new(),
            stores: Vec::new(),
            defaults: HashMap::new(),
            items: HashMap::new(),
            locations: HashMap::new(),
            current_user: DEFAULT_USER.to_string(),
            free_busy: HashMap::new(),
            running: true,
            launch_fails: false,
            ignore_restrictions: false,
            count_failures: 0,
            materialized: 0,
            live_handles: 0,
            require_runtime: false,
            runtime_threads: HashSet::new(),
        };
        let root = state.new_folder(None, store);
        state.stores.push(root.clone());
        for kind in FolderKind::ALL {
            let id = state.new_folder(Some(&root), kind.as_str());
            state.defaults.insert(kind, id);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_current_user(&self, address: &str) {
        self.lock().current_user = address.to_string();
    }

    pub fn current_user(&self) -> String {
        self.lock().current_user.clone()
    }

    /// Store `record` in a default folder and return its EntryID.
    pub fn add_item(&self, kind: FolderKind, record: ItemRecord) -> String {
        let mut state = self.lock();
        let folder = state.defaults.get(&kind).cloned().unwrap_or_default();
        state.insert_item(&folder, record)
    }

    /// Store `record` in the folder with the given folder id.
    pub fn add_item_to(&self, folder_id: &str, record: ItemRecord) -> String {
        self.lock().insert_item(folder_id, record)
    }

    /// Create a subfolder of a default folder and return its folder id.
    pub fn add_folder(&self, parent: FolderKind, name: &str) -> String {
        let mut state = self.lock();
        let parent = state.defaults.get(&parent).cloned();
        state.new_folder(parent.as_deref(), name)
    }

    /// Add another store (for example an archive PST) and return its root id.
    pub fn add_store(&self, name: &str) -> String {
        let mut state = self.lock();
        let root = state.new_folder(None, name);
        state.stores.push(root.clone());
        root
    }

    /// Create a folder directly under a store root.
    pub fn add_store_folder(&self, store_root: &str, name: &str) -> String {
        self.lock().new_folder(Some(store_root), name)
    }

    pub fn set_free_busy(&self, address: &str, slots: &str) {
        self.lock()
            .free_busy
            .insert(address.to_ascii_lowercase(), slots.to_string());
    }

    /// Simulate the host application not running; attaching fails until a
    /// launch succeeds.
    pub fn stop(&self) {
        self.lock().running = false;
    }

    pub fn fail_launch(&self) {
        self.lock().launch_fails = true;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Accept restrictions without applying them, like a host that does not
    /// honor a filter for some item types. Filter syntax is still checked.
    pub fn ignore_restrictions(&self) {
        self.lock().ignore_restrictions = true;
    }

    /// Make the next `n` collection counts fail as if the host were busy.
    pub fn fail_counts(&self, n: u32) {
        self.lock().count_failures = n;
    }

    /// Number of recurring occurrences produced by expansion so far.
    pub fn materialized(&self) -> usize {
        self.lock().materialized
    }

    /// Application and namespace handles currently alive.
    pub fn live_handles(&self) -> usize {
        self.lock().live_handles
    }

    pub fn item(&self, entry_id: &str) -> Option<ItemRecord> {
        self.lock().items.get(entry_id).cloned()
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.lock().items.contains_key(entry_id)
    }

    /// Name of the folder currently holding `entry_id`.
    pub fn folder_name_of(&self, entry_id: &str) -> Option<String> {
        let state = self.lock();
        let folder = state.locations.get(entry_id)?;
        state.folders.get(folder).map(|f| f.name.clone())
    }

    pub fn folder_items(&self, kind: FolderKind) -> Vec<ItemRecord> {
        let state = self.lock();
        let Ok(folder) = state.default_folder(kind) else {
            return Vec::new();
        };
        state
            .folders
            .get(folder)
            .map(|f| {
                f.items
                    .iter()
                    .filter_map(|id| state.items.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn open(&self) -> Rc<dyn Application> {
        Rc::new(SandboxApplication::new(self.clone()))
    }
}

impl HostConnector for SandboxHost {
    fn attach(&self) -> Result<Rc<dyn Application>, HostError> {
        {
            let state = self.lock();
            state.check_thread()?;
            if !state.running {
                return Err(HostError::Unavailable(
                    "no running instance to attach to".into(),
                ));
            }
        }
        Ok(self.open())
    }

    fn launch(&self) -> Result<Rc<dyn Application>, HostError> {
        {
            let mut state = self.lock();
            state.check_thread()?;
            if state.launch_fails {
                return Err(HostError::Unavailable(
                    "the application could not be launched".into(),
                ));
            }
            state.running = true;
        }
        Ok(self.open())
    }
}

/// Something the sandbox runtime observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Initialized(ThreadId),
    Uninitialized {
        thread: ThreadId,
        /// Host handles still alive at the moment of uninitialization.
        live_handles: usize,
    },
    FreedUnused,
}

/// Per-thread runtime bookkeeping for the sandbox.
///
/// When bound to a host with [`SandboxRuntime::for_host`], the host rejects
/// calls from threads that have not been initialized.
#[derive(Default)]
pub struct SandboxRuntime {
    host: Option<SandboxHost>,
    events: Mutex<Vec<RuntimeEvent>>,
    failures: AtomicU32,
}

impl SandboxRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_host(host: &SandboxHost) -> Self {
        host.lock().require_runtime = true;
        Self {
            host: Some(host.clone()),
            ..Self::default()
        }
    }

    /// Make the next `n` initializations fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn initialization_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::Initialized(_)))
            .count()
    }

    fn record(&self, event: RuntimeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl AutomationRuntime for SandboxRuntime {
    fn initialize_thread(&self) -> Result<(), HostError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HostError::Unavailable("runtime initialization failed".into()));
        }
        let thread = thread::current().id();
        if let Some(host) = &self.host {
            host.lock().runtime_threads.insert(thread);
        }
        self.record(RuntimeEvent::Initialized(thread));
        Ok(())
    }

    fn uninitialize_thread(&self) {
        let thread = thread::current().id();
        let live_handles = match &self.host {
            Some(host) => {
                let mut state = host.lock();
                state.runtime_threads.remove(&thread);
                state.live_handles
            }
            None => 0,
        };
        self.record(RuntimeEvent::Uninitialized {
            thread,
            live_handles,
        });
    }

    fn free_unused(&self) {
        self.record(RuntimeEvent::FreedUnused);
    }
}
