use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};

use super::expand::{occurrences_between, SandboxItems};
use super::{ItemRecord, SandboxHost};
use crate::host::{
    Application, Folder, FolderKind, HostError, Item, ItemKind, Items, MeetingResponse, Namespace,
    Variant,
};

/// Days covered by a computed free/busy string.
const FREE_BUSY_DAYS: i64 = 30;

/// Counts a live application or namespace handle for as long as it exists.
struct HandleGuard {
    host: SandboxHost,
}

impl HandleGuard {
    fn new(host: &SandboxHost) -> Self {
        host.lock().live_handles += 1;
        Self { host: host.clone() }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let mut state = self.host.lock();
        state.live_handles = state.live_handles.saturating_sub(1);
    }
}

pub(super) struct SandboxApplication {
    host: SandboxHost,
    _guard: HandleGuard,
}

impl SandboxApplication {
    pub(super) fn new(host: SandboxHost) -> Self {
        let guard = HandleGuard::new(&host);
        Self {
            host,
            _guard: guard,
        }
    }
}

impl Application for SandboxApplication {
    fn namespace(&self, name: &str) -> Result<Rc<dyn Namespace>, HostError> {
        self.host.lock().check_thread()?;
        if !name.eq_ignore_ascii_case("MAPI") {
            return Err(HostError::Operation(format!("unknown namespace '{}'", name)));
        }
        Ok(Rc::new(SandboxNamespace {
            host: self.host.clone(),
            _guard: HandleGuard::new(&self.host),
        }))
    }

    fn create_item(&self, kind: ItemKind) -> Result<Box<dyn Item>, HostError> {
        let user = {
            let state = self.host.lock();
            state.check_thread()?;
            state.current_user.clone()
        };
        Ok(Box::new(SandboxItem::pending(
            self.host.clone(),
            kind,
            ItemRecord::blank(kind, &user),
        )))
    }
}

struct SandboxNamespace {
    host: SandboxHost,
    _guard: HandleGuard,
}

impl Namespace for SandboxNamespace {
    fn default_folder(&self, kind: FolderKind) -> Result<Box<dyn Folder>, HostError> {
        let state = self.host.lock();
        state.check_thread()?;
        let id = state.default_folder(kind)?.to_string();
        Ok(Box::new(SandboxFolder::new(self.host.clone(), id)))
    }

    fn item_from_id(&self, entry_id: &str) -> Result<Box<dyn Item>, HostError> {
        let state = self.host.lock();
        state.check_thread()?;
        if !state.items.contains_key(entry_id) {
            return Err(HostError::NotFound(entry_id.to_string()));
        }
        Ok(Box::new(SandboxItem::stored(
            self.host.clone(),
            entry_id.to_string(),
            None,
        )))
    }

    fn stores(&self) -> Result<Vec<Box<dyn Folder>>, HostError> {
        let state = self.host.lock();
        state.check_thread()?;
        Ok(state
            .stores
            .iter()
            .map(|id| Box::new(SandboxFolder::new(self.host.clone(), id.clone())) as Box<dyn Folder>)
            .collect())
    }

    fn current_user_address(&self) -> Result<String, HostError> {
        let state = self.host.lock();
        state.check_thread()?;
        Ok(state.current_user.clone())
    }

    fn free_busy(
        &self,
        address: &str,
        start: NaiveDate,
        slot_minutes: u32,
    ) -> Result<Option<String>, HostError> {
        if slot_minutes == 0 {
            return Err(HostError::Operation("slot length must be positive".into()));
        }
        let (registered, is_current_user, calendar) = {
            let state = self.host.lock();
            state.check_thread()?;
            let registered = state.free_busy.get(&address.to_ascii_lowercase()).cloned();
            let is_current_user = state.current_user.eq_ignore_ascii_case(address);
            let calendar: Vec<ItemRecord> = state
                .default_folder(FolderKind::Calendar)
                .ok()
                .and_then(|id| state.folders.get(id))
                .map(|folder| {
                    folder
                        .items
                        .iter()
                        .filter_map(|id| state.items.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default();
            (registered, is_current_user, calendar)
        };
        if registered.is_some() || !is_current_user {
            return Ok(registered);
        }

        let from = start.and_hms_opt(0, 0, 0).unwrap_or_default();
        let slot = Duration::minutes(i64::from(slot_minutes));
        let slots = (FREE_BUSY_DAYS * 24 * 60 / i64::from(slot_minutes)).max(1);
        let to = from + slot * slots as i32;
        let busy: Vec<(NaiveDateTime, NaiveDateTime)> = calendar
            .iter()
            .filter(|record| record.is_appointment())
            .flat_map(|record| occurrences_between(record, from, to))
            .collect();

        let mut out = String::with_capacity(slots as usize);
        for n in 0..slots {
            let slot_start = from + slot * n as i32;
            let slot_end = slot_start + slot;
            let taken = busy.iter().any(|(s, e)| *s < slot_end && *e > slot_start);
            out.push(if taken { '2' } else { '0' });
        }
        Ok(Some(out))
    }
}

pub(super) struct SandboxFolder {
    host: SandboxHost,
    id: String,
}

impl SandboxFolder {
    pub(super) fn new(host: SandboxHost, id: String) -> Self {
        Self { host, id }
    }
}

impl Folder for SandboxFolder {
    fn entry_id(&self) -> Result<String, HostError> {
        Ok(self.id.clone())
    }

    fn name(&self) -> Result<String, HostError> {
        let state = self.host.lock();
        state
            .folders
            .get(&self.id)
            .map(|f| f.name.clone())
            .ok_or_else(|| HostError::NotFound(self.id.clone()))
    }

    fn subfolder(&self, name: &str) -> Result<Box<dyn Folder>, HostError> {
        let state = self.host.lock();
        state.check_thread()?;
        let folder = state
            .folders
            .get(&self.id)
            .ok_or_else(|| HostError::NotFound(self.id.clone()))?;
        folder
            .subfolders
            .iter()
            .find(|id| {
                state
                    .folders
                    .get(*id)
                    .is_some_and(|f| f.name.eq_ignore_ascii_case(name))
            })
            .map(|id| Box::new(SandboxFolder::new(self.host.clone(), id.clone())) as Box<dyn Folder>)
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    fn items(&self) -> Result<Box<dyn Items>, HostError> {
        let state = self.host.lock();
        state.check_thread()?;
        let ids = state
            .folders
            .get(&self.id)
            .map(|f| f.items.clone())
            .ok_or_else(|| HostError::NotFound(self.id.clone()))?;
        Ok(Box::new(SandboxItems::new(self.host.clone(), ids)))
    }
}

enum ItemState {
    /// Created but never saved or sent.
    Pending { kind: ItemKind, record: ItemRecord },
    Stored {
        entry_id: String,
        /// Start and end of the occurrence when produced by recurrence expansion.
        occurrence: Option<(NaiveDateTime, NaiveDateTime)>,
    },
}

pub(super) struct SandboxItem {
    host: SandboxHost,
    state: ItemState,
}

impl SandboxItem {
    fn pending(host: SandboxHost, kind: ItemKind, record: ItemRecord) -> Self {
        Self {
            host,
            state: ItemState::Pending { kind, record },
        }
    }

    pub(super) fn stored(
        host: SandboxHost,
        entry_id: String,
        occurrence: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Self {
        Self {
            host,
            state: ItemState::Stored {
                entry_id,
                occurrence,
            },
        }
    }

    fn snapshot(&self) -> Result<ItemRecord, HostError> {
        match &self.state {
            ItemState::Pending { record, .. } => Ok(record.clone()),
            ItemState::Stored { entry_id, .. } => self
                .host
                .lock()
                .items
                .get(entry_id)
                .cloned()
                .ok_or_else(|| HostError::NotFound(entry_id.clone())),
        }
    }

    fn current_user(&self) -> String {
        self.host.lock().current_user.clone()
    }

    fn new_mail(&self, record: ItemRecord) -> Box<dyn Item> {
        Box::new(SandboxItem::pending(self.host.clone(), ItemKind::Mail, record))
    }

    fn check_sendable(record: &ItemRecord) -> Result<(), HostError> {
        let class = record.message_class.to_ascii_lowercase();
        if !(class.starts_with("ipm.note") || class.starts_with("ipm.schedule")) {
            return Err(HostError::Operation(format!(
                "items of class '{}' cannot be sent",
                record.message_class
            )));
        }
        if record.text("To").unwrap_or("").trim().is_empty() {
            return Err(HostError::Operation(
                "there must be at least one name in the To box".into(),
            ));
        }
        Ok(())
    }
}

fn default_folder_for(kind: ItemKind) -> FolderKind {
    match kind {
        ItemKind::Mail => FolderKind::Drafts,
        ItemKind::Appointment => FolderKind::Calendar,
        ItemKind::Task => FolderKind::Tasks,
    }
}

fn split_recipients(list: &str) -> impl Iterator<Item = &str> {
    list.split(';').map(str::trim).filter(|s| !s.is_empty())
}

impl Item for SandboxItem {
    fn get(&self, property: &str) -> Result<Variant, HostError> {
        match &self.state {
            ItemState::Pending { record, .. } => match property {
                "EntryID" => Ok(Variant::Text(String::new())),
                _ => record.read(property),
            },
            ItemState::Stored {
                entry_id,
                occurrence,
            } => {
                let state = self.host.lock();
                let record = state
                    .items
                    .get(entry_id)
                    .ok_or_else(|| HostError::NotFound(entry_id.clone()))?;
                let value = record.read(property)?;
                Ok(match (occurrence, property) {
                    (Some((start, _)), "Start") => Variant::Date(*start),
                    (Some((_, end)), "End") => Variant::Date(*end),
                    _ => value,
                })
            }
        }
    }

    fn put(&mut self, property: &str, value: Variant) -> Result<(), HostError> {
        match &mut self.state {
            ItemState::Pending { record, .. } => record.write(property, value),
            ItemState::Stored { entry_id, .. } => {
                let mut state = self.host.lock();
                state
                    .items
                    .get_mut(entry_id.as_str())
                    .ok_or_else(|| HostError::NotFound(entry_id.clone()))?
                    .write(property, value)
            }
        }
    }

    fn save(&mut self) -> Result<(), HostError> {
        let entry_id = match &self.state {
            ItemState::Pending { kind, record } => {
                let mut state = self.host.lock();
                let folder = state.default_folder(default_folder_for(*kind))?.to_string();
                state.insert_item(&folder, record.clone())
            }
            ItemState::Stored { entry_id, .. } => {
                return if self.host.lock().items.contains_key(entry_id) {
                    Ok(())
                } else {
                    Err(HostError::NotFound(entry_id.clone()))
                };
            }
        };
        self.state = ItemState::Stored {
            entry_id,
            occurrence: None,
        };
        Ok(())
    }

    /// Moves the item to Deleted Items under a fresh EntryID. Deleting an item
    /// that already sits in Deleted Items removes it for good.
    fn delete(&mut self) -> Result<(), HostError> {
        let ItemState::Stored { entry_id, .. } = &self.state else {
            return Err(HostError::Operation("item has not been saved".into()));
        };
        let mut state = self.host.lock();
        let deleted_items = state.default_folder(FolderKind::DeletedItems)?.to_string();
        let in_deleted_items = state.locations.get(entry_id) == Some(&deleted_items);
        let record = state
            .remove_item(entry_id)
            .ok_or_else(|| HostError::NotFound(entry_id.clone()))?;
        if !in_deleted_items {
            state.insert_item(&deleted_items, record);
        }
        Ok(())
    }

    fn send(&mut self) -> Result<(), HostError> {
        let now = Local::now().naive_local();
        let entry_id = match &mut self.state {
            ItemState::Pending { record, .. } => {
                Self::check_sendable(record)?;
                record.properties.insert("SentOn".into(), Variant::Date(now));
                let mut state = self.host.lock();
                let sent = state.default_folder(FolderKind::SentItems)?.to_string();
                state.insert_item(&sent, record.clone())
            }
            ItemState::Stored { entry_id, .. } => {
                let mut state = self.host.lock();
                let sent = state.default_folder(FolderKind::SentItems)?.to_string();
                let record = state
                    .items
                    .get_mut(entry_id.as_str())
                    .ok_or_else(|| HostError::NotFound(entry_id.clone()))?;
                Self::check_sendable(record)?;
                record.properties.insert("SentOn".into(), Variant::Date(now));
                state.move_item(entry_id, &sent)?;
                entry_id.clone()
            }
        };
        self.state = ItemState::Stored {
            entry_id,
            occurrence: None,
        };
        Ok(())
    }

    fn reply(&self, reply_all: bool) -> Result<Box<dyn Item>, HostError> {
        let source = self.snapshot()?;
        if !source.is_mail() {
            return Err(HostError::Operation(
                "only mail items can be replied to".into(),
            ));
        }
        let me = self.current_user();
        let sender = source.text("SenderEmailAddress").unwrap_or("").to_string();
        let mut recipients = vec![sender.clone()];
        if reply_all {
            let others = split_recipients(source.text("To").unwrap_or(""))
                .chain(split_recipients(source.text("CC").unwrap_or("")));
            for address in others {
                let duplicate = recipients.iter().any(|r| r.eq_ignore_ascii_case(address));
                if !duplicate && !address.eq_ignore_ascii_case(&me) {
                    recipients.push(address.to_string());
                }
            }
        }
        let subject = source.text("Subject").unwrap_or("");
        let record = ItemRecord::blank(ItemKind::Mail, &me)
            .with("Subject", format!("RE: {}", subject))
            .with("To", recipients.join("; "));
        Ok(self.new_mail(record))
    }

    fn forward(&self) -> Result<Box<dyn Item>, HostError> {
        let source = self.snapshot()?;
        if !source.is_mail() {
            return Err(HostError::Operation("only mail items can be forwarded".into()));
        }
        let subject = source.text("Subject").unwrap_or("");
        let mut record = ItemRecord::blank(ItemKind::Mail, &self.current_user())
            .with("Subject", format!("FW: {}", subject))
            .with("Body", source.text("Body").unwrap_or(""))
            .with("HTMLBody", source.text("HTMLBody").unwrap_or(""));
        record.attachments = source.attachments.clone();
        Ok(self.new_mail(record))
    }

    fn move_to(&mut self, folder: &dyn Folder) -> Result<(), HostError> {
        let target = folder.entry_id()?;
        let ItemState::Stored { entry_id, .. } = &self.state else {
            return Err(HostError::Operation(
                "item must be saved before it can be moved".into(),
            ));
        };
        self.host.lock().move_item(entry_id, &target)
    }

    fn respond(&mut self, response: MeetingResponse) -> Result<Box<dyn Item>, HostError> {
        let ItemState::Stored { entry_id, .. } = &self.state else {
            return Err(HostError::Operation("item has not been saved".into()));
        };
        let (subject, organizer) = {
            let mut state = self.host.lock();
            let record = state
                .items
                .get_mut(entry_id.as_str())
                .ok_or_else(|| HostError::NotFound(entry_id.clone()))?;
            if !record.is_appointment() {
                return Err(HostError::Operation(
                    "only appointments can be responded to".into(),
                ));
            }
            if record.properties.get("MeetingStatus") != Some(&Variant::Int(2)) {
                return Err(HostError::Operation(
                    "the item is not a meeting invitation".into(),
                ));
            }
            record.write("ResponseStatus", Variant::Int(response.code()))?;
            (
                record.text("Subject").unwrap_or("").to_string(),
                record.text("Organizer").unwrap_or("").to_string(),
            )
        };
        let (prefix, class) = match response {
            MeetingResponse::Accepted => ("Accepted", "IPM.Schedule.Meeting.Resp.Pos"),
            MeetingResponse::Declined => ("Declined", "IPM.Schedule.Meeting.Resp.Neg"),
            MeetingResponse::Tentative => ("Tentative", "IPM.Schedule.Meeting.Resp.Tent"),
        };
        let mut record = ItemRecord::blank(ItemKind::Mail, &self.current_user())
            .with("Subject", format!("{}: {}", prefix, subject))
            .with("To", organizer);
        record.message_class = class.to_string();
        Ok(self.new_mail(record))
    }

    fn add_attachment(&mut self, path: &Path) -> Result<(), HostError> {
        if !path.is_file() {
            return Err(HostError::Operation(format!(
                "cannot attach '{}': file not found",
                path.display()
            )));
        }
        match &mut self.state {
            ItemState::Pending { record, .. } => {
                record.attachments.push(path.to_path_buf());
                Ok(())
            }
            ItemState::Stored { entry_id, .. } => {
                let mut state = self.host.lock();
                state
                    .items
                    .get_mut(entry_id.as_str())
                    .ok_or_else(|| HostError::NotFound(entry_id.clone()))?
                    .attachments
                    .push(path.to_path_buf());
                Ok(())
            }
        }
    }

    fn attachment_count(&self) -> Result<usize, HostError> {
        Ok(self.snapshot()?.attachments.len())
    }

    fn save_attachments(&self, dir: &Path) -> Result<Vec<PathBuf>, HostError> {
        let record = self.snapshot()?;
        record
            .attachments
            .iter()
            .map(|source| -> Result<PathBuf, HostError> {
                let name = source.file_name().ok_or_else(|| {
                    HostError::Operation(format!("attachment '{}' has no file name", source.display()))
                })?;
                let target = dir.join(name);
                std::fs::copy(source, &target).map_err(|e| {
                    HostError::Operation(format!("cannot save '{}': {}", target.display(), e))
                })?;
                Ok(target)
            })
            .collect()
    }

    fn exchange_sender_address(&self) -> Result<String, HostError> {
        match self.get("SenderSmtpAddress")? {
            Variant::Text(address) => Ok(address),
            _ => Err(HostError::TypeMismatch {
                property: "SenderSmtpAddress".into(),
                expected: "text",
            }),
        }
    }
}
