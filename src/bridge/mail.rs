use std::path::Path;

use crate::host::{HostError, Item, ItemKind, Items, Variant};
use crate::models::{AttachmentDownload, EmailDetails, EmailSummary, NewEmail, OperationResult};

use super::{
    mutation, put_all, required_bool, required_text, Bridge, BridgeError, Entity, ItemOutcome,
    SafeAccessor,
};

impl Bridge {
    /// Most recent messages of `folder`, or of the inbox when no folder has
    /// that name.
    pub fn list_emails(&self, limit: usize, folder: &str) -> Result<Vec<EmailSummary>, BridgeError> {
        let folder = match self.folder_by_name(folder) {
            Some(folder) => folder,
            None => {
                tracing::debug!(folder, "Folder not found, listing the inbox");
                self.inbox()?
            }
        };
        let mut items = folder.items()?;
        items.sort("[ReceivedTime]", true)?;
        Ok(self.collect_summaries(items.as_ref(), limit))
    }

    /// Inbox messages matching a host filter expression.
    pub fn search_emails(&self, filter: &str, limit: usize) -> Result<Vec<EmailSummary>, BridgeError> {
        let items = self.inbox()?.items()?;
        let mut items = items.restrict(filter).map_err(|e| match e {
            HostError::InvalidFilter(message) => BridgeError::validation("filter_query", message),
            other => other.into(),
        })?;
        items.sort("[ReceivedTime]", true)?;
        Ok(self.collect_summaries(items.as_ref(), limit))
    }

    fn collect_summaries(&self, items: &dyn Items, limit: usize) -> Vec<EmailSummary> {
        items
            .iter()
            .map(|item| ItemOutcome::from(item.and_then(|item| self.email_summary(item.as_ref()))))
            .filter_map(|outcome| match outcome {
                ItemOutcome::Projected(email) => Some(email),
                ItemOutcome::Skipped(reason) => {
                    tracing::debug!(?reason, "Skipping mail item");
                    None
                }
            })
            .take(limit)
            .collect()
    }

    fn email_summary(&self, item: &dyn Item) -> Result<EmailSummary, HostError> {
        let access = SafeAccessor::new(item);
        Ok(EmailSummary {
            entry_id: required_text(item, "EntryID")?,
            subject: required_text(item, "Subject")?,
            sender: sender_address(item),
            sender_name: access.text("SenderName", ""),
            received_time: access.optional_date("ReceivedTime"),
            unread: required_bool(item, "Unread")?,
            has_attachments: item.attachment_count()? > 0,
        })
    }

    pub fn get_email(&self, entry_id: &str) -> Result<EmailDetails, BridgeError> {
        let item = self.require(Entity::Email, entry_id)?;
        let access = SafeAccessor::new(item.as_ref());
        let project = || -> Result<EmailDetails, HostError> {
            Ok(EmailDetails {
                entry_id: required_text(item.as_ref(), "EntryID")?,
                subject: required_text(item.as_ref(), "Subject")?,
                sender: sender_address(item.as_ref()),
                sender_name: access.text("SenderName", ""),
                body: access.text("Body", ""),
                html_body: access.text("HTMLBody", ""),
                received_time: access.optional_date("ReceivedTime"),
                has_attachments: item.attachment_count()? > 0,
            })
        };
        project().map_err(|e| {
            tracing::debug!(entry_id, error = %e, "Email failed to project");
            BridgeError::not_found(Entity::Email, entry_id)
        })
    }

    /// Send a message, or save it to Drafts and return its EntryID.
    pub fn send_email(&self, email: NewEmail) -> Result<OperationResult, BridgeError> {
        let mut mail = self.application().create_item(ItemKind::Mail)?;
        let mut values: Vec<(&str, Variant)> = vec![
            ("To", email.to.into()),
            ("Subject", email.subject.into()),
        ];
        match email.html_body {
            Some(html) => values.push(("HTMLBody", html.into())),
            None => values.push(("Body", email.body.into())),
        }
        if let Some(cc) = email.cc.filter(|cc| !cc.is_empty()) {
            values.push(("CC", cc.into()));
        }
        if let Some(bcc) = email.bcc.filter(|bcc| !bcc.is_empty()) {
            values.push(("BCC", bcc.into()));
        }

        let prepared = put_all(mail.as_mut(), values).and_then(|()| {
            email
                .attachments
                .iter()
                .try_for_each(|path| mail.add_attachment(path))
        });
        if let Err(e) = prepared {
            tracing::warn!(error = %e, "Failed to compose email");
            return Ok(OperationResult::failed(e.to_string()));
        }

        if email.save_draft {
            if let Err(e) = mail.save() {
                tracing::warn!(error = %e, "Failed to save draft");
                return Ok(OperationResult::failed(e.to_string()));
            }
            let entry_id = SafeAccessor::new(mail.as_ref()).text("EntryID", "");
            tracing::info!(entry_id = %entry_id, "Saved draft");
            return Ok(OperationResult::created(entry_id, "Draft saved"));
        }
        match mail.send() {
            Ok(()) => Ok(OperationResult::ok("Email sent")),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send email");
                Ok(OperationResult::failed(e.to_string()))
            }
        }
    }

    pub fn reply_email(
        &self,
        entry_id: &str,
        body: &str,
        reply_all: bool,
    ) -> Result<OperationResult, BridgeError> {
        let item = self.require(Entity::Email, entry_id)?;
        let result = item.reply(reply_all).and_then(|mut reply| {
            reply.put("Body", body.into())?;
            reply.send()
        });
        mutation(Entity::Email, entry_id, result, "Reply sent")
    }

    /// Forward a message. `body` is prepended to the original text.
    pub fn forward_email(&self, entry_id: &str, to: &str, body: &str) -> Result<OperationResult, BridgeError> {
        let item = self.require(Entity::Email, entry_id)?;
        let result = item.forward().and_then(|mut forward| {
            forward.put("To", to.into())?;
            if !body.is_empty() {
                let original = SafeAccessor::new(forward.as_ref()).text("Body", "");
                forward.put("Body", format!("{}\n\n{}", body, original).into())?;
            }
            forward.send()
        });
        mutation(Entity::Email, entry_id, result, "Email forwarded")
    }

    pub fn mark_email(&self, entry_id: &str, unread: bool) -> Result<OperationResult, BridgeError> {
        let mut item = self.require(Entity::Email, entry_id)?;
        let result = item.put("Unread", unread.into()).and_then(|()| item.save());
        let done = if unread { "Marked as unread" } else { "Marked as read" };
        mutation(Entity::Email, entry_id, result, done)
    }

    pub fn move_email(&self, entry_id: &str, folder: &str) -> Result<OperationResult, BridgeError> {
        let mut item = self.require(Entity::Email, entry_id)?;
        let target = self
            .folder_by_name(folder)
            .ok_or_else(|| BridgeError::FolderNotFound(folder.to_string()))?;
        let result = item.move_to(target.as_ref());
        mutation(Entity::Email, entry_id, result, format!("Moved to {}", folder))
    }

    pub fn delete_email(&self, entry_id: &str) -> Result<OperationResult, BridgeError> {
        self.delete_item(Entity::Email, entry_id)
    }

    /// Save the attachments of a message into `dir`, creating the directory
    /// when the message has any.
    pub fn download_attachments(&self, entry_id: &str, dir: &Path) -> Result<AttachmentDownload, BridgeError> {
        if dir.as_os_str().is_empty() {
            return Err(BridgeError::validation("download_dir", "must not be empty"));
        }
        if dir.exists() && !dir.is_dir() {
            return Err(BridgeError::validation(
                "download_dir",
                format!("'{}' is not a directory", dir.display()),
            ));
        }
        let item = self.require(Entity::Email, entry_id)?;
        let saved = item.attachment_count().and_then(|count| {
            if count == 0 {
                return Ok(Vec::new());
            }
            std::fs::create_dir_all(dir).map_err(|e| {
                HostError::Operation(format!("cannot create '{}': {}", dir.display(), e))
            })?;
            item.save_attachments(dir)
        });
        match saved {
            Ok(files) => {
                tracing::info!(entry_id, count = files.len(), dir = %dir.display(), "Saved attachments");
                Ok(AttachmentDownload::saved(files))
            }
            Err(HostError::NotFound(_)) => Err(BridgeError::not_found(Entity::Email, entry_id)),
            Err(e) => {
                tracing::warn!(entry_id, error = %e, "Failed to save attachments");
                Ok(AttachmentDownload::failed(e.to_string()))
            }
        }
    }
}

/// SMTP address of the sender. Exchange senders are resolved to their
/// primary SMTP address when possible.
fn sender_address(item: &dyn Item) -> String {
    let access = SafeAccessor::new(item);
    if access.text("SenderEmailType", "") == "EX" {
        match item.exchange_sender_address() {
            Ok(address) if !address.is_empty() => return address,
            Ok(_) => {}
            Err(e) => tracing::trace!(error = %e, "Exchange sender lookup failed"),
        }
    }
    access.text("SenderEmailAddress", "")
}
