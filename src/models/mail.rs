use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// List projection of a mail item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub entry_id: String,
    pub subject: String,
    /// SMTP address of the sender, resolved through Exchange when needed.
    pub sender: String,
    pub sender_name: String,
    #[serde(with = "super::timestamp")]
    pub received_time: Option<NaiveDateTime>,
    pub unread: bool,
    pub has_attachments: bool,
}

/// Full projection of a mail item, including both bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDetails {
    pub entry_id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: String,
    pub body: String,
    pub html_body: String,
    #[serde(with = "super::timestamp")]
    pub received_time: Option<NaiveDateTime>,
    pub has_attachments: bool,
}

/// Files written by an attachment download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDownload {
    pub success: bool,
    pub files: Vec<PathBuf>,
    pub message: String,
}

impl AttachmentDownload {
    pub fn saved(files: Vec<PathBuf>) -> Self {
        let message = match files.len() {
            0 => "No attachments".to_string(),
            1 => "Saved 1 attachment".to_string(),
            n => format!("Saved {} attachments", n),
        };
        Self {
            success: true,
            files,
            message,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            files: Vec::new(),
            message: message.into(),
        }
    }
}

/// A message to send or to save as a draft.
#[derive(Debug, Clone, Default)]
pub struct NewEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    /// Replaces the plain body when present.
    pub html_body: Option<String>,
    pub attachments: Vec<PathBuf>,
    pub save_draft: bool,
}
