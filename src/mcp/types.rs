//! Envelope, error and tool argument types.

use chrono::Local;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::bridge::{parse_date, parse_timestamp, BridgeError};
use crate::host::MeetingResponse;
use crate::models::{AppointmentChanges, NewAppointment, NewEmail, NewTask, TaskChanges};

// ============================================================
// Envelope
// ============================================================

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// An EntryID or folder that does not resolve.
pub const NOT_FOUND: i64 = -32001;
/// Caller-supplied arguments that are malformed.
pub const VALIDATION_ERROR: i64 = -32002;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn not_initialized() -> Self {
        Self::internal("Session not initialized")
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self {
            code: VALIDATION_ERROR,
            message: format!("Invalid {}: {}", field, message.into()),
            data: Some(json!({ "field": field })),
        }
    }
}

impl From<BridgeError> for RpcError {
    fn from(error: BridgeError) -> Self {
        let message = error.to_string();
        match error {
            BridgeError::NotFound { entry_id, .. } => Self {
                code: NOT_FOUND,
                message,
                data: Some(json!({ "entry_id": entry_id })),
            },
            BridgeError::FolderNotFound(folder) => Self {
                code: NOT_FOUND,
                message,
                data: Some(json!({ "folder": folder })),
            },
            BridgeError::Validation { field, .. } => Self {
                code: VALIDATION_ERROR,
                message,
                data: Some(json!({ "field": field })),
            },
            BridgeError::Unavailable(_) | BridgeError::Host(_) => Self::internal(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

// ============================================================
// Email arguments
// ============================================================

fn default_email_limit() -> usize {
    10
}

fn default_search_limit() -> usize {
    100
}

fn default_folder() -> String {
    "Inbox".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListEmailsArgs {
    #[schemars(description = "Maximum number of emails to return (default: 10)")]
    #[serde(default = "default_email_limit")]
    pub limit: usize,
    #[schemars(description = "Folder name, e.g. 'Inbox' or 'Sent Items' (default: Inbox)")]
    #[serde(default = "default_folder")]
    pub folder: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EntryIdArgs {
    #[schemars(description = "EntryID of the item")]
    pub entry_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendEmailArgs {
    #[schemars(description = "Recipient addresses, separated by semicolons")]
    pub to: String,
    pub subject: String,
    #[schemars(description = "Plain text body")]
    pub body: String,
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default)]
    pub bcc: Option<String>,
    #[schemars(description = "HTML body; replaces the plain body when given")]
    #[serde(default)]
    pub html_body: Option<String>,
    #[schemars(description = "Paths of files to attach")]
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[schemars(description = "Save to Drafts instead of sending (default: false)")]
    #[serde(default)]
    pub save_draft: bool,
}

impl SendEmailArgs {
    pub fn into_input(self) -> Result<NewEmail, BridgeError> {
        if self.to.trim().is_empty() && !self.save_draft {
            return Err(BridgeError::validation("to", "at least one recipient is required"));
        }
        Ok(NewEmail {
            to: self.to,
            subject: self.subject,
            body: self.body,
            cc: self.cc,
            bcc: self.bcc,
            html_body: self.html_body.filter(|html| !html.is_empty()),
            attachments: self.file_paths.into_iter().map(Into::into).collect(),
            save_draft: self.save_draft,
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReplyEmailArgs {
    pub entry_id: String,
    pub body: String,
    #[schemars(description = "Reply to all recipients instead of only the sender")]
    #[serde(default)]
    pub reply_all: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForwardEmailArgs {
    pub entry_id: String,
    #[schemars(description = "Recipient addresses, separated by semicolons")]
    pub to: String,
    #[schemars(description = "Text placed above the forwarded message")]
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MarkEmailArgs {
    pub entry_id: String,
    #[schemars(description = "true marks unread, false marks read (default: false)")]
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveEmailArgs {
    pub entry_id: String,
    #[schemars(description = "Name of the target folder")]
    pub folder: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadAttachmentsArgs {
    pub entry_id: String,
    #[schemars(description = "Directory to save the attachments into. Created if missing.")]
    pub download_dir: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchEmailsArgs {
    #[schemars(
        description = "Restriction filter, e.g. \"[Subject] = 'Invoice'\" or \"[Unread] = true\""
    )]
    pub filter_query: String,
    #[schemars(description = "Maximum number of emails to return (default: 100)")]
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

// ============================================================
// Calendar arguments
// ============================================================

fn default_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListCalendarEventsArgs {
    #[schemars(description = "Number of days ahead to include (default: 7)")]
    #[serde(default = "default_days")]
    pub days: u32,
    #[schemars(
        description = "Return every event without date filtering. Slow on large calendars; results are capped."
    )]
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateAppointmentArgs {
    pub subject: String,
    #[schemars(description = "Start time (YYYY-MM-DD HH:MM:SS)")]
    pub start: String,
    #[schemars(description = "End time (YYYY-MM-DD HH:MM:SS)")]
    pub end: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub all_day: bool,
    #[schemars(description = "Required attendees, separated by semicolons")]
    #[serde(default)]
    pub required_attendees: Option<String>,
    #[schemars(description = "Optional attendees, separated by semicolons")]
    #[serde(default)]
    pub optional_attendees: Option<String>,
}

impl CreateAppointmentArgs {
    pub fn into_input(self) -> Result<NewAppointment, BridgeError> {
        Ok(NewAppointment {
            start: parse_timestamp("start", &self.start)?,
            end: parse_timestamp("end", &self.end)?,
            subject: self.subject,
            location: self.location,
            body: self.body,
            all_day: self.all_day,
            required_attendees: self.required_attendees,
            optional_attendees: self.optional_attendees,
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditAppointmentArgs {
    pub entry_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[schemars(description = "New start time (YYYY-MM-DD HH:MM:SS)")]
    #[serde(default)]
    pub start: Option<String>,
    #[schemars(description = "New end time (YYYY-MM-DD HH:MM:SS)")]
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub required_attendees: Option<String>,
    #[serde(default)]
    pub optional_attendees: Option<String>,
}

impl EditAppointmentArgs {
    pub fn into_changes(self) -> Result<(String, AppointmentChanges), BridgeError> {
        let changes = AppointmentChanges {
            start: self
                .start
                .filter(|s| !s.is_empty())
                .map(|s| parse_timestamp("start", &s))
                .transpose()?,
            end: self
                .end
                .filter(|s| !s.is_empty())
                .map(|s| parse_timestamp("end", &s))
                .transpose()?,
            subject: self.subject,
            location: self.location,
            body: self.body,
            required_attendees: self.required_attendees,
            optional_attendees: self.optional_attendees,
        };
        Ok((self.entry_id, changes))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RespondToMeetingArgs {
    pub entry_id: String,
    #[schemars(description = "One of 'accept', 'decline' or 'tentative'")]
    pub response: String,
}

impl RespondToMeetingArgs {
    pub fn response(&self) -> Result<MeetingResponse, BridgeError> {
        MeetingResponse::from_str(&self.response).ok_or_else(|| {
            BridgeError::validation(
                "response",
                format!("'{}' is not one of accept, decline, tentative", self.response),
            )
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FreeBusyArgs {
    #[schemars(description = "Address to check (default: the current account)")]
    #[serde(default)]
    pub email_address: Option<String>,
    #[schemars(description = "First day (YYYY-MM-DD, default: today)")]
    #[serde(default)]
    pub start_date: Option<String>,
    #[schemars(description = "Last day (YYYY-MM-DD, default: start_date + 1 day)")]
    #[serde(default)]
    pub end_date: Option<String>,
}

impl FreeBusyArgs {
    pub fn dates(
        &self,
    ) -> Result<(Option<chrono::NaiveDate>, Option<chrono::NaiveDate>), BridgeError> {
        let parse = |field: &str, value: &Option<String>| {
            value
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| parse_date(field, s))
                .transpose()
        };
        Ok((
            parse("start_date", &self.start_date)?,
            parse("end_date", &self.end_date)?,
        ))
    }

    pub fn today() -> chrono::NaiveDate {
        Local::now().date_naive()
    }
}

// ============================================================
// Task arguments
// ============================================================

fn default_importance() -> i64 {
    1
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTasksArgs {
    #[schemars(description = "Include completed tasks (default: false)")]
    #[serde(default)]
    pub include_completed: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateTaskArgs {
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[schemars(description = "Due date (YYYY-MM-DD)")]
    #[serde(default)]
    pub due_date: Option<String>,
    #[schemars(description = "0 = low, 1 = normal, 2 = high (default: 1)")]
    #[serde(default = "default_importance")]
    pub importance: i64,
}

impl CreateTaskArgs {
    pub fn into_input(self) -> Result<NewTask, BridgeError> {
        Ok(NewTask {
            due_date: self
                .due_date
                .filter(|s| !s.is_empty())
                .map(|s| parse_date("due_date", &s))
                .transpose()?,
            subject: self.subject,
            body: self.body,
            importance: self.importance,
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditTaskArgs {
    pub entry_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[schemars(description = "New due date (YYYY-MM-DD)")]
    #[serde(default)]
    pub due_date: Option<String>,
    #[schemars(description = "0 = low, 1 = normal, 2 = high")]
    #[serde(default)]
    pub importance: Option<i64>,
    #[schemars(description = "0-100; also updates the status")]
    #[serde(default)]
    pub percent_complete: Option<i64>,
    #[serde(default)]
    pub complete: Option<bool>,
}

impl EditTaskArgs {
    pub fn into_changes(self) -> Result<(String, TaskChanges), BridgeError> {
        let changes = TaskChanges {
            due_date: self
                .due_date
                .filter(|s| !s.is_empty())
                .map(|s| parse_date("due_date", &s))
                .transpose()?,
            subject: self.subject,
            body: self.body,
            importance: self.importance,
            percent_complete: self.percent_complete,
            complete: self.complete,
        };
        Ok((self.entry_id, changes))
    }
}
