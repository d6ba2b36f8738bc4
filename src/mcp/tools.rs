//! The tool table: name, description, argument schema and handler for every
//! tool the server exposes.

use std::path::Path;

use chrono::Local;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::bridge::{Bridge, RecurrenceWindow};

use super::types::*;

type Handler = fn(&Bridge, Value) -> Result<Value, RpcError>;

pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    schema: fn() -> Value,
    handler: Handler,
}

impl Tool {
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    /// Run the handler. Must be called on the session thread.
    pub fn call(&self, bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
        (self.handler)(bridge, arguments)
    }
}

pub fn find(name: &str) -> Option<&'static Tool> {
    TOOLS.iter().find(|tool| tool.name == name)
}

fn schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

fn args<T: DeserializeOwned>(arguments: Value) -> Result<T, RpcError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| RpcError::validation("arguments", e.to_string()))
}

/// Wrap a result as a single text content block holding pretty JSON.
fn text_result<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| RpcError::internal(format!("Failed to serialize result: {}", e)))?;
    Ok(json!({ "content": [{ "type": "text", "text": text }] }))
}

pub static TOOLS: &[Tool] = &[
    // Email
    Tool {
        name: "list_emails",
        description: "List recent emails from a folder, newest first.",
        schema: schema::<ListEmailsArgs>,
        handler: list_emails,
    },
    Tool {
        name: "get_email",
        description: "Get the full content of an email by EntryID.",
        schema: schema::<EntryIdArgs>,
        handler: get_email,
    },
    Tool {
        name: "send_email",
        description: "Send an email, or save it as a draft. Supports CC, BCC, HTML body and attachments.",
        schema: schema::<SendEmailArgs>,
        handler: send_email,
    },
    Tool {
        name: "reply_email",
        description: "Reply to an email, optionally to all recipients.",
        schema: schema::<ReplyEmailArgs>,
        handler: reply_email,
    },
    Tool {
        name: "forward_email",
        description: "Forward an email with an optional note above the original.",
        schema: schema::<ForwardEmailArgs>,
        handler: forward_email,
    },
    Tool {
        name: "mark_email",
        description: "Mark an email as read or unread.",
        schema: schema::<MarkEmailArgs>,
        handler: mark_email,
    },
    Tool {
        name: "move_email",
        description: "Move an email to another folder.",
        schema: schema::<MoveEmailArgs>,
        handler: move_email,
    },
    Tool {
        name: "delete_email",
        description: "Move an email to Deleted Items.",
        schema: schema::<EntryIdArgs>,
        handler: delete_email,
    },
    Tool {
        name: "download_attachments",
        description: "Save the attachments of an email into a local directory.",
        schema: schema::<DownloadAttachmentsArgs>,
        handler: download_attachments,
    },
    Tool {
        name: "search_emails",
        description: "Search the inbox with a restriction filter such as \"[Subject] = 'Invoice'\".",
        schema: schema::<SearchEmailsArgs>,
        handler: search_emails,
    },
    // Calendar
    Tool {
        name: "list_calendar_events",
        description: "List calendar events for the next N days, with recurring occurrences expanded. Set 'all' to skip date filtering.",
        schema: schema::<ListCalendarEventsArgs>,
        handler: list_calendar_events,
    },
    Tool {
        name: "get_appointment",
        description: "Get an appointment by EntryID.",
        schema: schema::<EntryIdArgs>,
        handler: get_appointment,
    },
    Tool {
        name: "create_appointment",
        description: "Create a calendar appointment, optionally inviting attendees.",
        schema: schema::<CreateAppointmentArgs>,
        handler: create_appointment,
    },
    Tool {
        name: "edit_appointment",
        description: "Change fields of an existing appointment.",
        schema: schema::<EditAppointmentArgs>,
        handler: edit_appointment,
    },
    Tool {
        name: "respond_to_meeting",
        description: "Accept, decline or tentatively accept a meeting invitation.",
        schema: schema::<RespondToMeetingArgs>,
        handler: respond_to_meeting,
    },
    Tool {
        name: "delete_appointment",
        description: "Delete an appointment.",
        schema: schema::<EntryIdArgs>,
        handler: delete_appointment,
    },
    Tool {
        name: "get_free_busy",
        description: "Get free/busy information for an address over a date range.",
        schema: schema::<FreeBusyArgs>,
        handler: get_free_busy,
    },
    // Tasks
    Tool {
        name: "list_tasks",
        description: "List tasks, incomplete ones only by default.",
        schema: schema::<ListTasksArgs>,
        handler: list_tasks,
    },
    Tool {
        name: "list_all_tasks",
        description: "List every task including completed ones.",
        schema: schema::<NoArgs>,
        handler: list_all_tasks,
    },
    Tool {
        name: "get_task",
        description: "Get a task by EntryID.",
        schema: schema::<EntryIdArgs>,
        handler: get_task,
    },
    Tool {
        name: "create_task",
        description: "Create a task with optional due date and importance.",
        schema: schema::<CreateTaskArgs>,
        handler: create_task,
    },
    Tool {
        name: "edit_task",
        description: "Change fields of an existing task, including progress.",
        schema: schema::<EditTaskArgs>,
        handler: edit_task,
    },
    Tool {
        name: "complete_task",
        description: "Mark a task as complete.",
        schema: schema::<EntryIdArgs>,
        handler: complete_task,
    },
    Tool {
        name: "delete_task",
        description: "Delete a task.",
        schema: schema::<EntryIdArgs>,
        handler: delete_task,
    },
];

// ============================================================
// Email handlers
// ============================================================

fn list_emails(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: ListEmailsArgs = args(arguments)?;
    text_result(&bridge.list_emails(a.limit, &a.folder)?)
}

fn get_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.get_email(&a.entry_id)?)
}

fn send_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: SendEmailArgs = args(arguments)?;
    text_result(&bridge.send_email(a.into_input()?)?)
}

fn reply_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: ReplyEmailArgs = args(arguments)?;
    text_result(&bridge.reply_email(&a.entry_id, &a.body, a.reply_all)?)
}

fn forward_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: ForwardEmailArgs = args(arguments)?;
    text_result(&bridge.forward_email(&a.entry_id, &a.to, &a.body)?)
}

fn mark_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: MarkEmailArgs = args(arguments)?;
    text_result(&bridge.mark_email(&a.entry_id, a.unread)?)
}

fn move_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: MoveEmailArgs = args(arguments)?;
    text_result(&bridge.move_email(&a.entry_id, &a.folder)?)
}

fn delete_email(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.delete_email(&a.entry_id)?)
}

fn download_attachments(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: DownloadAttachmentsArgs = args(arguments)?;
    text_result(&bridge.download_attachments(&a.entry_id, Path::new(&a.download_dir))?)
}

fn search_emails(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: SearchEmailsArgs = args(arguments)?;
    text_result(&bridge.search_emails(&a.filter_query, a.limit)?)
}

// ============================================================
// Calendar handlers
// ============================================================

fn list_calendar_events(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: ListCalendarEventsArgs = args(arguments)?;
    let window = if a.all {
        RecurrenceWindow::Unbounded
    } else {
        RecurrenceWindow::next_days(Local::now().naive_local(), a.days)?
    };
    text_result(&bridge.list_calendar_events(window)?)
}

fn get_appointment(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.get_appointment(&a.entry_id)?)
}

fn create_appointment(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: CreateAppointmentArgs = args(arguments)?;
    text_result(&bridge.create_appointment(a.into_input()?)?)
}

fn edit_appointment(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EditAppointmentArgs = args(arguments)?;
    let (entry_id, changes) = a.into_changes()?;
    text_result(&bridge.edit_appointment(&entry_id, changes)?)
}

fn respond_to_meeting(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: RespondToMeetingArgs = args(arguments)?;
    let response = a.response()?;
    text_result(&bridge.respond_to_meeting(&a.entry_id, response)?)
}

fn delete_appointment(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.delete_appointment(&a.entry_id)?)
}

fn get_free_busy(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: FreeBusyArgs = args(arguments)?;
    let (start, end) = a.dates()?;
    text_result(&bridge.get_free_busy(a.email_address, start, end, FreeBusyArgs::today())?)
}

// ============================================================
// Task handlers
// ============================================================

fn list_tasks(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: ListTasksArgs = args(arguments)?;
    text_result(&bridge.list_tasks(a.include_completed)?)
}

fn list_all_tasks(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let _: NoArgs = args(arguments)?;
    text_result(&bridge.list_all_tasks()?)
}

fn get_task(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.get_task(&a.entry_id)?)
}

fn create_task(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: CreateTaskArgs = args(arguments)?;
    text_result(&bridge.create_task(a.into_input()?)?)
}

fn edit_task(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EditTaskArgs = args(arguments)?;
    let (entry_id, changes) = a.into_changes()?;
    text_result(&bridge.edit_task(&entry_id, changes)?)
}

fn complete_task(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.complete_task(&a.entry_id)?)
}

fn delete_task(bridge: &Bridge, arguments: Value) -> Result<Value, RpcError> {
    let a: EntryIdArgs = args(arguments)?;
    text_result(&bridge.delete_task(&a.entry_id)?)
}
