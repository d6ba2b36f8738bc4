use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// List projection of an appointment or one occurrence of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentSummary {
    pub entry_id: String,
    pub subject: String,
    #[serde(with = "super::timestamp")]
    pub start: Option<NaiveDateTime>,
    #[serde(with = "super::timestamp")]
    pub end: Option<NaiveDateTime>,
    pub location: String,
    pub organizer: Option<String>,
    pub all_day: bool,
    pub required_attendees: String,
    pub optional_attendees: String,
    pub response_status: ResponseStatus,
    pub meeting_status: MeetingStatus,
    pub response_requested: bool,
}

/// Full projection of an appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub summary: AppointmentSummary,
    pub body: String,
}

/// The current user's answer to a meeting.
///
/// Host codes: 0 None, 1 Organizer, 2 Tentative, 3 Accepted, 4 Declined,
/// 5 NotResponded. Anything else, or a missing code, is `Unknown`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseStatus {
    None,
    Organizer,
    Tentative,
    Accepted,
    Declined,
    NotResponded,
    Unknown,
}

impl ResponseStatus {
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => Self::None,
            Some(1) => Self::Organizer,
            Some(2) => Self::Tentative,
            Some(3) => Self::Accepted,
            Some(4) => Self::Declined,
            Some(5) => Self::NotResponded,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Organizer => "Organizer",
            Self::Tentative => "Tentative",
            Self::Accepted => "Accepted",
            Self::Declined => "Declined",
            Self::NotResponded => "NotResponded",
            Self::Unknown => "Unknown",
        }
    }
}

/// Whether an appointment is a meeting, and from whose side.
///
/// Host codes: 0 NonMeeting, 1 Meeting, 2 Received, 3 Canceled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MeetingStatus {
    NonMeeting,
    Meeting,
    Received,
    Canceled,
    Unknown,
}

impl MeetingStatus {
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => Self::NonMeeting,
            Some(1) => Self::Meeting,
            Some(2) => Self::Received,
            Some(3) => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonMeeting => "NonMeeting",
            Self::Meeting => "Meeting",
            Self::Received => "Received",
            Self::Canceled => "Canceled",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewAppointment {
    pub subject: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub location: String,
    pub body: String,
    pub all_day: bool,
    /// Semicolon-separated addresses.
    pub required_attendees: Option<String>,
    pub optional_attendees: Option<String>,
}

/// Fields to change on an existing appointment; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub subject: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub location: Option<String>,
    pub body: Option<String>,
    pub required_attendees: Option<String>,
    pub optional_attendees: Option<String>,
}

/// Free/busy lookup result. `free_busy` holds one digit per day:
/// 0 free, 1 tentative, 2 busy, 3 out of office, 4 working elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBusyInfo {
    pub email: String,
    #[serde(with = "super::date")]
    pub start_date: Option<NaiveDate>,
    #[serde(with = "super::date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_busy: Option<String>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
