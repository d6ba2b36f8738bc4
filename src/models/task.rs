use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Projection of a task item, used for both listings and lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub entry_id: String,
    pub subject: String,
    pub body: String,
    #[serde(with = "super::date")]
    pub due_date: Option<NaiveDate>,
    /// Host status code: 0 not started, 1 in progress, 2 complete.
    pub status: Option<i64>,
    /// Importance: 0 low, 1 normal, 2 high.
    pub priority: Option<i64>,
    pub complete: bool,
    pub percent_complete: i64,
}

/// The host's task status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Complete,
}

impl TaskStatus {
    pub fn code(&self) -> i64 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 1,
            Self::Complete => 2,
        }
    }

    /// Status implied by a completion percentage.
    pub fn for_percent(percent: i64) -> Self {
        match percent {
            100.. => Self::Complete,
            ..=0 => Self::NotStarted,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub subject: String,
    pub body: String,
    pub due_date: Option<NaiveDate>,
    pub importance: i64,
}

/// Fields to change on an existing task; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub importance: Option<i64>,
    pub percent_complete: Option<i64>,
    pub complete: Option<bool>,
}
