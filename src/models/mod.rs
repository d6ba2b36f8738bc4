//! Plain-data projections returned by tools.
//!
//! # Projections
//!
//! Every entity has a cheap summary used by listings and a detail view used
//! by by-id lookups:
//!
//! - [`EmailSummary`] / [`EmailDetails`]
//! - [`AppointmentSummary`] / [`AppointmentDetails`]
//! - [`TaskSummary`] (tasks have a single projection)
//!
//! # Inputs
//!
//! Tool arguments are validated into typed inputs ([`NewEmail`],
//! [`NewAppointment`], [`AppointmentChanges`], [`NewTask`], [`TaskChanges`])
//! before the session sees them, so dates are already parsed.
//!
//! Timestamps render as `YYYY-MM-DD HH:MM:SS`; task due dates as `YYYY-MM-DD`.

mod calendar;
mod mail;
mod task;

pub use calendar::*;
pub use mail::*;
pub use task::*;

use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Outcome of a mutation that did not fail with a per-call error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    /// EntryID of a created or saved item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            entry_id: None,
            message: message.into(),
        }
    }

    pub fn created(entry_id: String, message: impl Into<String>) -> Self {
        Self {
            success: true,
            entry_id: Some(entry_id),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            entry_id: None,
            message: message.into(),
        }
    }
}

/// Serde adapter for optional `YYYY-MM-DD HH:MM:SS` timestamps.
pub(crate) mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(&value.format(TIMESTAMP_FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional `YYYY-MM-DD` dates.
pub(crate) mod date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::DATE_FORMAT;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(&value.format(DATE_FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
