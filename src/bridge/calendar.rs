//! Bounded calendar retrieval and appointment operations.
//!
//! Recurring series are expanded by the host. A series with no end date
//! expands forever, so the date window has to reach the host as a
//! restriction before iteration starts; filtering afterwards would already
//! be too late.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::host::filter::{format_date_literal, quote};
use crate::host::{Item, ItemKind, MeetingResponse, Variant};
use crate::models::{
    AppointmentChanges, AppointmentDetails, AppointmentSummary, FreeBusyInfo, MeetingStatus,
    NewAppointment, OperationResult, ResponseStatus,
};

use super::{mutation, put_all, Bridge, BridgeError, Entity, ItemOutcome, SafeAccessor, SkipReason};

/// Keeps only appointments; meeting requests and responses in the calendar
/// fail once recurrences are expanded.
const APPOINTMENT_FILTER: &str =
    "[MessageClass] >= 'IPM.Appointment' AND [MessageClass] < 'IPM.Appointment{'";

/// Free/busy slot length: one character per day.
const FREE_BUSY_SLOT_MINUTES: u32 = 24 * 60;

/// Date range of a calendar listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceWindow {
    Bounded {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// No date filtering. Explicitly requested by the caller.
    Unbounded,
}

impl RecurrenceWindow {
    /// `[now, now + days]`. Fails when the end is past the last
    /// representable date.
    pub fn next_days(now: NaiveDateTime, days: u32) -> Result<Self, BridgeError> {
        let end = Duration::try_days(i64::from(days))
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| BridgeError::validation("days", format!("{} days is out of range", days)))?;
        Ok(Self::Bounded { start: now, end })
    }

    /// Whether `[start, end]` overlaps the window. A missing end counts as a
    /// zero-length item.
    pub fn overlaps(&self, start: NaiveDateTime, end: Option<NaiveDateTime>) -> bool {
        match self {
            Self::Bounded {
                start: from,
                end: until,
            } => start <= *until && end.unwrap_or(start) >= *from,
            Self::Unbounded => true,
        }
    }

    /// Host restriction bounding `[Start]` and `[End]` to the window.
    ///
    /// Host date literals have minute precision. Truncating `start` only
    /// widens the filter; `end` is rounded up so that nothing inside the
    /// window is dropped before the overlap re-check.
    fn restriction(&self) -> Option<String> {
        match self {
            Self::Bounded { start, end } => Some(format!(
                "[Start] <= {} AND [End] >= {}",
                quote(&format_date_literal(ceil_minute(*end))),
                quote(&format_date_literal(*start)),
            )),
            Self::Unbounded => None,
        }
    }
}

fn ceil_minute(at: NaiveDateTime) -> NaiveDateTime {
    if at.second() == 0 && at.nanosecond() == 0 {
        return at;
    }
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .and_then(|t| t.checked_add_signed(Duration::minutes(1)))
        .unwrap_or(at)
}

impl Bridge {
    /// Appointments and expanded occurrences overlapping `window`, in
    /// ascending start order.
    pub fn list_calendar_events(
        &self,
        window: RecurrenceWindow,
    ) -> Result<Vec<AppointmentSummary>, BridgeError> {
        let items = self.calendar()?.items()?;
        let mut items = items.restrict(APPOINTMENT_FILTER)?;
        items.set_include_recurrences(true)?;
        items.sort("[Start]", false)?;
        let items = match window.restriction() {
            Some(filter) => items.restrict(&filter)?,
            None => items,
        };

        let limit = match window {
            RecurrenceWindow::Bounded { .. } => usize::MAX,
            RecurrenceWindow::Unbounded => self.options().all_events_limit,
        };
        let mut events = Vec::new();
        let mut skipped = 0usize;
        for item in items.iter() {
            let outcome = match item {
                Ok(item) => project_event(item.as_ref(), &window),
                Err(e) => ItemOutcome::Skipped(SkipReason::Failed(e)),
            };
            match outcome {
                ItemOutcome::Projected(event) => events.push(event),
                ItemOutcome::Skipped(reason) => {
                    tracing::debug!(?reason, "Skipping calendar item");
                    skipped += 1;
                }
            }
            if events.len() >= limit {
                tracing::warn!(limit, "Unbounded calendar listing truncated");
                break;
            }
        }
        tracing::debug!(returned = events.len(), skipped, "Listed calendar events");
        Ok(events)
    }

    pub fn get_appointment(&self, entry_id: &str) -> Result<AppointmentDetails, BridgeError> {
        let item = self.require(Entity::Appointment, entry_id)?;
        let access = SafeAccessor::new(item.as_ref());
        Ok(AppointmentDetails {
            summary: appointment_summary(&access, access.optional_date("Start")),
            body: access.text("Body", ""),
        })
    }

    pub fn create_appointment(&self, appointment: NewAppointment) -> Result<OperationResult, BridgeError> {
        if appointment.end < appointment.start {
            return Err(BridgeError::validation("end", "must not be before start"));
        }
        let mut item = self.application().create_item(ItemKind::Appointment)?;
        let mut values: Vec<(&str, Variant)> = vec![
            ("Subject", appointment.subject.into()),
            ("Start", appointment.start.into()),
            ("End", appointment.end.into()),
            ("Location", appointment.location.into()),
            ("Body", appointment.body.into()),
            ("AllDayEvent", appointment.all_day.into()),
        ];
        if let Some(required) = appointment.required_attendees.filter(|a| !a.is_empty()) {
            values.push(("RequiredAttendees", required.into()));
        }
        if let Some(optional) = appointment.optional_attendees.filter(|a| !a.is_empty()) {
            values.push(("OptionalAttendees", optional.into()));
        }
        match put_all(item.as_mut(), values).and_then(|()| item.save()) {
            Ok(()) => {
                let entry_id = SafeAccessor::new(item.as_ref()).text("EntryID", "");
                tracing::info!(entry_id = %entry_id, "Created appointment");
                Ok(OperationResult::created(entry_id, "Appointment created"))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create appointment");
                Ok(OperationResult::failed(e.to_string()))
            }
        }
    }

    pub fn edit_appointment(
        &self,
        entry_id: &str,
        changes: AppointmentChanges,
    ) -> Result<OperationResult, BridgeError> {
        if let (Some(start), Some(end)) = (changes.start, changes.end) {
            if end < start {
                return Err(BridgeError::validation("end", "must not be before start"));
            }
        }
        let mut item = self.require(Entity::Appointment, entry_id)?;
        let mut values: Vec<(&str, Variant)> = Vec::new();
        if let Some(required) = changes.required_attendees.filter(|a| !a.is_empty()) {
            values.push(("RequiredAttendees", required.into()));
        }
        if let Some(optional) = changes.optional_attendees.filter(|a| !a.is_empty()) {
            values.push(("OptionalAttendees", optional.into()));
        }
        if let Some(subject) = changes.subject.filter(|s| !s.is_empty()) {
            values.push(("Subject", subject.into()));
        }
        if let Some(start) = changes.start {
            values.push(("Start", start.into()));
        }
        if let Some(end) = changes.end {
            values.push(("End", end.into()));
        }
        if let Some(location) = changes.location {
            values.push(("Location", location.into()));
        }
        if let Some(body) = changes.body {
            values.push(("Body", body.into()));
        }
        let result = put_all(item.as_mut(), values).and_then(|()| item.save());
        mutation(Entity::Appointment, entry_id, result, "Appointment updated")
    }

    /// Answer a meeting invitation and send the response to the organizer.
    pub fn respond_to_meeting(
        &self,
        entry_id: &str,
        response: MeetingResponse,
    ) -> Result<OperationResult, BridgeError> {
        let mut item = self.require(Entity::Appointment, entry_id)?;
        let result = item
            .respond(response)
            .and_then(|mut message| message.send());
        mutation(
            Entity::Appointment,
            entry_id,
            result,
            format!("Meeting response sent: {}", response.as_str()),
        )
    }

    pub fn delete_appointment(&self, entry_id: &str) -> Result<OperationResult, BridgeError> {
        self.delete_item(Entity::Appointment, entry_id)
    }

    /// Free/busy for `address`, defaulting to the configured account and then
    /// to the current user. The span defaults to one day from `today`.
    pub fn get_free_busy(
        &self,
        address: Option<String>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<FreeBusyInfo, BridgeError> {
        let start = start.unwrap_or(today);
        let end = end.unwrap_or(start + Duration::days(1));
        if end < start {
            return Err(BridgeError::validation("end_date", "must not be before start_date"));
        }
        let address = match address.filter(|a| !a.trim().is_empty()) {
            Some(address) => address,
            None => match &self.options().account {
                Some(account) => account.clone(),
                None => self.namespace().current_user_address()?,
            },
        };

        let mut info = FreeBusyInfo {
            email: address.clone(),
            start_date: Some(start),
            end_date: Some(end),
            free_busy: None,
            resolved: false,
            error: None,
        };
        match self.namespace().free_busy(&address, start, FREE_BUSY_SLOT_MINUTES) {
            Ok(Some(slots)) => {
                info.free_busy = Some(slots);
                info.resolved = true;
            }
            Ok(None) => info.error = Some("Could not resolve email address".into()),
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "Free/busy lookup failed");
                info.error = Some(e.to_string());
            }
        }
        Ok(info)
    }
}

fn project_event(item: &dyn Item, window: &RecurrenceWindow) -> ItemOutcome<AppointmentSummary> {
    let access = SafeAccessor::new(item);
    let Some(start) = access.optional_date("Start") else {
        return ItemOutcome::Skipped(SkipReason::NoStart);
    };
    if !window.overlaps(start, access.optional_date("End")) {
        return ItemOutcome::Skipped(SkipReason::OutsideWindow);
    }
    ItemOutcome::Projected(appointment_summary(&access, Some(start)))
}

fn appointment_summary(access: &SafeAccessor<'_>, start: Option<NaiveDateTime>) -> AppointmentSummary {
    AppointmentSummary {
        entry_id: access.text("EntryID", ""),
        subject: access.text("Subject", "(No Subject)"),
        start,
        end: access.optional_date("End"),
        location: access.text("Location", ""),
        organizer: access.optional_text("Organizer"),
        all_day: access.bool("AllDayEvent", false),
        required_attendees: access.text("RequiredAttendees", ""),
        optional_attendees: access.text("OptionalAttendees", ""),
        response_status: ResponseStatus::from_code(access.optional_int("ResponseStatus")),
        meeting_status: MeetingStatus::from_code(access.optional_int("MeetingStatus")),
        response_requested: access.bool("ResponseRequested", false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn window_overlap_is_inclusive() {
        let window = RecurrenceWindow::next_days(at("2025-03-10 12:00:00"), 7).unwrap();
        assert!(window.overlaps(at("2025-03-10 11:00:00"), Some(at("2025-03-10 12:00:00"))));
        assert!(window.overlaps(at("2025-03-17 12:00:00"), None));
        assert!(!window.overlaps(at("2025-03-17 12:00:01"), None));
        assert!(!window.overlaps(at("2025-03-09 09:00:00"), Some(at("2025-03-09 10:00:00"))));
        assert!(RecurrenceWindow::Unbounded.overlaps(at("1999-01-01 00:00:00"), None));
    }

    #[test]
    fn zero_day_window_is_a_point() {
        let now = at("2025-03-10 12:00:00");
        let window = RecurrenceWindow::next_days(now, 0).unwrap();
        assert!(window.overlaps(at("2025-03-10 11:00:00"), Some(at("2025-03-10 13:00:00"))));
        assert!(!window.overlaps(at("2025-03-10 12:30:00"), Some(at("2025-03-10 13:00:00"))));
    }

    #[test]
    fn restriction_uses_host_date_literals() {
        let window = RecurrenceWindow::next_days(at("2025-03-10 12:00:00"), 7).unwrap();
        assert_eq!(
            window.restriction().unwrap(),
            "[Start] <= '03/17/2025 12:00' AND [End] >= '03/10/2025 12:00'"
        );
        assert_eq!(RecurrenceWindow::Unbounded.restriction(), None);
    }

    #[test]
    fn restriction_rounds_the_window_end_up() {
        let window = RecurrenceWindow::next_days(at("2025-03-10 12:00:30"), 0).unwrap();
        assert_eq!(
            window.restriction().unwrap(),
            "[Start] <= '03/10/2025 12:01' AND [End] >= '03/10/2025 12:00'"
        );

        let window = RecurrenceWindow::next_days(at("2025-12-31 23:59:01"), 0).unwrap();
        assert_eq!(
            window.restriction().unwrap(),
            "[Start] <= '01/01/2026 00:00' AND [End] >= '12/31/2025 23:59'"
        );
    }

    #[test]
    fn out_of_range_window_is_a_validation_error() {
        let now = at("2025-03-10 12:00:00");
        for days in [200_000_000, u32::MAX] {
            match RecurrenceWindow::next_days(now, days) {
                Err(BridgeError::Validation { field, .. }) => assert_eq!(field, "days"),
                other => panic!("expected a validation error, got {:?}", other),
            }
        }
        assert!(RecurrenceWindow::next_days(now, 365_000).is_ok());
    }
}
