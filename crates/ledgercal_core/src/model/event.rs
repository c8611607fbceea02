//! Calendar event model.
//!
//! # Responsibility
//! - Define the per-account calendar entry and its partial-update shape.
//! - Own the wall-clock time format used on the wire and in storage.
//!
//! # Invariants
//! - `title` is non-empty after trimming.
//! - `end_time`, when set, is not earlier than `start_time`.
//! - Times carry whole-second precision; sub-second parts are dropped.

use crate::model::account::AccountId;
use crate::model::prediction::TaskId;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EventId = Uuid;

/// Fixed-width ISO-8601 layout; lexicographic order equals time order.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Formats a wall-clock time in the canonical event layout.
pub fn format_event_time(value: NaiveDateTime) -> String {
    value.format(EVENT_TIME_FORMAT).to_string()
}

/// Parses an ISO-8601 local date-time (`2026-10-20T15:00:00`, optional
/// fractional seconds, `T` or space separator).
pub fn parse_event_time(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(trimmed, layout).ok())
        .map(truncate_to_seconds)
}

pub fn truncate_to_seconds(value: NaiveDateTime) -> NaiveDateTime {
    value.with_nanosecond(0).unwrap_or(value)
}

/// Validation errors for calendar events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    EmptyTitle,
    EndBeforeStart {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    NegativeReminder(i64),
}

impl Display for EventValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "event title must not be empty"),
            Self::EndBeforeStart { start, end } => write!(
                f,
                "event end {} is earlier than start {}",
                format_event_time(*end),
                format_event_time(*start)
            ),
            Self::NegativeReminder(minutes) => {
                write!(f, "reminder offset must be >= 0 minutes, got {minutes}")
            }
        }
    }
}

impl Error for EventValidationError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: EventId,
    pub account_id: AccountId,
    pub title: String,
    pub description: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub location: Option<String>,
    /// Minutes before `start_time`, in insertion order.
    pub reminders: Vec<i64>,
    /// Task that materialized this event, when created by the worker.
    pub source_task_id: Option<TaskId>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl CalendarEvent {
    /// Creates an event with a generated id and no optional fields set.
    pub fn new(
        account_id: AccountId,
        title: impl Into<String>,
        start_time: NaiveDateTime,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            title: title.into(),
            description: None,
            start_time: truncate_to_seconds(start_time),
            end_time: None,
            location: None,
            reminders: Vec::new(),
            source_task_id: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.title.trim().is_empty() {
            return Err(EventValidationError::EmptyTitle);
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(EventValidationError::EndBeforeStart {
                    start: self.start_time,
                    end,
                });
            }
        }
        if let Some(minutes) = self.reminders.iter().copied().find(|minutes| *minutes < 0) {
            return Err(EventValidationError::NegativeReminder(minutes));
        }
        Ok(())
    }

    pub fn add_reminder(&mut self, minutes_before: i64) {
        self.reminders.push(minutes_before);
    }

    /// Applies the present fields of `update` and bumps `updated_at`.
    ///
    /// Does not validate; callers check the result before persisting.
    pub fn apply_update(&mut self, update: &EventUpdate, now_ms: i64) {
        if let Some(title) = &update.title {
            self.title = title.clone();
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(start) = update.start_time {
            self.start_time = truncate_to_seconds(start);
        }
        if let Some(end) = update.end_time {
            self.end_time = Some(truncate_to_seconds(end));
        }
        if let Some(location) = &update.location {
            self.location = Some(location.clone());
        }
        self.updated_at = now_ms;
    }
}

/// Partial update: only `Some` slots are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl EventUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.location.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{format_event_time, parse_event_time, CalendarEvent, EventUpdate, EventValidationError};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 20)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn event_time_format_roundtrips_and_drops_fraction() {
        assert_eq!(format_event_time(at(15, 0)), "2026-10-20T15:00:00");
        assert_eq!(parse_event_time("2026-10-20T15:00:00"), Some(at(15, 0)));
        assert_eq!(parse_event_time("2026-10-20 15:00:00.250"), Some(at(15, 0)));
        assert_eq!(parse_event_time("2026-10-20T15:00"), Some(at(15, 0)));
        assert_eq!(parse_event_time("tomorrow"), None);
    }

    #[test]
    fn validate_rejects_blank_title_and_inverted_range() {
        let mut event = CalendarEvent::new(Uuid::new_v4(), "   ", at(10, 0), 0);
        assert_eq!(event.validate(), Err(EventValidationError::EmptyTitle));

        event.title = "standup".to_string();
        event.end_time = Some(at(9, 0));
        assert!(matches!(
            event.validate(),
            Err(EventValidationError::EndBeforeStart { .. })
        ));

        event.end_time = Some(at(10, 0));
        assert_eq!(event.validate(), Ok(()));
    }

    #[test]
    fn apply_update_touches_only_present_fields() {
        let mut event = CalendarEvent::new(Uuid::new_v4(), "standup", at(10, 0), 1);
        event.location = Some("room 1".to_string());
        let update = EventUpdate {
            title: Some("retro".to_string()),
            ..EventUpdate::default()
        };
        event.apply_update(&update, 5);

        assert_eq!(event.title, "retro");
        assert_eq!(event.location.as_deref(), Some("room 1"));
        assert_eq!(event.start_time, at(10, 0));
        assert_eq!(event.updated_at, 5);
        assert!(!update.is_empty());
        assert!(EventUpdate::default().is_empty());
    }
}
