//! Typed calendar commands and their execution.
//!
//! # Responsibility
//! - Represent parsed intents as a closed set of command variants.
//! - Validate and execute them against any `CalendarStore`.
//!
//! # Invariants
//! - `execute` never mutates the calendar when `validate` fails.
//! - Logical failures (invalid parameters, missing event) are reported in
//!   `CommandOutcome`; only storage failures surface as `Err`.

use crate::model::account::AccountId;
use crate::model::event::{
    parse_event_time, truncate_to_seconds, CalendarEvent, EventId, EventUpdate,
};
use crate::model::prediction::TaskId;
use crate::parser::{CommandParameters, CommandType, ParsedCommand};
use crate::repo::calendar_repo::CalendarStore;
use crate::repo::RepoResult;
use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

/// Title used when a parsed create-event carries none.
pub const DEFAULT_EVENT_TITLE: &str = "Новое событие";

/// Command plus audit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub account_id: AccountId,
    /// Unix epoch milliseconds.
    pub issued_at: i64,
    pub action: CommandAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    CreateEvent(CreateEvent),
    DeleteEvent {
        event_id: String,
    },
    UpdateEvent {
        event_id: String,
        updates: EventUpdate,
    },
    ListEvents {
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    },
    Unknown,
}

/// Create-event slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub location: Option<String>,
    pub reminders: Vec<i64>,
    /// Dedup key when the command originates from a queued task.
    pub source_task_id: Option<TaskId>,
}

impl CreateEvent {
    /// Builds slots from parser parameters.
    ///
    /// A missing title becomes `default_title`; a missing or unparsable
    /// start becomes `fallback_start`; an unparsable end is dropped.
    pub fn from_parameters(
        parameters: &CommandParameters,
        default_title: &str,
        fallback_start: NaiveDateTime,
    ) -> Self {
        let title = parameters
            .title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(default_title)
            .to_string();
        Self {
            title,
            description: parameters.description.clone(),
            start_time: Some(
                parameters
                    .start_time
                    .as_deref()
                    .and_then(parse_event_time)
                    .unwrap_or(fallback_start),
            ),
            end_time: parameters.end_time.as_deref().and_then(parse_event_time),
            location: parameters.location.clone(),
            reminders: Vec::new(),
            source_task_id: None,
        }
    }

    fn is_valid(&self) -> bool {
        let Some(start) = self.start_time else {
            return false;
        };
        !self.title.trim().is_empty() && self.end_time.map_or(true, |end| end >= start)
    }
}

/// Outcome of `Command::execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(flatten)]
    pub payload: CommandPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandPayload {
    Created { event: CalendarEvent },
    Updated { event: CalendarEvent },
    Deleted { event_id: String },
    NotFound { event_id: String },
    Listed { events: Vec<CalendarEvent>, count: usize },
    Error { message: String },
}

impl CommandOutcome {
    fn ok(payload: CommandPayload) -> Self {
        Self {
            success: true,
            payload,
        }
    }

    fn failed(payload: CommandPayload) -> Self {
        Self {
            success: false,
            payload,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::failed(CommandPayload::Error {
            message: message.into(),
        })
    }
}

impl Command {
    pub fn new(account_id: AccountId, issued_at: i64, action: CommandAction) -> Self {
        Self {
            account_id,
            issued_at,
            action,
        }
    }

    /// Builds a command from parser output.
    ///
    /// `now` fills a create-event start that the parser did not provide.
    pub fn from_parsed(
        parsed: &ParsedCommand,
        account_id: AccountId,
        issued_at: i64,
        now: NaiveDateTime,
    ) -> Self {
        let parameters = &parsed.parameters;
        let action = match parsed.command_type {
            CommandType::CreateEvent => CommandAction::CreateEvent(CreateEvent::from_parameters(
                parameters,
                DEFAULT_EVENT_TITLE,
                now,
            )),
            CommandType::DeleteEvent => CommandAction::DeleteEvent {
                event_id: parameters.event_id.clone().unwrap_or_default(),
            },
            CommandType::UpdateEvent => CommandAction::UpdateEvent {
                event_id: parameters.event_id.clone().unwrap_or_default(),
                updates: EventUpdate {
                    title: parameters.title.clone(),
                    description: parameters.description.clone(),
                    start_time: parameters.start_time.as_deref().and_then(parse_event_time),
                    end_time: parameters.end_time.as_deref().and_then(parse_event_time),
                    location: parameters.location.clone(),
                },
            },
            CommandType::ListEvents => CommandAction::ListEvents {
                start: parameters.start_time.as_deref().and_then(parse_event_time),
                end: parameters.end_time.as_deref().and_then(parse_event_time),
            },
            CommandType::Unknown => CommandAction::Unknown,
        };
        Self::new(account_id, issued_at, action)
    }

    pub fn command_type(&self) -> CommandType {
        match self.action {
            CommandAction::CreateEvent(_) => CommandType::CreateEvent,
            CommandAction::DeleteEvent { .. } => CommandType::DeleteEvent,
            CommandAction::UpdateEvent { .. } => CommandType::UpdateEvent,
            CommandAction::ListEvents { .. } => CommandType::ListEvents,
            CommandAction::Unknown => CommandType::Unknown,
        }
    }

    pub fn validate(&self) -> bool {
        match &self.action {
            CommandAction::CreateEvent(create) => create.is_valid(),
            CommandAction::DeleteEvent { event_id } => !event_id.trim().is_empty(),
            CommandAction::UpdateEvent { event_id, updates } => {
                !event_id.trim().is_empty() && !updates.is_empty()
            }
            CommandAction::ListEvents { start, end } => match (start, end) {
                (Some(start), Some(end)) => end >= start,
                _ => true,
            },
            CommandAction::Unknown => false,
        }
    }

    /// Runs the command against `calendar`, stamping writes with `now_ms`.
    pub fn execute<S>(&self, calendar: &mut S, now_ms: i64) -> RepoResult<CommandOutcome>
    where
        S: CalendarStore + ?Sized,
    {
        if let CommandAction::Unknown = self.action {
            return Ok(CommandOutcome::error("unknown command"));
        }
        if !self.validate() {
            return Ok(CommandOutcome::error("invalid command parameters"));
        }

        match &self.action {
            CommandAction::CreateEvent(create) => self.execute_create(create, calendar, now_ms),
            CommandAction::DeleteEvent { event_id } => {
                let removed = match parse_event_id(event_id) {
                    Some(id) => calendar.delete_event(self.account_id, id)?,
                    None => false,
                };
                let event_id = event_id.clone();
                Ok(if removed {
                    CommandOutcome::ok(CommandPayload::Deleted { event_id })
                } else {
                    CommandOutcome::failed(CommandPayload::NotFound { event_id })
                })
            }
            CommandAction::UpdateEvent { event_id, updates } => {
                let existing = match parse_event_id(event_id) {
                    Some(id) => calendar.get_event(self.account_id, id)?,
                    None => None,
                };
                let Some(mut event) = existing else {
                    return Ok(CommandOutcome::failed(CommandPayload::NotFound {
                        event_id: event_id.clone(),
                    }));
                };
                event.apply_update(updates, now_ms);
                if let Err(err) = event.validate() {
                    return Ok(CommandOutcome::error(err.to_string()));
                }
                calendar.update_event(&event)?;
                Ok(CommandOutcome::ok(CommandPayload::Updated { event }))
            }
            CommandAction::ListEvents { start, end } => {
                let events = calendar.list_events(self.account_id, *start, *end)?;
                let count = events.len();
                Ok(CommandOutcome::ok(CommandPayload::Listed { events, count }))
            }
            CommandAction::Unknown => Ok(CommandOutcome::error("unknown command")),
        }
    }

    fn execute_create<S>(
        &self,
        create: &CreateEvent,
        calendar: &mut S,
        now_ms: i64,
    ) -> RepoResult<CommandOutcome>
    where
        S: CalendarStore + ?Sized,
    {
        let Some(start_time) = create.start_time else {
            return Ok(CommandOutcome::error("invalid command parameters"));
        };
        let mut event = CalendarEvent::new(self.account_id, create.title.clone(), start_time, now_ms);
        event.description = create.description.clone();
        event.end_time = create.end_time.map(truncate_to_seconds);
        event.location = create.location.clone();
        event.source_task_id = create.source_task_id;
        for minutes in &create.reminders {
            event.add_reminder(*minutes);
        }
        if let Err(err) = event.validate() {
            return Ok(CommandOutcome::error(err.to_string()));
        }

        calendar.insert_event(&event)?;
        Ok(CommandOutcome::ok(CommandPayload::Created { event }))
    }
}

fn parse_event_id(value: &str) -> Option<EventId> {
    Uuid::parse_str(value.trim()).ok()
}
