//! Calendar storage contract with SQLite and in-memory implementations.
//!
//! # Responsibility
//! - Persist per-account calendar events.
//! - Answer inclusive start-time range queries.
//!
//! # Invariants
//! - Writes call `CalendarEvent::validate()` first.
//! - Every read and delete is scoped by account id.
//! - At most one event exists per `source_task_id`.

use crate::model::account::AccountId;
use crate::model::event::{format_event_time, parse_event_time, CalendarEvent, EventId};
use crate::model::prediction::TaskId;
use crate::repo::{parse_uuid, RepoError, RepoResult};
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const EVENT_SELECT_SQL: &str = "SELECT
    id,
    account_id,
    title,
    description,
    start_time,
    end_time,
    location,
    reminders,
    source_task_id,
    created_at,
    updated_at
FROM calendar_events";

/// Calendar operations used by command execution and the worker.
pub trait CalendarStore {
    fn insert_event(&mut self, event: &CalendarEvent) -> RepoResult<()>;
    fn get_event(&self, account_id: AccountId, id: EventId) -> RepoResult<Option<CalendarEvent>>;
    /// Replaces a stored event; `NotFound` when it does not exist.
    fn update_event(&mut self, event: &CalendarEvent) -> RepoResult<()>;
    /// Returns whether an event was removed.
    fn delete_event(&mut self, account_id: AccountId, id: EventId) -> RepoResult<bool>;
    /// Events whose start lies in `[start, end]`, ascending by start time.
    /// Absent bounds are open.
    fn list_events(
        &self,
        account_id: AccountId,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<CalendarEvent>>;
    fn find_by_source_task(&self, task_id: TaskId) -> RepoResult<Option<CalendarEvent>>;
}

/// SQLite-backed calendar.
pub struct SqliteCalendarRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCalendarRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CalendarStore for SqliteCalendarRepository<'_> {
    fn insert_event(&mut self, event: &CalendarEvent) -> RepoResult<()> {
        event.validate()?;

        self.conn.execute(
            "INSERT INTO calendar_events (
                id,
                account_id,
                title,
                description,
                start_time,
                end_time,
                location,
                reminders,
                source_task_id,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                event.id.to_string(),
                event.account_id.to_string(),
                event.title.as_str(),
                event.description.as_deref(),
                format_event_time(event.start_time),
                event.end_time.map(format_event_time),
                event.location.as_deref(),
                encode_reminders(&event.reminders)?,
                event.source_task_id.map(|id| id.to_string()),
                event.created_at,
                event.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_event(&self, account_id: AccountId, id: EventId) -> RepoResult<Option<CalendarEvent>> {
        self.conn
            .query_row(
                &format!("{EVENT_SELECT_SQL} WHERE id = ?1 AND account_id = ?2;"),
                params![id.to_string(), account_id.to_string()],
                |row| Ok(parse_event_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn update_event(&mut self, event: &CalendarEvent) -> RepoResult<()> {
        event.validate()?;

        let changed = self.conn.execute(
            "UPDATE calendar_events
             SET
                title = ?3,
                description = ?4,
                start_time = ?5,
                end_time = ?6,
                location = ?7,
                reminders = ?8,
                updated_at = ?9
             WHERE id = ?1
               AND account_id = ?2;",
            params![
                event.id.to_string(),
                event.account_id.to_string(),
                event.title.as_str(),
                event.description.as_deref(),
                format_event_time(event.start_time),
                event.end_time.map(format_event_time),
                event.location.as_deref(),
                encode_reminders(&event.reminders)?,
                event.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("calendar event", event.id));
        }
        Ok(())
    }

    fn delete_event(&mut self, account_id: AccountId, id: EventId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM calendar_events WHERE id = ?1 AND account_id = ?2;",
            params![id.to_string(), account_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list_events(
        &self,
        account_id: AccountId,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<CalendarEvent>> {
        let mut sql = format!("{EVENT_SELECT_SQL} WHERE account_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(account_id.to_string())];

        // Fixed-width ISO text compares in time order.
        if let Some(start) = start {
            sql.push_str(" AND start_time >= ?");
            bind_values.push(Value::Text(format_event_time(start)));
        }
        if let Some(end) = end {
            sql.push_str(" AND start_time <= ?");
            bind_values.push(Value::Text(format_event_time(end)));
        }
        sql.push_str(" ORDER BY start_time ASC, created_at ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        Ok(events)
    }

    fn find_by_source_task(&self, task_id: TaskId) -> RepoResult<Option<CalendarEvent>> {
        self.conn
            .query_row(
                &format!("{EVENT_SELECT_SQL} WHERE source_task_id = ?1;"),
                [task_id.to_string()],
                |row| Ok(parse_event_row(row)),
            )
            .optional()?
            .transpose()
    }
}

/// Single-account, process-local calendar.
#[derive(Debug, Clone)]
pub struct InMemoryCalendar {
    account_id: AccountId,
    events: BTreeMap<EventId, CalendarEvent>,
}

impl InMemoryCalendar {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            events: BTreeMap::new(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn ensure_owner(&self, event: &CalendarEvent) -> RepoResult<()> {
        if event.account_id != self.account_id {
            return Err(RepoError::InvalidData(format!(
                "event {} belongs to account {}, calendar is {}",
                event.id, event.account_id, self.account_id
            )));
        }
        Ok(())
    }
}

impl CalendarStore for InMemoryCalendar {
    fn insert_event(&mut self, event: &CalendarEvent) -> RepoResult<()> {
        event.validate()?;
        self.ensure_owner(event)?;
        if let Some(task_id) = event.source_task_id {
            if self.find_by_source_task(task_id)?.is_some() {
                return Err(RepoError::InvalidData(format!(
                    "event for task {task_id} already exists"
                )));
            }
        }
        self.events.insert(event.id, event.clone());
        Ok(())
    }

    fn get_event(&self, account_id: AccountId, id: EventId) -> RepoResult<Option<CalendarEvent>> {
        if account_id != self.account_id {
            return Ok(None);
        }
        Ok(self.events.get(&id).cloned())
    }

    fn update_event(&mut self, event: &CalendarEvent) -> RepoResult<()> {
        event.validate()?;
        self.ensure_owner(event)?;
        match self.events.get_mut(&event.id) {
            Some(slot) => {
                *slot = event.clone();
                Ok(())
            }
            None => Err(RepoError::not_found("calendar event", event.id)),
        }
    }

    fn delete_event(&mut self, account_id: AccountId, id: EventId) -> RepoResult<bool> {
        if account_id != self.account_id {
            return Ok(false);
        }
        Ok(self.events.remove(&id).is_some())
    }

    fn list_events(
        &self,
        account_id: AccountId,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepoResult<Vec<CalendarEvent>> {
        if account_id != self.account_id {
            return Ok(Vec::new());
        }
        let mut events: Vec<CalendarEvent> = self
            .events
            .values()
            .filter(|event| start.map_or(true, |bound| event.start_time >= bound))
            .filter(|event| end.map_or(true, |bound| event.start_time <= bound))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(events)
    }

    fn find_by_source_task(&self, task_id: TaskId) -> RepoResult<Option<CalendarEvent>> {
        Ok(self
            .events
            .values()
            .find(|event| event.source_task_id == Some(task_id))
            .cloned())
    }
}

fn encode_reminders(reminders: &[i64]) -> RepoResult<String> {
    serde_json::to_string(reminders)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode reminders: {err}")))
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<CalendarEvent> {
    let id_text: String = row.get("id")?;
    let account_text: String = row.get("account_id")?;
    let start_text: String = row.get("start_time")?;
    let start_time = parse_event_time(&start_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid time `{start_text}` in calendar_events.start_time"
        ))
    })?;
    let end_time = match row.get::<_, Option<String>>("end_time")? {
        Some(value) => Some(parse_event_time(&value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid time `{value}` in calendar_events.end_time"))
        })?),
        None => None,
    };
    let reminders_text: String = row.get("reminders")?;
    let reminders: Vec<i64> = serde_json::from_str(&reminders_text).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid reminders `{reminders_text}` in calendar_events.reminders: {err}"
        ))
    })?;
    let source_task_id = match row.get::<_, Option<String>>("source_task_id")? {
        Some(value) => Some(parse_uuid(&value, "calendar_events.source_task_id")?),
        None => None,
    };

    let event = CalendarEvent {
        id: parse_uuid(&id_text, "calendar_events.id")?,
        account_id: parse_uuid(&account_text, "calendar_events.account_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        start_time,
        end_time,
        location: row.get("location")?,
        reminders,
        source_task_id,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    event.validate()?;
    Ok(event)
}
