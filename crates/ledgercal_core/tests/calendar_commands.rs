use chrono::{NaiveDate, NaiveDateTime};
use ledgercal_core::command::{Command, CommandAction, CommandPayload, CreateEvent};
use ledgercal_core::db::open_db_in_memory;
use ledgercal_core::{
    AccountId, CalendarEvent, CalendarStore, CommandParser, CommandType, EventUpdate,
    InMemoryCalendar, LedgerService, SqliteCalendarRepository,
};

const NOW_MS: i64 = 1_714_550_000_000;

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn create(account_id: AccountId, title: &str, start: NaiveDateTime) -> Command {
    Command::new(
        account_id,
        NOW_MS,
        CommandAction::CreateEvent(CreateEvent {
            title: title.to_string(),
            start_time: Some(start),
            end_time: Some(start + chrono::TimeDelta::hours(1)),
            reminders: vec![15, 60],
            ..CreateEvent::default()
        }),
    )
}

fn created_event(command: &Command, store: &mut impl CalendarStore) -> CalendarEvent {
    let outcome = command.execute(store, NOW_MS).unwrap();
    assert!(outcome.success);
    match outcome.payload {
        CommandPayload::Created { event } => event,
        other => panic!("unexpected payload: {other:?}"),
    }
}

/// Full create/list/update/delete cycle, shared by both stores.
fn exercise_store(store: &mut impl CalendarStore, account_id: AccountId) {
    let late = created_event(&create(account_id, "Ретро", at(3, 16, 0)), store);
    let early = created_event(&create(account_id, "Стендап", at(2, 10, 0)), store);
    assert_eq!(early.reminders, vec![15, 60]);

    // Listing is ascending by start and bounds are inclusive.
    let list = Command::new(
        account_id,
        NOW_MS,
        CommandAction::ListEvents {
            start: Some(at(2, 10, 0)),
            end: Some(at(3, 16, 0)),
        },
    );
    match list.execute(store, NOW_MS).unwrap().payload {
        CommandPayload::Listed { events, count } => {
            assert_eq!(count, 2);
            assert_eq!(events[0].id, early.id);
            assert_eq!(events[1].id, late.id);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    let update = Command::new(
        account_id,
        NOW_MS,
        CommandAction::UpdateEvent {
            event_id: early.id.to_string(),
            updates: EventUpdate {
                location: Some("Переговорная 3".to_string()),
                ..EventUpdate::default()
            },
        },
    );
    let outcome = update.execute(store, NOW_MS + 1).unwrap();
    assert!(outcome.success);
    let stored = store.get_event(account_id, early.id).unwrap().unwrap();
    assert_eq!(stored.location.as_deref(), Some("Переговорная 3"));
    assert_eq!(stored.title, "Стендап");
    assert_eq!(stored.updated_at, NOW_MS + 1);

    let delete = Command::new(
        account_id,
        NOW_MS,
        CommandAction::DeleteEvent {
            event_id: late.id.to_string(),
        },
    );
    assert!(delete.execute(store, NOW_MS).unwrap().success);

    // Deleting again is a non-fatal not-found.
    let again = delete.execute(store, NOW_MS).unwrap();
    assert!(!again.success);
    assert!(matches!(again.payload, CommandPayload::NotFound { .. }));

    let remaining = store.list_events(account_id, None, None).unwrap();
    assert_eq!(remaining.len(), 1);
}

#[test]
fn sqlite_store_runs_full_command_cycle() {
    let conn = open_db_in_memory().unwrap();
    let account = LedgerService::new(&conn).open_account().unwrap();
    let mut store = SqliteCalendarRepository::new(&conn);

    exercise_store(&mut store, account.id);
}

#[test]
fn in_memory_store_runs_full_command_cycle() {
    let account_id = uuid::Uuid::new_v4();
    let mut store = InMemoryCalendar::new(account_id);

    exercise_store(&mut store, account_id);
    assert_eq!(store.len(), 1);
}

#[test]
fn invalid_commands_do_not_touch_the_calendar() {
    let account_id = uuid::Uuid::new_v4();
    let mut store = InMemoryCalendar::new(account_id);

    let blank_title = create(account_id, "   ", at(2, 10, 0));
    assert!(!blank_title.validate());

    let inverted = Command::new(
        account_id,
        NOW_MS,
        CommandAction::CreateEvent(CreateEvent {
            title: "Встреча".to_string(),
            start_time: Some(at(2, 10, 0)),
            end_time: Some(at(2, 9, 0)),
            ..CreateEvent::default()
        }),
    );
    let empty_update = Command::new(
        account_id,
        NOW_MS,
        CommandAction::UpdateEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            updates: EventUpdate::default(),
        },
    );
    let inverted_range = Command::new(
        account_id,
        NOW_MS,
        CommandAction::ListEvents {
            start: Some(at(3, 0, 0)),
            end: Some(at(2, 0, 0)),
        },
    );
    let unknown = Command::new(account_id, NOW_MS, CommandAction::Unknown);

    for command in [blank_title, inverted, empty_update, inverted_range, unknown] {
        let outcome = command.execute(&mut store, NOW_MS).unwrap();
        assert!(!outcome.success);
        assert!(matches!(outcome.payload, CommandPayload::Error { .. }));
    }
    assert!(store.is_empty());
}

#[test]
fn updating_missing_event_reports_not_found() {
    let account_id = uuid::Uuid::new_v4();
    let mut store = InMemoryCalendar::new(account_id);
    let command = Command::new(
        account_id,
        NOW_MS,
        CommandAction::UpdateEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            updates: EventUpdate {
                title: Some("x".to_string()),
                ..EventUpdate::default()
            },
        },
    );

    let outcome = command.execute(&mut store, NOW_MS).unwrap();
    assert!(!outcome.success);
    assert!(matches!(outcome.payload, CommandPayload::NotFound { .. }));
}

#[test]
fn events_are_scoped_to_their_account() {
    let conn = open_db_in_memory().unwrap();
    let ledger = LedgerService::new(&conn);
    let owner = ledger.open_account().unwrap();
    let stranger = ledger.open_account().unwrap();
    let mut store = SqliteCalendarRepository::new(&conn);

    let event = created_event(&create(owner.id, "Личное", at(2, 8, 0)), &mut store);

    assert!(store.get_event(stranger.id, event.id).unwrap().is_none());
    assert!(store.list_events(stranger.id, None, None).unwrap().is_empty());
    let foreign_delete = Command::new(
        stranger.id,
        NOW_MS,
        CommandAction::DeleteEvent {
            event_id: event.id.to_string(),
        },
    );
    assert!(!foreign_delete.execute(&mut store, NOW_MS).unwrap().success);
    assert!(store.get_event(owner.id, event.id).unwrap().is_some());
}

#[test]
fn parsed_create_becomes_typed_command() {
    let now = at(1, 12, 0);
    let parser = CommandParser::with_clock(move || now);
    let parsed = parser.parse("Создай «Планёрка» завтра в 11:15").unwrap();
    let account_id = uuid::Uuid::new_v4();

    let command = Command::from_parsed(&parsed, account_id, NOW_MS, now);
    assert_eq!(command.command_type(), CommandType::CreateEvent);
    match &command.action {
        CommandAction::CreateEvent(create) => {
            assert_eq!(create.title, "Планёрка");
            assert_eq!(create.start_time, Some(at(2, 11, 15)));
            assert_eq!(create.end_time, Some(at(2, 12, 15)));
        }
        other => panic!("unexpected action: {other:?}"),
    }

    let listing = parser.parse("покажи события").unwrap();
    let command = Command::from_parsed(&listing, account_id, NOW_MS, now);
    assert_eq!(
        command.action,
        CommandAction::ListEvents {
            start: None,
            end: None
        }
    );
}
