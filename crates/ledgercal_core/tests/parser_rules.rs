use chrono::{NaiveDate, NaiveDateTime};
use ledgercal_core::{CommandParser, CommandType, ParsedCommand};

fn reference_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap()
}

fn fixed_parser() -> CommandParser {
    CommandParser::with_clock(reference_now)
}

#[test]
fn create_with_tomorrow_and_time() {
    let parsed = fixed_parser()
        .parse("Создай встречу завтра в 15:00")
        .unwrap();

    assert_eq!(parsed.command_type, CommandType::CreateEvent);
    assert_eq!(parsed.confidence, 0.9);
    assert_eq!(
        parsed.parameters.title.as_deref(),
        Some("Создай встречу завтра в 15:00")
    );
    assert_eq!(
        parsed.parameters.start_time.as_deref(),
        Some("2024-05-02T15:00:00")
    );
    assert_eq!(
        parsed.parameters.end_time.as_deref(),
        Some("2024-05-02T16:00:00")
    );
}

#[test]
fn day_after_tomorrow_wins_over_tomorrow() {
    let parsed = fixed_parser()
        .parse("Запланируй созвон послезавтра в 9.45")
        .unwrap();

    assert_eq!(
        parsed.parameters.start_time.as_deref(),
        Some("2024-05-03T09:45:00")
    );
}

#[test]
fn quoted_title_and_default_time() {
    let parsed = fixed_parser()
        .parse("добавь «Обед с командой» на сегодня")
        .unwrap();

    assert_eq!(parsed.parameters.title.as_deref(), Some("Обед с командой"));
    assert_eq!(
        parsed.parameters.start_time.as_deref(),
        Some("2024-05-01T09:00:00")
    );
    assert_eq!(
        parsed.parameters.end_time.as_deref(),
        Some("2024-05-01T10:00:00")
    );
}

#[test]
fn end_crosses_midnight() {
    let parsed = fixed_parser().parse("create \"late call\" 23:30").unwrap();

    assert_eq!(parsed.parameters.title.as_deref(), Some("late call"));
    assert_eq!(
        parsed.parameters.end_time.as_deref(),
        Some("2024-05-02T00:30:00")
    );
}

#[test]
fn list_delete_update_and_unknown() {
    let parser = fixed_parser();
    let cases = [
        ("Покажи список событий", CommandType::ListEvents, 0.9),
        ("Удали встречу", CommandType::DeleteEvent, 0.85),
        ("Измени время встречи", CommandType::UpdateEvent, 0.8),
        ("случайный текст", CommandType::Unknown, 0.0),
    ];

    for (text, command_type, confidence) in cases {
        let parsed = parser.parse(text).unwrap();
        assert_eq!(parsed.command_type, command_type, "{text}");
        assert_eq!(parsed.confidence, confidence, "{text}");
        assert!(parsed.parameters.is_empty(), "{text}");
    }
}

#[test]
fn creation_outranks_other_keywords() {
    let parser = fixed_parser();

    let create_and_delete = parser.parse("создай и удали").unwrap();
    assert_eq!(create_and_delete.command_type, CommandType::CreateEvent);

    let delete_and_list = parser.parse("удали все события").unwrap();
    assert_eq!(delete_and_list.command_type, CommandType::DeleteEvent);

    let update_and_list = parser.parse("UPDATE list").unwrap();
    assert_eq!(update_and_list.command_type, CommandType::UpdateEvent);
}

#[test]
fn parsing_is_deterministic_for_a_fixed_clock() {
    let parser = fixed_parser();
    let first = parser.parse("Добавь встречу завтра в 8:05").unwrap();
    let second = parser.parse("Добавь встречу завтра в 8:05").unwrap();
    assert_eq!(first, second);
}

#[test]
fn output_json_is_stable_and_decodable() {
    let parsed = fixed_parser().parse("покажи события").unwrap();
    let json = parsed.to_json().unwrap();

    assert_eq!(
        json,
        r#"{"command_type":"list_events","parameters":{},"confidence":0.9}"#
    );
    assert_eq!(ParsedCommand::from_json(&json).unwrap(), parsed);
}

#[test]
fn confidence_threshold_gates_results() {
    let mut parser = fixed_parser();
    assert_eq!(parser.confidence_threshold(), 0.7);

    let update = parser.parse("обнови встречу").unwrap();
    assert!(parser.is_confident(&update));

    parser.set_confidence_threshold(0.85).unwrap();
    assert!(!parser.is_confident(&update));
    assert!(parser.set_confidence_threshold(1.5).is_err());
}
