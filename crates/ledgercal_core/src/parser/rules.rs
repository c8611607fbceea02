//! Keyword rules and create-event slot extraction.

use crate::model::event::format_event_time;
use crate::parser::{CommandParameters, CommandType, ParsedCommand};
use chrono::{Days, Local, NaiveDateTime, NaiveTime, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

const CREATE_KEYWORDS: &[&str] = &["создай", "добавь", "запланируй", "create", "add"];
const DELETE_KEYWORDS: &[&str] = &["удали", "убери", "отмени", "delete", "remove"];
const UPDATE_KEYWORDS: &[&str] = &["измени", "обнови", "update", "change"];
const LIST_KEYWORDS: &[&str] = &["покажи", "список", "события", "show", "list"];

const CREATE_CONFIDENCE: f64 = 0.9;
const DELETE_CONFIDENCE: f64 = 0.85;
const UPDATE_CONFIDENCE: f64 = 0.8;
const LIST_CONFIDENCE: f64 = 0.9;
const UNKNOWN_CONFIDENCE: f64 = 0.0;

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
const DEFAULT_HOUR: u32 = 9;
const EVENT_DURATION_HOURS: i64 = 1;

// "послезавтра" contains "завтра", so it has to be checked first.
const DAY_OFFSETS: &[(&str, u64)] = &[("послезавтра", 2), ("завтра", 1)];

const SUPPORTED_COMMANDS: &[CommandType] = &[
    CommandType::CreateEvent,
    CommandType::DeleteEvent,
    CommandType::UpdateEvent,
    CommandType::ListEvents,
];

static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["«“]([^"«»“”]+)["»”]"#).expect("valid quoted title regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{1,2})[:.]([0-9]{2})").expect("valid time regex"));

/// Parser errors. Surfaced by the worker as a failed prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserError {
    EmptyInput,
    /// Resolved date fell outside the representable calendar range.
    DateOutOfRange,
    InvalidConfidenceThreshold(f64),
}

impl Display for ParserError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "input text is empty"),
            Self::DateOutOfRange => write!(f, "resolved event date is out of range"),
            Self::InvalidConfidenceThreshold(value) => write!(
                f,
                "confidence threshold must be between 0.0 and 1.0, got {value}"
            ),
        }
    }
}

impl Error for ParserError {}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Rule-based text-to-command model.
pub struct CommandParser {
    confidence_threshold: f64,
    clock: Clock,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    /// Parser reading the local wall clock.
    pub fn new() -> Self {
        Self::with_clock(|| Local::now().naive_local())
    }

    /// Parser with an injected clock; used to pin "today" in tests.
    pub fn with_clock(clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            clock: Box::new(clock),
        }
    }

    pub fn supported_commands(&self) -> &'static [CommandType] {
        SUPPORTED_COMMANDS
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn set_confidence_threshold(&mut self, threshold: f64) -> Result<(), ParserError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ParserError::InvalidConfidenceThreshold(threshold));
        }
        self.confidence_threshold = threshold;
        Ok(())
    }

    pub fn is_confident(&self, parsed: &ParsedCommand) -> bool {
        parsed.confidence >= self.confidence_threshold
    }

    /// Parses `text` relative to the parser clock.
    pub fn parse(&self, text: &str) -> Result<ParsedCommand, ParserError> {
        self.parse_at(text, (self.clock)())
    }

    /// Parses `text` with `now` as the reference for relative dates.
    pub fn parse_at(&self, text: &str, now: NaiveDateTime) -> Result<ParsedCommand, ParserError> {
        if text.trim().is_empty() {
            return Err(ParserError::EmptyInput);
        }
        let lowered = text.to_lowercase();

        if contains_any(&lowered, CREATE_KEYWORDS) {
            return Ok(ParsedCommand {
                command_type: CommandType::CreateEvent,
                parameters: create_parameters(text, &lowered, now)?,
                confidence: CREATE_CONFIDENCE,
            });
        }

        let (command_type, confidence) = if contains_any(&lowered, DELETE_KEYWORDS) {
            (CommandType::DeleteEvent, DELETE_CONFIDENCE)
        } else if contains_any(&lowered, UPDATE_KEYWORDS) {
            (CommandType::UpdateEvent, UPDATE_CONFIDENCE)
        } else if contains_any(&lowered, LIST_KEYWORDS) {
            (CommandType::ListEvents, LIST_CONFIDENCE)
        } else {
            (CommandType::Unknown, UNKNOWN_CONFIDENCE)
        };

        Ok(ParsedCommand {
            command_type,
            parameters: CommandParameters::default(),
            confidence,
        })
    }
}

fn contains_any(lowered: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

fn create_parameters(
    original: &str,
    lowered: &str,
    now: NaiveDateTime,
) -> Result<CommandParameters, ParserError> {
    let title = QUOTED_RE
        .captures(original)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| original.to_string(), |m| m.as_str().to_string());

    let day_offset = DAY_OFFSETS
        .iter()
        .find(|(word, _)| lowered.contains(word))
        .map_or(0, |(_, days)| *days);
    let date = now
        .date()
        .checked_add_days(Days::new(day_offset))
        .ok_or(ParserError::DateOutOfRange)?;

    let start = date.and_time(extract_time(lowered));
    let end = start
        .checked_add_signed(TimeDelta::hours(EVENT_DURATION_HOURS))
        .ok_or(ParserError::DateOutOfRange)?;

    Ok(CommandParameters {
        title: Some(title),
        start_time: Some(format_event_time(start)),
        end_time: Some(format_event_time(end)),
        ..CommandParameters::default()
    })
}

/// First `H:MM` / `H.MM` that is a valid clock time, else 09:00.
fn extract_time(lowered: &str) -> NaiveTime {
    TIME_RE
        .captures_iter(lowered)
        .find_map(|caps| {
            let hour = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let minute = caps.get(2)?.as_str().parse::<u32>().ok()?;
            NaiveTime::from_hms_opt(hour, minute, 0)
        })
        .or_else(|| NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{extract_time, CommandParser, ParserError};
    use crate::parser::CommandType;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn extract_time_skips_invalid_clock_values() {
        assert_eq!(
            extract_time("в 25:00 или 14.30"),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap()
        );
        assert_eq!(
            extract_time("без времени"),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
    }

    #[test]
    fn confidence_threshold_is_bounded() {
        let mut parser = CommandParser::new();
        assert_eq!(parser.confidence_threshold(), 0.7);
        assert_eq!(
            parser.set_confidence_threshold(1.5),
            Err(ParserError::InvalidConfidenceThreshold(1.5))
        );
        parser.set_confidence_threshold(0.85).unwrap();
        assert_eq!(parser.confidence_threshold(), 0.85);
    }

    #[test]
    fn blank_input_is_a_parse_error() {
        let now = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let parser = CommandParser::new();
        assert_eq!(parser.parse_at("  \n", now), Err(ParserError::EmptyInput));
    }

    #[test]
    fn supported_commands_exclude_unknown() {
        let parser = CommandParser::new();
        assert_eq!(parser.supported_commands().len(), 4);
        assert!(!parser.supported_commands().contains(&CommandType::Unknown));
    }
}
