//! Deterministic text-to-command extraction.
//!
//! # Responsibility
//! - Turn free text into `{command_type, parameters, confidence}`.
//! - Expose model metadata (supported commands, confidence threshold).
//!
//! # Invariants
//! - Output depends only on the input text and the supplied clock reading.
//! - Keyword groups are checked in fixed priority order; the first hit wins.

mod rules;

pub use rules::{CommandParser, ParserError};

use serde::{Deserialize, Serialize};

/// Command category recognized by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    CreateEvent,
    DeleteEvent,
    UpdateEvent,
    ListEvents,
    Unknown,
}

impl CommandType {
    /// Wire name, e.g. `create_event`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateEvent => "create_event",
            Self::DeleteEvent => "delete_event",
            Self::UpdateEvent => "update_event",
            Self::ListEvents => "list_events",
            Self::Unknown => "unknown",
        }
    }
}

/// Extracted parameters. Only create-event fills them today; the other
/// slots exist so that parser output can carry them once extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `YYYY-MM-DDTHH:MM:SS`, local wall clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CommandParameters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parser result, serialized verbatim into `predictions.output_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub command_type: CommandType,
    #[serde(default)]
    pub parameters: CommandParameters,
    pub confidence: f64,
}

impl ParsedCommand {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(value: &str) -> serde_json::Result<Self> {
        serde_json::from_str(value)
    }
}
