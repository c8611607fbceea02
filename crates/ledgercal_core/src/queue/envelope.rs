//! Task envelope wire format.
//!
//! ```json
//! { "task_id": "...", "user_id": "...", "task_type": "text_to_command",
//!   "input_data": "...", "prediction_id": "..." }
//! ```

use crate::model::account::AccountId;
use crate::model::prediction::{PredictionId, TaskId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// The only task type the worker accepts.
pub const TEXT_TO_COMMAND_TASK: &str = "text_to_command";

/// Envelope as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub user_id: String,
    pub task_type: String,
    pub input_data: String,
    pub prediction_id: String,
}

impl TaskEnvelope {
    pub fn text_to_command(
        task_id: TaskId,
        account_id: AccountId,
        input_data: impl Into<String>,
        prediction_id: PredictionId,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            user_id: account_id.to_string(),
            task_type: TEXT_TO_COMMAND_TASK.to_string(),
            input_data: input_data.into(),
            prediction_id: prediction_id.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Envelope as received: every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawTaskEnvelope {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub input_data: Option<String>,
    #[serde(default)]
    pub prediction_id: Option<String>,
}

/// Envelope that passed validation, with ids parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidTask {
    pub task_id: TaskId,
    pub account_id: AccountId,
    pub input_data: String,
    pub prediction_id: PredictionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    MissingField(&'static str),
    UnsupportedTaskType(String),
    EmptyInput,
    InvalidId { field: &'static str, value: String },
}

impl Display for EnvelopeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::UnsupportedTaskType(value) => write!(f, "unsupported task type `{value}`"),
            Self::EmptyInput => write!(f, "input_data is empty"),
            Self::InvalidId { field, value } => write!(f, "invalid id `{value}` in `{field}`"),
        }
    }
}

impl Error for EnvelopeError {}

impl RawTaskEnvelope {
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    /// Prediction id if present and well-formed, even when the rest of the
    /// envelope is invalid; lets the worker record the failure.
    pub fn prediction_id(&self) -> Option<PredictionId> {
        self.prediction_id
            .as_deref()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
    }

    pub fn validate(&self) -> Result<ValidTask, EnvelopeError> {
        let task_id = required(&self.task_id, "task_id")?;
        let user_id = required(&self.user_id, "user_id")?;
        let task_type = required(&self.task_type, "task_type")?;
        let input_data = required(&self.input_data, "input_data")?;
        let prediction_id = required(&self.prediction_id, "prediction_id")?;

        if task_type != TEXT_TO_COMMAND_TASK {
            return Err(EnvelopeError::UnsupportedTaskType(task_type.to_string()));
        }
        if input_data.is_empty() {
            return Err(EnvelopeError::EmptyInput);
        }

        Ok(ValidTask {
            task_id: parse_id(task_id, "task_id")?,
            account_id: parse_id(user_id, "user_id")?,
            input_data: input_data.to_string(),
            prediction_id: parse_id(prediction_id, "prediction_id")?,
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, EnvelopeError> {
    value.as_deref().ok_or(EnvelopeError::MissingField(field))
}

fn parse_id(value: &str, field: &'static str) -> Result<Uuid, EnvelopeError> {
    Uuid::parse_str(value.trim()).map_err(|_| EnvelopeError::InvalidId {
        field,
        value: value.to_string(),
    })
}
