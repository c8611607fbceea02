//! Prediction record: lifecycle of one text-to-command request.
//!
//! # Invariants
//! - A record starts `Pending` with `output_data == None`.
//! - It leaves `Pending` exactly once, to `Completed` (output + confidence set)
//!   or `Failed` (error message set, output left empty).

use crate::model::account::AccountId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PredictionId = Uuid;
pub type TaskId = Uuid;

/// Model type recorded for rule-based text-to-command predictions.
pub const TEXT_TO_COMMAND_MODEL: &str = "text_to_command";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Completed,
    Failed,
}

impl PredictionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: PredictionId,
    pub account_id: AccountId,
    /// Correlates the record with the queue envelope.
    pub task_id: Option<TaskId>,
    pub input_data: String,
    /// JSON-serialized parser output; `None` until processed.
    pub output_data: Option<String>,
    pub model_type: String,
    pub confidence: Option<f64>,
    pub status: PredictionStatus,
    pub error_message: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl PredictionRecord {
    /// Builds a fresh pending record.
    pub fn pending(
        account_id: AccountId,
        input_data: impl Into<String>,
        task_id: TaskId,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            task_id: Some(task_id),
            input_data: input_data.into(),
            output_data: None,
            model_type: TEXT_TO_COMMAND_MODEL.to_string(),
            confidence: None,
            status: PredictionStatus::Pending,
            error_message: None,
            created_at,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PredictionStatus::Pending
    }
}

/// Aggregate view over an account's prediction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionStatistics {
    pub total_records: u64,
    pub completed_records: u64,
    pub failed_records: u64,
    /// Mean confidence over completed records; `0.0` when there are none.
    pub average_confidence: f64,
    /// Distinct model types, sorted.
    pub models_used: Vec<String>,
}
