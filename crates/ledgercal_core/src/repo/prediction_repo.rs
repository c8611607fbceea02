//! Prediction record persistence.
//!
//! # Responsibility
//! - Store pending records and their single terminal transition.
//! - Serve per-account history and statistics.
//!
//! # Invariants
//! - Terminal writes are guarded by `status = 'pending'`; a second
//!   application of a result is reported, never written.

use crate::model::account::AccountId;
use crate::model::prediction::{PredictionId, PredictionRecord, PredictionStatistics, PredictionStatus};
use crate::repo::{normalize_history_limit, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const PREDICTION_SELECT_SQL: &str = "SELECT
    id,
    account_id,
    task_id,
    input_data,
    output_data,
    model_type,
    confidence,
    status,
    error_message,
    created_at,
    completed_at
FROM predictions";

/// Result of a terminal transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// This call moved the record out of `pending`.
    Applied(PredictionRecord),
    /// The record was already terminal; nothing was written.
    AlreadyFinal(PredictionRecord),
}

impl TransitionOutcome {
    pub fn record(&self) -> &PredictionRecord {
        match self {
            Self::Applied(record) | Self::AlreadyFinal(record) => record,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

pub trait PredictionRepository {
    fn create_prediction(&self, record: &PredictionRecord) -> RepoResult<()>;
    fn get_prediction(&self, id: PredictionId) -> RepoResult<Option<PredictionRecord>>;
    /// Sets output/confidence and marks the record completed, once.
    fn apply_result(
        &self,
        id: PredictionId,
        output_data: &str,
        confidence: f64,
        now_ms: i64,
    ) -> RepoResult<TransitionOutcome>;
    /// Records an error and marks the record failed, once.
    fn mark_failed(
        &self,
        id: PredictionId,
        error_message: &str,
        now_ms: i64,
    ) -> RepoResult<TransitionOutcome>;
    /// Newest first; at most `limit` rows, clamped to the history maximum.
    fn list_predictions(&self, account_id: AccountId, limit: u32)
        -> RepoResult<Vec<PredictionRecord>>;
    fn statistics(&self, account_id: AccountId) -> RepoResult<PredictionStatistics>;
}

/// SQLite-backed prediction repository.
pub struct SqlitePredictionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePredictionRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn finish(&self, id: PredictionId, changed: usize) -> RepoResult<TransitionOutcome> {
        let record = self
            .get_prediction(id)?
            .ok_or_else(|| RepoError::not_found("prediction", id))?;
        if changed == 0 {
            Ok(TransitionOutcome::AlreadyFinal(record))
        } else {
            Ok(TransitionOutcome::Applied(record))
        }
    }
}

impl PredictionRepository for SqlitePredictionRepository<'_> {
    fn create_prediction(&self, record: &PredictionRecord) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO predictions (
                id,
                account_id,
                task_id,
                input_data,
                output_data,
                model_type,
                confidence,
                status,
                error_message,
                created_at,
                completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.id.to_string(),
                record.account_id.to_string(),
                record.task_id.map(|id| id.to_string()),
                record.input_data.as_str(),
                record.output_data.as_deref(),
                record.model_type.as_str(),
                record.confidence,
                record.status.as_str(),
                record.error_message.as_deref(),
                record.created_at,
                record.completed_at,
            ],
        )?;
        Ok(())
    }

    fn get_prediction(&self, id: PredictionId) -> RepoResult<Option<PredictionRecord>> {
        self.conn
            .query_row(
                &format!("{PREDICTION_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_prediction_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn apply_result(
        &self,
        id: PredictionId,
        output_data: &str,
        confidence: f64,
        now_ms: i64,
    ) -> RepoResult<TransitionOutcome> {
        let changed = self.conn.execute(
            "UPDATE predictions
             SET
                output_data = ?2,
                confidence = ?3,
                status = 'completed',
                completed_at = ?4
             WHERE id = ?1
               AND status = 'pending';",
            params![id.to_string(), output_data, confidence, now_ms],
        )?;
        self.finish(id, changed)
    }

    fn mark_failed(
        &self,
        id: PredictionId,
        error_message: &str,
        now_ms: i64,
    ) -> RepoResult<TransitionOutcome> {
        let changed = self.conn.execute(
            "UPDATE predictions
             SET
                status = 'failed',
                error_message = ?2,
                completed_at = ?3
             WHERE id = ?1
               AND status = 'pending';",
            params![id.to_string(), error_message, now_ms],
        )?;
        self.finish(id, changed)
    }

    fn list_predictions(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> RepoResult<Vec<PredictionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PREDICTION_SELECT_SQL}
             WHERE account_id = ?1
             ORDER BY created_at DESC, seq DESC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![
            account_id.to_string(),
            i64::from(normalize_history_limit(limit))
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_prediction_row(row)?);
        }
        Ok(items)
    }

    fn statistics(&self, account_id: AccountId) -> RepoResult<PredictionStatistics> {
        let (total, completed, failed, average): (i64, i64, i64, Option<f64>) =
            self.conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    AVG(CASE WHEN status = 'completed' THEN confidence END)
                 FROM predictions
                 WHERE account_id = ?1;",
                [account_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT model_type
             FROM predictions
             WHERE account_id = ?1
             ORDER BY model_type ASC;",
        )?;
        let mut rows = stmt.query([account_id.to_string()])?;
        let mut models_used = Vec::new();
        while let Some(row) = rows.next()? {
            models_used.push(row.get::<_, String>(0)?);
        }

        Ok(PredictionStatistics {
            total_records: total.max(0).unsigned_abs(),
            completed_records: completed.max(0).unsigned_abs(),
            failed_records: failed.max(0).unsigned_abs(),
            average_confidence: average.unwrap_or(0.0),
            models_used,
        })
    }
}

fn parse_prediction_row(row: &Row<'_>) -> RepoResult<PredictionRecord> {
    let id_text: String = row.get("id")?;
    let account_text: String = row.get("account_id")?;
    let task_id = match row.get::<_, Option<String>>("task_id")? {
        Some(value) => Some(parse_uuid(&value, "predictions.task_id")?),
        None => None,
    };
    let status_text: String = row.get("status")?;
    let status = PredictionStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in predictions.status"))
    })?;

    Ok(PredictionRecord {
        id: parse_uuid(&id_text, "predictions.id")?,
        account_id: parse_uuid(&account_text, "predictions.account_id")?,
        task_id,
        input_data: row.get("input_data")?,
        output_data: row.get("output_data")?,
        model_type: row.get("model_type")?,
        confidence: row.get("confidence")?,
        status,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}
