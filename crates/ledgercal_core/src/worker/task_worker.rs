//! One validate → parse → persist → ack cycle.

use crate::command::{Command, CommandAction, CommandPayload, CreateEvent};
use crate::db::now_epoch_ms;
use crate::model::event::{truncate_to_seconds, EventId};
use crate::model::prediction::{PredictionId, PredictionRecord};
use crate::parser::{CommandParser, CommandType, ParsedCommand, ParserError};
use crate::queue::envelope::{EnvelopeError, ValidTask};
use crate::queue::{Delivery, QueueError, RawTaskEnvelope, TaskConsumer};
use crate::repo::calendar_repo::{CalendarStore, SqliteCalendarRepository};
use crate::repo::prediction_repo::{PredictionRepository, SqlitePredictionRepository};
use crate::repo::RepoError;
use chrono::{DateTime, NaiveDateTime};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure that drops a delivery.
#[derive(Debug)]
pub enum WorkerError {
    /// Body is not a JSON object of the envelope shape.
    MalformedMessage(serde_json::Error),
    /// Envelope invalid and carries no usable prediction id to record it on.
    TaskValidationFailure(EnvelopeError),
    /// Parser output could not be serialized for storage.
    ParseFailure(String),
    /// Result could not be written; the task result is lost.
    PersistFailure(RepoError),
}

impl Display for WorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedMessage(err) => write!(f, "malformed task message: {err}"),
            Self::TaskValidationFailure(err) => write!(f, "invalid task: {err}"),
            Self::ParseFailure(message) => write!(f, "parse failure: {message}"),
            Self::PersistFailure(err) => write!(f, "failed to persist task result: {err}"),
        }
    }
}

impl Error for WorkerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedMessage(err) => Some(err),
            Self::TaskValidationFailure(err) => Some(err),
            Self::PersistFailure(err) => Some(err),
            Self::ParseFailure(_) => None,
        }
    }
}

impl From<RepoError> for WorkerError {
    fn from(value: RepoError) -> Self {
        Self::PersistFailure(value)
    }
}

impl From<rusqlite::Error> for WorkerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::PersistFailure(value.into())
    }
}

/// What one `run_once` call did.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Queue was empty.
    Idle,
    /// Result stored; `event_id` is set when a calendar event was created.
    Completed {
        prediction_id: PredictionId,
        command_type: CommandType,
        event_id: Option<EventId>,
    },
    /// Task could not be processed; the failure was stored on the prediction.
    Failed {
        prediction_id: PredictionId,
        reason: String,
    },
    /// Prediction was already terminal (redelivery); nothing was written.
    AlreadyProcessed { prediction_id: PredictionId },
    /// Envelope referenced a prediction that does not exist.
    UnknownPrediction { prediction_id: PredictionId },
    /// Delivery was rejected without requeue.
    Dropped { delivery_tag: u64, error: WorkerError },
}

impl WorkerOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Sequential consumer bound to one database connection.
pub struct TaskWorker<C: TaskConsumer> {
    conn: Connection,
    consumer: C,
    parser: CommandParser,
}

impl<C: TaskConsumer> TaskWorker<C> {
    pub fn new(conn: Connection, consumer: C) -> Self {
        Self {
            conn,
            consumer,
            parser: CommandParser::new(),
        }
    }

    pub fn with_parser(mut self, parser: CommandParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Takes at most one delivery and settles it.
    ///
    /// # Errors
    /// Only broker failures (receive/ack/nack) are returned; task failures are
    /// reported as `WorkerOutcome::Dropped`.
    pub fn run_once(&mut self) -> Result<WorkerOutcome, QueueError> {
        let Some(delivery) = self.consumer.receive()? else {
            return Ok(WorkerOutcome::Idle);
        };

        match self.process(&delivery) {
            Ok(outcome) => {
                self.consumer.ack(delivery.delivery_tag)?;
                Ok(outcome)
            }
            Err(err) => {
                if let WorkerError::PersistFailure(_) = err {
                    error!(
                        "event=task_persist module=worker status=error delivery_tag={} error_code=task_result_lost error={}",
                        delivery.delivery_tag, err
                    );
                } else {
                    error!(
                        "event=task_process module=worker status=error delivery_tag={} error={}",
                        delivery.delivery_tag, err
                    );
                }
                self.consumer.nack(delivery.delivery_tag, false)?;
                Ok(WorkerOutcome::Dropped {
                    delivery_tag: delivery.delivery_tag,
                    error: err,
                })
            }
        }
    }

    /// Runs `run_once` until the queue is empty. Returns the processed outcomes.
    pub fn drain(&mut self) -> Result<Vec<WorkerOutcome>, QueueError> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.run_once()?;
            if outcome.is_idle() {
                return Ok(outcomes);
            }
            outcomes.push(outcome);
        }
    }

    fn process(&mut self, delivery: &Delivery) -> Result<WorkerOutcome, WorkerError> {
        let raw =
            RawTaskEnvelope::from_json(&delivery.body).map_err(WorkerError::MalformedMessage)?;
        info!(
            "event=task_receive module=worker status=start delivery_tag={} redelivered={} task_id={}",
            delivery.delivery_tag,
            delivery.redelivered,
            raw.task_id.as_deref().unwrap_or("-")
        );

        let task = match raw.validate() {
            Ok(task) => task,
            Err(err) => {
                let Some(prediction_id) = raw.prediction_id() else {
                    return Err(WorkerError::TaskValidationFailure(err));
                };
                return self.record_failure(prediction_id, &err.to_string());
            }
        };

        let parsed = match self.parser.parse(&task.input_data) {
            Ok(parsed) => parsed,
            Err(err) => return self.record_failure(task.prediction_id, &parse_error_message(&err)),
        };
        let output = parsed
            .to_json()
            .map_err(|err| WorkerError::ParseFailure(err.to_string()))?;

        self.record_result(&task, &parsed, &output)
    }

    fn record_result(
        &self,
        task: &ValidTask,
        parsed: &ParsedCommand,
        output: &str,
    ) -> Result<WorkerOutcome, WorkerError> {
        let now_ms = now_epoch_ms();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let predictions = SqlitePredictionRepository::new(&tx);

        let Some(record) = predictions.get_prediction(task.prediction_id)? else {
            warn!(
                "event=task_persist module=worker status=skip prediction_id={} reason=unknown_prediction",
                task.prediction_id
            );
            return Ok(WorkerOutcome::UnknownPrediction {
                prediction_id: task.prediction_id,
            });
        };
        if record.account_id != task.account_id {
            warn!(
                "event=task_persist module=worker status=skip prediction_id={} reason=owner_mismatch",
                record.id
            );
        }

        let transition =
            predictions.apply_result(record.id, output, parsed.confidence, now_ms)?;
        if !transition.was_applied() {
            info!(
                "event=task_persist module=worker status=skip prediction_id={} reason=already_applied",
                record.id
            );
            return Ok(WorkerOutcome::AlreadyProcessed {
                prediction_id: record.id,
            });
        }

        let event_id = if parsed.command_type == CommandType::CreateEvent {
            materialize_event(&tx, &record, task, parsed, now_ms)?
        } else {
            None
        };
        tx.commit()?;

        info!(
            "event=task_persist module=worker status=ok prediction_id={} command_type={} confidence={} event_created={}",
            record.id,
            parsed.command_type.as_str(),
            parsed.confidence,
            event_id.is_some()
        );
        Ok(WorkerOutcome::Completed {
            prediction_id: record.id,
            command_type: parsed.command_type,
            event_id,
        })
    }

    fn record_failure(
        &self,
        prediction_id: PredictionId,
        reason: &str,
    ) -> Result<WorkerOutcome, WorkerError> {
        let predictions = SqlitePredictionRepository::new(&self.conn);
        if predictions.get_prediction(prediction_id)?.is_none() {
            warn!(
                "event=task_fail module=worker status=skip prediction_id={} reason=unknown_prediction",
                prediction_id
            );
            return Ok(WorkerOutcome::UnknownPrediction { prediction_id });
        }

        let transition = predictions.mark_failed(prediction_id, reason, now_epoch_ms())?;
        if !transition.was_applied() {
            return Ok(WorkerOutcome::AlreadyProcessed { prediction_id });
        }
        warn!(
            "event=task_fail module=worker status=ok prediction_id={} reason={}",
            prediction_id, reason
        );
        Ok(WorkerOutcome::Failed {
            prediction_id,
            reason: reason.to_string(),
        })
    }
}

/// Creates the calendar event for a create-event result inside `tx`.
///
/// Title falls back to the input text; start falls back to the prediction's
/// creation time; an unparsable or inverted end is dropped.
fn materialize_event(
    tx: &Transaction<'_>,
    record: &PredictionRecord,
    task: &ValidTask,
    parsed: &ParsedCommand,
    now_ms: i64,
) -> Result<Option<EventId>, WorkerError> {
    let mut calendar = SqliteCalendarRepository::new(tx);
    if let Some(existing) = calendar.find_by_source_task(task.task_id)? {
        return Ok(Some(existing.id));
    }

    let fallback_start = epoch_ms_to_naive(record.created_at);
    let mut create =
        CreateEvent::from_parameters(&parsed.parameters, &record.input_data, fallback_start);
    if let (Some(start), Some(end)) = (create.start_time, create.end_time) {
        if truncate_to_seconds(end) < truncate_to_seconds(start) {
            warn!(
                "event=event_materialize module=worker status=skip prediction_id={} reason=end_before_start",
                record.id
            );
            create.end_time = None;
        }
    }
    create.source_task_id = Some(task.task_id);

    let command = Command::new(record.account_id, now_ms, CommandAction::CreateEvent(create));
    let outcome = command.execute(&mut calendar, now_ms)?;
    match outcome.payload {
        CommandPayload::Created { event } => Ok(Some(event.id)),
        other => {
            warn!(
                "event=event_materialize module=worker status=error prediction_id={} payload={:?}",
                record.id, other
            );
            Ok(None)
        }
    }
}

fn epoch_ms_to_naive(epoch_ms: i64) -> NaiveDateTime {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|value| truncate_to_seconds(value.naive_utc()))
        .unwrap_or_default()
}

fn parse_error_message(err: &ParserError) -> String {
    format!("parse failure: {err}")
}

#[cfg(test)]
mod tests {
    use super::{epoch_ms_to_naive, materialize_event};
    use crate::db::open_db_in_memory;
    use crate::model::prediction::PredictionRecord;
    use crate::parser::{CommandParameters, CommandType, ParsedCommand};
    use crate::queue::envelope::ValidTask;
    use crate::repo::calendar_repo::{CalendarStore, SqliteCalendarRepository};
    use crate::repo::prediction_repo::{PredictionRepository, SqlitePredictionRepository};
    use crate::service::ledger_service::LedgerService;
    use chrono::NaiveDate;
    use rusqlite::{Transaction, TransactionBehavior};
    use uuid::Uuid;

    #[test]
    fn epoch_ms_maps_to_utc_wall_clock_without_fraction() {
        let value = epoch_ms_to_naive(1_700_000_000_123);
        let expected = NaiveDate::from_ymd_opt(2023, 11, 14)
            .unwrap()
            .and_hms_opt(22, 13, 20)
            .unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn missing_slots_fall_back_to_input_and_creation_time() {
        let conn = open_db_in_memory().unwrap();
        let account = LedgerService::new(&conn).open_account().unwrap();
        let record =
            PredictionRecord::pending(account.id, "напомни про отчёт", Uuid::new_v4(), 1_700_000_000_123);
        SqlitePredictionRepository::new(&conn)
            .create_prediction(&record)
            .unwrap();
        let task = ValidTask {
            task_id: record.task_id.unwrap(),
            account_id: account.id,
            input_data: record.input_data.clone(),
            prediction_id: record.id,
        };
        let parsed = ParsedCommand {
            command_type: CommandType::CreateEvent,
            parameters: CommandParameters {
                start_time: Some("not a date".to_string()),
                end_time: Some("2000-01-01T00:00:00".to_string()),
                ..CommandParameters::default()
            },
            confidence: 0.9,
        };

        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate).unwrap();
        let event_id = materialize_event(&tx, &record, &task, &parsed, 0).unwrap();
        // A second call for the same task returns the existing event.
        assert_eq!(
            materialize_event(&tx, &record, &task, &parsed, 0).unwrap(),
            event_id
        );
        tx.commit().unwrap();

        let event = SqliteCalendarRepository::new(&conn)
            .get_event(account.id, event_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(event.title, "напомни про отчёт");
        assert_eq!(event.start_time, epoch_ms_to_naive(record.created_at));
        assert_eq!(event.end_time, None);
    }
}
