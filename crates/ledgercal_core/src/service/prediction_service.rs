//! Prediction submission use-case.
//!
//! # Responsibility
//! - Charge the prediction cost and record a pending prediction atomically.
//! - Hand the task to the queue after the charge has committed.
//! - Serve prediction/transaction history and statistics.
//!
//! # Invariants
//! - The pending record and the debit commit together or not at all.
//! - Publishing happens strictly after that commit.
//! - A failed publish is compensated by a refund deposit and the record is
//!   marked failed; the caller still gets an error.

use crate::db::now_epoch_ms;
use crate::model::account::{AccountId, LedgerTransaction, TransactionKind};
use crate::model::money::Money;
use crate::model::prediction::{PredictionId, PredictionRecord, PredictionStatistics};
use crate::queue::{TaskEnvelope, TaskPublisher};
use crate::repo::ledger_repo::{apply_entry, LedgerError};
use crate::repo::prediction_repo::{PredictionRepository, SqlitePredictionRepository};
use crate::repo::{RepoError, RepoResult};
use crate::service::ledger_service::LedgerService;
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Default price of one prediction: 10.00.
pub const DEFAULT_PREDICTION_COST: Money = Money::from_major(10);

/// Error recorded on a prediction whose task never reached the queue.
pub const QUEUE_UNAVAILABLE_MESSAGE: &str = "queue unavailable";

#[derive(Debug)]
pub enum SubmitError {
    /// Input text is empty after trimming.
    EmptyInput,
    /// Debit failed; nothing was written.
    Ledger(LedgerError),
    /// Debit committed but the task could not be published.
    ///
    /// `refund` is the compensating deposit, or `None` when the refund itself
    /// failed and the account needs manual reconciliation.
    QueuePublishFailure {
        prediction_id: PredictionId,
        refund: Option<LedgerTransaction>,
    },
    Repo(RepoError),
}

impl Display for SubmitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "input text is empty"),
            Self::Ledger(err) => write!(f, "{err}"),
            Self::QueuePublishFailure {
                prediction_id,
                refund,
            } => match refund {
                Some(_) => write!(
                    f,
                    "queue unavailable for prediction {prediction_id}; charge refunded"
                ),
                None => write!(
                    f,
                    "queue unavailable for prediction {prediction_id}; refund failed"
                ),
            },
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SubmitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ledger(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LedgerError> for SubmitError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Repo(err) => Self::Repo(err),
            other => Self::Ledger(other),
        }
    }
}

impl From<RepoError> for SubmitError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for SubmitError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Request-path service: debit, record, publish.
pub struct PredictionService<'conn, P: TaskPublisher> {
    conn: &'conn Connection,
    publisher: P,
    cost: Money,
}

impl<'conn, P: TaskPublisher> PredictionService<'conn, P> {
    pub fn new(conn: &'conn Connection, publisher: P) -> Self {
        Self {
            conn,
            publisher,
            cost: DEFAULT_PREDICTION_COST,
        }
    }

    pub fn with_cost(mut self, cost: Money) -> Self {
        self.cost = cost;
        self
    }

    pub fn cost(&self) -> Money {
        self.cost
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Charges the cost, stores a pending prediction and publishes its task.
    ///
    /// Returns the pending record (output still empty).
    ///
    /// # Errors
    /// - `EmptyInput` for blank text; nothing is written.
    /// - `Ledger(InsufficientFunds | AccountNotFound | ..)`; nothing is written.
    /// - `QueuePublishFailure` after the charge committed; the charge has been
    ///   refunded and the record marked failed.
    pub fn submit_text(
        &mut self,
        account_id: AccountId,
        text: &str,
    ) -> Result<PredictionRecord, SubmitError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyInput);
        }

        // Stamp under the write lock so creation order matches commit order.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let task_id = Uuid::new_v4();
        let record = PredictionRecord::pending(account_id, text, task_id, now_epoch_ms());
        let description = charge_description(record.id);
        let charge = apply_entry(
            &tx,
            account_id,
            TransactionKind::Withdrawal,
            self.cost,
            Some(description.as_str()),
            record.created_at,
        );
        let charge = match charge {
            Ok(charge) => charge,
            Err(err) => {
                warn!(
                    "event=prediction_submit module=prediction status=error account_id={} error={}",
                    account_id, err
                );
                return Err(err.into());
            }
        };
        SqlitePredictionRepository::new(&tx).create_prediction(&record)?;
        tx.commit()?;

        info!(
            "event=prediction_submit module=prediction status=ok account_id={} prediction_id={} task_id={} balance_after={}",
            account_id, record.id, task_id, charge.balance_after
        );

        let envelope = TaskEnvelope::text_to_command(task_id, account_id, text, record.id);
        if self.publisher.publish(&envelope) {
            return Ok(record);
        }

        Err(self.compensate_publish_failure(&record))
    }

    /// Refunds the charge and fails the record after a publish failure.
    fn compensate_publish_failure(&self, record: &PredictionRecord) -> SubmitError {
        let description = refund_description(record.id);
        let refund = match LedgerService::new(self.conn).deposit(
            record.account_id,
            self.cost,
            Some(description.as_str()),
        ) {
            Ok(refund) => Some(refund),
            Err(err) => {
                error!(
                    "event=prediction_refund module=prediction status=error account_id={} prediction_id={} error_code=refund_failed error={}",
                    record.account_id, record.id, err
                );
                None
            }
        };

        if let Err(err) = SqlitePredictionRepository::new(self.conn).mark_failed(
            record.id,
            QUEUE_UNAVAILABLE_MESSAGE,
            now_epoch_ms(),
        ) {
            error!(
                "event=prediction_fail module=prediction status=error prediction_id={} error={}",
                record.id, err
            );
        }

        error!(
            "event=prediction_publish module=prediction status=error account_id={} prediction_id={} refunded={}",
            record.account_id,
            record.id,
            refund.is_some()
        );
        SubmitError::QueuePublishFailure {
            prediction_id: record.id,
            refund,
        }
    }

    pub fn get_prediction(&self, id: PredictionId) -> RepoResult<Option<PredictionRecord>> {
        SqlitePredictionRepository::new(self.conn).get_prediction(id)
    }

    /// Newest first; at most `limit` rows, clamped to the history maximum.
    pub fn history(&self, account_id: AccountId, limit: u32) -> RepoResult<Vec<PredictionRecord>> {
        SqlitePredictionRepository::new(self.conn).list_predictions(account_id, limit)
    }

    /// Newest first; at most `limit` rows, clamped to the history maximum.
    pub fn transactions(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        LedgerService::new(self.conn).list_transactions(account_id, limit)
    }

    pub fn statistics(&self, account_id: AccountId) -> RepoResult<PredictionStatistics> {
        SqlitePredictionRepository::new(self.conn).statistics(account_id)
    }
}

fn charge_description(prediction_id: PredictionId) -> String {
    format!("Оплата предсказания #{prediction_id}")
}

fn refund_description(prediction_id: PredictionId) -> String {
    format!("Возврат оплаты предсказания #{prediction_id}")
}
