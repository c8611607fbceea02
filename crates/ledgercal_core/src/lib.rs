//! Core of the ledger-backed text-to-command pipeline.
//! Balance accounting, prediction records, the rule-based command parser,
//! calendar commands, the durable task queue and its worker.

pub mod command;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod parser;
pub mod queue;
pub mod repo;
pub mod service;
pub mod worker;

pub use command::{Command, CommandAction, CommandOutcome, CommandPayload, CreateEvent};
pub use config::{ConfigError, PipelineConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::account::{Account, AccountId, LedgerTransaction, TransactionKind};
pub use model::event::{CalendarEvent, EventId, EventUpdate};
pub use model::money::Money;
pub use model::prediction::{PredictionId, PredictionRecord, PredictionStatistics, PredictionStatus};
pub use parser::{CommandParameters, CommandParser, CommandType, ParsedCommand, ParserError};
pub use queue::{
    BrokerConfig, QueueConsumer, QueueError, QueuePublisher, TaskConsumer, TaskEnvelope,
    TaskPublisher,
};
pub use repo::calendar_repo::{CalendarStore, InMemoryCalendar, SqliteCalendarRepository};
pub use repo::ledger_repo::LedgerError;
pub use repo::{RepoError, RepoResult, HISTORY_DEFAULT_LIMIT, HISTORY_LIMIT_MAX};
pub use service::ledger_service::{LedgerAudit, LedgerService};
pub use service::lifecycle::{Service, ServiceStatus};
pub use service::prediction_service::{PredictionService, SubmitError};
pub use worker::{TaskWorker, WorkerError, WorkerOutcome, WorkerService};
