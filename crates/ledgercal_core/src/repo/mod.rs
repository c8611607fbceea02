//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories accept any `&Connection`, including an open
//!   `rusqlite::Transaction`, so services decide the transaction boundary.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::event::EventValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod calendar_repo;
pub mod ledger_repo;
pub mod prediction_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Page size used when a caller does not pick one.
pub const HISTORY_DEFAULT_LIMIT: u32 = 20;
/// Upper bound for history listings.
pub const HISTORY_LIMIT_MAX: u32 = 100;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound { entity: &'static str, id: String },
    InvalidData(String),
    Validation(EventValidationError),
}

impl RepoError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<EventValidationError> for RepoError {
    fn from(value: EventValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Clamps a caller-supplied history limit to the maximum. A limit of `0`
/// yields no rows.
pub fn normalize_history_limit(limit: u32) -> u32 {
    limit.min(HISTORY_LIMIT_MAX)
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}
