//! Account/transaction persistence and the atomic balance step.
//!
//! # Responsibility
//! - Read accounts and their append-only transaction log.
//! - Provide `apply_entry`, the single code path that changes a balance.
//!
//! # Invariants
//! - `apply_entry` must run inside a write transaction opened by the caller;
//!   it reads the balance, computes the new one and writes both the balance
//!   and the transaction row before the caller commits.
//! - Transaction rows are never updated or deleted.

use crate::model::account::{Account, AccountId, LedgerTransaction, TransactionKind};
use crate::model::money::Money;
use crate::repo::{normalize_history_limit, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const TRANSACTION_SELECT_SQL: &str = "SELECT
    id,
    account_id,
    kind,
    amount_minor,
    description,
    balance_after_minor,
    created_at
FROM ledger_transactions";

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger operation failures.
#[derive(Debug)]
pub enum LedgerError {
    /// Amount was zero or negative.
    InvalidAmount(Money),
    InsufficientFunds { requested: Money, available: Money },
    AccountNotFound(AccountId),
    /// Deposit would exceed the representable balance.
    BalanceOverflow(AccountId),
    Repo(RepoError),
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAmount(amount) => write!(f, "amount must be positive, got {amount}"),
            Self::InsufficientFunds {
                requested,
                available,
            } => write!(
                f,
                "insufficient funds: required {requested}, available {available}"
            ),
            Self::AccountNotFound(id) => write!(f, "account not found: {id}"),
            Self::BalanceOverflow(id) => write!(f, "balance overflow on account {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for LedgerError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Read/open contract over accounts and the transaction log.
pub trait LedgerRepository {
    /// Opens a new account at zero balance.
    fn create_account(&self, now_ms: i64) -> RepoResult<Account>;
    fn get_account(&self, id: AccountId) -> RepoResult<Option<Account>>;
    /// Newest first; at most `limit` rows, clamped to the history maximum.
    fn list_transactions(&self, id: AccountId, limit: u32) -> RepoResult<Vec<LedgerTransaction>>;
    /// Full log in commit order, oldest first.
    fn transactions_in_order(&self, id: AccountId) -> RepoResult<Vec<LedgerTransaction>>;
}

/// SQLite-backed ledger repository.
pub struct SqliteLedgerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedgerRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl LedgerRepository for SqliteLedgerRepository<'_> {
    fn create_account(&self, now_ms: i64) -> RepoResult<Account> {
        let account = Account {
            id: Uuid::new_v4(),
            balance: Money::ZERO,
            is_active: true,
            created_at: now_ms,
        };
        self.conn.execute(
            "INSERT INTO accounts (id, balance_minor, is_active, created_at)
             VALUES (?1, 0, 1, ?2);",
            params![account.id.to_string(), account.created_at],
        )?;
        Ok(account)
    }

    fn get_account(&self, id: AccountId) -> RepoResult<Option<Account>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, balance_minor, is_active, created_at
                 FROM accounts
                 WHERE id = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>("id")?,
                        row.get::<_, i64>("balance_minor")?,
                        row.get::<_, i64>("is_active")?,
                        row.get::<_, i64>("created_at")?,
                    ))
                },
            )
            .optional()?;

        let Some((id_text, balance_minor, is_active, created_at)) = row else {
            return Ok(None);
        };
        if balance_minor < 0 {
            return Err(RepoError::InvalidData(format!(
                "negative balance {balance_minor} on account {id_text}"
            )));
        }
        Ok(Some(Account {
            id: parse_uuid(&id_text, "accounts.id")?,
            balance: Money::from_minor(balance_minor),
            is_active: is_active == 1,
            created_at,
        }))
    }

    fn list_transactions(&self, id: AccountId, limit: u32) -> RepoResult<Vec<LedgerTransaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TRANSACTION_SELECT_SQL}
             WHERE account_id = ?1
             ORDER BY created_at DESC, seq DESC
             LIMIT ?2;"
        ))?;
        let mut rows = stmt.query(params![
            id.to_string(),
            i64::from(normalize_history_limit(limit))
        ])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_transaction_row(row)?);
        }
        Ok(items)
    }

    fn transactions_in_order(&self, id: AccountId) -> RepoResult<Vec<LedgerTransaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TRANSACTION_SELECT_SQL}
             WHERE account_id = ?1
             ORDER BY seq ASC;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_transaction_row(row)?);
        }
        Ok(items)
    }
}

/// Applies one deposit or withdrawal to `account_id`.
///
/// Callers must hold an open write transaction on `conn` (the ledger opens
/// `BEGIN IMMEDIATE`), so that the balance read here cannot change before
/// the write below.
pub(crate) fn apply_entry(
    conn: &Connection,
    account_id: AccountId,
    kind: TransactionKind,
    amount: Money,
    description: Option<&str>,
    now_ms: i64,
) -> LedgerResult<LedgerTransaction> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let current: Option<i64> = conn
        .query_row(
            "SELECT balance_minor FROM accounts WHERE id = ?1;",
            [account_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let current = current
        .map(Money::from_minor)
        .ok_or(LedgerError::AccountNotFound(account_id))?;

    let balance_after = match kind {
        TransactionKind::Deposit => current
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow(account_id))?,
        TransactionKind::Withdrawal => {
            if amount > current {
                return Err(LedgerError::InsufficientFunds {
                    requested: amount,
                    available: current,
                });
            }
            current - amount
        }
    };

    conn.execute(
        "UPDATE accounts SET balance_minor = ?2 WHERE id = ?1;",
        params![account_id.to_string(), balance_after.minor()],
    )?;

    let entry = LedgerTransaction {
        id: Uuid::new_v4(),
        account_id,
        kind,
        amount,
        description: Some(
            description
                .map(str::to_string)
                .unwrap_or_else(|| kind.default_description().to_string()),
        ),
        balance_after,
        created_at: now_ms,
    };
    conn.execute(
        "INSERT INTO ledger_transactions (
            id,
            account_id,
            kind,
            amount_minor,
            description,
            balance_after_minor,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            entry.id.to_string(),
            entry.account_id.to_string(),
            entry.kind.as_str(),
            entry.amount.minor(),
            entry.description.as_deref(),
            entry.balance_after.minor(),
            entry.created_at,
        ],
    )?;

    Ok(entry)
}

fn parse_transaction_row(row: &Row<'_>) -> RepoResult<LedgerTransaction> {
    let id_text: String = row.get("id")?;
    let account_text: String = row.get("account_id")?;
    let kind_text: String = row.get("kind")?;
    let kind = TransactionKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid kind `{kind_text}` in ledger_transactions.kind"
        ))
    })?;

    Ok(LedgerTransaction {
        id: parse_uuid(&id_text, "ledger_transactions.id")?,
        account_id: parse_uuid(&account_text, "ledger_transactions.account_id")?,
        kind,
        amount: Money::from_minor(row.get("amount_minor")?),
        description: row.get("description")?,
        balance_after: Money::from_minor(row.get("balance_after_minor")?),
        created_at: row.get("created_at")?,
    })
}
