//! Account and ledger transaction records.
//!
//! # Invariants
//! - `Account::balance` is never negative.
//! - `LedgerTransaction::amount` is strictly positive; the sign comes from `kind`.
//! - `balance_after` is the account balance immediately after the transaction
//!   committed, captured in the same database transaction.

use crate::model::money::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = Uuid;
pub type TransactionId = Uuid;

/// Balance holder for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Money,
    pub is_active: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }

    /// Default description used when the caller supplies none.
    pub fn default_description(self) -> &'static str {
        match self {
            Self::Deposit => "Пополнение баланса",
            Self::Withdrawal => "Списание с баланса",
        }
    }
}

/// Immutable, append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub description: Option<String>,
    pub balance_after: Money,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl LedgerTransaction {
    /// Amount with the sign applied (`+` deposit, `-` withdrawal).
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            TransactionKind::Deposit => self.amount,
            TransactionKind::Withdrawal => Money::ZERO - self.amount,
        }
    }
}
