//! Ledger use-case service.
//!
//! # Responsibility
//! - Deposit and withdraw as single atomic balance steps.
//! - Open accounts and serve balance/history reads.
//! - Audit an account by replaying its transaction log.
//!
//! # Invariants
//! - Every balance change commits together with exactly one transaction row.
//! - Writes take the SQLite write lock (`BEGIN IMMEDIATE`) before reading the
//!   balance, so concurrent writers on other connections serialize.

use crate::db::now_epoch_ms;
use crate::model::account::{Account, AccountId, LedgerTransaction, TransactionKind};
use crate::model::money::Money;
use crate::repo::ledger_repo::{
    apply_entry, LedgerError, LedgerRepository, LedgerResult, SqliteLedgerRepository,
};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Result of replaying an account's transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAudit {
    pub account_id: AccountId,
    pub transaction_count: usize,
    /// Sum of signed amounts over the whole log.
    pub replayed_balance: Money,
    pub current_balance: Money,
    /// Transactions whose `balance_after` disagrees with the running sum.
    pub mismatched_transactions: Vec<LedgerTransaction>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.mismatched_transactions.is_empty() && self.replayed_balance == self.current_balance
    }
}

/// Ledger facade over one SQLite connection.
pub struct LedgerService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> LedgerService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Opens a new account at zero balance.
    pub fn open_account(&self) -> LedgerResult<Account> {
        let account = SqliteLedgerRepository::new(self.conn).create_account(now_epoch_ms())?;
        info!(
            "event=account_open module=ledger status=ok account_id={}",
            account.id
        );
        Ok(account)
    }

    pub fn account(&self, account_id: AccountId) -> LedgerResult<Account> {
        SqliteLedgerRepository::new(self.conn)
            .get_account(account_id)?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    pub fn balance(&self, account_id: AccountId) -> LedgerResult<Money> {
        Ok(self.account(account_id)?.balance)
    }

    /// Credits `amount` and returns the recorded transaction.
    ///
    /// # Errors
    /// - `InvalidAmount` when `amount <= 0`.
    /// - `AccountNotFound` for an unknown account.
    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<&str>,
    ) -> LedgerResult<LedgerTransaction> {
        self.apply(account_id, TransactionKind::Deposit, amount, description)
    }

    /// Debits `amount` and returns the recorded transaction.
    ///
    /// # Errors
    /// - `InvalidAmount` when `amount <= 0`.
    /// - `AccountNotFound` for an unknown account.
    /// - `InsufficientFunds` when `amount` exceeds the balance.
    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<&str>,
    ) -> LedgerResult<LedgerTransaction> {
        self.apply(account_id, TransactionKind::Withdrawal, amount, description)
    }

    /// Newest first; at most `limit` rows, clamped to the history maximum.
    pub fn list_transactions(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        let repo = SqliteLedgerRepository::new(self.conn);
        if repo.get_account(account_id)?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }
        Ok(repo.list_transactions(account_id, limit)?)
    }

    /// Replays the full log in commit order against the stored snapshots.
    pub fn audit(&self, account_id: AccountId) -> LedgerResult<LedgerAudit> {
        let repo = SqliteLedgerRepository::new(self.conn);
        let account = repo
            .get_account(account_id)?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let transactions = repo.transactions_in_order(account_id)?;

        let mut running = Money::ZERO;
        let mut mismatched_transactions = Vec::new();
        for entry in &transactions {
            running = running
                .checked_add(entry.signed_amount())
                .ok_or(LedgerError::BalanceOverflow(account_id))?;
            if running != entry.balance_after {
                mismatched_transactions.push(entry.clone());
            }
        }

        let audit = LedgerAudit {
            account_id,
            transaction_count: transactions.len(),
            replayed_balance: running,
            current_balance: account.balance,
            mismatched_transactions,
        };
        if !audit.is_consistent() {
            warn!(
                "event=ledger_audit module=ledger status=error account_id={} replayed={} current={} mismatched={}",
                account_id,
                audit.replayed_balance,
                audit.current_balance,
                audit.mismatched_transactions.len()
            );
        }
        Ok(audit)
    }

    fn apply(
        &self,
        account_id: AccountId,
        kind: TransactionKind,
        amount: Money,
        description: Option<&str>,
    ) -> LedgerResult<LedgerTransaction> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let entry = apply_entry(&tx, account_id, kind, amount, description, now_epoch_ms())?;
        tx.commit()?;

        info!(
            "event=ledger_{} module=ledger status=ok account_id={} amount={} balance_after={}",
            kind.as_str(),
            account_id,
            entry.amount,
            entry.balance_after
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerService;
    use crate::db::open_db_in_memory;
    use crate::model::money::Money;
    use crate::repo::ledger_repo::LedgerError;

    #[test]
    fn failed_withdrawal_leaves_no_trace() {
        let conn = open_db_in_memory().unwrap();
        let ledger = LedgerService::new(&conn);
        let account = ledger.open_account().unwrap();
        ledger.deposit(account.id, Money::from_major(5), None).unwrap();

        let err = ledger
            .withdraw(account.id, Money::from_major(6), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(account.id).unwrap(), Money::from_major(5));
        assert_eq!(ledger.list_transactions(account.id, 20).unwrap().len(), 1);
    }

    #[test]
    fn audit_of_fresh_account_is_consistent() {
        let conn = open_db_in_memory().unwrap();
        let ledger = LedgerService::new(&conn);
        let account = ledger.open_account().unwrap();

        let audit = ledger.audit(account.id).unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.transaction_count, 0);
    }
}
