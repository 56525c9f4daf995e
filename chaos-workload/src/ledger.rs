//! Expected account balances for the bank-transfer scenario.
//!
//! Transfer tasks update the ledger only once a transfer is known to have
//! committed. A transfer whose commit failed ambiguously is recorded as in
//! doubt instead: it may or may not have been applied.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// One transfer of `amount` from account `from` to account `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Sender account.
    pub from: i64,
    /// Receiver account.
    pub to: i64,
    /// Amount moved.
    pub amount: i64,
}

/// Shared expected-state model, safe to update from many tasks.
#[derive(Debug)]
pub struct Ledger {
    inner: Mutex<LedgerSnapshot>,
}

/// Copy of the ledger, input to the invariant checker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Expected balance per account, counting committed transfers only.
    pub balances: BTreeMap<i64, i64>,
    /// Sum of balances before any transfer.
    pub initial_total: i64,
    /// Transfers whose outcome is unknown.
    pub in_doubt: Vec<Transfer>,
    /// Committed transfers.
    pub committed: u64,
    /// Transfers rolled back for lack of funds.
    pub insufficient: u64,
}

impl Ledger {
    /// Ledger starting from the given balances.
    pub fn new(initial: impl IntoIterator<Item = (i64, i64)>) -> Self {
        let balances: BTreeMap<i64, i64> = initial.into_iter().collect();
        let initial_total = balances.values().sum();
        Self {
            inner: Mutex::new(LedgerSnapshot {
                balances,
                initial_total,
                ..Default::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut LedgerSnapshot) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    /// Record a committed transfer.
    pub fn record_committed(&self, transfer: Transfer) {
        self.with(|l| {
            *l.balances.entry(transfer.from).or_default() -= transfer.amount;
            *l.balances.entry(transfer.to).or_default() += transfer.amount;
            l.committed += 1;
        });
    }

    /// Record a transfer whose commit outcome is unknown.
    pub fn record_in_doubt(&self, transfer: Transfer) {
        self.with(|l| l.in_doubt.push(transfer));
    }

    /// Record a transfer rolled back for lack of funds.
    pub fn record_insufficient(&self) {
        self.with(|l| l.insufficient += 1);
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.with(|l| l.clone())
    }
}
