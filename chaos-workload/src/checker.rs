//! Invariant checks run after a scenario has fully quiesced.
//!
//! The comparison functions are pure: they take the expected model and the
//! observed rows and name the first offending key. [`InvariantChecker`] issues
//! the single verification `SELECT` and applies them.

use crate::ledger::LedgerSnapshot;
use chaos_client::{ClientError, ConnectionRouter, Row, Statement, Table};
use std::collections::BTreeMap;
use thiserror::Error;

/// A data-integrity invariant did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// An expected key is absent.
    #[error("key {key} missing (expected value {expected})")]
    MissingKey {
        /// Offending key.
        key: i64,
        /// Value it should have.
        expected: i64,
    },

    /// A key that should not exist is present.
    #[error("unexpected key {key} with value {value}")]
    UnexpectedKey {
        /// Offending key.
        key: i64,
        /// Its value.
        value: i64,
    },

    /// A key appears more than once.
    #[error("key {key} returned {count} times")]
    DuplicateKey {
        /// Offending key.
        key: i64,
        /// Occurrences.
        count: usize,
    },

    /// A key holds the wrong value.
    #[error("key {key}: expected value {expected}, found {actual}")]
    ValueMismatch {
        /// Offending key.
        key: i64,
        /// Expected value.
        expected: i64,
        /// Observed value.
        actual: i64,
    },

    /// Money was created or destroyed.
    #[error("total balance {actual} differs from initial total {expected}")]
    Conservation {
        /// Total before any transfer.
        expected: i64,
        /// Observed total.
        actual: i64,
    },

    /// An account touched by in-doubt transfers is outside its possible range.
    #[error("account {key}: balance {actual} outside [{min}, {max}]")]
    BalanceOutOfBounds {
        /// Offending account.
        key: i64,
        /// Lowest possible balance.
        min: i64,
        /// Highest possible balance.
        max: i64,
        /// Observed balance.
        actual: i64,
    },
}

/// Observed rows keyed by primary key, rejecting repeated keys.
fn index_rows(observed: &[Row]) -> Result<BTreeMap<i64, i64>, InvariantViolation> {
    let mut rows = BTreeMap::new();
    for (key, value) in observed {
        if rows.insert(*key, *value).is_some() {
            let count = observed.iter().filter(|(k, _)| k == key).count();
            return Err(InvariantViolation::DuplicateKey { key: *key, count });
        }
    }
    Ok(rows)
}

/// Observed rows must equal `expected` exactly, key by key.
pub fn check_values(
    expected: &BTreeMap<i64, i64>,
    observed: &[Row],
) -> Result<(), InvariantViolation> {
    let actual = index_rows(observed)?;

    for (key, want) in expected {
        match actual.get(key) {
            None => {
                return Err(InvariantViolation::MissingKey {
                    key: *key,
                    expected: *want,
                })
            }
            Some(got) if got != want => {
                return Err(InvariantViolation::ValueMismatch {
                    key: *key,
                    expected: *want,
                    actual: *got,
                })
            }
            Some(_) => {}
        }
    }
    if let Some((key, value)) = actual.iter().find(|(k, _)| !expected.contains_key(*k)) {
        return Err(InvariantViolation::UnexpectedKey {
            key: *key,
            value: *value,
        });
    }
    Ok(())
}

/// No rows may remain.
pub fn check_empty(observed: &[Row]) -> Result<(), InvariantViolation> {
    check_values(&BTreeMap::new(), observed)
}

/// Observed balances must agree with the ledger.
///
/// Total balance is always conserved. Accounts untouched by in-doubt
/// transfers match exactly; the others lie between the ledger balance minus
/// in-doubt outgoing amounts and plus in-doubt incoming amounts.
pub fn check_ledger(ledger: &LedgerSnapshot, observed: &[Row]) -> Result<(), InvariantViolation> {
    let actual = index_rows(observed)?;

    let total: i64 = actual.values().sum();
    if total != ledger.initial_total {
        return Err(InvariantViolation::Conservation {
            expected: ledger.initial_total,
            actual: total,
        });
    }

    let mut outgoing: BTreeMap<i64, i64> = BTreeMap::new();
    let mut incoming: BTreeMap<i64, i64> = BTreeMap::new();
    for t in &ledger.in_doubt {
        *outgoing.entry(t.from).or_default() += t.amount;
        *incoming.entry(t.to).or_default() += t.amount;
    }

    for (key, expected) in &ledger.balances {
        let Some(got) = actual.get(key).copied() else {
            return Err(InvariantViolation::MissingKey {
                key: *key,
                expected: *expected,
            });
        };
        let out = outgoing.get(key).copied().unwrap_or(0);
        let inc = incoming.get(key).copied().unwrap_or(0);
        if out == 0 && inc == 0 {
            if got != *expected {
                return Err(InvariantViolation::ValueMismatch {
                    key: *key,
                    expected: *expected,
                    actual: got,
                });
            }
        } else {
            let (min, max) = (expected - out, expected + inc);
            if got < min || got > max {
                return Err(InvariantViolation::BalanceOutOfBounds {
                    key: *key,
                    min,
                    max,
                    actual: got,
                });
            }
        }
    }
    if let Some((key, value)) = actual
        .iter()
        .find(|(k, _)| !ledger.balances.contains_key(*k))
    {
        return Err(InvariantViolation::UnexpectedKey {
            key: *key,
            value: *value,
        });
    }
    Ok(())
}

/// Failure of a verification run.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The verification query failed.
    #[error("verification query failed: {0}")]
    Query(#[from] ClientError),
    /// The data is wrong.
    #[error(transparent)]
    Violation(#[from] InvariantViolation),
}

/// Runs one verification query per check through the router.
#[derive(Debug, Clone, Copy)]
pub struct InvariantChecker<'a> {
    router: &'a ConnectionRouter,
}

impl<'a> InvariantChecker<'a> {
    /// Checker reading through `router`.
    pub fn new(router: &'a ConnectionRouter) -> Self {
        Self { router }
    }

    async fn select_all(&self, table: &Table) -> Result<Vec<Row>, CheckError> {
        Ok(self
            .router
            .query(&Statement::SelectAll(table.clone()))
            .await?)
    }

    /// Table content must equal `expected`.
    pub async fn expect_values(
        &self,
        table: &Table,
        expected: &BTreeMap<i64, i64>,
    ) -> Result<(), CheckError> {
        let rows = self.select_all(table).await?;
        tracing::debug!("{}: {} rows observed, {} expected", table, rows.len(), expected.len());
        check_values(expected, &rows)?;
        Ok(())
    }

    /// Table must be empty.
    pub async fn expect_empty(&self, table: &Table) -> Result<(), CheckError> {
        let rows = self.select_all(table).await?;
        check_empty(&rows)?;
        Ok(())
    }

    /// Balances must agree with the ledger.
    pub async fn expect_ledger(
        &self,
        table: &Table,
        ledger: &LedgerSnapshot,
    ) -> Result<(), CheckError> {
        let rows = self.select_all(table).await?;
        check_ledger(ledger, &rows)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, Transfer};
    use chaos_client::{ClientConfig, MockCluster};

    fn identity(n: i64) -> BTreeMap<i64, i64> {
        (0..n).map(|k| (k, k)).collect()
    }

    // ===========================================
    // Pure comparisons
    // ===========================================

    #[test]
    fn exact_match_passes() {
        let rows: Vec<Row> = (0..100).map(|k| (k, k)).collect();
        assert!(check_values(&identity(100), &rows).is_ok());
    }

    #[test]
    fn missing_key_is_named() {
        let rows: Vec<Row> = (0..100).filter(|k| *k != 42).map(|k| (k, k)).collect();
        assert_eq!(
            check_values(&identity(100), &rows),
            Err(InvariantViolation::MissingKey {
                key: 42,
                expected: 42
            })
        );
    }

    #[test]
    fn wrong_value_is_named() {
        let mut rows: Vec<Row> = (0..10).map(|k| (k, k)).collect();
        rows[3].1 = 5;
        assert_eq!(
            check_values(&identity(10), &rows),
            Err(InvariantViolation::ValueMismatch {
                key: 3,
                expected: 3,
                actual: 5
            })
        );
    }

    #[test]
    fn extra_and_repeated_keys_fail() {
        let mut rows: Vec<Row> = (0..10).map(|k| (k, k)).collect();
        rows.push((77, 1));
        assert_eq!(
            check_values(&identity(10), &rows),
            Err(InvariantViolation::UnexpectedKey { key: 77, value: 1 })
        );

        let repeated = vec![(1, 1), (2, 2), (1, 1)];
        assert_eq!(
            check_values(&identity(3), &repeated),
            Err(InvariantViolation::DuplicateKey { key: 1, count: 2 })
        );
    }

    #[test]
    fn leftover_row_after_delete_is_named() {
        assert!(check_empty(&[]).is_ok());
        assert_eq!(
            check_empty(&[(9, 9)]),
            Err(InvariantViolation::UnexpectedKey { key: 9, value: 9 })
        );
    }

    fn bank() -> Ledger {
        Ledger::new((0..4).map(|i| (i, i + 1)))
    }

    #[test]
    fn ledger_exact_match() {
        let ledger = bank();
        ledger.record_committed(Transfer {
            from: 0,
            to: 1,
            amount: 1,
        });
        let rows = vec![(0, 0), (1, 3), (2, 3), (3, 4)];
        assert!(check_ledger(&ledger.snapshot(), &rows).is_ok());
    }

    #[test]
    fn ledger_detects_created_money() {
        let rows = vec![(0, 1), (1, 2), (2, 3), (3, 5)];
        assert_eq!(
            check_ledger(&bank().snapshot(), &rows),
            Err(InvariantViolation::Conservation {
                expected: 10,
                actual: 11
            })
        );
    }

    #[test]
    fn ledger_detects_lost_update_even_when_conserved() {
        // Transfer 2 -> 3 applied but never recorded.
        let rows = vec![(0, 1), (1, 2), (2, 2), (3, 5)];
        assert_eq!(
            check_ledger(&bank().snapshot(), &rows),
            Err(InvariantViolation::ValueMismatch {
                key: 2,
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn in_doubt_transfer_may_or_may_not_apply() {
        let ledger = bank();
        ledger.record_in_doubt(Transfer {
            from: 1,
            to: 2,
            amount: 1,
        });
        let snap = ledger.snapshot();

        let not_applied = vec![(0, 1), (1, 2), (2, 3), (3, 4)];
        let applied = vec![(0, 1), (1, 1), (2, 4), (3, 4)];
        assert!(check_ledger(&snap, &not_applied).is_ok());
        assert!(check_ledger(&snap, &applied).is_ok());

        let applied_twice = vec![(0, 1), (1, 0), (2, 5), (3, 4)];
        assert_eq!(
            check_ledger(&snap, &applied_twice),
            Err(InvariantViolation::BalanceOutOfBounds {
                key: 1,
                min: 1,
                max: 2,
                actual: 0
            })
        );
    }

    // ===========================================
    // Through the router
    // ===========================================

    #[tokio::test]
    async fn checker_reads_through_router() {
        let cluster = MockCluster::new();
        for k in 0..5 {
            cluster.put_row("t", k, k);
        }
        let router = ConnectionRouter::new(cluster.frontends(2), ClientConfig::default());
        let checker = InvariantChecker::new(&router);
        let table = Table::key_value("t");

        checker.expect_values(&table, &identity(5)).await.unwrap();
        let err = checker.expect_empty(&table).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Violation(InvariantViolation::UnexpectedKey { key: 0, .. })
        ));
    }

    #[tokio::test]
    async fn missing_table_is_a_query_error() {
        let cluster = MockCluster::new();
        let router = ConnectionRouter::new(cluster.frontends(1), ClientConfig::default());
        let err = InvariantChecker::new(&router)
            .expect_empty(&Table::key_value("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Query(ClientError::Fatal { .. })));
    }
}
