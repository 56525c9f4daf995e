//! Concurrent workload scenarios.
//!
//! Every scenario follows the same shape: create a fresh table, run one task
//! per shard, join all tasks, verify with one `SELECT`, drop the table.
//! Task `i` owns keys `[i * M, (i + 1) * M)` where `M` is the per-task
//! operation count, so tasks never write the same key.

use crate::checker::{CheckError, InvariantChecker};
use crate::config::WorkloadConfig;
use crate::ledger::{Ledger, Transfer};
use crate::scenario::{ScenarioKind, ScenarioReport, TransferSummary};
use chaos_client::{ClientError, ConnectionRouter, DbError, ExecOutcome, RouterTxn, Statement, Table};
use chaos_types::ErrorCategory;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Creating the scenario table failed.
    #[error("setup of {table} failed: {source}")]
    Setup {
        /// Table being created.
        table: String,
        /// Router error.
        source: ClientError,
    },

    /// A workload task hit a fatal or persistent error.
    #[error("task {task} failed: {source}")]
    Task {
        /// Index of the failing task.
        task: usize,
        /// Router error.
        source: ClientError,
    },

    /// A workload task panicked or was cancelled.
    #[error("task aborted: {0}")]
    TaskAborted(String),

    /// Verification failed.
    #[error("check failed: {0}")]
    Check(#[from] CheckError),
}

/// Per-task counters, summed after the join.
#[derive(Debug, Default, Clone, Copy)]
struct TaskTally {
    operations: u64,
    retries: u64,
}

impl TaskTally {
    fn add(&mut self, other: TaskTally) {
        self.operations += other.operations;
        self.retries += other.retries;
    }
}

type TaskResult = Result<TaskTally, (usize, ClientError)>;

/// Builds the statement a write task issues for one key.
type KeyStatement = Arc<dyn Fn(i64) -> Statement + Send + Sync>;

/// Runs scenarios through a shared router.
pub struct WorkloadDriver {
    router: Arc<ConnectionRouter>,
    config: WorkloadConfig,
    run_id: String,
}

impl std::fmt::Debug for WorkloadDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadDriver")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .finish()
    }
}

/// Short random id appended to table names.
pub fn new_run_id() -> String {
    Uuid::new_v4().as_simple().to_string()[..8].to_string()
}

impl WorkloadDriver {
    /// Driver with a fresh run id.
    pub fn new(router: Arc<ConnectionRouter>, config: WorkloadConfig) -> Self {
        Self::with_run_id(router, config, new_run_id())
    }

    /// Driver with a caller-chosen run id.
    pub fn with_run_id(
        router: Arc<ConnectionRouter>,
        config: WorkloadConfig,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            router,
            config,
            run_id: run_id.into(),
        }
    }

    /// Suffix shared by every table of this driver.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Workload shape.
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Table a scenario writes to.
    pub fn table(&self, kind: ScenarioKind) -> Table {
        let name = format!("{}_{}", kind.table_prefix(), self.run_id);
        match kind {
            ScenarioKind::BankTransfer => Table::accounts(name),
            _ => Table::key_value(name),
        }
    }

    /// Keys owned by task `task`.
    pub fn shard(&self, task: usize) -> Range<i64> {
        let m = self.config.ops_per_task as i64;
        let start = task as i64 * m;
        start..start + m
    }

    /// Run one scenario to completion.
    ///
    /// Never returns early: every task is joined and the outcome, including
    /// any failure, is recorded in the report.
    pub async fn run(&self, kind: ScenarioKind) -> ScenarioReport {
        let table = self.table(kind);
        let mut report = ScenarioReport::new(kind, table.name.clone(), self.config.tasks);
        let before = self.router.stats().snapshot();
        let started = Instant::now();

        tracing::info!(
            "Scenario {} starting on {} ({} tasks x {} ops)",
            kind,
            table,
            self.config.tasks,
            self.config.ops_per_task
        );

        let result = match kind {
            ScenarioKind::Insert => self.insert_scenario(&table).await,
            ScenarioKind::Update => self.update_scenario(&table).await,
            ScenarioKind::Delete => self.delete_scenario(&table).await,
            ScenarioKind::BankTransfer => self.bank_scenario(&table, &mut report).await,
        };

        let stats = self.router.stats().snapshot().since(&before);
        report.duplicates = stats.duplicates;
        report.retries = stats.retries;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(tally) => {
                report.operations = tally.operations;
                report.retries += tally.retries;
                tracing::info!(
                    "Scenario {} passed: {} ops, {} retries, {} duplicates in {}ms",
                    kind,
                    report.operations,
                    report.retries,
                    report.duplicates,
                    report.elapsed_ms
                );
                if !self.config.keep_tables {
                    self.drop_table(&table).await;
                }
            }
            Err(e) => {
                tracing::error!("Scenario {} failed: {}", kind, e);
                report.failure = Some(e.to_string());
            }
        }
        report
    }

    async fn insert_scenario(&self, table: &Table) -> Result<TaskTally, ScenarioError> {
        self.create_table(table).await?;
        let tally = self
            .write_phase(self.config.insert_pacing(), insert_identity(table))
            .await?;
        let expected = self.keys().map(|k| (k, k)).collect();
        InvariantChecker::new(&self.router)
            .expect_values(table, &expected)
            .await?;
        Ok(tally)
    }

    async fn update_scenario(&self, table: &Table) -> Result<TaskTally, ScenarioError> {
        self.create_table(table).await?;
        let mut tally = self
            .write_phase(self.config.pacing(), insert_identity(table))
            .await?;

        let t = table.clone();
        let set: KeyStatement = Arc::new(move |key| Statement::SetValue {
            table: t.clone(),
            key,
            value: key + 1,
        });
        tally.add(self.write_phase(self.config.pacing(), set).await?);

        let expected: BTreeMap<i64, i64> = self.keys().map(|k| (k, k + 1)).collect();
        InvariantChecker::new(&self.router)
            .expect_values(table, &expected)
            .await?;
        Ok(tally)
    }

    async fn delete_scenario(&self, table: &Table) -> Result<TaskTally, ScenarioError> {
        self.create_table(table).await?;
        let mut tally = self
            .write_phase(self.config.pacing(), insert_identity(table))
            .await?;

        let t = table.clone();
        let delete: KeyStatement = Arc::new(move |key| Statement::Delete {
            table: t.clone(),
            key,
        });
        tally.add(self.write_phase(self.config.pacing(), delete).await?);

        InvariantChecker::new(&self.router).expect_empty(table).await?;
        Ok(tally)
    }

    async fn bank_scenario(
        &self,
        table: &Table,
        report: &mut ScenarioReport,
    ) -> Result<TaskTally, ScenarioError> {
        self.create_table(table).await?;
        let t = table.clone();
        let open: KeyStatement = Arc::new(move |key| Statement::Insert {
            table: t.clone(),
            key,
            value: key + 1,
        });
        let mut tally = self.write_phase(self.config.pacing(), open).await?;

        let ledger = Arc::new(Ledger::new(self.keys().map(|k| (k, k + 1))));
        let result = self.transfer_phase(table, &ledger).await;

        let snapshot = ledger.snapshot();
        report.transfers = Some(TransferSummary {
            committed: snapshot.committed,
            in_doubt: snapshot.in_doubt.len() as u64,
            insufficient: snapshot.insufficient,
        });
        tally.add(result?);

        InvariantChecker::new(&self.router)
            .expect_ledger(table, &snapshot)
            .await?;
        Ok(tally)
    }

    fn keys(&self) -> Range<i64> {
        0..self.config.total_keys() as i64
    }

    async fn create_table(&self, table: &Table) -> Result<(), ScenarioError> {
        self.router
            .exec(&Statement::CreateTable(table.clone()))
            .await
            .map(|_| ())
            .map_err(|source| ScenarioError::Setup {
                table: table.name.clone(),
                source,
            })
    }

    async fn drop_table(&self, table: &Table) {
        if let Err(e) = self.router.exec(&Statement::DropTable(table.clone())).await {
            tracing::warn!("Failed to drop {}: {}", table, e);
        }
    }

    /// One task per shard, each writing every key of its shard in order.
    async fn write_phase(
        &self,
        pacing: Duration,
        statement: KeyStatement,
    ) -> Result<TaskTally, ScenarioError> {
        let mut tasks = JoinSet::new();
        for task in 0..self.config.tasks {
            let router = Arc::clone(&self.router);
            let statement = Arc::clone(&statement);
            let shard = self.shard(task);
            tasks.spawn(async move {
                let mut tally = TaskTally::default();
                for key in shard {
                    let stmt = statement(key);
                    match router.exec(&stmt).await {
                        Ok(ExecOutcome::Applied(_)) => {}
                        Ok(ExecOutcome::Duplicate) => {
                            tracing::debug!("task {}: {} already applied", task, stmt);
                        }
                        Err(e) => return Err((task, e)),
                    }
                    tally.operations += 1;
                    tokio::time::sleep(pacing).await;
                }
                Ok(tally)
            });
        }
        join_all(tasks).await
    }

    /// One task per shard moving money from each account to its right
    /// neighbour within the shard.
    async fn transfer_phase(
        &self,
        table: &Table,
        ledger: &Arc<Ledger>,
    ) -> Result<TaskTally, ScenarioError> {
        let mut tasks = JoinSet::new();
        for task in 0..self.config.tasks {
            let router = Arc::clone(&self.router);
            let ledger = Arc::clone(ledger);
            let table = table.clone();
            let shard = self.shard(task);
            let amount = self.config.transfer_amount;
            let attempts = self.config.transfer_attempts;
            let pacing = self.config.pacing();
            tasks.spawn(async move {
                let mut tally = TaskTally::default();
                for from in shard.start..shard.end - 1 {
                    let t = Transfer {
                        from,
                        to: from + 1,
                        amount,
                    };
                    match transfer(&router, &ledger, &table, t, attempts).await {
                        Ok(retries) => tally.retries += u64::from(retries),
                        Err(e) => return Err((task, e)),
                    }
                    tally.operations += 1;
                    tokio::time::sleep(pacing).await;
                }
                Ok(tally)
            });
        }
        join_all(tasks).await
    }
}

fn insert_identity(table: &Table) -> KeyStatement {
    let table = table.clone();
    Arc::new(move |key| Statement::Insert {
        table: table.clone(),
        key,
        value: key,
    })
}

/// Join every task. The first failure wins but never cuts the join short.
async fn join_all(mut tasks: JoinSet<TaskResult>) -> Result<TaskTally, ScenarioError> {
    let mut total = TaskTally::default();
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(tally)) => total.add(tally),
            Ok(Err((task, source))) => {
                tracing::error!("task {} failed: {}", task, source);
                failure.get_or_insert(ScenarioError::Task { task, source });
            }
            Err(e) => {
                tracing::error!("task aborted: {}", e);
                failure.get_or_insert(ScenarioError::TaskAborted(e.to_string()));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(total),
    }
}

/// Stage a transfer inside `txn`. `Ok(false)` means the sender lacks funds.
async fn stage(txn: &mut RouterTxn, table: &Table, t: Transfer) -> Result<bool, DbError> {
    let funded = txn
        .query(&Statement::SelectFunded {
            table: table.clone(),
            key: t.from,
            amount: t.amount,
        })
        .await?;
    if funded.is_empty() {
        return Ok(false);
    }
    txn.execute(&Statement::AddValue {
        table: table.clone(),
        key: t.to,
        delta: t.amount,
    })
    .await?;
    txn.execute(&Statement::AddValue {
        table: table.clone(),
        key: t.from,
        delta: -t.amount,
    })
    .await?;
    Ok(true)
}

async fn discard(txn: RouterTxn) {
    let node = txn.node();
    if let Err(e) = txn.rollback().await {
        tracing::debug!("rollback on {} failed: {}", node, e);
    }
}

/// Run one transfer and record its outcome in the ledger.
///
/// Retryable failures before `COMMIT` roll back and start over, up to
/// `attempts` times. A retryable failure of `COMMIT` itself leaves the
/// outcome unknown; the transfer is recorded as in doubt and not retried.
/// Returns the number of retries.
async fn transfer(
    router: &ConnectionRouter,
    ledger: &Ledger,
    table: &Table,
    t: Transfer,
    attempts: u32,
) -> Result<u32, ClientError> {
    let attempts = attempts.max(1);
    let mut last = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(router.config().retry_delay()).await;
        }

        let mut txn = router.begin().await?;
        let node = txn.node();
        match stage(&mut txn, table, t).await {
            Ok(true) => {}
            Ok(false) => {
                discard(txn).await;
                ledger.record_insufficient();
                tracing::debug!("transfer {} -> {}: insufficient funds", t.from, t.to);
                return Ok(attempt - 1);
            }
            Err(e) => {
                discard(txn).await;
                if router.classifier().classify(&e) != ErrorCategory::Retryable {
                    return Err(ClientError::Fatal { node, source: e });
                }
                tracing::warn!(
                    "transfer {} -> {} on {} (attempt {}/{}): {}",
                    t.from,
                    t.to,
                    node,
                    attempt,
                    attempts,
                    e
                );
                last = Some(e);
                continue;
            }
        }

        return match txn.commit().await {
            Ok(()) => {
                ledger.record_committed(t);
                Ok(attempt - 1)
            }
            Err(e) if router.classifier().classify(&e) == ErrorCategory::Retryable => {
                tracing::warn!(
                    "commit of transfer {} -> {} on {} in doubt: {}",
                    t.from,
                    t.to,
                    node,
                    e
                );
                ledger.record_in_doubt(t);
                Ok(attempt - 1)
            }
            Err(e) => Err(ClientError::Fatal { node, source: e }),
        };
    }

    Err(match last {
        Some(last) => ClientError::RetriesExhausted {
            operation: format!("transfer {} -> {}", t.from, t.to),
            attempts,
            last,
        },
        None => ClientError::ServiceUnavailable { attempts },
    })
}
