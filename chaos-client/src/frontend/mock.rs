//! In-memory frontends for testing.
//!
//! All [`MockFrontend`]s of one [`MockCluster`] share a single table store,
//! the way real frontends share the storage tier. Faults can be queued to
//! fail the next statement (before or after it is applied) and nodes can be
//! taken down and brought back.

use super::{Frontend, FrontendConnector, FrontendTxn, Row};
use crate::error::DbError;
use crate::statement::Statement;
use async_trait::async_trait;
use chaos_types::{NodeId, ServerRole};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

type Tables = HashMap<String, BTreeMap<i64, i64>>;

#[derive(Debug)]
enum Fault {
    /// Run normally.
    Pass,
    /// Fail without applying.
    Fail(DbError),
    /// Apply, then report failure (a lost acknowledgement).
    ApplyThenFail(DbError),
}

/// Shared state behind every frontend of a mock cluster.
#[derive(Debug, Default, Clone)]
pub struct MockCluster {
    inner: Arc<Mutex<MockClusterInner>>,
}

#[derive(Debug, Default)]
struct MockClusterInner {
    tables: Tables,
    faults: VecDeque<Fault>,
    down: HashSet<usize>,
    applied: u64,
    connects: u64,
}

enum Outcome {
    Affected(u64),
    Rows(Vec<Row>),
}

impl MockClusterInner {
    /// Run `f` on node `index`, honoring down nodes and queued faults.
    fn run<T>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Tables) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        if self.down.contains(&index) {
            return Err(refused(index));
        }
        match self.faults.pop_front() {
            None | Some(Fault::Pass) => {
                let result = f(&mut self.tables);
                if result.is_ok() {
                    self.applied += 1;
                }
                result
            }
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::ApplyThenFail(e)) => {
                if f(&mut self.tables).is_ok() {
                    self.applied += 1;
                }
                Err(e)
            }
        }
    }
}

fn refused(index: usize) -> DbError {
    DbError::connection(format!(
        "connection refused by {}",
        NodeId::new(ServerRole::Frontend, index)
    ))
}

fn missing_table(name: &str) -> DbError {
    DbError::database(1146, "42S02", format!("Table '{}' doesn't exist", name))
}

fn apply(tables: &mut Tables, stmt: &Statement) -> Result<Outcome, DbError> {
    let name = &stmt.table().name;
    match stmt {
        Statement::CreateTable(_) => {
            if tables.contains_key(name) {
                return Err(DbError::database(
                    1050,
                    "42S01",
                    format!("Table '{}' already exists", name),
                ));
            }
            tables.insert(name.clone(), BTreeMap::new());
            Ok(Outcome::Affected(0))
        }
        Statement::DropTable(_) => {
            tables.remove(name);
            Ok(Outcome::Affected(0))
        }
        Statement::Insert { key, value, .. } => {
            let rows = tables.get_mut(name).ok_or_else(|| missing_table(name))?;
            if rows.contains_key(key) {
                return Err(DbError::database(
                    1062,
                    "23000",
                    format!("Duplicate entry '{}' for key 'PRIMARY'", key),
                )
                .with_unique_violation());
            }
            rows.insert(*key, *value);
            Ok(Outcome::Affected(1))
        }
        Statement::SetValue { key, value, .. } => {
            let rows = tables.get_mut(name).ok_or_else(|| missing_table(name))?;
            match rows.get_mut(key) {
                Some(v) if *v != *value => {
                    *v = *value;
                    Ok(Outcome::Affected(1))
                }
                _ => Ok(Outcome::Affected(0)),
            }
        }
        Statement::AddValue { key, delta, .. } => {
            let rows = tables.get_mut(name).ok_or_else(|| missing_table(name))?;
            match rows.get_mut(key) {
                Some(v) if *delta != 0 => {
                    *v += *delta;
                    Ok(Outcome::Affected(1))
                }
                _ => Ok(Outcome::Affected(0)),
            }
        }
        Statement::Delete { key, .. } => {
            let rows = tables.get_mut(name).ok_or_else(|| missing_table(name))?;
            Ok(Outcome::Affected(u64::from(rows.remove(key).is_some())))
        }
        Statement::SelectAll(_) => {
            let rows = tables.get(name).ok_or_else(|| missing_table(name))?;
            Ok(Outcome::Rows(rows.iter().map(|(k, v)| (*k, *v)).collect()))
        }
        Statement::SelectFunded { key, amount, .. } => {
            let rows = tables.get(name).ok_or_else(|| missing_table(name))?;
            Ok(Outcome::Rows(
                rows.get(key)
                    .filter(|v| **v >= *amount)
                    .map(|v| vec![(*key, *v)])
                    .unwrap_or_default(),
            ))
        }
    }
}

fn affected(outcome: Outcome) -> u64 {
    match outcome {
        Outcome::Affected(n) => n,
        Outcome::Rows(_) => 0,
    }
}

fn rows(outcome: Outcome) -> Vec<Row> {
    match outcome {
        Outcome::Affected(_) => Vec::new(),
        Outcome::Rows(rows) => rows,
    }
}

impl MockCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockClusterInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Frontend for node `index`.
    pub fn frontend(&self, index: usize) -> Arc<dyn Frontend> {
        Arc::new(MockFrontend {
            node: NodeId::new(ServerRole::Frontend, index),
            cluster: self.clone(),
        })
    }

    /// Frontends for nodes `0..count`.
    pub fn frontends(&self, count: usize) -> Vec<Arc<dyn Frontend>> {
        (0..count).map(|i| self.frontend(i)).collect()
    }

    /// Connector handing out frontends of this cluster.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            cluster: self.clone(),
        }
    }

    /// Cause the next statement, on any node, to fail without being applied.
    pub fn fail_next(&self, error: DbError) {
        self.lock().faults.push_back(Fault::Fail(error));
    }

    /// Cause the next statement, on any node, to be applied and then fail.
    pub fn apply_then_fail_next(&self, error: DbError) {
        self.lock().faults.push_back(Fault::ApplyThenFail(error));
    }

    /// Let `skip` operations through, then fail the next one without applying it.
    pub fn fail_after(&self, skip: usize, error: DbError) {
        let mut inner = self.lock();
        inner.faults.extend((0..skip).map(|_| Fault::Pass));
        inner.faults.push_back(Fault::Fail(error));
    }

    /// Let `skip` operations through, then apply the next one and fail it.
    pub fn apply_then_fail_after(&self, skip: usize, error: DbError) {
        let mut inner = self.lock();
        inner.faults.extend((0..skip).map(|_| Fault::Pass));
        inner.faults.push_back(Fault::ApplyThenFail(error));
    }

    /// Queued faults not yet consumed.
    pub fn pending_faults(&self) -> usize {
        self.lock().faults.len()
    }

    /// Take node `index` down or bring it back.
    pub fn set_down(&self, index: usize, down: bool) {
        let mut inner = self.lock();
        if down {
            inner.down.insert(index);
        } else {
            inner.down.remove(&index);
        }
    }

    /// Whether node `index` is down.
    pub fn is_down(&self, index: usize) -> bool {
        self.lock().down.contains(&index)
    }

    /// Rows of a table, ordered by key.
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (*k, *v)).collect())
    }

    /// Whether a table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Overwrite one row, bypassing faults.
    pub fn put_row(&self, table: &str, key: i64, value: i64) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Operations (statements, begins, commits) that took effect so far.
    pub fn applied(&self) -> u64 {
        self.lock().applied
    }

    /// Successful connector calls so far.
    pub fn connects(&self) -> u64 {
        self.lock().connects
    }
}

/// One node of a [`MockCluster`].
#[derive(Debug, Clone)]
pub struct MockFrontend {
    node: NodeId,
    cluster: MockCluster,
}

#[async_trait]
impl Frontend for MockFrontend {
    fn node(&self) -> NodeId {
        self.node
    }

    fn is_live(&self) -> bool {
        !self.cluster.is_down(self.node.index)
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64, DbError> {
        let mut inner = self.cluster.lock();
        inner.run(self.node.index, |tables| apply(tables, stmt).map(affected))
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Row>, DbError> {
        let mut inner = self.cluster.lock();
        inner.run(self.node.index, |tables| apply(tables, stmt).map(rows))
    }

    async fn begin(&self) -> Result<Box<dyn FrontendTxn>, DbError> {
        let mut inner = self.cluster.lock();
        inner.run(self.node.index, |_| Ok(()))?;
        Ok(Box::new(MockTxn {
            node: self.node,
            cluster: self.cluster.clone(),
            pending: Vec::new(),
        }))
    }
}

/// Buffers writes and applies them atomically on commit.
#[derive(Debug)]
struct MockTxn {
    node: NodeId,
    cluster: MockCluster,
    pending: Vec<Statement>,
}

impl MockTxn {
    /// Committed state with this transaction's writes applied.
    fn staged(&self, committed: &Tables) -> Result<Tables, DbError> {
        let mut staged = committed.clone();
        for stmt in &self.pending {
            apply(&mut staged, stmt)?;
        }
        Ok(staged)
    }
}

#[async_trait]
impl FrontendTxn for MockTxn {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        let mut inner = self.cluster.lock();
        let committed = inner.tables.clone();
        let mut staged = self.staged(&committed)?;
        let n = inner.run(self.node.index, |_| apply(&mut staged, stmt).map(affected))?;
        self.pending.push(stmt.clone());
        Ok(n)
    }

    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, DbError> {
        let mut inner = self.cluster.lock();
        let committed = inner.tables.clone();
        let mut staged = self.staged(&committed)?;
        inner.run(self.node.index, |_| apply(&mut staged, stmt).map(rows))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let mut inner = self.cluster.lock();
        let pending = &self.pending;
        inner.run(self.node.index, |tables| {
            let mut next = tables.clone();
            for stmt in pending {
                apply(&mut next, stmt)?;
            }
            *tables = next;
            Ok(())
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        if self.cluster.is_down(self.node.index) {
            return Err(refused(self.node.index));
        }
        Ok(())
    }
}

/// Connector for a [`MockCluster`]. Fails for nodes that are down.
#[derive(Debug, Clone)]
pub struct MockConnector {
    cluster: MockCluster,
}

#[async_trait]
impl FrontendConnector for MockConnector {
    async fn connect(&self, node: NodeId, _addr: SocketAddr) -> Result<Arc<dyn Frontend>, DbError> {
        if self.cluster.is_down(node.index) {
            return Err(refused(node.index));
        }
        self.cluster.lock().connects += 1;
        Ok(self.cluster.frontend(node.index))
    }
}
