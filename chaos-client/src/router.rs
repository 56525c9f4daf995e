//! Routes statements to random frontend nodes, retrying transient failures.
//!
//! # Design
//!
//! Every call runs a bounded attempt loop:
//!
//! 1. pick a live frontend at random (bounded picks; none → try again later)
//! 2. run the statement under the per-operation timeout
//! 3. classify a failure: retryable → wait, prefer another node, loop;
//!    duplicate → benign; fatal → return
//!
//! Callers never see retries. Once the loop is exhausted the caller gets
//! [`ClientError::RetriesExhausted`], or [`ClientError::ServiceUnavailable`]
//! if no node could be selected at all.

use crate::config::ClientConfig;
use crate::classify::ErrorClassifier;
use crate::error::{ClientError, DbError, Result};
use crate::frontend::{Frontend, FrontendConnector, FrontendTxn, Row};
use crate::statement::Statement;
use chaos_types::{ErrorCategory, NodeId};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Applied; number of affected rows.
    Applied(u64),
    /// Already applied by an earlier attempt (unique violation or "already exists").
    Duplicate,
}

/// Counters updated by every routed call.
#[derive(Debug, Default)]
pub struct RouterStats {
    operations: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    duplicates: AtomicU64,
    fatal: AtomicU64,
    unavailable: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    /// Calls made (exec, query, begin).
    pub operations: u64,
    /// Statements sent to a node.
    pub attempts: u64,
    /// Attempts beyond the first.
    pub retries: u64,
    /// Calls that ended as duplicates.
    pub duplicates: u64,
    /// Calls that ended with a fatal error.
    pub fatal: u64,
    /// Selection rounds that found no live node.
    pub unavailable: u64,
}

impl RouterStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
        }
    }
}

impl RouterStatsSnapshot {
    /// Difference since an earlier snapshot.
    pub fn since(&self, earlier: &RouterStatsSnapshot) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            operations: self.operations.saturating_sub(earlier.operations),
            attempts: self.attempts.saturating_sub(earlier.attempts),
            retries: self.retries.saturating_sub(earlier.retries),
            duplicates: self.duplicates.saturating_sub(earlier.duplicates),
            fatal: self.fatal.saturating_sub(earlier.fatal),
            unavailable: self.unavailable.saturating_sub(earlier.unavailable),
        }
    }
}

/// How an attempt loop ended successfully.
enum Settled<T> {
    Done(T),
    Duplicate(NodeId, DbError),
}

/// Router over a fixed set of frontend slots.
///
/// Slot `i` belongs to frontend node `i` for the router's whole life; a slot
/// can be emptied while its node is down and refilled after a restart.
pub struct ConnectionRouter {
    nodes: RwLock<Vec<Option<Arc<dyn Frontend>>>>,
    classifier: ErrorClassifier,
    config: ClientConfig,
    stats: RouterStats,
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("slots", &self.len())
            .field("live", &self.live_count())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ConnectionRouter {
    /// Router over already-connected frontends.
    pub fn new(frontends: Vec<Arc<dyn Frontend>>, config: ClientConfig) -> Self {
        Self {
            nodes: RwLock::new(frontends.into_iter().map(Some).collect()),
            classifier: ErrorClassifier::new(config.classifier.clone()),
            config,
            stats: RouterStats::default(),
        }
    }

    /// Connect to every frontend address, in order.
    pub async fn connect(
        connector: &dyn FrontendConnector,
        addrs: &[(NodeId, SocketAddr)],
        config: ClientConfig,
    ) -> Result<Self> {
        let mut frontends = Vec::with_capacity(addrs.len());
        for (node, addr) in addrs {
            let frontend = connector
                .connect(*node, *addr)
                .await
                .map_err(|source| ClientError::Connect {
                    node: *node,
                    addr: *addr,
                    source,
                })?;
            frontends.push(frontend);
        }
        Ok(Self::new(frontends, config))
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Classifier in use.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Call counters.
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when the router has no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots holding a live frontend.
    pub fn live_count(&self) -> usize {
        self.read()
            .iter()
            .flatten()
            .filter(|fe| fe.is_live())
            .count()
    }

    /// Put a freshly connected frontend into slot `index`.
    pub fn replace(&self, index: usize, frontend: Arc<dyn Frontend>) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if index >= nodes.len() {
            nodes.resize_with(index + 1, || None);
        }
        tracing::info!("Router slot {} now {}", index, frontend.node());
        nodes[index] = Some(frontend);
    }

    /// Empty slot `index` so it is never selected.
    pub fn remove(&self, index: usize) -> Option<Arc<dyn Frontend>> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.get_mut(index).and_then(Option::take)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Option<Arc<dyn Frontend>>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick a live frontend at random, preferring one other than `avoid`.
    ///
    /// Random picks come first; a scan from a random offset then makes sure a
    /// live node is found whenever one exists.
    fn select(&self, avoid: Option<usize>) -> Option<(usize, Arc<dyn Frontend>)> {
        let nodes = self.read();
        if nodes.is_empty() {
            return None;
        }
        let live = |index: usize| nodes[index].as_ref().filter(|fe| fe.is_live());

        let mut rng = rand::thread_rng();
        let mut fallback = None;
        let picks = (0..self.config.select_attempts).map(|_| rng.gen_range(0..nodes.len()));
        let start = rand::thread_rng().gen_range(0..nodes.len());
        let scan = (0..nodes.len()).map(|offset| (start + offset) % nodes.len());

        for index in picks.chain(scan) {
            let Some(frontend) = live(index) else {
                continue;
            };
            if avoid == Some(index) {
                fallback = Some((index, Arc::clone(frontend)));
                continue;
            }
            return Some((index, Arc::clone(frontend)));
        }
        fallback
    }

    async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<Settled<T>>
    where
        F: Fn(Arc<dyn Frontend>) -> Fut,
        Fut: Future<Output = std::result::Result<T, DbError>>,
    {
        RouterStats::bump(&self.stats.operations);
        let attempts = self.config.op_attempts.max(1);
        let timeout = self.config.op_timeout();
        let mut last: Option<DbError> = None;
        let mut avoid = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                RouterStats::bump(&self.stats.retries);
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            let Some((index, frontend)) = self.select(avoid) else {
                RouterStats::bump(&self.stats.unavailable);
                tracing::debug!(
                    "{}: no live frontend (attempt {}/{})",
                    operation,
                    attempt,
                    attempts
                );
                continue;
            };
            let node = frontend.node();
            tracing::debug!("{} on {} (attempt {}/{})", operation, node, attempt, attempts);
            RouterStats::bump(&self.stats.attempts);

            let err = match with_timeout(timeout, operation, call(frontend)).await {
                Ok(value) => return Ok(Settled::Done(value)),
                Err(e) => e,
            };

            match self.classifier.classify(&err) {
                ErrorCategory::Retryable => {
                    tracing::warn!("{} on {} failed, will retry: {}", operation, node, err);
                    avoid = Some(index);
                    last = Some(err);
                }
                ErrorCategory::Duplicate => {
                    RouterStats::bump(&self.stats.duplicates);
                    tracing::debug!("{} on {} already applied: {}", operation, node, err);
                    return Ok(Settled::Duplicate(node, err));
                }
                ErrorCategory::Fatal => {
                    RouterStats::bump(&self.stats.fatal);
                    tracing::error!("{} on {} failed: {}", operation, node, err);
                    return Err(ClientError::Fatal { node, source: err });
                }
            }
        }

        RouterStats::bump(&self.stats.fatal);
        match last {
            Some(last) => {
                tracing::error!("{} gave up after {} attempts: {}", operation, attempts, last);
                Err(ClientError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last,
                })
            }
            None => Err(ClientError::ServiceUnavailable { attempts }),
        }
    }

    /// Run a write. Duplicates count as success.
    pub async fn exec(&self, stmt: &Statement) -> Result<ExecOutcome> {
        let settled = self
            .run(stmt.verb(), |frontend| {
                let stmt = stmt.clone();
                async move { frontend.execute(&stmt).await }
            })
            .await?;
        Ok(match settled {
            Settled::Done(n) => ExecOutcome::Applied(n),
            Settled::Duplicate(..) => ExecOutcome::Duplicate,
        })
    }

    /// Run a select.
    pub async fn query(&self, stmt: &Statement) -> Result<Vec<Row>> {
        let settled = self
            .run(stmt.verb(), |frontend| {
                let stmt = stmt.clone();
                async move { frontend.query(&stmt).await }
            })
            .await?;
        match settled {
            Settled::Done(rows) => Ok(rows),
            Settled::Duplicate(node, source) => Err(ClientError::Fatal { node, source }),
        }
    }

    /// Open a transaction on a random live node.
    pub async fn begin(&self) -> Result<RouterTxn> {
        let settled = self
            .run("begin", |frontend| async move {
                let node = frontend.node();
                frontend.begin().await.map(|txn| (node, txn))
            })
            .await?;
        match settled {
            Settled::Done((node, inner)) => Ok(RouterTxn {
                node,
                inner,
                timeout: self.config.op_timeout(),
            }),
            Settled::Duplicate(node, source) => Err(ClientError::Fatal { node, source }),
        }
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = std::result::Result<T, DbError>>,
) -> std::result::Result<T, DbError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(format!(
            "{} exceeded deadline of {:?}",
            operation, timeout
        ))),
    }
}

/// A transaction opened through the router.
///
/// Statements are not retried: the caller decides what a failure means for
/// the transaction as a whole.
pub struct RouterTxn {
    node: NodeId,
    inner: Box<dyn FrontendTxn>,
    timeout: Duration,
}

impl std::fmt::Debug for RouterTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterTxn").field("node", &self.node).finish()
    }
}

impl RouterTxn {
    /// Node the transaction runs on.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Run a write inside the transaction.
    pub async fn execute(&mut self, stmt: &Statement) -> std::result::Result<u64, DbError> {
        with_timeout(self.timeout, stmt.verb(), self.inner.execute(stmt)).await
    }

    /// Run a select inside the transaction.
    pub async fn query(&mut self, stmt: &Statement) -> std::result::Result<Vec<Row>, DbError> {
        with_timeout(self.timeout, stmt.verb(), self.inner.query(stmt)).await
    }

    /// Commit.
    pub async fn commit(self) -> std::result::Result<(), DbError> {
        with_timeout(self.timeout, "commit", self.inner.commit()).await
    }

    /// Roll back.
    pub async fn rollback(self) -> std::result::Result<(), DbError> {
        with_timeout(self.timeout, "rollback", self.inner.rollback()).await
    }
}
