//! MySQL-protocol frontend backed by a sqlx connection pool.
//!
//! Statements go over the text protocol (`sqlx::raw_sql`) so session
//! statements such as `USE` behave as they do in an interactive client.

use super::{Frontend, FrontendConnector, FrontendTxn, Row};
use crate::config::ClientConfig;
use crate::error::DbError;
use crate::statement::Statement;
use async_trait::async_trait;
use chaos_types::NodeId;
use sqlx::mysql::{
    MySql, MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlPool, MySqlPoolOptions,
};
use sqlx::{Connection, Executor, Row as _, Transaction};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Frontend bound to one node through a connection pool.
#[derive(Debug, Clone)]
pub struct MySqlFrontend {
    node: NodeId,
    addr: SocketAddr,
    pool: MySqlPool,
    database: String,
}

impl MySqlFrontend {
    /// Wrap an existing pool.
    pub fn new(node: NodeId, addr: SocketAddr, pool: MySqlPool, database: String) -> Self {
        Self {
            node,
            addr,
            pool,
            database,
        }
    }

    /// SQL address of the node.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close the pool. Later calls fail with a connection error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Issue `USE <database>` on `conn`.
///
/// Failures are ignored here: a statement that then runs without a database
/// fails with "No database selected", which the router retries.
async fn use_database(conn: &mut MySqlConnection, node: NodeId, database: &str) {
    let sql = format!("USE {}", database);
    if let Err(e) = conn.execute(sqlx::raw_sql(&sql)).await {
        tracing::debug!("USE {} on {} failed: {}", database, node, e);
    }
}

async fn execute_on(conn: &mut MySqlConnection, stmt: &Statement) -> Result<u64, DbError> {
    let sql = stmt.to_sql();
    let done = conn
        .execute(sqlx::raw_sql(&sql))
        .await
        .map_err(db_error)?;
    Ok(done.rows_affected())
}

async fn query_on(conn: &mut MySqlConnection, stmt: &Statement) -> Result<Vec<Row>, DbError> {
    let sql = stmt.to_sql();
    let rows = conn
        .fetch_all(sqlx::raw_sql(&sql))
        .await
        .map_err(db_error)?;
    rows.iter()
        .map(|row| {
            let key: i64 = row.try_get(0).map_err(db_error)?;
            let value: i64 = row.try_get(1).map_err(db_error)?;
            Ok((key, value))
        })
        .collect()
}

#[async_trait]
impl Frontend for MySqlFrontend {
    fn node(&self) -> NodeId {
        self.node
    }

    fn is_live(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64, DbError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        use_database(&mut conn, self.node, &self.database).await;
        execute_on(&mut conn, stmt).await
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        use_database(&mut conn, self.node, &self.database).await;
        query_on(&mut conn, stmt).await
    }

    async fn begin(&self) -> Result<Box<dyn FrontendTxn>, DbError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        use_database(&mut tx, self.node, &self.database).await;
        Ok(Box::new(MySqlTxn { tx }))
    }
}

/// Transaction on one pooled connection.
struct MySqlTxn {
    tx: Transaction<'static, MySql>,
}

#[async_trait]
impl FrontendTxn for MySqlTxn {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        execute_on(&mut self.tx, stmt).await
    }

    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, DbError> {
        query_on(&mut self.tx, stmt).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await.map_err(db_error)
    }
}

/// Connects pools to frontend nodes.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    database: String,
    user: String,
    password: Option<String>,
    max_connections: u32,
    connect_timeout: Duration,
}

impl MySqlConnector {
    /// Connector using the connection settings of `config`.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            max_connections: config.max_connections,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Database every frontend switches to.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn options(&self, addr: SocketAddr) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&addr.ip().to_string())
            .port(addr.port())
            .username(&self.user);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

#[async_trait]
impl FrontendConnector for MySqlConnector {
    async fn connect(&self, node: NodeId, addr: SocketAddr) -> Result<Arc<dyn Frontend>, DbError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .connect_with(self.options(addr))
            .await
            .map_err(db_error)?;

        let mut conn = pool.acquire().await.map_err(db_error)?;
        conn.ping().await.map_err(db_error)?;
        let create = format!("CREATE DATABASE IF NOT EXISTS {}", self.database);
        conn.execute(sqlx::raw_sql(&create))
            .await
            .map_err(db_error)?;
        drop(conn);

        tracing::info!("Connected to {} at {}", node, addr);
        Ok(Arc::new(MySqlFrontend::new(
            node,
            addr,
            pool,
            self.database.clone(),
        )))
    }
}

/// Translate a driver error into a [`DbError`], keeping codes where present.
pub(crate) fn db_error(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Database(e) => {
            let number = e
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|m| m.number());
            DbError {
                kind: crate::error::DbErrorKind::Database,
                number,
                sqlstate: e.code().map(|c| c.into_owned()),
                unique_violation: e.is_unique_violation(),
                message: e.message().to_string(),
            }
        }
        sqlx::Error::Io(e) => DbError::connection(e.to_string()),
        sqlx::Error::Tls(e) => DbError::connection(e.to_string()),
        sqlx::Error::PoolClosed => DbError::connection("connection pool closed"),
        sqlx::Error::WorkerCrashed => DbError::connection("connection worker crashed"),
        sqlx::Error::PoolTimedOut => DbError::timeout("timed out acquiring a connection"),
        other => DbError::other(other.to_string()),
    }
}
