//! Frontend abstraction: one SQL-speaking node of the cluster.
//!
//! # Design
//!
//! A [`Frontend`] is bound to one node and owns its connection pool. Every
//! call establishes session context (`USE <database>`) on the connection it
//! runs on, since a node that was just restarted has no sessions to inherit.
//!
//! - [`Frontend::execute`] runs a write and returns affected rows
//! - [`Frontend::query`] runs a select and returns `(key, value)` rows
//! - [`Frontend::begin`] opens a transaction pinned to one connection
//!
//! [`FrontendConnector`] builds a frontend for a node address, used at setup
//! and again after a node has been restarted.
//!
//! # Example
//!
//! ```ignore
//! let cluster = MockCluster::new();
//! let frontend = cluster.frontend(0);
//! frontend.execute(&Statement::CreateTable(Table::key_value("t"))).await?;
//! ```

mod mock;
mod mysql;

pub use mock::{MockCluster, MockConnector, MockFrontend};
pub use mysql::{MySqlConnector, MySqlFrontend};

use crate::error::DbError;
use crate::statement::Statement;
use async_trait::async_trait;
use chaos_types::NodeId;
use std::net::SocketAddr;
use std::sync::Arc;

/// One `(key, value)` row.
pub type Row = (i64, i64);

/// A SQL frontend node.
#[async_trait]
pub trait Frontend: Send + Sync {
    /// Node this frontend is bound to.
    fn node(&self) -> NodeId;

    /// Whether the frontend can currently accept statements.
    fn is_live(&self) -> bool;

    /// Run a write statement. Returns the number of affected rows.
    async fn execute(&self, stmt: &Statement) -> Result<u64, DbError>;

    /// Run a select statement.
    async fn query(&self, stmt: &Statement) -> Result<Vec<Row>, DbError>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn FrontendTxn>, DbError>;
}

/// An open transaction on one connection.
///
/// Dropping without commit rolls back.
#[async_trait]
pub trait FrontendTxn: Send {
    /// Run a write statement inside the transaction.
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError>;

    /// Run a select statement inside the transaction.
    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>, DbError>;

    /// Commit.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Roll back.
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Builds frontends for node addresses.
#[async_trait]
pub trait FrontendConnector: Send + Sync {
    /// Connect to `node` at `addr` and make sure the database exists.
    async fn connect(&self, node: NodeId, addr: SocketAddr) -> Result<Arc<dyn Frontend>, DbError>;
}
