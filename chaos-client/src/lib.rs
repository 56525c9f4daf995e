//! # chaos-client
//!
//! SQL access to the frontend tier of a cluster under test.
//!
//! This crate provides:
//! - [`Statement`]: typed statements rendered to SQL by the MySQL frontend
//! - [`Frontend`]: one SQL node (MySQL via sqlx, or an in-memory mock)
//! - [`ErrorClassifier`]: retryable / duplicate / fatal classification
//! - [`ConnectionRouter`]: random node selection with bounded, classified retries
//!
//! # Example
//!
//! ```ignore
//! let connector = MySqlConnector::new(&config);
//! let router = ConnectionRouter::connect(&connector, &frontend_addrs, config).await?;
//! router.exec(&Statement::CreateTable(Table::key_value("t"))).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod error;
pub mod frontend;
pub mod router;
pub mod statement;

pub use classify::{ClassifierConfig, ErrorClassifier};
pub use config::ClientConfig;
pub use error::{ClientError, DbError, DbErrorKind};
pub use frontend::{
    Frontend, FrontendConnector, FrontendTxn, MockCluster, MockConnector, MockFrontend,
    MySqlConnector, MySqlFrontend, Row,
};
pub use router::{ConnectionRouter, ExecOutcome, RouterStats, RouterStatsSnapshot, RouterTxn};
pub use statement::{Statement, Table};
