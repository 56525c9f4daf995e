//! Error types for SQL operations.

use chaos_types::NodeId;
use std::fmt;
use thiserror::Error;

/// Broad origin of a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// The operation did not finish within its deadline.
    Timeout,
    /// The connection could not be established or broke mid-operation.
    Connection,
    /// The server answered with an error packet.
    Database,
    /// Anything else reported by the driver.
    Other,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DbErrorKind::Timeout => "timeout",
            DbErrorKind::Connection => "connection error",
            DbErrorKind::Database => "database error",
            DbErrorKind::Other => "driver error",
        };
        f.write_str(s)
    }
}

/// One failed statement, as reported by a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DbError {
    /// Origin of the error.
    pub kind: DbErrorKind,
    /// Server error number, for [`DbErrorKind::Database`].
    pub number: Option<u16>,
    /// SQLSTATE, for [`DbErrorKind::Database`].
    pub sqlstate: Option<String>,
    /// Driver flagged this as a unique-key violation.
    pub unique_violation: bool,
    /// Human-readable message.
    pub message: String,
}

impl DbError {
    fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            number: None,
            sqlstate: None,
            unique_violation: false,
            message: message.into(),
        }
    }

    /// Deadline exceeded.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Timeout, message)
    }

    /// Connection refused, reset or closed.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Connection, message)
    }

    /// Server error packet.
    pub fn database(number: u16, sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            number: Some(number),
            sqlstate: Some(sqlstate.to_string()),
            ..Self::new(DbErrorKind::Database, message)
        }
    }

    /// Unclassified driver error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Other, message)
    }

    /// Mark as a unique-key violation.
    pub fn with_unique_violation(mut self) -> Self {
        self.unique_violation = true;
        self
    }
}

/// Errors surfaced by the router after retries and classification.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No live frontend could be selected.
    #[error("no frontend node available after {attempts} selection attempts")]
    ServiceUnavailable {
        /// Selection attempts made.
        attempts: u32,
    },

    /// Retryable errors persisted through every attempt.
    #[error("{operation} failed after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        /// Operation that was retried.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        last: DbError,
    },

    /// Non-retryable error.
    #[error("fatal error on {node}: {source}")]
    Fatal {
        /// Node that reported the error.
        node: NodeId,
        /// The error.
        source: DbError,
    },

    /// Connecting to a frontend failed.
    #[error("failed to connect to {node} at {addr}: {source}")]
    Connect {
        /// Node being connected.
        node: NodeId,
        /// Its SQL address.
        addr: std::net::SocketAddr,
        /// The error.
        source: DbError,
    },
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_types::ServerRole;

    #[test]
    fn db_error_display_includes_kind() {
        let err = DbError::database(1062, "23000", "Duplicate entry '5' for key 'PRIMARY'");
        assert_eq!(
            err.to_string(),
            "database error: Duplicate entry '5' for key 'PRIMARY'"
        );
        assert_eq!(err.number, Some(1062));
        assert_eq!(err.sqlstate.as_deref(), Some("23000"));
    }

    #[test]
    fn fatal_names_node() {
        let err = ClientError::Fatal {
            node: NodeId::new(ServerRole::Frontend, 1),
            source: DbError::other("boom"),
        };
        assert_eq!(err.to_string(), "fatal error on frontend2: driver error: boom");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientError>();
    }
}
