//! Error categories for failed SQL operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the harness treats a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Transient (timeout, broken connection, missing session context):
    /// retry on another node.
    Retryable,
    /// Unique-key violation or "already exists": a retried write already applied.
    Duplicate,
    /// Anything else. Fails the scenario.
    Fatal,
}

impl ErrorCategory {
    /// Whether an error of this category counts as success for the caller.
    pub fn is_benign(&self) -> bool {
        matches!(self, ErrorCategory::Duplicate)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::Duplicate => "duplicate",
            ErrorCategory::Fatal => "fatal",
        };
        f.write_str(s)
    }
}
