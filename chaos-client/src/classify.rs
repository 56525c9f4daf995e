//! Error classification: retryable, duplicate or fatal.
//!
//! Structured information is checked first (server error numbers, the
//! driver's unique-violation flag, error kind). Message substrings are the
//! fallback for errors that carry no code, such as those produced by a
//! restarting node.

use crate::error::{DbError, DbErrorKind};
use chaos_types::ErrorCategory;
use serde::Deserialize;

/// Codes and patterns used by [`ErrorClassifier`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Server error numbers meaning "already applied"
    /// (default: 1062, 1050, 1007, 1022, 1586).
    #[serde(default = "default_duplicate_codes")]
    pub duplicate_codes: Vec<u16>,
    /// Server error numbers worth retrying on another node
    /// (default: 1046 no database selected, 2006 gone away, 2013 lost connection).
    #[serde(default = "default_retryable_codes")]
    pub retryable_codes: Vec<u16>,
    /// Message substrings meaning "already applied".
    #[serde(default = "default_duplicate_patterns")]
    pub duplicate_patterns: Vec<String>,
    /// Message substrings worth retrying.
    #[serde(default = "default_retryable_patterns")]
    pub retryable_patterns: Vec<String>,
}

fn default_duplicate_codes() -> Vec<u16> {
    vec![1062, 1050, 1007, 1022, 1586]
}

fn default_retryable_codes() -> Vec<u16> {
    vec![1046, 2006, 2013]
}

fn default_duplicate_patterns() -> Vec<String> {
    vec!["Duplicate".into(), "exists".into()]
}

fn default_retryable_patterns() -> Vec<String> {
    vec![
        "context".into(),
        "connection".into(),
        "No database selected".into(),
    ]
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            duplicate_codes: default_duplicate_codes(),
            retryable_codes: default_retryable_codes(),
            duplicate_patterns: default_duplicate_patterns(),
            retryable_patterns: default_retryable_patterns(),
        }
    }
}

/// Maps a [`DbError`] to an [`ErrorCategory`].
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    config: ClassifierConfig,
}

impl ErrorClassifier {
    /// Create a classifier from explicit codes and patterns.
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Codes and patterns in use.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one error.
    pub fn classify(&self, err: &DbError) -> ErrorCategory {
        if err.unique_violation {
            return ErrorCategory::Duplicate;
        }
        if let Some(number) = err.number {
            if self.config.duplicate_codes.contains(&number) {
                return ErrorCategory::Duplicate;
            }
            if self.config.retryable_codes.contains(&number) {
                return ErrorCategory::Retryable;
            }
        }
        if matches!(err.kind, DbErrorKind::Timeout | DbErrorKind::Connection) {
            return ErrorCategory::Retryable;
        }

        // Retryable patterns win, so "connection ... already exists" is retried.
        if contains_any(&err.message, &self.config.retryable_patterns) {
            return ErrorCategory::Retryable;
        }
        if contains_any(&err.message, &self.config.duplicate_patterns) {
            return ErrorCategory::Duplicate;
        }
        ErrorCategory::Fatal
    }
}

fn contains_any(message: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| message.contains(p.as_str()))
}
