//! Client configuration (the `[client]` section of the harness config).

use crate::classify::ClassifierConfig;
use serde::Deserialize;
use std::time::Duration;

/// Connection, routing and retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Database every statement runs in (default: `test_dml`).
    #[serde(default = "default_database")]
    pub database: String,
    /// Login user (default: `root`).
    #[serde(default = "default_user")]
    pub user: String,
    /// Login password (default: none).
    #[serde(default)]
    pub password: Option<String>,
    /// Pool size per frontend node (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Timeout for establishing a connection in milliseconds (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Random picks before a selection round gives up (default: 10).
    #[serde(default = "default_select_attempts")]
    pub select_attempts: u32,
    /// Attempts per operation across retryable failures (default: 10).
    #[serde(default = "default_op_attempts")]
    pub op_attempts: u32,
    /// Deadline of a single statement in milliseconds (default: 2000).
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// Wait before retrying on another node in milliseconds (default: 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Error classification codes and patterns.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

fn default_database() -> String {
    "test_dml".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_select_attempts() -> u32 {
    10
}

fn default_op_attempts() -> u32 {
    10
}

fn default_op_timeout_ms() -> u64 {
    2000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            user: default_user(),
            password: None,
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            select_attempts: default_select_attempts(),
            op_attempts: default_op_attempts(),
            op_timeout_ms: default_op_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Connection establishment timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Deadline of a single statement.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Delay before a retry.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
