//! Harness configuration.
//!
//! Loaded from a TOML file with four sections:
//!
//! ```toml
//! [cluster]
//! bin_dir = "bin"
//!
//! [client]
//! database = "test_dml"
//!
//! [workload]
//! tasks = 5
//! ops_per_task = 20
//!
//! [chaos]
//! enabled = true
//! period_ms = 15000
//! ```

use crate::scenario::ScenarioKind;
use chaos_client::ClientConfig;
use chaos_cluster::ClusterConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete harness configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarnessConfig {
    /// Cluster shape and process timing.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// SQL client settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// Workload shape.
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Fault injection.
    #[serde(default)]
    pub chaos: ChaosConfig,
}

/// Workload shape.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Concurrent tasks per scenario (default: 5).
    #[serde(default = "default_tasks")]
    pub tasks: usize,
    /// Keys owned (and operations run) by each task (default: 20).
    #[serde(default = "default_ops_per_task")]
    pub ops_per_task: usize,
    /// Sleep between operations of the standalone insert scenario in
    /// milliseconds (default: 100).
    #[serde(default = "default_insert_pacing_ms")]
    pub insert_pacing_ms: u64,
    /// Sleep between operations everywhere else in milliseconds (default: 50).
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Amount moved by one bank transfer (default: 1).
    #[serde(default = "default_transfer_amount")]
    pub transfer_amount: i64,
    /// Attempts per transfer across retryable failures before commit
    /// (default: 10).
    #[serde(default = "default_transfer_attempts")]
    pub transfer_attempts: u32,
    /// Scenarios to run, in order (default: all).
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioKind>,
    /// Keep scenario tables after a successful check (default: false).
    #[serde(default)]
    pub keep_tables: bool,
}

fn default_tasks() -> usize {
    5
}

fn default_ops_per_task() -> usize {
    20
}

fn default_insert_pacing_ms() -> u64 {
    100
}

fn default_pacing_ms() -> u64 {
    50
}

fn default_transfer_amount() -> i64 {
    1
}

fn default_transfer_attempts() -> u32 {
    10
}

fn default_scenarios() -> Vec<ScenarioKind> {
    ScenarioKind::ALL.to_vec()
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            ops_per_task: default_ops_per_task(),
            insert_pacing_ms: default_insert_pacing_ms(),
            pacing_ms: default_pacing_ms(),
            transfer_amount: default_transfer_amount(),
            transfer_attempts: default_transfer_attempts(),
            scenarios: default_scenarios(),
            keep_tables: false,
        }
    }
}

impl WorkloadConfig {
    /// Pacing of the standalone insert scenario.
    pub fn insert_pacing(&self) -> Duration {
        Duration::from_millis(self.insert_pacing_ms)
    }

    /// Pacing of every other phase.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Total keys across all tasks.
    pub fn total_keys(&self) -> usize {
        self.tasks * self.ops_per_task
    }
}

/// Fault injection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChaosConfig {
    /// Restart frontends while scenarios run (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Interval between restarts in milliseconds (default: 15000).
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

fn default_period_ms() -> u64 {
    15_000
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_ms: default_period_ms(),
        }
    }
}

impl ChaosConfig {
    /// Interval between restarts.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no scenario can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.workload;
        if w.tasks == 0 {
            return Err(ConfigError::Invalid("workload.tasks must be at least 1".into()));
        }
        if w.ops_per_task < 2 {
            return Err(ConfigError::Invalid(
                "workload.ops_per_task must be at least 2".into(),
            ));
        }
        if w.transfer_amount <= 0 {
            return Err(ConfigError::Invalid(
                "workload.transfer_amount must be positive".into(),
            ));
        }
        if self.client.op_attempts == 0 {
            return Err(ConfigError::Invalid("client.op_attempts must be at least 1".into()));
        }
        if self.chaos.enabled && self.cluster.frontend_count < 2 {
            return Err(ConfigError::Invalid(
                "chaos needs at least 2 frontend nodes".into(),
            ));
        }
        if self.chaos.enabled && self.chaos.period_ms == 0 {
            return Err(ConfigError::Invalid("chaos.period_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Values parse but cannot be used together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
