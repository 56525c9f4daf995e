//! Cluster configuration (the `[cluster]` section of the harness config).

use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shape and timing of the cluster under test.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Directory holding the server executables (default: `bin`).
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
    /// Working directory for data dirs and logs. A temporary directory,
    /// removed at teardown, is used when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Address every node binds to (default: 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Number of placement nodes (default: 1).
    #[serde(default = "default_placement_count")]
    pub placement_count: usize,
    /// Number of storage nodes (default: 3).
    #[serde(default = "default_storage_count")]
    pub storage_count: usize,
    /// Number of frontend nodes (default: 3).
    #[serde(default = "default_frontend_count")]
    pub frontend_count: usize,
    /// Health-probe attempts before a node counts as failed (default: 5).
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    /// Timeout of a single probe attempt in milliseconds (default: 1000).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Wait after the first failed probe in milliseconds (default: 2000).
    #[serde(default = "default_probe_initial_backoff_ms")]
    pub probe_initial_backoff_ms: u64,
    /// Upper bound of the probe backoff in milliseconds (default: 3000).
    #[serde(default = "default_probe_max_backoff_ms")]
    pub probe_max_backoff_ms: u64,
    /// Wait after a process has been reaped, before its ports may be
    /// reused, in milliseconds (default: 1000).
    #[serde(default = "default_kill_settle_ms")]
    pub kill_settle_ms: u64,
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("bin")
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_placement_count() -> usize {
    1
}

fn default_storage_count() -> usize {
    3
}

fn default_frontend_count() -> usize {
    3
}

fn default_probe_attempts() -> u32 {
    5
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_probe_initial_backoff_ms() -> u64 {
    2000
}

fn default_probe_max_backoff_ms() -> u64 {
    3000
}

fn default_kill_settle_ms() -> u64 {
    1000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bin_dir: default_bin_dir(),
            work_dir: None,
            host: default_host(),
            placement_count: default_placement_count(),
            storage_count: default_storage_count(),
            frontend_count: default_frontend_count(),
            probe_attempts: default_probe_attempts(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_initial_backoff_ms: default_probe_initial_backoff_ms(),
            probe_max_backoff_ms: default_probe_max_backoff_ms(),
            kill_settle_ms: default_kill_settle_ms(),
        }
    }
}

impl ClusterConfig {
    /// Configured node count for a tier.
    pub fn count(&self, role: chaos_types::ServerRole) -> usize {
        match role {
            chaos_types::ServerRole::Placement => self.placement_count,
            chaos_types::ServerRole::Storage => self.storage_count,
            chaos_types::ServerRole::Frontend => self.frontend_count,
        }
    }

    /// Delay before the next probe after `attempt` (zero-based) failed.
    ///
    /// Grows linearly from the initial backoff and is capped at the maximum.
    pub fn probe_backoff(&self, attempt: u32) -> Duration {
        let initial = self.probe_initial_backoff_ms;
        let max = self.probe_max_backoff_ms.max(initial);
        let step = max - initial;
        let ms = initial.saturating_add(step.saturating_mul(u64::from(attempt)));
        Duration::from_millis(ms.min(max))
    }

    /// Timeout of a single probe attempt.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Settle interval after a kill.
    pub fn kill_settle(&self) -> Duration {
        Duration::from_millis(self.kill_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_types::ServerRole;

    #[test]
    fn default_config_matches_reference_topology() {
        let config = ClusterConfig::default();
        assert_eq!(config.count(ServerRole::Placement), 1);
        assert_eq!(config.count(ServerRole::Storage), 3);
        assert_eq!(config.count(ServerRole::Frontend), 3);
        assert_eq!(config.probe_attempts, 5);
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn probe_backoff_grows_then_caps() {
        let config = ClusterConfig::default();
        assert_eq!(config.probe_backoff(0), Duration::from_secs(2));
        assert_eq!(config.probe_backoff(1), Duration::from_secs(3));
        assert_eq!(config.probe_backoff(4), Duration::from_secs(3));
    }

    #[test]
    fn probe_backoff_with_max_below_initial() {
        let config = ClusterConfig {
            probe_initial_backoff_ms: 500,
            probe_max_backoff_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.probe_backoff(3), Duration::from_millis(500));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
bin_dir = "/opt/cluster/bin"
host = "10.0.0.5"
storage_count = 5
kill_settle_ms = 250
"#;
        let config: ClusterConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bin_dir, PathBuf::from("/opt/cluster/bin"));
        assert_eq!(config.host, IpAddr::from([10, 0, 0, 5]));
        assert_eq!(config.storage_count, 5);
        assert_eq!(config.frontend_count, 3);
        assert_eq!(config.kill_settle(), Duration::from_millis(250));
    }
}
