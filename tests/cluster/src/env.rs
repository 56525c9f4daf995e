//! Test environment: where the binaries live and how fast the harness runs.

use chaos_workload::HarnessConfig;
use std::path::PathBuf;

/// Environment variable naming the directory holding the server binaries.
pub const BIN_DIR_ENV: &str = "TIERCHAOS_BIN_DIR";

/// Directory holding the server binaries.
pub fn bin_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(BIN_DIR_ENV) {
        return PathBuf::from(dir);
    }
    // Navigate from the test crate manifest to the workspace root
    let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent() // tests/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.join("bin"))
        .unwrap_or_else(|| PathBuf::from("bin"))
}

/// Default harness configuration pointed at [`bin_dir`].
pub fn harness_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.cluster.bin_dir = bin_dir();
    config
}

/// Same as [`harness_config`] with frontend restarts every `period_ms`.
pub fn chaos_config(period_ms: u64) -> HarnessConfig {
    let mut config = harness_config();
    config.chaos.enabled = true;
    config.chaos.period_ms = period_ms;
    config
}

/// Route harness logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tierchaos=info,warn".into()),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_config_uses_bin_dir() {
        let config = harness_config();
        assert_eq!(config.cluster.bin_dir, bin_dir());
        assert!(!config.chaos.enabled);
        assert!(chaos_config(500).validate().is_ok());
    }
}
