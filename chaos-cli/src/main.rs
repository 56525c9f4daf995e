//! # tierchaos
//!
//! Start a placement/storage/frontend cluster from local binaries, run
//! concurrent correctness scenarios against it, optionally restart frontend
//! nodes while they run, then tear everything down.
//!
//! ## Example
//!
//! ```bash
//! # All scenarios, healthy cluster
//! tierchaos --bin-dir ./bin
//!
//! # Bank transfers while a frontend is restarted every 5 seconds
//! tierchaos --bin-dir ./bin --scenario bank-transfer --chaos --chaos-period-ms 5000
//!
//! # Settings from a file, report as JSON
//! tierchaos --config harness.toml --json
//! ```
//!
//! Exits 0 when every scenario passed and teardown succeeded, 1 otherwise.
//! Ctrl-C stops the scenarios, tears the cluster down and exits 130.

use anyhow::{Context, Result};
use chaos_workload::{HarnessConfig, HarnessError, ScenarioKind, SuiteReport};
use clap::Parser;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Correctness and resilience harness for a three-tier SQL cluster.
#[derive(Parser, Debug)]
#[command(name = "tierchaos")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Harness configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory holding pd-server, tikv-server and tidb-server
    #[arg(long)]
    bin_dir: Option<PathBuf>,

    /// Directory for node data and logs, kept after the run
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Scenario to run; repeat for several (default: all)
    #[arg(long = "scenario", short, value_name = "NAME")]
    scenarios: Vec<ScenarioKind>,

    /// Restart a random frontend node periodically while scenarios run
    #[arg(long)]
    chaos: bool,

    /// Interval between restarts in milliseconds
    #[arg(long, requires = "chaos")]
    chaos_period_ms: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log at debug level
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// Load the config file (or defaults) and apply command-line overrides.
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => HarnessConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut HarnessConfig) {
        if let Some(dir) = &self.bin_dir {
            config.cluster.bin_dir = dir.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.cluster.work_dir = Some(dir.clone());
        }
        if !self.scenarios.is_empty() {
            config.workload.scenarios = self.scenarios.clone();
        }
        if self.chaos {
            config.chaos.enabled = true;
        }
        if let Some(period) = self.chaos_period_ms {
            config.chaos.period_ms = period;
        }
    }
}

fn init_tracing(verbose: bool) {
    // Targets match by prefix, so `tierchaos` covers every tierchaos_* crate.
    let fallback = if verbose {
        "tierchaos=debug,warn"
    } else {
        "tierchaos=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Human-readable summary of a suite run.
fn render_table(suite: &SuiteReport) -> String {
    let mut out = String::new();
    let mode = if suite.chaos { " (chaos)" } else { "" };
    let _ = writeln!(out, "=== tierchaos run {}{} ===", suite.run_id, mode);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<15} {:<6} {:>6} {:>8} {:>6} {:>9} {:>9}",
        "SCENARIO", "RESULT", "OPS", "RETRIES", "DUPS", "RESTARTS", "ELAPSED"
    );
    for s in &suite.scenarios {
        let _ = writeln!(
            out,
            "{:<15} {:<6} {:>6} {:>8} {:>6} {:>9} {:>8.1}s",
            s.scenario.as_str(),
            if s.passed() { "PASS" } else { "FAIL" },
            s.operations,
            s.retries,
            s.duplicates,
            s.restarts,
            s.elapsed_ms as f64 / 1000.0
        );
    }

    for s in &suite.scenarios {
        if let Some(t) = &s.transfers {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "{}: {} committed, {} in doubt, {} insufficient funds",
                s.scenario, t.committed, t.in_doubt, t.insufficient
            );
        }
    }

    if !suite.passed() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failures:");
        for s in suite.scenarios.iter().filter(|s| !s.passed()) {
            let _ = writeln!(
                out,
                "  {} ({}): {}",
                s.scenario,
                s.table,
                s.failure.as_deref().unwrap_or_default()
            );
        }
        if let Some(e) = &suite.teardown_error {
            let _ = writeln!(out, "  teardown: {}", e);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}/{} scenarios passed in {:.1}s",
        suite.scenarios.len() - suite.failures(),
        suite.scenarios.len(),
        suite.elapsed_ms as f64 / 1000.0
    );
    out
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.harness_config()?;
    tracing::info!(
        "Running {} scenario(s) against binaries in {}",
        config.workload.scenarios.len(),
        config.cluster.bin_dir.display()
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, tearing down the cluster");
            on_signal.cancel();
        }
    });

    let suite = match chaos_workload::run(config, &shutdown).await {
        Ok(suite) => suite,
        Err(HarnessError::Interrupted) => return Ok(ExitCode::from(130)),
        Err(e) => return Err(anyhow::Error::new(e).context("Harness setup failed")),
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&suite).context("Failed to serialize report")?
        );
    } else {
        print!("{}", render_table(&suite));
    }

    Ok(if suite.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_workload::{ScenarioReport, TransferSummary};
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_scenarios_are_collected() {
        let cli = Cli::try_parse_from([
            "tierchaos",
            "--scenario",
            "insert",
            "-s",
            "bank-transfer",
        ])
        .unwrap();
        assert_eq!(
            cli.scenarios,
            vec![ScenarioKind::Insert, ScenarioKind::BankTransfer]
        );
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(Cli::try_parse_from(["tierchaos", "--scenario", "merge"]).is_err());
    }

    #[test]
    fn chaos_period_requires_chaos() {
        assert!(Cli::try_parse_from(["tierchaos", "--chaos-period-ms", "500"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "tierchaos",
            "--bin-dir",
            "/opt/tidb/bin",
            "--work-dir",
            "/tmp/run",
            "--scenario",
            "delete",
            "--chaos",
            "--chaos-period-ms",
            "2000",
        ])
        .unwrap();
        let config = cli.harness_config().unwrap();
        assert_eq!(config.cluster.bin_dir, PathBuf::from("/opt/tidb/bin"));
        assert_eq!(config.cluster.work_dir, Some(PathBuf::from("/tmp/run")));
        assert_eq!(config.workload.scenarios, vec![ScenarioKind::Delete]);
        assert!(config.chaos.enabled);
        assert_eq!(config.chaos.period_ms, 2000);
    }

    #[test]
    fn chaos_with_single_frontend_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[cluster]\nfrontend_count = 1\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from(["tierchaos", "--config", &path, "--chaos"]).unwrap();
        assert!(cli.harness_config().is_err());
    }

    #[test]
    fn example_config_loads() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("harness.toml");
        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.workload.scenarios, ScenarioKind::ALL.to_vec());
        assert_eq!(config.client.classifier.retryable_codes, vec![1046, 2006, 2013]);
        assert!(!config.chaos.enabled);
    }

    #[test]
    fn table_lists_failures() {
        let mut failed = ScenarioReport::new(ScenarioKind::BankTransfer, "t_bank_ab12cd34", 5);
        failed.failure = Some("check failed: key 7 missing".into());
        failed.transfers = Some(TransferSummary {
            committed: 90,
            in_doubt: 2,
            insufficient: 0,
        });
        let suite = SuiteReport {
            run_id: "ab12cd34".into(),
            chaos: true,
            scenarios: vec![
                ScenarioReport::new(ScenarioKind::Insert, "t_insert_ab12cd34", 5),
                failed,
            ],
            elapsed_ms: 12_500,
            teardown_error: None,
        };

        let table = render_table(&suite);
        assert!(table.contains("run ab12cd34 (chaos)"));
        assert!(table.contains("insert"));
        assert!(table.contains("FAIL"));
        assert!(table.contains("90 committed, 2 in doubt"));
        assert!(table.contains("key 7 missing"));
        assert!(table.contains("1/2 scenarios passed in 12.5s"));
    }
}
