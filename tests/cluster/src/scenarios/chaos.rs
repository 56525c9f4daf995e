//! Scenario invariants while frontend nodes are restarted.
//!
//! All tests: `#[ignore = "requires cluster binaries"]`

// Helpers only used by #[ignore] tests
#![allow(dead_code, unused_imports)]

use crate::env;
use chaos_workload::{ChaosHarness, ScenarioKind, ScenarioReport};
use serial_test::serial;

/// Restart period short enough to hit every scenario at least once.
const PERIOD_MS: u64 = 1_000;

async fn run_under_chaos(kind: ScenarioKind) -> ScenarioReport {
    env::init_tracing();
    let harness = ChaosHarness::setup(env::chaos_config(PERIOD_MS))
        .await
        .expect("harness setup");
    let report = harness.run_scenario(kind).await;
    harness.teardown().await.expect("teardown");
    report
}

/// Inserts survive frontend restarts without loss or duplication.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn insert_survives_frontend_restarts() {
    let report = run_under_chaos(ScenarioKind::Insert).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert!(report.restarts >= 1, "no restart happened: {:?}", report);
}

/// Updates survive frontend restarts.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn update_survives_frontend_restarts() {
    let report = run_under_chaos(ScenarioKind::Update).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert!(report.restarts >= 1);
}

/// Deletes survive frontend restarts.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn delete_survives_frontend_restarts() {
    let report = run_under_chaos(ScenarioKind::Delete).await;
    assert!(report.passed(), "{:?}", report.failure);
}

/// Money is conserved across restarts; ambiguous commits stay within bounds.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn bank_transfer_survives_frontend_restarts() {
    let report = run_under_chaos(ScenarioKind::BankTransfer).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert!(report.restarts >= 1);
}
