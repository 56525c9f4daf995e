//! Scenario invariants on a healthy cluster.
//!
//! All tests: `#[ignore = "requires cluster binaries"]`

// Helpers only used by #[ignore] tests
#![allow(dead_code, unused_imports)]

use crate::env;
use chaos_workload::{ChaosHarness, HarnessConfig, ScenarioKind, ScenarioReport};
use serial_test::serial;
use tokio_util::sync::CancellationToken;

async fn run_one(config: HarnessConfig, kind: ScenarioKind) -> ScenarioReport {
    env::init_tracing();
    let harness = ChaosHarness::setup(config).await.expect("harness setup");
    let report = harness.run_scenario(kind).await;
    harness.teardown().await.expect("teardown");
    report
}

/// 5 tasks x 20 inserts: exactly 100 rows, value = key.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn concurrent_insert_100_rows() {
    let report = run_one(env::harness_config(), ScenarioKind::Insert).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.tasks, 5);
    assert_eq!(report.operations, 100);
}

/// Every key updated exactly once after the insert barrier.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn concurrent_update_applies_once() {
    let report = run_one(env::harness_config(), ScenarioKind::Update).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.operations, 200);
}

/// Every inserted key deleted.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn concurrent_delete_empties_table() {
    let report = run_one(env::harness_config(), ScenarioKind::Delete).await;
    assert!(report.passed(), "{:?}", report.failure);
}

/// Total balance conserved, balances equal the ledger.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn bank_transfer_conserves_money() {
    let report = run_one(env::harness_config(), ScenarioKind::BankTransfer).await;
    assert!(report.passed(), "{:?}", report.failure);
    let transfers = report.transfers.expect("transfer summary");
    assert_eq!(transfers.committed + transfers.in_doubt + transfers.insufficient, 5 * 19);
}

/// The full suite through the one-call entry point.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn full_suite_passes() {
    env::init_tracing();
    let suite = chaos_workload::run(env::harness_config(), &CancellationToken::new())
        .await
        .expect("harness setup");
    for s in &suite.scenarios {
        tracing::info!(
            "{}: {} ops, {} retries, {} duplicates in {}ms",
            s.scenario,
            s.operations,
            s.retries,
            s.duplicates,
            s.elapsed_ms
        );
    }
    assert!(suite.passed(), "{:#?}", suite);
    assert_eq!(suite.scenarios.len(), 4);
}

/// Interrupting the suite still kills every node and removes data dirs.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn interrupted_suite_tears_down() {
    env::init_tracing();
    let work_dir = tempfile::tempdir().expect("work dir");
    let mut config = env::harness_config();
    config.cluster.work_dir = Some(work_dir.path().to_path_buf());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let harness = ChaosHarness::setup(config).await.expect("harness setup");
    let result = harness.run_until(&ScenarioKind::ALL, &shutdown).await;
    assert!(matches!(result, Err(chaos_workload::HarnessError::Interrupted)));
    assert!(harness.cluster().lock().await.topology().is_empty());

    assert!(!work_dir.path().join("placement1").exists());
    assert!(!work_dir.path().join("storage1").exists());
    assert!(work_dir.path().join("placement1.out.log").exists());
}
