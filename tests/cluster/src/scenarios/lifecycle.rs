//! Cluster lifecycle against real binaries.
//!
//! All tests: `#[ignore = "requires cluster binaries"]`

// Helpers only used by #[ignore] tests
#![allow(dead_code, unused_imports)]

use crate::env;
use chaos_client::{
    ConnectionRouter, Frontend, FrontendConnector, MySqlConnector, Statement, Table,
};
use chaos_cluster::ClusterController;
use chaos_types::{LifecycleState, NodeId, ServerRole};
use serial_test::serial;

fn controller() -> ClusterController {
    ClusterController::with_standard_launcher(env::harness_config().cluster)
        .expect("create controller")
}

/// Every tier comes up and reports Running, frontends last.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn cluster_starts_in_dependency_order() {
    env::init_tracing();
    let mut cluster = controller();
    cluster.start().await.expect("start cluster");

    for role in ServerRole::START_ORDER {
        assert_eq!(
            cluster.topology().running(role).len(),
            cluster.config().count(role),
            "{} tier not fully running",
            role
        );
    }
    assert_eq!(cluster.frontend_addrs().len(), 3);

    cluster.teardown().await.expect("teardown");
    for role in ServerRole::START_ORDER {
        assert!(cluster.topology().running(role).is_empty());
    }
}

/// A killed frontend comes back on the same address and serves SQL again.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn restarted_frontend_serves_sql() {
    env::init_tracing();
    let config = env::harness_config();
    let mut cluster = controller();
    cluster.start().await.expect("start cluster");

    let victim = NodeId::new(ServerRole::Frontend, 0);
    let addr = cluster.frontend_addrs()[0].1;
    cluster.kill(victim).await.expect("kill frontend");
    assert_eq!(cluster.state(victim), Some(LifecycleState::Killed));

    cluster.restart(victim).await.expect("restart frontend");
    assert_eq!(cluster.state(victim), Some(LifecycleState::Running));
    assert_eq!(cluster.frontend_addrs()[0].1, addr);

    let connector = MySqlConnector::new(&config.client);
    let frontend = connector.connect(victim, addr).await.expect("reconnect");
    let table = Table::key_value("t_restart_probe");
    frontend
        .execute(&Statement::CreateTable(table.clone()))
        .await
        .expect("create table after restart");
    frontend
        .execute(&Statement::DropTable(table))
        .await
        .expect("drop table");

    cluster.teardown().await.expect("teardown");
}

/// Killing the only placement node is observed by the controller and
/// teardown still succeeds.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn teardown_after_partial_kill() {
    env::init_tracing();
    let mut cluster = controller();
    cluster.start().await.expect("start cluster");

    cluster
        .kill(NodeId::new(ServerRole::Placement, 0))
        .await
        .expect("kill placement");
    cluster.teardown().await.expect("teardown");
    assert!(cluster.topology().is_empty());
}

/// Routed statements reach the cluster and duplicates are recognized as such.
#[tokio::test]
#[ignore = "requires cluster binaries"]
#[serial]
async fn router_classifies_real_server_errors() {
    env::init_tracing();
    let config = env::harness_config();
    let mut cluster = controller();
    cluster.start().await.expect("start cluster");

    let connector = MySqlConnector::new(&config.client);
    let router = ConnectionRouter::connect(&connector, &cluster.frontend_addrs(), config.client.clone())
        .await
        .expect("connect router");

    let table = Table::key_value("t_classify");
    let create = Statement::CreateTable(table.clone());
    router.exec(&create).await.expect("first create");
    assert_eq!(
        router.exec(&create).await.expect("second create"),
        chaos_client::ExecOutcome::Duplicate
    );

    let insert = Statement::Insert {
        table: table.clone(),
        key: 1,
        value: 1,
    };
    router.exec(&insert).await.expect("first insert");
    assert_eq!(
        router.exec(&insert).await.expect("second insert"),
        chaos_client::ExecOutcome::Duplicate
    );

    let missing = Statement::SelectAll(Table::key_value("t_does_not_exist"));
    assert!(matches!(
        router.query(&missing).await,
        Err(chaos_client::ClientError::Fatal { .. })
    ));

    router.exec(&Statement::DropTable(table)).await.expect("drop");
    cluster.teardown().await.expect("teardown");
}
