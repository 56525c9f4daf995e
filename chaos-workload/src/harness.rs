//! End-to-end harness: cluster up, scenarios (optionally under chaos),
//! cluster down.

use crate::chaos::ChaosInjector;
use crate::config::{ConfigError, HarnessConfig};
use crate::driver::WorkloadDriver;
use crate::scenario::{ScenarioKind, ScenarioReport, SuiteReport};
use chaos_client::{ClientError, ConnectionRouter, FrontendConnector, MySqlConnector};
use chaos_cluster::{ClusterController, ClusterError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Errors that prevent a suite from running at all.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The cluster could not be started.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Frontends could not be connected.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Shutdown was requested before the suite finished. The cluster has
    /// been torn down.
    #[error("interrupted")]
    Interrupted,
}

/// A running cluster plus everything needed to drive scenarios against it.
pub struct ChaosHarness {
    config: HarnessConfig,
    cluster: Arc<Mutex<ClusterController>>,
    router: Arc<ConnectionRouter>,
    connector: Arc<dyn FrontendConnector>,
    driver: WorkloadDriver,
}

impl std::fmt::Debug for ChaosHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosHarness")
            .field("run_id", &self.driver.run_id())
            .field("chaos", &self.config.chaos.enabled)
            .finish_non_exhaustive()
    }
}

impl ChaosHarness {
    /// Start the cluster from `config.cluster` and connect to every frontend.
    ///
    /// Whatever was started is torn down again when setup fails.
    pub async fn setup(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let mut controller = ClusterController::with_standard_launcher(config.cluster.clone())?;
        tracing::info!("Starting cluster in {}", controller.work_dir().display());

        if let Err(e) = controller.start().await {
            abandon(&mut controller).await;
            return Err(e.into());
        }

        let connector: Arc<dyn FrontendConnector> = Arc::new(MySqlConnector::new(&config.client));
        let addrs = controller.frontend_addrs();
        let router =
            match ConnectionRouter::connect(connector.as_ref(), &addrs, config.client.clone()).await
            {
                Ok(router) => router,
                Err(e) => {
                    abandon(&mut controller).await;
                    return Err(e.into());
                }
            };
        tracing::info!("Connected to {} frontend nodes", router.len());

        Ok(Self::from_parts(config, controller, router, connector))
    }

    /// Harness over an already-started controller and router.
    pub fn from_parts(
        config: HarnessConfig,
        controller: ClusterController,
        router: ConnectionRouter,
        connector: Arc<dyn FrontendConnector>,
    ) -> Self {
        let router = Arc::new(router);
        let driver = WorkloadDriver::new(Arc::clone(&router), config.workload.clone());
        Self {
            config,
            cluster: Arc::new(Mutex::new(controller)),
            router,
            connector,
            driver,
        }
    }

    /// Run id shared by every scenario table.
    pub fn run_id(&self) -> &str {
        self.driver.run_id()
    }

    /// Router used by workloads and checks.
    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    /// Controller shared with the chaos injector.
    pub fn cluster(&self) -> &Arc<Mutex<ClusterController>> {
        &self.cluster
    }

    /// Run one scenario, restarting frontends meanwhile when chaos is on.
    ///
    /// The injector is stopped and joined before the report is returned.
    pub async fn run_scenario(&self, kind: ScenarioKind) -> ScenarioReport {
        let chaos = self.config.chaos.enabled.then(|| {
            ChaosInjector::new(
                Arc::clone(&self.cluster),
                Arc::clone(&self.router),
                Arc::clone(&self.connector),
                self.config.chaos.clone(),
            )
            .spawn()
        });

        let mut report = self.driver.run(kind).await;

        if let Some(handle) = chaos {
            let observed = handle.restarts();
            match handle.stop().await {
                Ok(restarts) => report.restarts = restarts,
                Err(e) => {
                    tracing::error!("Chaos injector failed during {}: {}", kind, e);
                    report.restarts = observed;
                    report
                        .failure
                        .get_or_insert_with(|| format!("chaos injector failed: {}", e));
                }
            }
        }
        report
    }

    /// Run scenarios in order.
    pub async fn run_suite(&self, kinds: &[ScenarioKind]) -> SuiteReport {
        let started = Instant::now();
        let mut suite = SuiteReport {
            run_id: self.run_id().to_string(),
            chaos: self.config.chaos.enabled,
            ..Default::default()
        };
        for kind in kinds {
            suite.scenarios.push(self.run_scenario(*kind).await);
        }
        suite.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Suite {} finished: {}/{} scenarios passed in {}ms",
            suite.run_id,
            suite.scenarios.len() - suite.failures(),
            suite.scenarios.len(),
            suite.elapsed_ms
        );
        suite
    }

    /// Run scenarios until they finish or `shutdown` fires, then tear down.
    ///
    /// Teardown runs on both paths. Scenarios in flight at shutdown are
    /// abandoned and their results discarded.
    pub async fn run_until(
        &self,
        kinds: &[ScenarioKind],
        shutdown: &CancellationToken,
    ) -> Result<SuiteReport, HarnessError> {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            suite = self.run_suite(kinds) => Some(suite),
        };
        let teardown = self.teardown().await;

        let Some(mut suite) = outcome else {
            tracing::warn!("Suite {} interrupted", self.run_id());
            if let Err(e) = teardown {
                tracing::error!("Teardown after interrupt failed: {}", e);
            }
            return Err(HarnessError::Interrupted);
        };
        if let Err(e) = teardown {
            tracing::error!("Teardown failed: {}", e);
            suite.teardown_error = Some(e.to_string());
        }
        Ok(suite)
    }

    /// Kill every node and remove data directories.
    pub async fn teardown(&self) -> Result<(), ClusterError> {
        self.cluster.lock().await.teardown().await
    }
}

async fn abandon(controller: &mut ClusterController) {
    if let Err(e) = controller.teardown().await {
        tracing::warn!("Teardown after failed setup also failed: {}", e);
    }
}

/// Set up, run the configured scenarios, tear down.
///
/// Teardown always runs once setup succeeded, including when `shutdown`
/// fires. Its failure is recorded in the report rather than hiding scenario
/// results.
pub async fn run(
    config: HarnessConfig,
    shutdown: &CancellationToken,
) -> Result<SuiteReport, HarnessError> {
    let kinds = config.workload.scenarios.clone();
    let harness = ChaosHarness::setup(config).await?;
    harness.run_until(&kinds, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaos_client::{ClientConfig, DbError, MockCluster};
    use chaos_cluster::ClusterConfig;

    fn fast_config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.client = ClientConfig {
            op_attempts: 5,
            retry_delay_ms: 1,
            op_timeout_ms: 500,
            ..Default::default()
        };
        config.workload.tasks = 3;
        config.workload.ops_per_task = 4;
        config.workload.insert_pacing_ms = 0;
        config.workload.pacing_ms = 0;
        config
    }

    fn mock_harness(config: HarnessConfig, mock: &MockCluster) -> (tempfile::TempDir, ChaosHarness) {
        let dir = tempfile::tempdir().unwrap();
        let cluster_config = ClusterConfig {
            work_dir: Some(dir.path().to_path_buf()),
            ..config.cluster.clone()
        };
        let controller = ClusterController::with_standard_launcher(cluster_config).unwrap();
        let router = ConnectionRouter::new(mock.frontends(3), config.client.clone());
        let harness = ChaosHarness::from_parts(config, controller, router, Arc::new(mock.connector()));
        (dir, harness)
    }

    #[tokio::test]
    async fn suite_runs_every_scenario_in_order() {
        let mock = MockCluster::new();
        let (_dir, harness) = mock_harness(fast_config(), &mock);

        let suite = harness.run_suite(&ScenarioKind::ALL).await;
        assert!(suite.passed(), "{:?}", suite);
        assert!(!suite.chaos);
        assert_eq!(suite.run_id, harness.run_id());
        let order: Vec<_> = suite.scenarios.iter().map(|s| s.scenario).collect();
        assert_eq!(order, ScenarioKind::ALL.to_vec());
        assert!(suite.scenarios.iter().all(|s| s.restarts == 0));
        assert!(suite.scenarios[0].table.ends_with(harness.run_id()));

        harness.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_scenario_does_not_stop_the_suite() {
        let mock = MockCluster::new();
        let (_dir, harness) = mock_harness(fast_config(), &mock);

        mock.fail_next(DbError::database(1142, "42000", "CREATE command denied"));
        let suite = harness
            .run_suite(&[ScenarioKind::Insert, ScenarioKind::Delete])
            .await;
        assert_eq!(suite.failures(), 1);
        assert!(!suite.scenarios[0].passed());
        assert!(suite.scenarios[1].passed());
    }

    #[tokio::test]
    async fn setup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fast_config();
        config.cluster.bin_dir = dir.path().join("no-such-bin");
        config.cluster.work_dir = Some(dir.path().join("work"));

        let err = run(config, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Cluster(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_starting() {
        let mut config = fast_config();
        config.workload.tasks = 0;
        let err = ChaosHarness::setup(config).await.unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[cfg(unix)]
    mod sleeping {
        use super::*;
        use chaos_cluster::{LaunchSpec, Launcher, Probe};
        use std::net::{SocketAddr, TcpListener};
        use tokio::process::Command;

        struct SleepLauncher(SocketAddr);

        impl Launcher for SleepLauncher {
            fn command(&self, _spec: &LaunchSpec) -> Command {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg("sleep 60");
                cmd
            }

            fn probe(&self, _spec: &LaunchSpec) -> Probe {
                Probe::Tcp(self.0)
            }
        }

        pub(super) struct Fixture {
            pub dir: tempfile::TempDir,
            _listener: TcpListener,
            pub mock: MockCluster,
            pub harness: ChaosHarness,
        }

        /// Harness over real `sleep` processes and two mock frontends.
        pub(super) async fn fixture(mut config: HarnessConfig) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            config.cluster = ClusterConfig {
                work_dir: Some(dir.path().to_path_buf()),
                storage_count: 1,
                frontend_count: 2,
                probe_attempts: 3,
                probe_timeout_ms: 200,
                probe_initial_backoff_ms: 20,
                probe_max_backoff_ms: 40,
                kill_settle_ms: 10,
                ..Default::default()
            };

            let mut controller = ClusterController::new(
                config.cluster.clone(),
                Arc::new(SleepLauncher(listener.local_addr().unwrap())),
            )
            .unwrap();
            controller.start().await.unwrap();

            let mock = MockCluster::new();
            let router = ConnectionRouter::new(mock.frontends(2), config.client.clone());
            let harness =
                ChaosHarness::from_parts(config, controller, router, Arc::new(mock.connector()));
            Fixture {
                dir,
                _listener: listener,
                mock,
                harness,
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chaos_restarts_are_reported() {
        let mut config = fast_config();
        config.workload.ops_per_task = 10;
        config.workload.pacing_ms = 10;
        config.chaos.enabled = true;
        config.chaos.period_ms = 20;
        let f = sleeping::fixture(config).await;

        let report = f.harness.run_scenario(ScenarioKind::Update).await;
        assert!(report.passed(), "{:?}", report.failure);
        assert!(report.restarts >= 1);
        assert!(f.mock.connects() >= 1);

        f.harness.teardown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn completed_suite_is_torn_down() {
        let f = sleeping::fixture(fast_config()).await;

        let suite = f
            .harness
            .run_until(&[ScenarioKind::Insert], &CancellationToken::new())
            .await
            .unwrap();
        assert!(suite.passed(), "{:?}", suite);
        assert!(suite.teardown_error.is_none());
        assert!(f.harness.cluster().lock().await.topology().is_empty());
        assert!(!f.dir.path().join("placement1").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_still_tears_down() {
        let mut config = fast_config();
        config.workload.ops_per_task = 1_000;
        config.workload.pacing_ms = 10;
        config.chaos.enabled = true;
        config.chaos.period_ms = 20;
        let f = sleeping::fixture(config).await;

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = f
            .harness
            .run_until(&ScenarioKind::ALL, &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Interrupted), "{:?}", err);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        // Every node killed and dropped, data dirs gone, logs kept.
        assert!(f.harness.cluster().lock().await.topology().is_empty());
        assert!(!f.dir.path().join("placement1").exists());
        assert!(!f.dir.path().join("storage1").exists());
        assert!(f.dir.path().join("placement1.out.log").exists());
    }
}
