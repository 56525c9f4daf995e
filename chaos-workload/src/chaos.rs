//! Background frontend restarts.
//!
//! The injector never coordinates with workload tasks. Statements in flight
//! on the victim fail with connection errors and the router retries them on
//! another node; once the victim is back, its router slot gets a fresh
//! connection pool.

use crate::config::ChaosConfig;
use chaos_client::{ConnectionRouter, DbError, FrontendConnector};
use chaos_cluster::{ClusterController, ClusterError};
use chaos_types::{NodeId, ServerRole};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Fault-injection errors.
#[derive(Debug, Error)]
pub enum ChaosError {
    /// No running frontend to restart.
    #[error("no running frontend node to restart")]
    NoVictim,

    /// Killing or relaunching the victim failed.
    #[error("restart failed: {0}")]
    Cluster(#[from] ClusterError),

    /// The victim came back but could not be reconnected.
    #[error("failed to reconnect to {node}: {source}")]
    Reconnect {
        /// Restarted node.
        node: NodeId,
        /// Connection error.
        source: DbError,
    },

    /// The injector task panicked.
    #[error("injector task aborted: {0}")]
    Aborted(String),
}

/// Restarts a random frontend node on a fixed period.
pub struct ChaosInjector {
    cluster: Arc<Mutex<ClusterController>>,
    router: Arc<ConnectionRouter>,
    connector: Arc<dyn FrontendConnector>,
    config: ChaosConfig,
}

impl std::fmt::Debug for ChaosInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosInjector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChaosInjector {
    /// Injector over a shared controller and router.
    pub fn new(
        cluster: Arc<Mutex<ClusterController>>,
        router: Arc<ConnectionRouter>,
        connector: Arc<dyn FrontendConnector>,
        config: ChaosConfig,
    ) -> Self {
        Self {
            cluster,
            router,
            connector,
            config,
        }
    }

    /// Kill a random running frontend, relaunch it with the same
    /// configuration and swap a fresh connection into its router slot.
    ///
    /// When the node cannot be brought back, its slot is emptied so the
    /// router stops selecting it.
    pub async fn restart_random_frontend(&self) -> Result<NodeId, ChaosError> {
        let mut cluster = self.cluster.lock().await;
        let running = cluster.topology().running(ServerRole::Frontend);
        if running.is_empty() {
            return Err(ChaosError::NoVictim);
        }
        let victim = running[rand::thread_rng().gen_range(0..running.len())];

        tracing::info!("Chaos: restarting {}", victim);
        let restarted = match cluster.kill(victim).await {
            Ok(()) => cluster.restart(victim).await,
            Err(e) => Err(e),
        };
        if let Err(e) = restarted {
            tracing::error!("Chaos: {} did not come back: {}", victim, e);
            self.router.remove(victim.index);
            return Err(e.into());
        }

        let addr = match cluster.topology().node(victim) {
            Some(process) => process.spec().primary_addr(),
            None => return Err(ClusterError::UnknownNode(victim).into()),
        };
        drop(cluster);

        match self.connector.connect(victim, addr).await {
            Ok(frontend) => {
                self.router.replace(victim.index, frontend);
                tracing::info!("Chaos: {} reconnected", victim);
                Ok(victim)
            }
            Err(source) => {
                tracing::error!("Chaos: reconnect to {} failed: {}", victim, source);
                self.router.remove(victim.index);
                Err(ChaosError::Reconnect {
                    node: victim,
                    source,
                })
            }
        }
    }

    /// Run the restart loop in the background until the handle is stopped.
    pub fn spawn(self) -> ChaosHandle {
        let token = CancellationToken::new();
        let restarts = Arc::new(AtomicU32::new(0));
        let handle = tokio::spawn(self.run(token.clone(), Arc::clone(&restarts)));
        ChaosHandle {
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            handle,
            restarts,
        }
    }

    async fn run(
        self,
        token: CancellationToken,
        restarts: Arc<AtomicU32>,
    ) -> Result<u32, ChaosError> {
        let period = self.config.period();
        tracing::info!("Chaos injector running every {:?}", period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
            // A restart, once begun, completes even if cancelled meanwhile.
            self.restart_random_frontend().await?;
            restarts.fetch_add(1, Ordering::Relaxed);
        }
        let total = restarts.load(Ordering::Relaxed);
        tracing::info!("Chaos injector stopped after {} restarts", total);
        Ok(total)
    }
}

/// Handle to a running injector. Stop it before tearing the cluster down.
///
/// Dropping the handle cancels the loop without joining it.
#[derive(Debug)]
pub struct ChaosHandle {
    _cancel_on_drop: DropGuard,
    token: CancellationToken,
    handle: JoinHandle<Result<u32, ChaosError>>,
    restarts: Arc<AtomicU32>,
}

impl ChaosHandle {
    /// Restarts completed so far.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Whether the injector loop has ended (stopped or failed).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait for it. Returns the number of restarts.
    pub async fn stop(self) -> Result<u32, ChaosError> {
        self.token.cancel();
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ChaosError::Aborted(e.to_string())),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chaos_client::{ClientConfig, MockCluster};
    use chaos_cluster::{ClusterConfig, LaunchSpec, Launcher, Probe};
    use chaos_types::LifecycleState;
    use std::net::{SocketAddr, TcpListener};
    use std::time::Duration;
    use tokio::process::Command;

    struct SleepLauncher {
        probe_addr: SocketAddr,
    }

    impl Launcher for SleepLauncher {
        fn command(&self, _spec: &LaunchSpec) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("sleep 60");
            cmd
        }

        fn probe(&self, _spec: &LaunchSpec) -> Probe {
            Probe::Tcp(self.probe_addr)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        _listener: TcpListener,
        cluster: Arc<Mutex<ClusterController>>,
        router: Arc<ConnectionRouter>,
        mock: MockCluster,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ClusterConfig {
            work_dir: Some(dir.path().to_path_buf()),
            placement_count: 1,
            storage_count: 1,
            frontend_count: 2,
            probe_attempts: 3,
            probe_timeout_ms: 200,
            probe_initial_backoff_ms: 20,
            probe_max_backoff_ms: 40,
            kill_settle_ms: 10,
            ..Default::default()
        };
        let launcher = Arc::new(SleepLauncher {
            probe_addr: listener.local_addr().unwrap(),
        });
        let mut controller = ClusterController::new(config, launcher).unwrap();
        controller.start().await.unwrap();

        let mock = MockCluster::new();
        let router = Arc::new(ConnectionRouter::new(
            mock.frontends(2),
            ClientConfig::default(),
        ));
        Fixture {
            _dir: dir,
            _listener: listener,
            cluster: Arc::new(Mutex::new(controller)),
            router,
            mock,
        }
    }

    fn injector(f: &Fixture, period_ms: u64) -> ChaosInjector {
        ChaosInjector::new(
            Arc::clone(&f.cluster),
            Arc::clone(&f.router),
            Arc::new(f.mock.connector()),
            ChaosConfig {
                enabled: true,
                period_ms,
            },
        )
    }

    async fn teardown(f: &Fixture) {
        f.cluster.lock().await.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn restart_relaunches_and_reconnects() {
        let f = fixture().await;
        let chaos = injector(&f, 1000);

        let victim = chaos.restart_random_frontend().await.unwrap();
        assert_eq!(victim.role, ServerRole::Frontend);
        {
            let cluster = f.cluster.lock().await;
            let process = cluster.topology().node(victim).unwrap();
            assert_eq!(process.state(), LifecycleState::Running);
            assert_eq!(process.spawns(), 2);
        }
        assert_eq!(f.mock.connects(), 1);
        assert_eq!(f.router.live_count(), 2);
        teardown(&f).await;
    }

    #[tokio::test]
    async fn failed_reconnect_empties_slot() {
        let f = fixture().await;
        let chaos = injector(&f, 1000);

        f.mock.set_down(0, true);
        f.mock.set_down(1, true);
        let err = chaos.restart_random_frontend().await.unwrap_err();
        assert!(matches!(err, ChaosError::Reconnect { .. }));

        f.mock.set_down(0, false);
        f.mock.set_down(1, false);
        assert_eq!(f.router.live_count(), 1);
        teardown(&f).await;
    }

    #[tokio::test]
    async fn no_running_frontend_is_reported() {
        let f = fixture().await;
        {
            let mut cluster = f.cluster.lock().await;
            cluster.kill_all(ServerRole::Frontend).await.unwrap();
        }
        let err = injector(&f, 1000).restart_random_frontend().await.unwrap_err();
        assert!(matches!(err, ChaosError::NoVictim));
        teardown(&f).await;
    }

    #[tokio::test]
    async fn background_loop_restarts_until_stopped() {
        let f = fixture().await;
        let handle = injector(&f, 20).spawn();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!handle.is_finished());
        let observed = handle.restarts();
        let total = handle.stop().await.unwrap();
        assert!(total >= 1);
        assert!(total >= observed);
        teardown(&f).await;
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_next_period() {
        let f = fixture().await;
        let handle = injector(&f, 60_000).spawn();

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle.stop()).await;
        assert_eq!(stopped.unwrap().unwrap(), 0);
        teardown(&f).await;
    }

    #[tokio::test]
    async fn dropped_handle_cancels_the_loop() {
        let f = fixture().await;
        let handle = injector(&f, 60_000).spawn();
        let token = handle.token.clone();

        drop(handle);
        assert!(token.is_cancelled());
        teardown(&f).await;
    }
}
