//! Cluster lifecycle: start tiers in dependency order, kill, restart, teardown.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result, StartupError};
use crate::launcher::{
    FrontendParams, LaunchSpec, Launcher, PlacementParams, StandardLauncher, StorageParams,
};
use crate::ports::PortAllocator;
use crate::process::ServerProcess;
use crate::topology::ClusterTopology;
use chaos_types::{LifecycleState, NodeId, ServerRole};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Where data directories and logs live.
#[derive(Debug)]
enum WorkDir {
    /// Removed when the controller is dropped.
    Temp(TempDir),
    /// Kept after teardown so logs can be inspected.
    Persistent(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(dir) => dir.path(),
            WorkDir::Persistent(path) => path,
        }
    }
}

/// Owns every process of the cluster under test.
///
/// ```text
/// start()            placement ──probe──▶ storage ──probe──▶ frontend ──probe──▶ ready
/// kill(node)         SIGKILL → reap → settle
/// restart(node)      same LaunchSpec → probe
/// teardown()         frontend → storage → placement, then data dirs
/// ```
pub struct ClusterController {
    config: ClusterConfig,
    launcher: Arc<dyn Launcher>,
    ports: PortAllocator,
    topology: ClusterTopology,
    http: reqwest::Client,
    work_dir: WorkDir,
}

impl std::fmt::Debug for ClusterController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterController")
            .field("work_dir", &self.work_dir)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl ClusterController {
    /// Create a controller. Nothing is started yet.
    pub fn new(config: ClusterConfig, launcher: Arc<dyn Launcher>) -> Result<Self> {
        let work_dir = match &config.work_dir {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                WorkDir::Persistent(path.clone())
            }
            None => WorkDir::Temp(tempfile::Builder::new().prefix("tierchaos-").tempdir()?),
        };
        tracing::info!("Cluster working directory: {}", work_dir.path().display());

        Ok(Self {
            ports: PortAllocator::new(config.host),
            config,
            launcher,
            topology: ClusterTopology::new(),
            http: reqwest::Client::new(),
            work_dir,
        })
    }

    /// Create a controller driving the executables in `config.bin_dir`.
    pub fn with_standard_launcher(config: ClusterConfig) -> Result<Self> {
        let launcher = Arc::new(StandardLauncher::new(config.bin_dir.clone()));
        Self::new(config, launcher)
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current topology.
    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Working directory holding data dirs and logs.
    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Lifecycle state of a node.
    pub fn state(&self, id: NodeId) -> Option<LifecycleState> {
        self.topology.node(id).map(|p| p.state())
    }

    /// Start the whole cluster with the configured node counts.
    pub async fn start(&mut self) -> Result<()> {
        for role in ServerRole::START_ORDER {
            let count = self.config.count(role);
            self.start_tier(role, count).await?;
        }
        tracing::info!("Cluster ready: {} nodes", self.topology.len());
        Ok(())
    }

    /// Spawn `count` new nodes of `role`, configured against the running
    /// dependency tier, and wait until each one is reachable.
    ///
    /// Placement membership is fixed at first start, so the placement tier can
    /// only be started once. Storage and frontend tiers can be grown.
    pub async fn start_tier(&mut self, role: ServerRole, count: usize) -> Result<Vec<NodeId>> {
        if let Some(dependency) = role.dependency() {
            if self.topology.running(dependency).is_empty() {
                return Err(ClusterError::MissingDependency { role, dependency });
            }
        }
        if role == ServerRole::Placement && !self.topology.tier(role).is_empty() {
            return Err(ClusterError::TierAlreadyStarted(role));
        }

        let specs = match role {
            ServerRole::Placement => self.placement_specs(count)?,
            ServerRole::Storage => self.storage_specs(count)?,
            ServerRole::Frontend => self.frontend_specs(count)?,
        };

        let mut ids = Vec::with_capacity(specs.len());
        for (id, spec) in specs {
            let output_log = self.work_dir().join(format!("{}.out.log", id.name()));
            let mut process = ServerProcess::new(id, spec, output_log);
            let spawned = process.spawn(self.launcher.as_ref());
            self.topology.tier_mut(role).push(process);
            spawned?;
            ids.push(id);
        }

        for id in &ids {
            self.wait_or_reap(*id).await?;
        }
        tracing::info!("{} tier running: {} node(s)", role, ids.len());
        Ok(ids)
    }

    fn placement_specs(&mut self, count: usize) -> Result<Vec<(NodeId, LaunchSpec)>> {
        let mut members = Vec::with_capacity(count);
        for index in 0..count {
            let id = NodeId::new(ServerRole::Placement, index);
            let client_addr = self.ports.allocate_addr()?;
            let peer_addr = self.ports.allocate_addr()?;
            members.push((id, client_addr, peer_addr));
        }
        let initial_cluster = members
            .iter()
            .map(|(id, _, peer)| format!("{}=http://{}", id.name(), peer))
            .collect::<Vec<_>>()
            .join(",");
        self.topology.set_initial_cluster(initial_cluster.clone());

        Ok(members
            .into_iter()
            .map(|(id, client_addr, peer_addr)| {
                let spec = LaunchSpec::Placement(PlacementParams {
                    name: id.name(),
                    data_dir: self.data_dir(id),
                    client_addr,
                    peer_addr,
                    initial_cluster: initial_cluster.clone(),
                    log_file: self.log_file(id),
                });
                (id, spec)
            })
            .collect())
    }

    fn storage_specs(&mut self, count: usize) -> Result<Vec<(NodeId, LaunchSpec)>> {
        let placement_endpoints = self.topology.placement_endpoints();
        let first = self.topology.tier(ServerRole::Storage).len();
        let mut specs = Vec::with_capacity(count);
        for index in first..first + count {
            let id = NodeId::new(ServerRole::Storage, index);
            let spec = LaunchSpec::Storage(StorageParams {
                placement_endpoints: placement_endpoints.clone(),
                addr: self.ports.allocate_addr()?,
                data_dir: self.data_dir(id),
                log_file: self.log_file(id),
            });
            specs.push((id, spec));
        }
        Ok(specs)
    }

    fn frontend_specs(&mut self, count: usize) -> Result<Vec<(NodeId, LaunchSpec)>> {
        let placement_endpoints = self.topology.placement_endpoints();
        let first = self.topology.tier(ServerRole::Frontend).len();
        let mut specs = Vec::with_capacity(count);
        for index in first..first + count {
            let id = NodeId::new(ServerRole::Frontend, index);
            let spec = LaunchSpec::Frontend(FrontendParams {
                placement_endpoints: placement_endpoints.clone(),
                addr: self.ports.allocate_addr()?,
                status_addr: self.ports.allocate_addr()?,
                log_file: self.log_file(id),
            });
            specs.push((id, spec));
        }
        Ok(specs)
    }

    fn data_dir(&self, id: NodeId) -> PathBuf {
        self.work_dir().join(id.name())
    }

    fn log_file(&self, id: NodeId) -> PathBuf {
        self.work_dir().join(format!("{}.log", id.name()))
    }

    /// Probe a Starting node until it answers, then mark it Running.
    ///
    /// Before every attempt the process is checked for an early exit, which
    /// fails immediately with its exit status and log tail.
    pub async fn wait_until_reachable(&mut self, id: NodeId) -> Result<()> {
        let attempts = self.config.probe_attempts;
        let timeout = self.config.probe_timeout();
        let node = self
            .topology
            .node_mut(id)
            .ok_or(ClusterError::UnknownNode(id))?;
        let probe = self.launcher.probe(node.spec());

        for attempt in 0..attempts {
            if let Some(status) = node.exited()? {
                return Err(StartupError::Exited {
                    node: id,
                    status,
                    log_tail: node.log_tail(),
                }
                .into());
            }
            if probe.check(&self.http, timeout).await {
                node.mark_running()?;
                tracing::info!("{} reachable via {}", id, probe);
                return Ok(());
            }
            if attempt + 1 < attempts {
                let backoff = self.config.probe_backoff(attempt);
                tracing::debug!(
                    "{} not reachable yet (attempt {}/{}), retrying in {:?}",
                    id,
                    attempt + 1,
                    attempts,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(StartupError::Unreachable {
            node: id,
            probe: probe.to_string(),
            attempts,
        }
        .into())
    }

    /// Wait for a node; if it never comes up, kill and reap it before
    /// returning the startup error.
    async fn wait_or_reap(&mut self, id: NodeId) -> Result<()> {
        match self.wait_until_reachable(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("{} failed to start: {}", id, e);
                if let Err(kill_err) = self.kill(id).await {
                    tracing::warn!("Failed to reap {} after startup failure: {}", id, kill_err);
                }
                Err(e)
            }
        }
    }

    /// Kill one node, wait for the OS to reap it, then wait the settle interval.
    pub async fn kill(&mut self, id: NodeId) -> Result<()> {
        let settle = self.config.kill_settle();
        self.topology
            .node_mut(id)
            .ok_or(ClusterError::UnknownNode(id))?
            .kill(settle)
            .await
    }

    /// Relaunch a killed node with its original configuration and wait until
    /// it is reachable again.
    pub async fn restart(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .topology
            .node_mut(id)
            .ok_or(ClusterError::UnknownNode(id))?;
        node.spawn(self.launcher.as_ref())?;
        self.wait_or_reap(id).await?;
        tracing::info!("Restarted {}", id);
        Ok(())
    }

    /// Kill every live node of a tier.
    ///
    /// Keeps going when one kill fails and returns the first error.
    pub async fn kill_all(&mut self, role: ServerRole) -> Result<()> {
        let live: Vec<NodeId> = self
            .topology
            .tier(role)
            .iter()
            .filter(|p| p.state().is_live())
            .map(|p| p.id())
            .collect();

        let mut first_err = None;
        for id in live {
            if let Err(e) = self.kill(id).await {
                tracing::error!("Failed to kill {}: {}", id, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Kill all tiers in reverse start order, remove data directories, then
    /// drop every node from the topology.
    ///
    /// Every step is attempted; the first error is returned. A node whose kill
    /// failed is still dropped, which sends it a final SIGKILL.
    pub async fn teardown(&mut self) -> Result<()> {
        tracing::info!("Tearing down cluster");
        let mut first_err = None;

        for role in ServerRole::STOP_ORDER {
            if let Err(e) = self.kill_all(role).await {
                first_err.get_or_insert(e);
            }
        }

        for role in ServerRole::START_ORDER {
            for node in self.topology.tier(role) {
                let Some(dir) = node.spec().data_dir() else {
                    continue;
                };
                if !dir.exists() {
                    continue;
                }
                if let Err(source) = std::fs::remove_dir_all(dir) {
                    tracing::error!("Failed to remove {}: {}", dir.display(), source);
                    first_err.get_or_insert(ClusterError::Cleanup {
                        path: dir.to_path_buf(),
                        source,
                    });
                }
            }
        }

        let nodes = self.topology.len();
        self.topology = ClusterTopology::new();
        tracing::info!("Cluster torn down: {} node(s) removed", nodes);
        first_err.map_or(Ok(()), Err)
    }

    /// SQL addresses of all frontend nodes, by stable index.
    pub fn frontend_addrs(&self) -> Vec<(NodeId, SocketAddr)> {
        self.topology.frontend_addrs()
    }
}
