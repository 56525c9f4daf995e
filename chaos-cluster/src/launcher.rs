//! Role-specific launch parameters and how they become a command line.
//!
//! The controller only decides *what* a node needs (addresses, directories,
//! membership). A [`Launcher`] turns that into an executable invocation and
//! names the probe that tells when the node is reachable. [`StandardLauncher`]
//! drives the `pd-server` / `tikv-server` / `tidb-server` binary family.

use crate::probe::Probe;
use chaos_types::ServerRole;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Parameters of a placement node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementParams {
    /// Member name used in the initial membership list.
    pub name: String,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Address serving storage and frontend clients.
    pub client_addr: SocketAddr,
    /// Address serving placement peers.
    pub peer_addr: SocketAddr,
    /// Initial membership list (`name=http://peer,...`).
    pub initial_cluster: String,
    /// Server log file.
    pub log_file: PathBuf,
}

/// Parameters of a storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageParams {
    /// Client addresses of the placement tier.
    pub placement_endpoints: Vec<SocketAddr>,
    /// Bind address.
    pub addr: SocketAddr,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Server log file.
    pub log_file: PathBuf,
}

/// Parameters of a frontend node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendParams {
    /// Client addresses of the placement tier, used to discover storage.
    pub placement_endpoints: Vec<SocketAddr>,
    /// SQL bind address.
    pub addr: SocketAddr,
    /// Status (HTTP) bind address.
    pub status_addr: SocketAddr,
    /// Server log file.
    pub log_file: PathBuf,
}

/// Everything needed to (re)launch one node with identical configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSpec {
    /// Placement node.
    Placement(PlacementParams),
    /// Storage node.
    Storage(StorageParams),
    /// Frontend node.
    Frontend(FrontendParams),
}

impl LaunchSpec {
    /// Role of the node.
    pub fn role(&self) -> ServerRole {
        match self {
            LaunchSpec::Placement(_) => ServerRole::Placement,
            LaunchSpec::Storage(_) => ServerRole::Storage,
            LaunchSpec::Frontend(_) => ServerRole::Frontend,
        }
    }

    /// Address other tiers and clients talk to.
    pub fn primary_addr(&self) -> SocketAddr {
        match self {
            LaunchSpec::Placement(p) => p.client_addr,
            LaunchSpec::Storage(s) => s.addr,
            LaunchSpec::Frontend(f) => f.addr,
        }
    }

    /// Every address this node binds.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        match self {
            LaunchSpec::Placement(p) => vec![p.client_addr, p.peer_addr],
            LaunchSpec::Storage(s) => vec![s.addr],
            LaunchSpec::Frontend(f) => vec![f.addr, f.status_addr],
        }
    }

    /// Data directory, for roles that keep one.
    pub fn data_dir(&self) -> Option<&Path> {
        match self {
            LaunchSpec::Placement(p) => Some(&p.data_dir),
            LaunchSpec::Storage(s) => Some(&s.data_dir),
            LaunchSpec::Frontend(_) => None,
        }
    }

    /// Server log file.
    pub fn log_file(&self) -> &Path {
        match self {
            LaunchSpec::Placement(p) => &p.log_file,
            LaunchSpec::Storage(s) => &s.log_file,
            LaunchSpec::Frontend(f) => &f.log_file,
        }
    }
}

/// Turns launch parameters into a process invocation and a readiness probe.
pub trait Launcher: Send + Sync {
    /// Command that starts the node. Stdout/stderr are redirected by the caller.
    fn command(&self, spec: &LaunchSpec) -> Command;

    /// Probe that passes once the node is reachable.
    fn probe(&self, spec: &LaunchSpec) -> Probe;
}

/// Launcher for the `pd-server` / `tikv-server` / `tidb-server` family.
#[derive(Debug, Clone)]
pub struct StandardLauncher {
    bin_dir: PathBuf,
}

impl StandardLauncher {
    /// Create a launcher resolving executables in `bin_dir`.
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
        }
    }

    /// Directory executables are resolved in.
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Executable name for a role.
    pub fn executable(role: ServerRole) -> &'static str {
        match role {
            ServerRole::Placement => "pd-server",
            ServerRole::Storage => "tikv-server",
            ServerRole::Frontend => "tidb-server",
        }
    }

    /// Argument list for a node, without the executable.
    pub fn args(spec: &LaunchSpec) -> Vec<String> {
        match spec {
            LaunchSpec::Placement(p) => vec![
                format!("--name={}", p.name),
                format!("--data-dir={}", p.data_dir.display()),
                format!("--client-urls=http://{}", p.client_addr),
                format!("--peer-urls=http://{}", p.peer_addr),
                format!("--initial-cluster={}", p.initial_cluster),
                format!("--log-file={}", p.log_file.display()),
            ],
            LaunchSpec::Storage(s) => vec![
                format!("--pd-endpoints={}", join_addrs(&s.placement_endpoints)),
                format!("--addr={}", s.addr),
                format!("--data-dir={}", s.data_dir.display()),
                format!("--log-file={}", s.log_file.display()),
            ],
            LaunchSpec::Frontend(f) => vec![
                "--store=tikv".to_string(),
                format!("--log-file={}", f.log_file.display()),
                format!("--path={}", join_addrs(&f.placement_endpoints)),
                format!("--host={}", f.addr.ip()),
                format!("-P={}", f.addr.port()),
                format!("--status={}", f.status_addr.port()),
            ],
        }
    }
}

impl Launcher for StandardLauncher {
    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(self.bin_dir.join(Self::executable(spec.role())));
        cmd.args(Self::args(spec));
        cmd
    }

    fn probe(&self, spec: &LaunchSpec) -> Probe {
        match spec {
            LaunchSpec::Placement(p) => {
                Probe::Http(format!("http://{}/pd/api/v1/health", p.client_addr))
            }
            LaunchSpec::Storage(s) => Probe::Tcp(s.addr),
            LaunchSpec::Frontend(f) => Probe::Http(format!("http://{}/status", f.status_addr)),
        }
    }
}

/// Comma-separated `host:port` list.
pub(crate) fn join_addrs(addrs: &[SocketAddr]) -> String {
    addrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
