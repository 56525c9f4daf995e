//! Error types for cluster lifecycle operations.

use chaos_types::{NodeId, ServerRole, TransitionError};
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// A node failed to come up. Fatal for suite setup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The process exited before its health probe passed.
    #[error("{node} exited during startup ({status}); output tail:\n{log_tail}")]
    Exited {
        /// Node that exited.
        node: NodeId,
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Last lines of the node's captured output.
        log_tail: String,
    },

    /// The health probe never passed.
    #[error("{node} not reachable via {probe} after {attempts} attempts")]
    Unreachable {
        /// Node that never became reachable.
        node: NodeId,
        /// Description of the probe target.
        probe: String,
        /// Number of probe attempts made.
        attempts: u32,
    },
}

/// Errors from the cluster controller.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A node never became reachable.
    #[error("startup error: {0}")]
    Startup(#[from] StartupError),

    /// Spawning the executable failed.
    #[error("failed to spawn {node}: {source}")]
    Spawn {
        /// Node being spawned.
        node: NodeId,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Signalling or reaping the process failed.
    #[error("failed to kill {node}: {source}")]
    Kill {
        /// Node being killed.
        node: NodeId,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Lifecycle state machine rejected the operation.
    #[error("{node}: {source}")]
    Transition {
        /// Node whose state was violated.
        node: NodeId,
        /// The rejected transition.
        source: TransitionError,
    },

    /// No node with this id exists in the topology.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A tier was started before the tier it depends on was running.
    #[error("cannot start {role} tier: no running {dependency} node")]
    MissingDependency {
        /// Tier being started.
        role: ServerRole,
        /// Tier that has to be running first.
        dependency: ServerRole,
    },

    /// The placement tier's membership list is fixed once started.
    #[error("{0} tier already started")]
    TierAlreadyStarted(ServerRole),

    /// No free port could be reserved.
    #[error("could not reserve a free port after {attempts} attempts")]
    PortsExhausted {
        /// Number of bind attempts made.
        attempts: u32,
    },

    /// Removing a working directory failed.
    #[error("failed to remove {path}: {source}")]
    Cleanup {
        /// Directory being removed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// General I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
