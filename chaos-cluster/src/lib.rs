//! # chaos-cluster
//!
//! Lifecycle management for the processes of a three-tier SQL cluster:
//! placement, storage and frontend nodes, each an external executable.
//!
//! ## Architecture
//!
//! ```text
//!  ClusterController
//!   ├── PortAllocator      unique addresses, reservation serialized
//!   ├── Launcher           role parameters → Command + health Probe
//!   └── ClusterTopology
//!        ├── placement: [ServerProcess]
//!        ├── storage:   [ServerProcess]
//!        └── frontend:  [ServerProcess]
//! ```
//!
//! Tiers start in dependency order (placement → storage → frontend) and each
//! tier must pass its health probes before the next one is started. Kills
//! always wait for the OS to reap the process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod error;
pub mod launcher;
pub mod ports;
pub mod probe;
pub mod process;
pub mod topology;

pub use config::ClusterConfig;
pub use controller::ClusterController;
pub use error::{ClusterError, StartupError};
pub use launcher::{
    FrontendParams, LaunchSpec, Launcher, PlacementParams, StandardLauncher, StorageParams,
};
pub use ports::PortAllocator;
pub use probe::Probe;
pub use process::ServerProcess;
pub use topology::ClusterTopology;
