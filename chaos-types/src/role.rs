//! Server roles and node identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The tier a server process belongs to.
///
/// Tiers start in declaration order: placement first, frontend last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// Metadata/coordination service tracking membership and data placement.
    Placement,
    /// Distributed key-value node holding data replicas.
    Storage,
    /// Stateless SQL-speaking node.
    Frontend,
}

impl ServerRole {
    /// All roles in start order.
    pub const START_ORDER: [ServerRole; 3] =
        [ServerRole::Placement, ServerRole::Storage, ServerRole::Frontend];

    /// All roles in teardown order (reverse of start order).
    pub const STOP_ORDER: [ServerRole; 3] =
        [ServerRole::Frontend, ServerRole::Storage, ServerRole::Placement];

    /// Lowercase role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Placement => "placement",
            ServerRole::Storage => "storage",
            ServerRole::Frontend => "frontend",
        }
    }

    /// The role a process of this role must be configured against, if any.
    ///
    /// Storage nodes register with placement; frontends route through placement
    /// to storage, so they need the storage tier to be up before they start.
    pub fn dependency(&self) -> Option<ServerRole> {
        match self {
            ServerRole::Placement => None,
            ServerRole::Storage => Some(ServerRole::Placement),
            ServerRole::Frontend => Some(ServerRole::Storage),
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one process in the cluster: its role and zero-based index within the tier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Tier of the node.
    pub role: ServerRole,
    /// Zero-based position within the tier.
    pub index: usize,
}

impl NodeId {
    /// Create a node id.
    pub fn new(role: ServerRole, index: usize) -> Self {
        Self { role, index }
    }

    /// One-based name used for data directories, log files and membership lists
    /// (`placement1`, `storage2`, ...).
    pub fn name(&self) -> String {
        format!("{}{}", self.role.as_str(), self.index + 1)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.as_str(), self.index + 1)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}
