//! The set of nodes in a cluster, grouped by tier.

use crate::process::ServerProcess;
use chaos_types::{LifecycleState, NodeId, ServerRole};
use std::net::SocketAddr;

/// Ordered nodes per tier plus the placement membership list.
///
/// Node `i` of a tier always has `NodeId { role, index: i }`.
#[derive(Debug, Default)]
pub struct ClusterTopology {
    placement: Vec<ServerProcess>,
    storage: Vec<ServerProcess>,
    frontend: Vec<ServerProcess>,
    initial_cluster: String,
}

impl ClusterTopology {
    /// Empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes of one tier, in index order.
    pub fn tier(&self, role: ServerRole) -> &[ServerProcess] {
        match role {
            ServerRole::Placement => &self.placement,
            ServerRole::Storage => &self.storage,
            ServerRole::Frontend => &self.frontend,
        }
    }

    pub(crate) fn tier_mut(&mut self, role: ServerRole) -> &mut Vec<ServerProcess> {
        match role {
            ServerRole::Placement => &mut self.placement,
            ServerRole::Storage => &mut self.storage,
            ServerRole::Frontend => &mut self.frontend,
        }
    }

    /// Look up one node.
    pub fn node(&self, id: NodeId) -> Option<&ServerProcess> {
        self.tier(id.role).get(id.index)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut ServerProcess> {
        self.tier_mut(id.role).get_mut(id.index)
    }

    /// Placement membership list (`name=http://peer,...`), empty until the
    /// placement tier has been configured.
    pub fn initial_cluster(&self) -> &str {
        &self.initial_cluster
    }

    pub(crate) fn set_initial_cluster(&mut self, initial_cluster: String) {
        self.initial_cluster = initial_cluster;
    }

    /// Client addresses of running placement nodes.
    pub fn placement_endpoints(&self) -> Vec<SocketAddr> {
        self.running_addrs(ServerRole::Placement)
    }

    /// Addresses of running storage nodes.
    pub fn storage_addrs(&self) -> Vec<SocketAddr> {
        self.running_addrs(ServerRole::Storage)
    }

    /// SQL addresses of every frontend node, running or not, in index order.
    ///
    /// Indices are stable so a router can keep one slot per frontend across
    /// restarts.
    pub fn frontend_addrs(&self) -> Vec<(NodeId, SocketAddr)> {
        self.frontend
            .iter()
            .map(|p| (p.id(), p.spec().primary_addr()))
            .collect()
    }

    /// Ids of the nodes of a tier that are currently Running.
    pub fn running(&self, role: ServerRole) -> Vec<NodeId> {
        self.tier(role)
            .iter()
            .filter(|p| p.state() == LifecycleState::Running)
            .map(|p| p.id())
            .collect()
    }

    /// Every address bound by any node.
    pub fn all_addrs(&self) -> Vec<SocketAddr> {
        ServerRole::START_ORDER
            .iter()
            .flat_map(|role| self.tier(*role))
            .flat_map(|p| p.spec().addrs())
            .collect()
    }

    /// Total number of nodes across tiers.
    pub fn len(&self) -> usize {
        self.placement.len() + self.storage.len() + self.frontend.len()
    }

    /// True when no node has been configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn running_addrs(&self, role: ServerRole) -> Vec<SocketAddr> {
        self.tier(role)
            .iter()
            .filter(|p| p.state() == LifecycleState::Running)
            .map(|p| p.spec().primary_addr())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{LaunchSpec, StorageParams};
    use std::path::PathBuf;

    fn storage_node(index: usize, port: u16) -> ServerProcess {
        let id = NodeId::new(ServerRole::Storage, index);
        let spec = LaunchSpec::Storage(StorageParams {
            placement_endpoints: vec![],
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            data_dir: PathBuf::from(format!("/w/{}", id)),
            log_file: PathBuf::from(format!("/w/{}.log", id)),
        });
        ServerProcess::new(id, spec, PathBuf::from(format!("/w/{}.out.log", id)))
    }

    #[test]
    fn empty_topology() {
        let topology = ClusterTopology::new();
        assert!(topology.is_empty());
        assert!(topology.placement_endpoints().is_empty());
        assert!(topology.frontend_addrs().is_empty());
        assert_eq!(topology.initial_cluster(), "");
    }

    #[test]
    fn lookup_by_id() {
        let mut topology = ClusterTopology::new();
        topology.tier_mut(ServerRole::Storage).push(storage_node(0, 20160));
        topology.tier_mut(ServerRole::Storage).push(storage_node(1, 20161));

        let id = NodeId::new(ServerRole::Storage, 1);
        assert_eq!(topology.node(id).unwrap().id(), id);
        assert!(topology.node(NodeId::new(ServerRole::Storage, 2)).is_none());
        assert!(topology.node(NodeId::new(ServerRole::Frontend, 0)).is_none());
        assert_eq!(topology.len(), 2);
    }

    #[test]
    fn stopped_nodes_are_not_endpoints() {
        let mut topology = ClusterTopology::new();
        topology.tier_mut(ServerRole::Storage).push(storage_node(0, 20160));
        assert!(topology.storage_addrs().is_empty());
        assert!(topology.running(ServerRole::Storage).is_empty());
        assert_eq!(
            topology.all_addrs(),
            vec![SocketAddr::from(([127, 0, 0, 1], 20160))]
        );
    }
}
