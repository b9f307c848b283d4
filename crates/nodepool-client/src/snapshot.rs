use serde::Serialize;

use crate::health::NodeHealth;

/// Point-in-time view of one node's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node: String,
    pub health: NodeHealth,
    /// Live connections, leased or idle
    pub active: usize,
    pub idle: usize,
    pub consecutive_failures: u32,
    /// Dial attempts since the pool was created
    pub dials: u64,
    pub dial_failures: u64,
}

/// Point-in-time view of the whole pool.
///
/// Counters are read without a global lock, so a snapshot taken while other
/// tasks acquire and release may be momentarily inconsistent.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub available_permits: usize,
    pub leased: usize,
    pub closed: bool,
    pub nodes: Vec<NodeSnapshot>,
}

impl PoolSnapshot {
    /// Live connections across all nodes.
    pub fn total_active(&self) -> usize {
        self.nodes.iter().map(|n| n.active).sum()
    }

    pub fn total_idle(&self) -> usize {
        self.nodes.iter().map(|n| n.idle).sum()
    }

    pub fn excluded_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.health == NodeHealth::Excluded)
            .count()
    }
}
