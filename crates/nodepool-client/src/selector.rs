use rand::Rng;
use serde::Serialize;

/// Selection cost of a node.
///
/// Ordering puts every `Load` before `Excluded`, so an excluded node is only
/// picked when no other node is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCost {
    /// Healthy node with this many live connections
    Load(usize),
    /// Node excluded after repeated dial failures
    Excluded,
}

/// Picks a uniformly random scan start in `[0, node_count)`.
pub(crate) fn random_start(node_count: usize) -> usize {
    if node_count <= 1 {
        return 0;
    }
    rand::thread_rng().gen_range(0..node_count)
}

/// Least-loaded selection over `node_count` nodes, scanning from `start`.
///
/// A node with no live connections is taken immediately. Otherwise the
/// lowest cost seen wins; on ties the node visited first wins, which is what
/// makes a random `start` a fair tie-breaker.
///
/// Returns `None` only when `node_count` is zero.
pub(crate) fn select_least_loaded(
    node_count: usize,
    start: usize,
    cost: impl Fn(usize) -> NodeCost,
) -> Option<usize> {
    let mut best: Option<(usize, NodeCost)> = None;

    for offset in 0..node_count {
        let index = (start + offset) % node_count;
        let node_cost = cost(index);

        if node_cost == NodeCost::Load(0) {
            return Some(index);
        }
        if best.map_or(true, |(_, best_cost)| node_cost < best_cost) {
            best = Some((index, node_cost));
        }
    }

    best.map(|(index, _)| index)
}
