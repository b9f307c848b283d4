use std::sync::atomic::Ordering;

use nodepool_common::Connection;
use serde::Serialize;
use tracing::{error, warn};

use crate::registry::Registry;

/// Health of a node as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    /// Exceeded its consecutive dial failure budget. Permanent for the
    /// lifetime of the pool.
    Excluded,
}

/// Counts consecutive dial failures per node and excludes repeat offenders.
///
/// Exclusion only changes selection cost; it never raises an error of its
/// own. A caller keeps seeing the original dial failure.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HealthTracker {
    retries_per_node: u32,
}

impl HealthTracker {
    pub(crate) fn new(retries_per_node: u32) -> Self {
        Self { retries_per_node }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.retries_per_node > 0
    }

    /// Records a failed dial to node `index`.
    ///
    /// Returns `true` if this failure excluded the node.
    pub(crate) fn record_dial_failure<C: Connection>(
        &self,
        registry: &Registry<C>,
        index: usize,
    ) -> bool {
        let slot = registry.slot(index);
        slot.dial_failures.fetch_add(1, Ordering::Relaxed);

        if !self.enabled() {
            return false;
        }

        let failures = slot.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures <= self.retries_per_node {
            return false;
        }

        // Only the failure that flips the flag reports the exclusion
        if slot.excluded.swap(true, Ordering::AcqRel) {
            return false;
        }

        warn!(
            node = %slot.node,
            failures,
            retries_per_node = self.retries_per_node,
            "Excluding node after consecutive dial failures"
        );

        let all_excluded = registry
            .slots()
            .iter()
            .all(|slot| slot.excluded.load(Ordering::Acquire));
        if all_excluded {
            error!(
                nodes = registry.slots().len(),
                "All nodes are excluded; every acquire will dial an excluded node"
            );
        }
        true
    }

    /// Records a successful dial to node `index`, clearing its failure streak.
    pub(crate) fn record_dial_success<C: Connection>(&self, registry: &Registry<C>, index: usize) {
        if self.enabled() {
            registry
                .slot(index)
                .consecutive_failures
                .store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnection;
    use crate::selector::NodeCost;
    use nodepool_common::Node;

    fn registry(count: u16) -> Registry<MockConnection> {
        Registry::new(
            (0..count)
                .map(|i| Node::new(format!("node{}", i), ([127, 0, 0, 1], 9000 + i).into()))
                .collect(),
        )
    }

    #[test]
    fn test_disabled_tracker_never_excludes() {
        let registry = registry(1);
        let tracker = HealthTracker::new(0);

        for _ in 0..100 {
            assert!(!tracker.record_dial_failure(&registry, 0));
        }
        assert_eq!(registry.slot(0).health(), NodeHealth::Healthy);
        assert_eq!(registry.slot(0).consecutive_failures.load(Ordering::SeqCst), 0);
        assert_eq!(registry.slot(0).dial_failures.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_excluded_after_exceeding_retries() {
        let registry = registry(2);
        let tracker = HealthTracker::new(3);

        for _ in 0..3 {
            assert!(!tracker.record_dial_failure(&registry, 0));
        }
        assert_eq!(registry.slot(0).health(), NodeHealth::Healthy);

        // Fourth consecutive failure exceeds the budget
        assert!(tracker.record_dial_failure(&registry, 0));
        assert_eq!(registry.slot(0).health(), NodeHealth::Excluded);
        assert_eq!(registry.slot(0).cost(), NodeCost::Excluded);

        // Further failures do not re-report
        assert!(!tracker.record_dial_failure(&registry, 0));
        assert_eq!(registry.slot(1).health(), NodeHealth::Healthy);
    }

    #[test]
    fn test_success_resets_streak() {
        let registry = registry(1);
        let tracker = HealthTracker::new(2);

        tracker.record_dial_failure(&registry, 0);
        tracker.record_dial_failure(&registry, 0);
        tracker.record_dial_success(&registry, 0);
        assert_eq!(registry.slot(0).consecutive_failures.load(Ordering::SeqCst), 0);

        tracker.record_dial_failure(&registry, 0);
        tracker.record_dial_failure(&registry, 0);
        assert_eq!(registry.slot(0).health(), NodeHealth::Healthy);
    }

    #[test]
    fn test_exclusion_is_permanent() {
        let registry = registry(1);
        let tracker = HealthTracker::new(1);

        tracker.record_dial_failure(&registry, 0);
        tracker.record_dial_failure(&registry, 0);
        assert_eq!(registry.slot(0).health(), NodeHealth::Excluded);

        tracker.record_dial_success(&registry, 0);
        assert_eq!(registry.slot(0).health(), NodeHealth::Excluded);
    }

    #[test]
    fn test_all_nodes_excluded_keeps_selecting() {
        let registry = registry(2);
        let tracker = HealthTracker::new(1);

        for index in 0..2 {
            tracker.record_dial_failure(&registry, index);
            tracker.record_dial_failure(&registry, index);
        }
        assert!(registry.slots().iter().all(|s| s.health() == NodeHealth::Excluded));
        assert!(registry.select_target().is_some());
    }
}
