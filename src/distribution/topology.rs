//! Topology Manager Module
//!
//! Holds the current consistent hash as an immutable shared snapshot. A new
//! topology replaces the snapshot with a single pointer swap, so an operation
//! that grabbed the snapshot keeps a coherent view for its whole duration.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::distribution::{ConsistentHash, NodeAddress, RebalancePlan};
use crate::error::Result;

// == State Transfer Listener ==
/// Transport-side collaborator that moves segment data between nodes.
pub trait StateTransferListener: Send + Sync {
    /// Called after a new topology is installed, outside any lock.
    fn on_rebalance(&self, plan: &RebalancePlan);
}

// == Cache Topology ==
/// Versioned consistent hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTopology {
    pub topology_id: u64,
    pub hash: ConsistentHash,
}

// == Topology Manager ==
pub struct TopologyManager {
    local: NodeAddress,
    current: RwLock<Arc<CacheTopology>>,
    listeners: RwLock<Vec<Arc<dyn StateTransferListener>>>,
}

impl TopologyManager {
    pub fn new(local: NodeAddress, initial: ConsistentHash) -> Self {
        Self {
            local,
            current: RwLock::new(Arc::new(CacheTopology {
                topology_id: 0,
                hash: initial,
            })),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn local_address(&self) -> &NodeAddress {
        &self.local
    }

    // == Snapshot ==
    /// Current topology; the lock is held only to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<CacheTopology> {
        Arc::clone(&self.current.read())
    }

    pub fn topology_id(&self) -> u64 {
        self.snapshot().topology_id
    }

    pub fn add_listener(&self, listener: Arc<dyn StateTransferListener>) {
        self.listeners.write().push(listener);
    }

    // == Install ==
    /// Installs `hash` as the next topology version.
    pub fn install(&self, hash: ConsistentHash) -> Result<RebalancePlan> {
        let plan = {
            let mut current = self.current.write();
            let topology_id = current.topology_id + 1;
            let plan = RebalancePlan::compute(&self.local, &current.hash, &hash, topology_id)?;
            *current = Arc::new(CacheTopology { topology_id, hash });
            plan
        };
        self.announce(&plan);
        Ok(plan)
    }

    /// Installs a topology carrying an explicit version. Versions at or below
    /// the current one are stale and ignored.
    pub fn install_versioned(&self, topology_id: u64, hash: ConsistentHash) -> Result<Option<RebalancePlan>> {
        let plan = {
            let mut current = self.current.write();
            if topology_id <= current.topology_id {
                debug!(
                    "Ignoring stale topology {} (current {})",
                    topology_id, current.topology_id
                );
                return Ok(None);
            }
            let plan = RebalancePlan::compute(&self.local, &current.hash, &hash, topology_id)?;
            *current = Arc::new(CacheTopology { topology_id, hash });
            plan
        };
        self.announce(&plan);
        Ok(Some(plan))
    }

    fn announce(&self, plan: &RebalancePlan) {
        info!(
            "Installed topology {} on {}: {} inbound, {} outbound, {} retired segments",
            plan.topology_id,
            self.local,
            plan.inbound.len(),
            plan.outbound.len(),
            plan.retired.len()
        );
        let lost = plan.lost_segments();
        if !lost.is_empty() {
            warn!("Segments {:?} lost every previous owner; they start empty", lost);
        }

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_rebalance(plan);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::ConsistentHashFactory;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        plans: Mutex<Vec<u64>>,
    }

    impl StateTransferListener for Recorder {
        fn on_rebalance(&self, plan: &RebalancePlan) {
            self.plans.lock().push(plan.topology_id);
        }
    }

    fn nodes(names: &[&str]) -> Vec<NodeAddress> {
        names.iter().map(|n| NodeAddress::new(*n)).collect()
    }

    #[test]
    fn test_install_swaps_snapshot_and_notifies() {
        let initial = ConsistentHashFactory::create(&nodes(&["A"]), 1, 4).unwrap();
        let manager = TopologyManager::new(NodeAddress::new("A"), initial);
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(recorder.clone());

        let before = manager.snapshot();
        let next = ConsistentHashFactory::rebalance(&before.hash, &nodes(&["A", "B"])).unwrap();
        let plan = manager.install(next.clone()).unwrap();

        assert_eq!(plan.topology_id, 1);
        assert_eq!(manager.topology_id(), 1);
        assert_eq!(manager.snapshot().hash, next);
        // an old snapshot stays intact
        assert_eq!(before.topology_id, 0);
        assert_eq!(*recorder.plans.lock(), vec![1]);
    }

    #[test]
    fn test_stale_versions_are_ignored() {
        let initial = ConsistentHashFactory::create(&nodes(&["A"]), 1, 4).unwrap();
        let manager = TopologyManager::new(NodeAddress::new("A"), initial.clone());

        assert!(manager.install_versioned(5, initial.clone()).unwrap().is_some());
        assert!(manager.install_versioned(5, initial.clone()).unwrap().is_none());
        assert!(manager.install_versioned(3, initial).unwrap().is_none());
        assert_eq!(manager.topology_id(), 5);
    }

    #[test]
    fn test_incompatible_hash_is_rejected_without_swap() {
        let initial = ConsistentHashFactory::create(&nodes(&["A"]), 1, 4).unwrap();
        let manager = TopologyManager::new(NodeAddress::new("A"), initial.clone());
        let other = ConsistentHashFactory::create(&nodes(&["A"]), 1, 8).unwrap();

        assert!(manager.install(other).is_err());
        assert_eq!(manager.snapshot().hash, initial);
    }
}
