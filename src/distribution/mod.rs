//! Distribution Module
//!
//! Segment ownership: which nodes own which segments, how ownership changes
//! when members join or leave, and which transfers a change implies.

mod factory;
mod hash;
mod rebalance;
mod topology;

#[cfg(test)]
mod property_tests;

pub use factory::ConsistentHashFactory;
pub use hash::{ConsistentHash, KeyPartitioner, NodeAddress, TopologyDiff};
pub use rebalance::{InboundTransfer, OutboundTransfer, RebalancePlan};
pub use topology::{CacheTopology, StateTransferListener, TopologyManager};
