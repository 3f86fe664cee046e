//! Configuration Module
//!
//! Handles loading and validating node configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{ContainerConfig, EvictionStrategy, Expiration};
use crate::distribution::NodeAddress;
use crate::error::{CacheError, Result};
use crate::grid::GridConfig;
use crate::persistence::{OverflowPolicy, PersistenceConfig, PersistenceMode};

/// Node configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of segments keys are partitioned into
    pub num_segments: u32,
    /// Owners per segment (primary + backups)
    pub num_owners: usize,
    /// Global entry bound; None = unbounded
    pub eviction_max_count: Option<usize>,
    pub eviction_strategy: EvictionStrategy,
    pub persistence_mode: PersistenceMode,
    pub write_behind_queue_size: usize,
    pub write_behind_overflow: OverflowPolicy,
    /// Write-behind flush interval in milliseconds
    pub write_behind_interval_ms: u64,
    /// Default lifespan in milliseconds; negative = none
    pub default_lifespan_ms: i64,
    /// Default max-idle in milliseconds; negative = none
    pub default_max_idle_ms: i64,
    /// Expiration purge interval in seconds
    pub purge_interval: u64,
    pub passivation: bool,
    pub preload: bool,
    /// Directory of the file store
    pub store_path: PathBuf,
    pub node_name: String,
    /// Cluster member names; empty = this node alone
    pub cluster_members: Vec<String>,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NUM_SEGMENTS` - Segment count (default: 256)
    /// - `NUM_OWNERS` - Owners per segment (default: 2)
    /// - `EVICTION_MAX_COUNT` - Global entry bound, negative for none (default: none)
    /// - `EVICTION_STRATEGY` - NONE, LRU or LIRS (default: NONE)
    /// - `PERSISTENCE_MODE` - NONE, SYNC or ASYNC (default: NONE)
    /// - `WRITE_BEHIND_QUEUE_SIZE` - Modification queue capacity (default: 1024)
    /// - `WRITE_BEHIND_OVERFLOW` - BLOCK, DROP_OLDEST or REJECT (default: BLOCK)
    /// - `WRITE_BEHIND_INTERVAL_MS` - Flush interval (default: 1000)
    /// - `DEFAULT_LIFESPAN_MS` / `DEFAULT_MAX_IDLE_MS` - Default expiration, negative for none (default: -1)
    /// - `PURGE_INTERVAL` - Purge frequency in seconds (default: 60)
    /// - `PASSIVATION` / `PRELOAD` - true or false (default: false)
    /// - `STORE_PATH` - File store directory (default: data/mini_grid)
    /// - `NODE_NAME` - This node's address (default: node-1)
    /// - `CLUSTER_MEMBERS` - Comma-separated member names (default: this node only)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_count: i64 = env_or("EVICTION_MAX_COUNT", -1);

        Self {
            num_segments: env_or("NUM_SEGMENTS", defaults.num_segments),
            num_owners: env_or("NUM_OWNERS", defaults.num_owners),
            eviction_max_count: usize::try_from(max_count).ok(),
            eviction_strategy: env_or("EVICTION_STRATEGY", defaults.eviction_strategy),
            persistence_mode: env_or("PERSISTENCE_MODE", defaults.persistence_mode),
            write_behind_queue_size: env_or("WRITE_BEHIND_QUEUE_SIZE", defaults.write_behind_queue_size),
            write_behind_overflow: env_or("WRITE_BEHIND_OVERFLOW", defaults.write_behind_overflow),
            write_behind_interval_ms: env_or("WRITE_BEHIND_INTERVAL_MS", defaults.write_behind_interval_ms),
            default_lifespan_ms: env_or("DEFAULT_LIFESPAN_MS", defaults.default_lifespan_ms),
            default_max_idle_ms: env_or("DEFAULT_MAX_IDLE_MS", defaults.default_max_idle_ms),
            purge_interval: env_or("PURGE_INTERVAL", defaults.purge_interval),
            passivation: env_or("PASSIVATION", defaults.passivation),
            preload: env_or("PRELOAD", defaults.preload),
            store_path: env::var("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            node_name: env::var("NODE_NAME").unwrap_or(defaults.node_name),
            cluster_members: env::var("CLUSTER_MEMBERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    // == Validation ==
    /// Rejects combinations the grid cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CacheError::InvalidConfig(msg.to_string()));

        if self.num_segments == 0 {
            return invalid("NUM_SEGMENTS must be at least 1");
        }
        if self.num_owners == 0 {
            return invalid("NUM_OWNERS must be at least 1");
        }
        if self.eviction_strategy.is_enabled() && self.eviction_max_count.is_none() {
            return invalid("EVICTION_STRATEGY needs EVICTION_MAX_COUNT");
        }
        if self.persistence_mode != PersistenceMode::None && self.write_behind_queue_size == 0 {
            return invalid("WRITE_BEHIND_QUEUE_SIZE must be at least 1");
        }
        if self.passivation && self.persistence_mode == PersistenceMode::None {
            return invalid("PASSIVATION needs a PERSISTENCE_MODE other than NONE");
        }
        if self.preload && self.persistence_mode == PersistenceMode::None {
            return invalid("PRELOAD needs a PERSISTENCE_MODE other than NONE");
        }
        if self.purge_interval == 0 || self.write_behind_interval_ms == 0 {
            return invalid("task intervals must be positive");
        }
        if !self.cluster_members.is_empty() && !self.cluster_members.contains(&self.node_name) {
            return invalid("CLUSTER_MEMBERS must include NODE_NAME");
        }
        Ok(())
    }

    pub fn default_expiration(&self) -> Expiration {
        Expiration::from_millis(self.default_lifespan_ms, self.default_max_idle_ms)
    }

    pub fn grid_config(&self) -> GridConfig {
        GridConfig {
            container: ContainerConfig {
                num_segments: self.num_segments,
                max_entries: self.eviction_max_count,
                strategy: self.eviction_strategy,
            },
            default_expiration: self.default_expiration(),
            persistence: PersistenceConfig {
                mode: self.persistence_mode,
                queue_capacity: self.write_behind_queue_size,
                overflow: self.write_behind_overflow,
            },
            passivation: self.passivation,
        }
    }

    pub fn local_address(&self) -> NodeAddress {
        NodeAddress::new(self.node_name.as_str())
    }

    /// Cluster members in configured order; this node alone when unset.
    pub fn members(&self) -> Vec<NodeAddress> {
        if self.cluster_members.is_empty() {
            vec![self.local_address()]
        } else {
            self.cluster_members
                .iter()
                .map(|m| NodeAddress::new(m.as_str()))
                .collect()
        }
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval)
    }

    pub fn write_behind_interval(&self) -> Duration {
        Duration::from_millis(self.write_behind_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_segments: 256,
            num_owners: 2,
            eviction_max_count: None,
            eviction_strategy: EvictionStrategy::None,
            persistence_mode: PersistenceMode::None,
            write_behind_queue_size: 1024,
            write_behind_overflow: OverflowPolicy::Block,
            write_behind_interval_ms: 1000,
            default_lifespan_ms: -1,
            default_max_idle_ms: -1,
            purge_interval: 60,
            passivation: false,
            preload: false,
            store_path: PathBuf::from("data/mini_grid"),
            node_name: "node-1".to_string(),
            cluster_members: Vec::new(),
        }
    }
}
