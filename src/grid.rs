//! Grid Cache Module
//!
//! The cache facade: routes a key to its segment, serializes writes per
//! segment stripe, mutates the container and hands the matching modification
//! to the persistence coordinator. Ownership comes from the current topology
//! snapshot; forwarding to remote owners is left to the caller.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheStats, ContainerConfig, ContainerIter, DataContainer, Expiration, TimeService,
};
use crate::distribution::{
    CacheTopology, ConsistentHash, NodeAddress, RebalancePlan, StateTransferListener,
    TopologyManager,
};
use crate::error::{CacheError, Result};
use crate::persistence::{
    marshal, marshal_entry, unmarshal_entry, BackingStore, Modification, PersistenceConfig,
    PersistenceCoordinator, PersistenceMode,
};

// == Grid Config ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridConfig {
    pub container: ContainerConfig,
    /// Applied by `put`; `put_with_expiration` overrides it
    pub default_expiration: Expiration,
    pub persistence: PersistenceConfig,
    /// Evicted entries go to the store; plain writes do not
    pub passivation: bool,
}

// == Routing ==
/// Where a key lives under the current topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub segment: u32,
    /// Ordered owners; empty when running standalone
    pub owners: Vec<NodeAddress>,
    pub local: bool,
    pub primary: bool,
    pub topology_id: u64,
}

// == Purge Summary ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub memory: usize,
    pub store: usize,
}

// == Grid Cache ==
pub struct GridCache<K, V> {
    container: DataContainer<K, V>,
    persistence: Option<Arc<PersistenceCoordinator>>,
    topology: Option<TopologyManager>,
    /// One write stripe per segment
    stripes: Vec<Mutex<()>>,
    config: GridConfig,
    time: Arc<dyn TimeService>,
}

impl<K, V> fmt::Debug for GridCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridCache")
            .field("container", &self.container)
            .field("persistence", &self.persistence)
            .field("config", &self.config)
            .finish()
    }
}

impl<K, V> GridCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    // == Constructors ==
    /// Creates a cache with no backing store.
    pub fn new(config: GridConfig, time: Arc<dyn TimeService>) -> Result<Self> {
        if config.persistence.mode != PersistenceMode::None || config.passivation {
            return Err(CacheError::InvalidConfig(
                "persistence configured without a backing store".to_string(),
            ));
        }
        Ok(Self::build(config, None, time))
    }

    /// Creates a cache persisting through `store` in the configured mode.
    pub fn with_store(config: GridConfig, store: Arc<dyn BackingStore>, time: Arc<dyn TimeService>) -> Result<Self> {
        if config.persistence.mode == PersistenceMode::None {
            return Err(CacheError::InvalidConfig(
                "a backing store needs persistence mode SYNC or ASYNC".to_string(),
            ));
        }
        let coordinator = Arc::new(PersistenceCoordinator::new(store, config.persistence, Arc::clone(&time)));
        Ok(Self::build(config, Some(coordinator), time))
    }

    fn build(config: GridConfig, persistence: Option<Arc<PersistenceCoordinator>>, time: Arc<dyn TimeService>) -> Self {
        let mut container = DataContainer::new(config.container, Arc::clone(&time));

        if config.passivation {
            if let Some(coordinator) = &persistence {
                let coordinator = Arc::clone(coordinator);
                let stats = Arc::clone(container.stats_collector());
                let clock = Arc::clone(&time);
                container = container.with_eviction_listener(Arc::new(move |entry: &CacheEntry<K, V>| {
                    let written = marshal_entry(entry, clock.as_ref())
                        .map_err(CacheError::from)
                        .and_then(|record| persist_with(&coordinator, Modification::Store(record)));
                    match written {
                        Ok(()) => stats.record_passivations(1),
                        Err(e) => warn!("Failed to passivate evicted entry {:?}: {}", entry.key, e),
                    }
                }));
            }
        }

        let stripes = (0..container.num_segments()).map(|_| Mutex::new(())).collect();
        Self {
            container,
            persistence,
            topology: None,
            stripes,
            config,
            time,
        }
    }

    /// Attaches cluster topology. The hash must use the container's segment count.
    pub fn with_topology(mut self, local: NodeAddress, initial: ConsistentHash) -> Result<Self> {
        if initial.num_segments() != self.container.num_segments() {
            return Err(CacheError::InvalidTopology {
                old: self.container.num_segments(),
                new: initial.num_segments(),
            });
        }
        self.topology = Some(TopologyManager::new(local, initial));
        Ok(self)
    }

    pub fn container(&self) -> &DataContainer<K, V> {
        &self.container
    }

    pub fn persistence(&self) -> Option<&Arc<PersistenceCoordinator>> {
        self.persistence.as_ref()
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    fn stripe(&self, key: &K) -> MutexGuard<'_, ()> {
        self.stripes[self.container.segment_for_key(key) as usize].lock()
    }

    fn persist(&self, modification: Modification) -> Result<()> {
        match &self.persistence {
            Some(coordinator) => persist_with(coordinator, modification),
            None => Ok(()),
        }
    }

    // == Get ==
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.get_entry(key)?.map(|entry| entry.value))
    }

    /// Reads an entry, falling back to the store on a miss.
    ///
    /// A loaded entry is activated into memory with put-if-absent, so a write
    /// that raced with the load wins.
    pub fn get_entry(&self, key: &K) -> Result<Option<CacheEntry<K, V>>> {
        if let Some(entry) = self.container.get(key) {
            return Ok(Some(entry));
        }
        let Some(coordinator) = &self.persistence else {
            return Ok(None);
        };

        let _stripe = self.stripe(key);
        if let Some(entry) = self.container.peek(key) {
            return Ok(Some(entry));
        }
        let Some(record) = coordinator.load(&marshal(key)?)? else {
            return Ok(None);
        };
        let loaded: CacheEntry<K, V> = unmarshal_entry(&record, self.time.as_ref())?;
        self.container.stats_collector().record_store_load();

        if let Some(existing) = self.container.put_if_absent(loaded.clone()) {
            return Ok(Some(existing));
        }
        if self.config.passivation {
            persist_with(coordinator, Modification::Remove(record.key))?;
        }
        debug!("Activated {:?} from the store", key);
        Ok(Some(loaded))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.container.contains_key(key)
    }

    // == Put ==
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.put_with_expiration(key, value, self.config.default_expiration)
    }

    /// Persists the write, then applies it to memory, as one step under the
    /// segment stripe. A rejected or failed store write leaves memory
    /// untouched. Returns the previous live value.
    pub fn put_with_expiration(&self, key: K, value: V, expiration: Expiration) -> Result<Option<V>> {
        let _stripe = self.stripe(&key);
        let entry = CacheEntry::new(key, value, expiration, self.time.time());

        if self.persistence.is_some() && !self.config.passivation {
            let record = marshal_entry(&entry, self.time.as_ref())?;
            self.persist(Modification::Store(record))?;
        }
        let previous = self.container.put(entry.key, entry.value, entry.expiration);
        Ok(previous.map(|e| e.value))
    }

    // == Remove ==
    /// Removes from the store, then from memory.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let _stripe = self.stripe(key);
        if self.persistence.is_some() {
            self.persist(Modification::Remove(marshal(key)?))?;
        }
        Ok(self.container.remove(key).map(|e| e.value))
    }

    // == Clear ==
    /// Clears memory and the store. Holds every stripe so the clear is
    /// ordered against all in-flight writes.
    pub fn clear(&self) -> Result<()> {
        let _stripes: Vec<MutexGuard<'_, ()>> = self.stripes.iter().map(|s| s.lock()).collect();
        self.persist(Modification::Clear)?;
        let cleared = self.container.clear();
        info!("Cleared {} entries", cleared);
        Ok(())
    }

    // == Iteration & Size ==
    pub fn iter(&self, include_expired: bool) -> ContainerIter<'_, K, V> {
        self.container.iter(include_expired)
    }

    pub fn size(&self) -> usize {
        self.container.size()
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.container.stats()
    }

    // == Persistence Lifecycle ==
    /// Flushes pending store writes; a no-op without a store.
    pub fn flush(&self, deadline: Option<Instant>) -> Result<usize> {
        match &self.persistence {
            Some(coordinator) => Ok(coordinator.flush(deadline)?),
            None => Ok(0),
        }
    }

    /// Removes expired entries from memory and from the store.
    pub fn purge_expired(&self) -> Result<PurgeSummary> {
        let memory = self.container.purge_expired();
        let store = match &self.persistence {
            Some(coordinator) => coordinator.purge_expired()?,
            None => 0,
        };
        Ok(PurgeSummary { memory, store })
    }

    /// Loads live store records into memory, up to the container capacity.
    ///
    /// Records that no longer unmarshal are skipped with a warning.
    pub fn preload(&self) -> Result<usize> {
        let Some(coordinator) = &self.persistence else {
            return Ok(0);
        };
        let limit = self.config.container.max_entries.unwrap_or(usize::MAX);

        let mut loaded = 0;
        for record in coordinator.load_all(None)? {
            if loaded >= limit {
                break;
            }
            let record = record?;
            match unmarshal_entry::<K, V>(&record, self.time.as_ref()) {
                Ok(entry) => {
                    let _stripe = self.stripe(&entry.key);
                    if self.container.put_if_absent(entry).is_none() {
                        loaded += 1;
                    }
                }
                Err(e) => warn!("Skipping undecodable record during preload: {}", e),
            }
        }
        info!("Preloaded {} entries from the store", loaded);
        Ok(loaded)
    }

    /// Shuts the cache down: passivates every entry when passivation is on,
    /// then flushes the queue.
    ///
    /// Passivated entries are written directly, since the write-behind task
    /// may already be gone.
    pub fn stop(&self) -> Result<()> {
        let Some(coordinator) = &self.persistence else {
            return Ok(());
        };
        if self.config.passivation {
            let mut passivated = 0;
            for entry in self.container.iter(false) {
                let record = marshal_entry(&entry, self.time.as_ref())?;
                coordinator.write_through(Modification::Store(record))?;
                passivated += 1;
            }
            self.container.stats_collector().record_passivations(passivated);
            info!("Passivated {} entries on stop", passivated);
        }
        coordinator.flush(None)?;
        Ok(())
    }

    // == Routing ==
    pub fn segment_for_key(&self, key: &K) -> u32 {
        self.container.segment_for_key(key)
    }

    pub fn topology(&self) -> Option<Arc<CacheTopology>> {
        self.topology.as_ref().map(TopologyManager::snapshot)
    }

    pub fn local_address(&self) -> Option<&NodeAddress> {
        self.topology.as_ref().map(TopologyManager::local_address)
    }

    /// Ordered owners of a segment; empty when standalone.
    pub fn owners_of(&self, segment: u32) -> Vec<NodeAddress> {
        self.topology()
            .map(|t| t.hash.owners_of(segment).to_vec())
            .unwrap_or_default()
    }

    /// Routing decision for a key, read from a single topology snapshot.
    pub fn route(&self, key: &K) -> Routing {
        let segment = self.segment_for_key(key);
        match &self.topology {
            Some(manager) => {
                let snapshot = manager.snapshot();
                let local = manager.local_address();
                Routing {
                    segment,
                    owners: snapshot.hash.owners_of(segment).to_vec(),
                    local: snapshot.hash.is_owner(local, segment),
                    primary: snapshot.hash.is_primary_owner(local, segment),
                    topology_id: snapshot.topology_id,
                }
            }
            None => Routing {
                segment,
                owners: Vec::new(),
                local: true,
                primary: true,
                topology_id: 0,
            },
        }
    }

    /// Segments this node owns; every segment when standalone.
    pub fn segments_owned_locally(&self) -> BTreeSet<u32> {
        match &self.topology {
            Some(manager) => manager.snapshot().hash.segments_for_owner(manager.local_address()),
            None => (0..self.container.num_segments()).collect(),
        }
    }

    // == Topology Changes ==
    pub fn add_state_transfer_listener(&self, listener: Arc<dyn StateTransferListener>) -> Result<()> {
        self.topology_manager()?.add_listener(listener);
        Ok(())
    }

    /// Installs a new consistent hash and returns the local rebalance plan.
    ///
    /// Retired segments keep their data until
    /// [`confirm_segments_transferred`](Self::confirm_segments_transferred).
    pub fn on_topology_changed(&self, hash: ConsistentHash) -> Result<RebalancePlan> {
        self.topology_manager()?.install(hash)
    }

    /// Drops the entries of segments whose transfer to new owners is done.
    /// Segments the node owns again under the current topology are kept.
    pub fn confirm_segments_transferred(&self, segments: &BTreeSet<u32>) -> Result<usize> {
        let owned = self.segments_owned_locally();
        let droppable: BTreeSet<u32> = segments.difference(&owned).copied().collect();
        if droppable.is_empty() {
            return Ok(0);
        }

        let _stripes: Vec<MutexGuard<'_, ()>> = droppable
            .iter()
            .filter_map(|&s| self.stripes.get(s as usize))
            .map(|s| s.lock())
            .collect();
        let removed = self.container.remove_segments(&droppable);
        info!(
            "Dropped {} entries from {} transferred segments",
            removed,
            droppable.len()
        );
        Ok(removed)
    }

    fn topology_manager(&self) -> Result<&TopologyManager> {
        self.topology.as_ref().ok_or_else(|| {
            CacheError::InvalidConfig("cache is running without a cluster topology".to_string())
        })
    }
}

fn persist_with(coordinator: &PersistenceCoordinator, modification: Modification) -> Result<()> {
    match coordinator.mode() {
        PersistenceMode::Sync => coordinator.write_through(modification)?,
        PersistenceMode::Async => coordinator.enqueue(modification)?,
        PersistenceMode::None => {}
    }
    Ok(())
}
