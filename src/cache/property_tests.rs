//! Property-Based Tests for Cache Module
//!
//! Uses proptest to verify the container's correctness properties.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cache::{
    ContainerConfig, ControlledTimeService, DataContainer, EvictionStrategy, Expiration,
};

// == Test Configuration ==
const TEST_SEGMENTS: u32 = 8;

fn unbounded() -> (DataContainer<String, String>, Arc<ControlledTimeService>) {
    let time = Arc::new(ControlledTimeService::new());
    let config = ContainerConfig {
        num_segments: TEST_SEGMENTS,
        max_entries: None,
        strategy: EvictionStrategy::None,
    };
    (DataContainer::new(config, time.clone()), time)
}

// == Strategies ==
/// Generates cache keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,16}".prop_map(|s| s)
}

/// Generates cache values
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,64}".prop_map(|s| s)
}

fn eviction_strategy() -> impl Strategy<Value = EvictionStrategy> {
    prop_oneof![Just(EvictionStrategy::Lru), Just(EvictionStrategy::Lirs)]
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: String, value: String },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Put { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Feature: data-container, Property 1: Model Equivalence**
    // *For any* sequence of operations on an unbounded container, every read
    // SHALL agree with a plain HashMap model and the statistics SHALL count
    // each hit and miss.
    #[test]
    fn prop_matches_hashmap_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let (container, _) = unbounded();
        let mut model: HashMap<String, String> = HashMap::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Put { key, value } => {
                    let previous = container.put(key.clone(), value.clone(), Expiration::immortal());
                    prop_assert_eq!(previous.map(|e| e.value), model.insert(key, value));
                }
                CacheOp::Get { key } => {
                    let got = container.get(&key).map(|e| e.value);
                    if got.is_some() { expected_hits += 1 } else { expected_misses += 1 }
                    prop_assert_eq!(got.as_ref(), model.get(&key));
                }
                CacheOp::Remove { key } => {
                    let removed = container.remove(&key).map(|e| e.value);
                    prop_assert_eq!(removed, model.remove(&key));
                }
            }
        }

        let stats = container.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, model.len(), "Total entries mismatch");
        prop_assert_eq!(container.iter(false).count(), model.len());
    }

    // **Feature: data-container, Property 2: Eviction Bound**
    // *For any* capacity C, segment count N and sequence of inserts, the
    // container SHALL never hold more than max(C, N) entries.
    #[test]
    fn prop_eviction_bound(
        capacity in 1usize..64,
        segments in 1u32..16,
        strategy in eviction_strategy(),
        keys in prop::collection::vec(valid_key_strategy(), 1..200)
    ) {
        let time = Arc::new(ControlledTimeService::new());
        let config = ContainerConfig { num_segments: segments, max_entries: Some(capacity), strategy };
        let container: DataContainer<String, String> = DataContainer::new(config, time);
        let bound = capacity.max(segments as usize);

        for key in keys {
            container.put(key.clone(), "v".to_string(), Expiration::immortal());
            prop_assert!(container.size_including_expired() <= bound);
            // the entry just written is never its own victim
            prop_assert!(container.peek(&key).is_some());
        }
    }

    // **Feature: data-container, Property 3: Round-trip Storage**
    // *For any* key and value, a get immediately after a put SHALL return
    // exactly the value written.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in valid_value_strategy()) {
        let (container, _) = unbounded();
        container.put(key.clone(), value.clone(), Expiration::immortal());
        prop_assert_eq!(container.get(&key).map(|e| e.value), Some(value));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // **Feature: data-container, Property 4: Expiration Correctness**
    // *For any* lifespan L and elapsed time t, an entry SHALL be visible
    // exactly when t < L.
    #[test]
    fn prop_lifespan_expiration(
        key in valid_key_strategy(),
        lifespan_ms in 1u64..10_000,
        elapsed_ms in 0u64..20_000
    ) {
        let (container, time) = unbounded();
        let exp = Expiration::immortal().with_lifespan(Duration::from_millis(lifespan_ms));
        container.put(key.clone(), "v".to_string(), exp);

        time.advance(Duration::from_millis(elapsed_ms));
        prop_assert_eq!(container.get(&key).is_some(), elapsed_ms < lifespan_ms);
    }

    // **Feature: data-container, Property 5: Idle Reset On Access**
    // *For any* max-idle M and access gaps all shorter than M, the entry
    // SHALL stay visible however long the total elapsed time.
    #[test]
    fn prop_idle_reset_on_access(
        max_idle_ms in 10u64..1_000,
        gaps in prop::collection::vec(0.0f64..0.99, 1..30)
    ) {
        let (container, time) = unbounded();
        let exp = Expiration::immortal().with_max_idle(Duration::from_millis(max_idle_ms));
        container.put("k".to_string(), "v".to_string(), exp);

        for fraction in gaps {
            let gap = (max_idle_ms as f64 * fraction) as u64;
            time.advance(Duration::from_millis(gap));
            prop_assert!(container.get(&"k".to_string()).is_some());
        }

        time.advance(Duration::from_millis(max_idle_ms));
        prop_assert!(container.get(&"k".to_string()).is_none());
    }

    // **Feature: data-container, Property 6: LRU Eviction Order**
    // *For any* full single-segment LRU container, inserting a new key SHALL
    // evict the least recently used key.
    #[test]
    fn prop_lru_eviction_order(
        capacity in 2usize..20,
        touched in prop::collection::vec(any::<prop::sample::Index>(), 0..20)
    ) {
        let time = Arc::new(ControlledTimeService::new());
        let config = ContainerConfig { num_segments: 1, max_entries: Some(capacity), strategy: EvictionStrategy::Lru };
        let container: DataContainer<String, usize> = DataContainer::new(config, time);

        // recency order, least recent first
        let mut order: Vec<String> = Vec::new();
        for i in 0..capacity {
            let key = format!("key_{i}");
            container.put(key.clone(), i, Expiration::immortal());
            order.push(key);
        }
        for index in touched {
            let key = order.remove(index.index(order.len()));
            prop_assert!(container.get(&key).is_some());
            order.push(key);
        }

        container.put("newcomer".to_string(), 0, Expiration::immortal());
        let victim = &order[0];
        prop_assert!(container.peek(victim).is_none(), "expected {} to be evicted", victim);
        for survivor in &order[1..] {
            prop_assert!(container.peek(survivor).is_some());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // **Feature: data-container, Property 7: Concurrent Operation Correctness**
    // *For any* set of keys written concurrently from several threads, every
    // key SHALL be readable afterwards with the value its writer stored.
    #[test]
    fn prop_concurrent_operation_correctness(
        keys in prop::collection::hash_set(valid_key_strategy(), 1..100),
        threads in 2usize..6
    ) {
        let (container, _) = unbounded();
        let container = Arc::new(container);
        let keys: Vec<String> = keys.into_iter().collect();

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let container = Arc::clone(&container);
                let mine: Vec<String> = keys.iter().skip(t).step_by(threads).cloned().collect();
                thread::spawn(move || {
                    for key in mine {
                        container.put(key.clone(), format!("{key}-value"), Expiration::immortal());
                        container.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        prop_assert_eq!(container.size(), keys.len());
        let seen: HashSet<String> = container.iter(false).map(|e| e.key).collect();
        prop_assert_eq!(seen.len(), keys.len());
        for key in &keys {
            prop_assert_eq!(container.get(key).map(|e| e.value), Some(format!("{key}-value")));
        }
    }
}
