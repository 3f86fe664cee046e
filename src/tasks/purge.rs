//! Expiration Purge Task
//!
//! Background task that periodically removes expired entries from memory and
//! from the backing store, keeping the sweep off the request path.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::grid::GridCache;

/// Spawns a background task that purges expired entries every `interval`.
///
/// The sweep itself takes segment locks, so it runs on the blocking pool.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_purge_task<K, V>(cache: Arc<GridCache<K, V>>, interval: Duration) -> JoinHandle<()>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    tokio::spawn(async move {
        info!("Starting expiration purge task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let sweep = {
                let cache = Arc::clone(&cache);
                tokio::task::spawn_blocking(move || cache.purge_expired()).await
            };

            match sweep {
                Ok(Ok(summary)) if summary.memory + summary.store > 0 => info!(
                    "Expiration purge: removed {} entries from memory, {} from the store",
                    summary.memory, summary.store
                ),
                Ok(Ok(_)) => debug!("Expiration purge: no expired entries found"),
                Ok(Err(e)) => warn!("Expiration purge failed: {}", e),
                Err(e) => warn!("Expiration purge panicked: {}", e),
            }
        }
    })
}
