//! Write-Behind Task
//!
//! Background task that drains the persistence queue. It wakes whenever a
//! modification is queued and also on a fixed interval, then flushes on the
//! blocking pool so store I/O never runs on a runtime worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::persistence::PersistenceCoordinator;

/// Spawns the write-behind flusher for `coordinator`.
///
/// Flush failures go to the coordinator's error listener. Everything that
/// was not written, the failed modification included, stays queued and is
/// retried on the next round.
pub fn spawn_write_behind_task(coordinator: Arc<PersistenceCoordinator>, interval: Duration) -> JoinHandle<()> {
    let wake = coordinator.wake_handle();

    tokio::spawn(async move {
        info!("Starting write-behind task with interval of {:?}", interval);
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = wake.notified() => {}
                _ = ticker.tick() => {}
            }
            if coordinator.pending() == 0 {
                continue;
            }

            let flushing = Arc::clone(&coordinator);
            match tokio::task::spawn_blocking(move || flushing.flush(None)).await {
                Ok(Ok(applied)) => debug!("Write-behind flushed {} modifications", applied),
                Ok(Err(e)) => coordinator.report_error(&e),
                Err(e) => warn!("Write-behind flush panicked: {}", e),
            }
        }
    })
}
