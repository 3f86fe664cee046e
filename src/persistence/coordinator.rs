//! Persistence Coordinator Module
//!
//! Owns the modification queue between the in-memory container and the
//! backing store. Writers append; a flush drains a snapshot of the queue,
//! coalesces it and applies it. Only one flush runs at a time, so per-key order
//! in the queue is the order the store sees.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::cache::TimeService;
use crate::error::{CacheError, Result, StoreError, StoreResult};
use crate::persistence::modification::coalesce;
use crate::persistence::{BackingStore, MarshaledEntry, Modification, RawEntries};

// == Persistence Mode ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistenceMode {
    /// No store attached
    #[default]
    None,
    /// Write-through: the caller applies its own modification before returning
    Sync,
    /// Write-behind: a background task flushes the queue
    Async,
}

impl FromStr for PersistenceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(PersistenceMode::None),
            "SYNC" | "WRITE_THROUGH" => Ok(PersistenceMode::Sync),
            "ASYNC" | "WRITE_BEHIND" => Ok(PersistenceMode::Async),
            other => Err(format!("unknown persistence mode '{other}'")),
        }
    }
}

impl fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PersistenceMode::None => "NONE",
            PersistenceMode::Sync => "SYNC",
            PersistenceMode::Async => "ASYNC",
        })
    }
}

// == Overflow Policy ==
/// What `enqueue` does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until a flush makes room
    #[default]
    Block,
    /// Discard the oldest queued modification
    DropOldest,
    /// Fail with `CacheError::Backpressure`
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BLOCK" => Ok(OverflowPolicy::Block),
            "DROP_OLDEST" => Ok(OverflowPolicy::DropOldest),
            "REJECT" => Ok(OverflowPolicy::Reject),
            other => Err(format!("unknown overflow policy '{other}'")),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::Block => "BLOCK",
            OverflowPolicy::DropOldest => "DROP_OLDEST",
            OverflowPolicy::Reject => "REJECT",
        })
    }
}

/// Consecutive failed flushes after which the modification at the head of
/// the queue is dropped instead of retried.
pub const MAX_APPLY_ATTEMPTS: u32 = 5;

/// Receives store failures nobody is waiting on (write-behind flushes).
pub type ErrorListener = Arc<dyn Fn(&StoreError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub mode: PersistenceMode,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            mode: PersistenceMode::None,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
        }
    }
}

// == Persistence Coordinator ==
pub struct PersistenceCoordinator {
    store: Arc<dyn BackingStore>,
    config: PersistenceConfig,
    time: Arc<dyn TimeService>,
    queue: Mutex<VecDeque<Modification>>,
    not_full: Condvar,
    flush_lock: Mutex<()>,
    /// Failed attempts on the current queue head; reset by any successful apply
    head_failures: AtomicU32,
    wake: Arc<Notify>,
    error_listener: ErrorListener,
}

impl fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish()
    }
}

impl PersistenceCoordinator {
    // == Constructor ==
    pub fn new(store: Arc<dyn BackingStore>, config: PersistenceConfig, time: Arc<dyn TimeService>) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            store,
            config: PersistenceConfig {
                queue_capacity: capacity,
                ..config
            },
            time,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_full: Condvar::new(),
            flush_lock: Mutex::new(()),
            head_failures: AtomicU32::new(0),
            wake: Arc::new(Notify::new()),
            error_listener: Arc::new(|err: &StoreError| error!("Write-behind flush failed: {}", err)),
        }
    }

    pub fn with_error_listener(mut self, listener: ErrorListener) -> Self {
        self.error_listener = listener;
        self
    }

    pub fn mode(&self) -> PersistenceMode {
        self.config.mode
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Notified whenever work is queued; the write-behind task waits on it.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn report_error(&self, err: &StoreError) {
        (self.error_listener)(err);
    }

    // == Enqueue ==
    /// Appends a modification, applying the overflow policy when full.
    pub fn enqueue(&self, modification: Modification) -> Result<()> {
        let capacity = self.config.queue_capacity;
        let mut queue = self.queue.lock();
        while queue.len() >= capacity {
            match self.config.overflow {
                OverflowPolicy::Block => self.not_full.wait(&mut queue),
                OverflowPolicy::DropOldest => {
                    if let Some(dropped) = queue.pop_front() {
                        warn!("Modification queue full, dropped oldest {:?}", kind(&dropped));
                    }
                }
                OverflowPolicy::Reject => return Err(CacheError::Backpressure { capacity }),
            }
        }
        queue.push_back(modification);
        drop(queue);

        self.wake.notify_one();
        Ok(())
    }

    // == Write Through ==
    /// Applies one modification immediately, after anything already queued.
    pub fn write_through(&self, modification: Modification) -> StoreResult<()> {
        let _flushing = self.flush_lock.lock();
        self.flush_locked(None)?;
        self.apply(&modification)
    }

    // == Flush ==
    /// Applies everything queued before the call. Returns the number of
    /// modifications written after coalescing.
    ///
    /// On deadline the work already written stays written and the rest goes
    /// back to the front of the queue. On a store error the failed
    /// modification goes back too, ahead of the rest, so the next flush
    /// retries it first. After [`MAX_APPLY_ATTEMPTS`] consecutive failures it
    /// is dropped and the returned error says so.
    pub fn flush(&self, deadline: Option<Instant>) -> StoreResult<usize> {
        let _flushing = self.flush_lock.lock();
        self.flush_locked(deadline)
    }

    fn flush_locked(&self, deadline: Option<Instant>) -> StoreResult<usize> {
        let batch: Vec<Modification> = self.queue.lock().drain(..).collect();
        self.not_full.notify_all();
        if batch.is_empty() {
            return Ok(0);
        }

        let drained = batch.len();
        let mut pending = coalesce(batch).into_iter();
        let mut applied = 0;

        while let Some(modification) = pending.next() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let rest: Vec<Modification> = std::iter::once(modification).chain(pending).collect();
                warn!(
                    "Flush deadline passed: {} applied, {} re-queued",
                    applied,
                    rest.len()
                );
                self.requeue(rest);
                return Err(StoreError::Timeout { applied });
            }
            if let Err(err) = self.apply(&modification) {
                let attempts = self.head_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if attempts >= MAX_APPLY_ATTEMPTS {
                    self.head_failures.store(0, Ordering::SeqCst);
                    self.requeue(pending.collect());
                    error!(
                        "Dropping {} modification after {} failed attempts: {}",
                        kind(&modification),
                        attempts,
                        err
                    );
                    return Err(StoreError::Backend(format!(
                        "dropped {} modification after {} failed attempts: {}",
                        kind(&modification),
                        attempts,
                        err
                    )));
                }
                warn!(
                    "Store rejected {} modification (attempt {}): {}",
                    kind(&modification),
                    attempts,
                    err
                );
                self.requeue(std::iter::once(modification).chain(pending).collect());
                return Err(err);
            }
            self.head_failures.store(0, Ordering::SeqCst);
            applied += 1;
        }

        debug!("Flushed {} modifications ({} queued)", applied, drained);
        Ok(applied)
    }

    fn requeue(&self, rest: Vec<Modification>) {
        if rest.is_empty() {
            return;
        }
        let mut queue = self.queue.lock();
        for modification in rest.into_iter().rev() {
            queue.push_front(modification);
        }
    }

    fn apply(&self, modification: &Modification) -> StoreResult<()> {
        match modification {
            Modification::Store(entry) => self.store.write(entry),
            Modification::Remove(key) => self.store.delete(key).map(|_| ()),
            Modification::Clear => self.store.clear(),
        }
    }

    // == Load ==
    /// Reads one live record. A modification still waiting in the queue wins
    /// over what the store holds.
    pub fn load(&self, key: &[u8]) -> StoreResult<Option<MarshaledEntry>> {
        let wall_now = self.time.wall_clock_time();
        let queued = {
            let queue = self.queue.lock();
            queue
                .iter()
                .rev()
                .find(|m| m.is_clear() || m.key() == Some(key))
                .cloned()
        };

        let entry = match queued {
            Some(Modification::Store(entry)) => Some(entry),
            Some(Modification::Remove(_)) | Some(Modification::Clear) => None,
            None => self.store.load(key)?,
        };
        Ok(entry.filter(|e| !e.metadata.is_expired(wall_now)))
    }

    // == Load All ==
    /// Lazily iterates the live records of the store.
    ///
    /// Once the deadline passes the iterator yields a single
    /// `StoreError::Timeout` and ends.
    pub fn load_all(&self, deadline: Option<Instant>) -> StoreResult<LoadAll<'_>> {
        Ok(LoadAll {
            inner: self.store.load_all_raw()?,
            wall_now: self.time.wall_clock_time(),
            deadline,
            yielded: 0,
            done: false,
        })
    }

    // == Purge Expired ==
    /// Deletes expired records from the store. Per-record failures are
    /// logged and the sweep continues. Returns the number deleted.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let _flushing = self.flush_lock.lock();
        let wall_now = self.time.wall_clock_time();

        let mut expired = Vec::new();
        for record in self.store.load_all_raw()? {
            match record {
                Ok(entry) if entry.metadata.is_expired(wall_now) => expired.push(entry.key),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable record during purge: {}", e),
            }
        }

        let mut purged = 0;
        for key in expired {
            match self.store.delete(&key) {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to purge expired record: {}", e),
            }
        }
        if purged > 0 {
            info!("Purged {} expired records from the store", purged);
        }
        Ok(purged)
    }
}

fn kind(modification: &Modification) -> &'static str {
    match modification {
        Modification::Store(_) => "store",
        Modification::Remove(_) => "remove",
        Modification::Clear => "clear",
    }
}

// == Load All Iterator ==
pub struct LoadAll<'a> {
    inner: RawEntries<'a>,
    wall_now: i64,
    deadline: Option<Instant>,
    yielded: usize,
    done: bool,
}

impl Iterator for LoadAll<'_> {
    type Item = StoreResult<MarshaledEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                self.done = true;
                return Some(Err(StoreError::Timeout {
                    applied: self.yielded,
                }));
            }
            match self.inner.next()? {
                Ok(entry) if entry.metadata.is_expired(self.wall_now) => continue,
                Ok(entry) => {
                    self.yielded += 1;
                    return Some(Ok(entry));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
