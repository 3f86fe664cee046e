//! Time Service Module
//!
//! Entry timestamps use a monotonic nanosecond clock; persisted metadata uses
//! wall-clock milliseconds so expiration survives a restart. Both come from a
//! single `TimeService` so tests can drive them together.
//!
//! The monotonic clock starts at [`MONOTONIC_ORIGIN_NANOS`] rather than zero,
//! so a record written long before this process started still converts to a
//! monotonic timestamp in the past and keeps its remaining lifespan.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

/// Monotonic reading at process start, about 146 years of headroom.
pub const MONOTONIC_ORIGIN_NANOS: u64 = 1 << 62;

// == Time Service Trait ==
/// Source of time for entry lifecycle decisions.
pub trait TimeService: Send + Sync + std::fmt::Debug {
    /// Monotonic time in nanoseconds since an arbitrary origin.
    fn time(&self) -> u64;

    /// Wall-clock time in Unix milliseconds.
    fn wall_clock_time(&self) -> i64;

    /// Converts a monotonic timestamp into wall-clock milliseconds.
    fn to_wall_clock(&self, monotonic_nanos: u64) -> i64 {
        let elapsed_ms = self.time().saturating_sub(monotonic_nanos) / 1_000_000;
        self.wall_clock_time() - elapsed_ms as i64
    }

    /// Converts wall-clock milliseconds back into a monotonic timestamp.
    ///
    /// Only timestamps more than [`MONOTONIC_ORIGIN_NANOS`] in the past are
    /// clamped to zero.
    fn from_wall_clock(&self, wall_ms: i64) -> u64 {
        let elapsed_ms = (self.wall_clock_time() - wall_ms).max(0) as u64;
        self.time().saturating_sub(elapsed_ms.saturating_mul(1_000_000))
    }
}

// == Default Time Service ==
/// `Instant`-based monotonic clock paired with chrono's UTC wall clock.
#[derive(Debug)]
pub struct DefaultTimeService {
    origin: Instant,
}

impl DefaultTimeService {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for DefaultTimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeService for DefaultTimeService {
    fn time(&self) -> u64 {
        MONOTONIC_ORIGIN_NANOS + self.origin.elapsed().as_nanos() as u64
    }

    fn wall_clock_time(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

// == Controlled Time Service ==
/// Manually advanced clock for deterministic expiration tests.
#[derive(Debug)]
pub struct ControlledTimeService {
    nanos: AtomicU64,
    wall_ms: AtomicI64,
}

impl ControlledTimeService {
    /// Starts the monotonic clock at the origin and the wall clock at the current time.
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(MONOTONIC_ORIGIN_NANOS),
            wall_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Moves both clocks forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
        self.wall_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for ControlledTimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeService for ControlledTimeService {
    fn time(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn wall_clock_time(&self) -> i64 {
        self.wall_ms.load(Ordering::SeqCst)
    }
}
