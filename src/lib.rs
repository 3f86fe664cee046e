//! Mini Grid - an embeddable data grid core
//!
//! Segmented in-memory storage with expiration and eviction, consistent-hash
//! segment ownership with rebalance planning, and write-through/write-behind
//! persistence to a pluggable backing store.

pub mod cache;
pub mod config;
pub mod distribution;
pub mod error;
pub mod grid;
pub mod persistence;
pub mod tasks;

pub use config::Config;
pub use error::{CacheError, Result, StoreError};
pub use grid::{GridCache, GridConfig, PurgeSummary, Routing};
pub use tasks::{spawn_purge_task, spawn_write_behind_task};
