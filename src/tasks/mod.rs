//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a node is up.
//!
//! # Tasks
//! - Expiration purge: removes expired entries from memory and the store
//! - Write-behind: drains the persistence queue into the backing store

mod purge;
mod write_behind;

pub use purge::spawn_purge_task;
pub use write_behind::spawn_write_behind_task;
