//! Error types for the data grid core
//!
//! Provides unified error handling using thiserror. In-memory reads and writes
//! never fail: a missing or expired key is a normal `None`, not an error. Only
//! the persistence path, queue backpressure and topology misuse surface here.

use thiserror::Error;

// == Store Error Enum ==
/// Failure talking to a backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key, value or record could not be (un)marshaled
    #[error("Marshaling error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A flush or load did not finish before its deadline
    #[error("Store operation timed out after applying {applied} modifications")]
    Timeout {
        /// Modifications already committed to the store when the deadline passed
        applied: usize,
    },

    /// Backend-specific failure reported by a store implementation
    #[error("Store backend error: {0}")]
    Backend(String),
}

// == Cache Error Enum ==
/// Unified error type for the data grid core.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backing store failed (write-through mode, flush, load)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The write-behind queue is full and the overflow policy rejects
    #[error("Modification queue full ({capacity} pending), retry later")]
    Backpressure {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Two consistent hashes with different segment counts were compared
    #[error("Incompatible topologies: {old} segments vs {new} segments")]
    InvalidTopology {
        /// Segment count of the old hash
        old: u32,
        /// Segment count of the new hash
        new: u32,
    },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// == Result Type Alias ==
/// Convenience Result type for the data grid core.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type returned by backing stores and the persistence coordinator.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_into_cache_error() {
        let err: CacheError = StoreError::Backend("disk on fire".to_string()).into();
        assert!(matches!(err, CacheError::Store(StoreError::Backend(_))));
        assert_eq!(err.to_string(), "Store backend error: disk on fire");
    }

    #[test]
    fn test_backpressure_is_not_a_store_error() {
        let err = CacheError::Backpressure { capacity: 8 };
        assert!(!matches!(err, CacheError::Store(_)));
        assert!(err.to_string().contains("8 pending"));
    }

    #[test]
    fn test_timeout_reports_applied_count() {
        let err = StoreError::Timeout { applied: 3 };
        assert!(err.to_string().contains("3 modifications"));
    }
}
