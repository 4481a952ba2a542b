//! Error types for the mailtrail-store crate.
//!
//! Every store operation returns [`StoreError`]. Callers on the tracking
//! path never surface these; they log and move on.

use std::io;

use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file open/append/flush).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A row could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested persistence path cannot be used in this context.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refuses further rows.
    #[error("Store capacity exceeded: {used}/{capacity} rows")]
    CapacityExceeded { used: usize, capacity: usize },

    /// A row was addressed to a table this store does not hold.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
