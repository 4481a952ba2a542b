use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileStore, MemoryStore},
    error::Result,
    gateway::PersistenceGateway,
};

/// Configuration for the delivery store
///
/// # Examples
///
/// JSON-lines file:
/// ```ron
/// Mailtrail (
///     store: File(
///         path: "/var/lib/mailtrail/deliveries.jsonl",
///     ),
/// )
/// ```
///
/// Memory store with capacity limit:
/// ```ron
/// Mailtrail (
///     store: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// Append-only JSON-lines file
    File { path: PathBuf },
    /// Rows kept in memory, lost at exit
    Memory {
        /// Maximum number of rows (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/lib/mailtrail/deliveries.jsonl"),
        }
    }
}

impl StoreConfig {
    /// Build a gateway whose structured and direct paths share one store.
    ///
    /// # Errors
    ///
    /// If the file store path is rejected
    pub fn into_gateway(self) -> Result<PersistenceGateway> {
        Ok(match self {
            Self::File { path } => PersistenceGateway::from_store(Arc::new(FileStore::new(path)?)),
            Self::Memory { capacity } => PersistenceGateway::from_store(Arc::new(
                capacity.map_or_else(MemoryStore::new, MemoryStore::with_capacity),
            )),
        })
    }
}
