use std::{
    sync::{Arc, PoisonError, RwLock},
    time::SystemTime,
};

use crate::{
    StoreError,
    error::Result,
    gateway::{DeliveryRepository, DirectInsert},
    record::{DELIVERY_TABLE, DeliveryRecord, DeliveryRow},
};

/// In-memory delivery store
///
/// Serves both persistence paths. Structured records are staged until
/// [`DeliveryRepository::persist_all`]; direct inserts land immediately.
///
/// # Capacity Management
/// With a capacity configured, writes that would exceed it fail with
/// [`StoreError::CapacityExceeded`]. A failed commit discards whatever was
/// staged.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) rows: Arc<RwLock<Vec<DeliveryRow>>>,
    staged: Arc<RwLock<Vec<DeliveryRecord>>>,
    /// Maximum number of rows to hold (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store with a row limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Number of committed rows
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of structured records awaiting a commit
    #[must_use]
    pub fn staged(&self) -> usize {
        self.staged
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Snapshot of every committed row, in write order
    #[must_use]
    pub fn rows(&self) -> Vec<DeliveryRow> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_capacity(&self, used: usize, adding: usize) -> Result<()> {
        match self.capacity {
            Some(capacity) if used + adding > capacity => {
                Err(StoreError::CapacityExceeded { used, capacity })
            }
            _ => Ok(()),
        }
    }
}

impl DeliveryRepository for MemoryStore {
    fn create_delivery_record(&self, record: &DeliveryRecord) -> Result<()> {
        self.staged.write()?.push(record.clone());
        Ok(())
    }

    fn persist_all(&self) -> Result<()> {
        let staged = std::mem::take(&mut *self.staged.write()?);
        let mut rows = self.rows.write()?;
        self.check_capacity(rows.len(), staged.len())?;

        let now = SystemTime::now();
        rows.extend(staged.iter().map(|record| record.to_row(now)));

        Ok(())
    }
}

impl DirectInsert for MemoryStore {
    fn insert(&self, table: &str, row: &DeliveryRow) -> Result<()> {
        if table != DELIVERY_TABLE {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        let mut rows = self.rows.write()?;
        self.check_capacity(rows.len(), 1)?;
        rows.push(row.clone());

        Ok(())
    }
}
