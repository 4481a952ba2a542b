//! The persistence gateway.
//!
//! Two equivalent paths lead to the same row: a structured repository that
//! stages records and commits them on [`DeliveryRepository::persist_all`],
//! and a direct table insert used when the structured path fails. Both are
//! synchronous; the gateway is also driven from teardown code where no
//! runtime is guaranteed to be available.

use std::{fmt, sync::Arc, time::SystemTime};

use tracing::{debug, warn};

use crate::{
    error::Result,
    record::{DELIVERY_TABLE, DeliveryRecord, DeliveryRow},
};

/// Structured persistence path.
pub trait DeliveryRepository: Send + Sync {
    /// Stage a record for the next commit.
    ///
    /// # Errors
    ///
    /// If the repository is unavailable in the current context
    fn create_delivery_record(&self, record: &DeliveryRecord) -> Result<()>;

    /// Commit everything staged so far.
    ///
    /// Staged records are discarded when the commit fails, so that a
    /// fallback insert of the same values never produces a duplicate.
    ///
    /// # Errors
    ///
    /// If the commit fails
    fn persist_all(&self) -> Result<()>;
}

/// Low-level fallback path: a plain, non-transactional table insert.
pub trait DirectInsert: Send + Sync {
    /// # Errors
    ///
    /// If the row cannot be written
    fn insert(&self, table: &str, row: &DeliveryRow) -> Result<()>;
}

/// Which path a record was written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPath {
    Structured,
    Direct,
}

impl fmt::Display for PersistPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Structured => "structured",
            Self::Direct => "direct",
        })
    }
}

/// Writes delivery records, falling back to a direct insert whenever the
/// structured path fails.
#[derive(Clone)]
pub struct PersistenceGateway {
    repository: Option<Arc<dyn DeliveryRepository>>,
    direct: Arc<dyn DirectInsert>,
}

impl fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("structured", &self.repository.is_some())
            .finish_non_exhaustive()
    }
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(repository: Arc<dyn DeliveryRepository>, direct: Arc<dyn DirectInsert>) -> Self {
        Self {
            repository: Some(repository),
            direct,
        }
    }

    /// A gateway with no structured path, for contexts where the repository
    /// layer is never available.
    #[must_use]
    pub fn direct_only(direct: Arc<dyn DirectInsert>) -> Self {
        Self {
            repository: None,
            direct,
        }
    }

    /// A gateway using one store for both paths.
    #[must_use]
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: DeliveryRepository + DirectInsert + 'static,
    {
        Self {
            repository: Some(Arc::clone(&store) as Arc<dyn DeliveryRepository>),
            direct: store,
        }
    }

    /// Persist `record`, structured first.
    ///
    /// # Errors
    ///
    /// The direct-path error, when both paths failed
    pub fn record(&self, record: &DeliveryRecord) -> Result<PersistPath> {
        if let Some(repository) = &self.repository {
            match repository
                .create_delivery_record(record)
                .and_then(|()| repository.persist_all())
            {
                Ok(()) => return Ok(PersistPath::Structured),
                Err(err) => {
                    debug!(
                        error = %err,
                        "Structured persistence failed, falling back to direct insert"
                    );
                }
            }
        }

        self.direct
            .insert(DELIVERY_TABLE, &record.to_row(SystemTime::now()))
            .inspect_err(|err| {
                warn!(
                    error = %err,
                    status = %record.delivery_status(),
                    "Direct insert of delivery record failed"
                );
            })?;

        Ok(PersistPath::Direct)
    }
}
