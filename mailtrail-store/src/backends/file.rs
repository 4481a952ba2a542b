use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    StoreError,
    error::Result,
    gateway::{DeliveryRepository, DirectInsert},
    record::{DELIVERY_TABLE, DeliveryRecord, DeliveryRow},
};

#[derive(Serialize)]
struct Line<'a> {
    table: &'a str,
    #[serde(flatten)]
    row: &'a DeliveryRow,
}

/// JSON-lines delivery store
///
/// Every row is appended as one JSON object per line, tagged with its
/// table. Structured records are staged in memory and appended together on
/// [`DeliveryRepository::persist_all`]; direct inserts are appended
/// immediately.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    staged: Arc<Mutex<Vec<DeliveryRecord>>>,
    append: Arc<Mutex<()>>,
}

impl<'de> Deserialize<'de> for FileStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileStoreHelper {
            path: PathBuf,
        }

        let helper = FileStoreHelper::deserialize(deserializer)?;
        Self::new(helper.path).map_err(serde::de::Error::custom)
    }
}

impl FileStore {
    /// # Errors
    ///
    /// If the path is relative, contains `..`, or points into a system
    /// directory
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        Ok(Self {
            path,
            staged: Arc::default(),
            append: Arc::default(),
        })
    }

    fn validate_path(path: &Path) -> Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StoreError::Unavailable(format!(
                "Store path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(StoreError::Unavailable(format!(
                "Store path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return Err(StoreError::Unavailable(format!(
                "Store path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, table: &str, rows: &[DeliveryRow]) -> Result<()> {
        let mut buffer = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buffer, &Line { table, row })?;
            buffer.push(b'\n');
        }

        let _guard = self.append.lock()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buffer)?;
        file.flush()?;

        trace!(path = %self.path.display(), rows = rows.len(), "Appended delivery rows");

        Ok(())
    }

    /// Read every row back, in write order.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or a line is not a valid row
    pub fn read_rows(&self) -> Result<Vec<DeliveryRow>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }

        Ok(rows)
    }
}

impl DeliveryRepository for FileStore {
    fn create_delivery_record(&self, record: &DeliveryRecord) -> Result<()> {
        self.staged.lock()?.push(record.clone());
        Ok(())
    }

    fn persist_all(&self) -> Result<()> {
        let staged = std::mem::take(&mut *self.staged.lock()?);
        if staged.is_empty() {
            return Ok(());
        }

        let now = SystemTime::now();
        let rows: Vec<_> = staged.iter().map(|record| record.to_row(now)).collect();
        self.append(DELIVERY_TABLE, &rows)
    }
}

impl DirectInsert for FileStore {
    fn insert(&self, table: &str, row: &DeliveryRow) -> Result<()> {
        if table != DELIVERY_TABLE {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        self.append(table, std::slice::from_ref(row))
    }
}
