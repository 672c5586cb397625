//! Metadata repository - Durable catalog of dataset records
//!
//! Architecture: one SQLite table, one row per dataset.
//! - `tables` and `schema` are stored as canonical JSON text
//! - a single connection behind a mutex serializes writers; WAL mode lets
//!   other processes read committed rows while a write is in flight

use crate::dataset::{
    decode_schema, decode_tables, DatasetDocument, DatasetId, DatasetRecord, UploadType,
};
use crate::error::{IngestError, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Catalog table name.
pub const METADATA_TABLE: &str = "datasets_metadata";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw column values of one catalog row.
struct CatalogRow {
    dataset_id: String,
    upload_type: String,
    raw_byte_size: i64,
    tables: String,
    schema: String,
}

impl CatalogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            dataset_id: row.get(0)?,
            upload_type: row.get(1)?,
            raw_byte_size: row.get(2)?,
            tables: row.get(3)?,
            schema: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<DatasetRecord> {
        let upload_type = UploadType::parse(&self.upload_type).ok_or_else(|| {
            IngestError::Storage(format!(
                "Dataset {} has unknown upload type {:?}",
                self.dataset_id, self.upload_type
            ))
        })?;
        let raw_byte_size = u64::try_from(self.raw_byte_size).map_err(|_| {
            IngestError::Storage(format!(
                "Dataset {} has negative raw_byte_size",
                self.dataset_id
            ))
        })?;

        let tables = decode_tables(&self.tables)
            .map_err(|e| corrupt_column(&self.dataset_id, "tables", e))?;
        let schema = decode_schema(&self.schema)
            .map_err(|e| corrupt_column(&self.dataset_id, "schema", e))?;

        DatasetRecord::try_from(DatasetDocument {
            dataset_id: DatasetId::new(self.dataset_id),
            upload_type,
            raw_byte_size,
            tables,
            schema,
        })
    }
}

fn corrupt_column(dataset_id: &str, column: &str, err: IngestError) -> IngestError {
    IngestError::Storage(format!(
        "Dataset {} has an undecodable {} column: {}",
        dataset_id, column, err
    ))
}

/// Metadata repository backed by SQLite.
pub struct MetadataRepository {
    /// `None` for in-memory catalogs
    path: Option<PathBuf>,
    db: Mutex<Connection>,
}

impl MetadataRepository {
    /// Open (or create) the catalog file and its table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(&path).map_err(|e| {
            IngestError::Storage(format!("Failed to open catalog {}: {}", path.display(), e))
        })?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode returns the resulting mode as a row.
        let mode: String = db.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Catalog {} journal mode: {}", path.display(), mode);

        let repo = Self {
            path: Some(path),
            db: Mutex::new(db),
        };
        repo.init_schema()?;

        info!("Opened dataset catalog at {}", repo.describe_location());
        Ok(repo)
    }

    /// Private in-memory catalog, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let repo = Self {
            path: None,
            db: Mutex::new(Connection::open_in_memory()?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn describe_location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| IngestError::Storage("Catalog connection lock poisoned".to_string()))
    }

    /// Create the catalog table if it is missing.
    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                dataset_id TEXT PRIMARY KEY,
                upload_type TEXT NOT NULL,
                raw_byte_size INTEGER NOT NULL,
                tables TEXT NOT NULL,
                schema TEXT NOT NULL
            )
            "#,
            METADATA_TABLE
        ))?;
        Ok(())
    }

    /// Insert a new record. Fails with `Conflict` if the id is taken.
    pub fn insert(&self, record: &DatasetRecord) -> Result<()> {
        let tables = record.encode_tables()?;
        let schema = record.encode_schema()?;
        let raw_byte_size = i64::try_from(record.raw_byte_size).map_err(|_| {
            IngestError::InvalidInput(format!(
                "raw_byte_size {} does not fit the catalog",
                record.raw_byte_size
            ))
        })?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let inserted = tx.execute(
            &format!(
                "INSERT INTO {} (dataset_id, upload_type, raw_byte_size, tables, schema) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                METADATA_TABLE
            ),
            params![
                record.dataset_id.as_str(),
                record.upload_type.as_str(),
                raw_byte_size,
                tables,
                schema,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(IngestError::Conflict(format!(
                    "Dataset {} already exists",
                    record.dataset_id
                )));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;

        debug!("Cataloged dataset {}", record.dataset_id);
        Ok(())
    }

    /// Fetch one record, or `NotFound`.
    pub fn get(&self, dataset_id: &DatasetId) -> Result<DatasetRecord> {
        let db = self.conn()?;
        let row = db
            .query_row(
                &format!(
                    "SELECT dataset_id, upload_type, raw_byte_size, tables, schema \
                     FROM {} WHERE dataset_id = ?1",
                    METADATA_TABLE
                ),
                params![dataset_id.as_str()],
                CatalogRow::from_row,
            )
            .optional()?;
        drop(db);

        match row {
            Some(row) => row.into_record(),
            None => Err(IngestError::NotFound(format!("Dataset not found: {}", dataset_id))),
        }
    }

    /// Every decodable record, in insertion order.
    ///
    /// Rows that fail to decode are logged with their id and skipped; `get`
    /// on such an id still reports the decode failure.
    pub fn list(&self) -> Result<Vec<DatasetRecord>> {
        let rows = {
            let db = self.conn()?;
            let mut stmt = db.prepare(&format!(
                "SELECT dataset_id, upload_type, raw_byte_size, tables, schema \
                 FROM {} ORDER BY rowid",
                METADATA_TABLE
            ))?;
            let rows = stmt
                .query_map([], CatalogRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let dataset_id = row.dataset_id.clone();
            match row.into_record() {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping catalog row {:?}: {}", dataset_id, e),
            }
        }
        Ok(records)
    }

    pub fn contains(&self, dataset_id: &DatasetId) -> Result<bool> {
        let db = self.conn()?;
        let found: Option<i64> = db
            .query_row(
                &format!("SELECT 1 FROM {} WHERE dataset_id = ?1", METADATA_TABLE),
                params![dataset_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remove a record. Returns whether it existed.
    pub fn delete(&self, dataset_id: &DatasetId) -> Result<bool> {
        let db = self.conn()?;
        let removed = db.execute(
            &format!("DELETE FROM {} WHERE dataset_id = ?1", METADATA_TABLE),
            params![dataset_id.as_str()],
        )?;

        if removed > 0 {
            info!("Removed dataset {} from catalog", dataset_id);
        }
        Ok(removed > 0)
    }
}

impl std::fmt::Debug for MetadataRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRepository")
            .field("path", &self.describe_location())
            .finish()
    }
}
