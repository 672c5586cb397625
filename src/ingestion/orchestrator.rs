//! Ingestion Orchestrator - Drives one upload from bytes to catalog row

use crate::dataset::{DatasetId, DatasetRecord, DatasetTable, TableSchema, UploadType};
use crate::db::MetadataRepository;
use crate::error::{IngestError, Result};
use crate::ingestion::csv_converter::CsvConverter;
use crate::ingestion::raw_store::{RawStore, StoredFile};
use crate::ingestion::schema_extractor::{describe_columnar, describe_relational};
use crate::ingestion::upload_type::{detect_upload_type, Pipeline};
use crate::ingestion::IngestionOptions;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-request state machine position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestionStage {
    Start,
    TypeDetected,
    RawPersisted,
    Converted,
    SchemaExtracted,
    CatalogCommitted,
    Failed,
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionStage::Start => "start",
            IngestionStage::TypeDetected => "type_detected",
            IngestionStage::RawPersisted => "raw_persisted",
            IngestionStage::Converted => "converted",
            IngestionStage::SchemaExtracted => "schema_extracted",
            IngestionStage::CatalogCommitted => "catalog_committed",
            IngestionStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Transient state of one ingestion call.
struct IngestionContext {
    dataset_id: DatasetId,
    dataset_dir: PathBuf,
    upload_type: UploadType,
    stage: IngestionStage,
}

impl IngestionContext {
    fn advance(&mut self, stage: IngestionStage) {
        debug!("Dataset {}: {} -> {}", self.dataset_id, self.stage, stage);
        self.stage = stage;
    }
}

/// Ingestion Orchestrator - Coordinates detection, persistence, conversion,
/// schema extraction and the catalog commit.
pub struct IngestionOrchestrator {
    data_root: PathBuf,
    raw_store: RawStore,
    converter: CsvConverter,
    catalog: Arc<MetadataRepository>,
}

impl IngestionOrchestrator {
    /// Creates `data_root` if it is missing.
    pub fn new(data_root: impl Into<PathBuf>, catalog: Arc<MetadataRepository>) -> Result<Self> {
        Self::with_raw_store(data_root, RawStore::new(), catalog)
    }

    pub fn with_raw_store(
        data_root: impl Into<PathBuf>,
        raw_store: RawStore,
        catalog: Arc<MetadataRepository>,
    ) -> Result<Self> {
        let data_root = data_root.into();
        fs::create_dir_all(&data_root).map_err(|e| {
            IngestError::Storage(format!(
                "Failed to create data root {}: {}",
                data_root.display(),
                e
            ))
        })?;

        Ok(Self {
            data_root,
            raw_store,
            converter: CsvConverter::new(),
            catalog,
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn catalog(&self) -> &Arc<MetadataRepository> {
        &self.catalog
    }

    /// Directory of one dataset under the data root.
    ///
    /// Fails with `InvalidInput` for ids that are not a single plain path
    /// component.
    pub fn dataset_dir(&self, dataset_id: &DatasetId) -> Result<PathBuf> {
        dataset_id.validate()?;
        Ok(self.data_root.join(dataset_id.as_str()))
    }

    pub fn ingest<R: Read>(&self, filename: &str, stream: R) -> Result<DatasetRecord> {
        self.ingest_with_options(filename, stream, &IngestionOptions::default())
    }

    /// Ingest one upload with explicit deadline/cancellation.
    pub fn ingest_with_options<R: Read>(
        &self,
        filename: &str,
        stream: R,
        options: &IngestionOptions,
    ) -> Result<DatasetRecord> {
        self.ingest_as(DatasetId::generate(), filename, stream, options)
    }

    /// Ingest under a caller-chosen id. A reused id fails with `Conflict`.
    pub fn ingest_as<R: Read>(
        &self,
        dataset_id: DatasetId,
        filename: &str,
        stream: R,
        options: &IngestionOptions,
    ) -> Result<DatasetRecord> {
        if filename.trim().is_empty() {
            return Err(IngestError::InvalidInput("No file provided".to_string()));
        }
        let dataset_dir = self.dataset_dir(&dataset_id)?;

        let upload_type = detect_upload_type(filename);
        let pipeline = Pipeline::for_upload(upload_type)
            .ok_or(IngestError::Unsupported(upload_type))?;

        let mut stream = BufReader::with_capacity(self.raw_store.chunk_size(), stream);
        if stream.fill_buf()?.is_empty() {
            return Err(IngestError::InvalidInput(format!("{} is empty", filename)));
        }
        options.check("type detection")?;

        self.allocate_dir(&dataset_id, &dataset_dir)?;

        let mut ctx = IngestionContext {
            dataset_id,
            dataset_dir,
            upload_type,
            stage: IngestionStage::Start,
        };
        ctx.advance(IngestionStage::TypeDetected);

        match self.run(&mut ctx, pipeline, filename, stream, options) {
            Ok(record) => {
                ctx.advance(IngestionStage::CatalogCommitted);
                info!(
                    "Ingested {} as dataset {} ({}, {} bytes, {} tables)",
                    filename,
                    record.dataset_id,
                    record.upload_type,
                    record.raw_byte_size,
                    record.table_names().count()
                );
                Ok(record)
            }
            Err(e) => {
                let reached = ctx.stage;
                ctx.advance(IngestionStage::Failed);
                warn!(
                    "Ingestion of {} as dataset {} failed after {}: {}",
                    filename, ctx.dataset_id, reached, e
                );
                if !e.is_uncataloged() {
                    remove_dataset_dir(&ctx.dataset_dir);
                }
                Err(e)
            }
        }
    }

    fn allocate_dir(&self, dataset_id: &DatasetId, dataset_dir: &Path) -> Result<()> {
        match fs::create_dir(dataset_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                IngestError::Conflict(format!("Dataset directory for {} already exists", dataset_id)),
            ),
            Err(e) => Err(IngestError::Storage(format!(
                "Failed to create {}: {}",
                dataset_dir.display(),
                e
            ))),
        }
    }

    fn run<R: Read>(
        &self,
        ctx: &mut IngestionContext,
        pipeline: Pipeline,
        filename: &str,
        stream: R,
        options: &IngestionOptions,
    ) -> Result<DatasetRecord> {
        let raw = self
            .raw_store
            .persist_with(&ctx.dataset_dir, filename, stream, options)?;
        ctx.advance(IngestionStage::RawPersisted);

        let tables = self
            .build_tables(ctx, pipeline, &raw, options)
            .map_err(|e| uncataloged(&ctx.dataset_id, &raw.path, e))?;

        options.check("catalog commit")?;

        let record = DatasetRecord::new(ctx.dataset_id.clone(), ctx.upload_type, raw.byte_count, tables);
        self.catalog
            .insert(&record)
            .map_err(|e| uncataloged(&ctx.dataset_id, &raw.path, e))?;

        Ok(record)
    }

    fn build_tables(
        &self,
        ctx: &mut IngestionContext,
        pipeline: Pipeline,
        raw: &StoredFile,
        options: &IngestionOptions,
    ) -> Result<BTreeMap<String, DatasetTable>> {
        options.check("conversion")?;

        let (schemas, location): (BTreeMap<String, TableSchema>, PathBuf) = match pipeline {
            Pipeline::Delimited => {
                let artifact = self.converter.convert(&raw.path)?;
                ctx.advance(IngestionStage::Converted);
                options.check("schema extraction")?;
                (describe_columnar(&artifact.path)?, artifact.path)
            }
            Pipeline::Embedded => (describe_relational(&raw.path)?, raw.path.clone()),
        };
        ctx.advance(IngestionStage::SchemaExtracted);

        Ok(schemas
            .into_iter()
            .map(|(name, schema)| {
                let table = DatasetTable {
                    location: location.clone(),
                    schema,
                };
                (name, table)
            })
            .collect())
    }
}

/// Storage-class failures after the raw write leave data on disk that no
/// catalog row points at.
fn uncataloged(dataset_id: &DatasetId, raw_path: &Path, err: IngestError) -> IngestError {
    match err {
        IngestError::Storage(_) | IngestError::Conflict(_) => IngestError::Uncataloged {
            dataset_id: dataset_id.clone(),
            raw_path: raw_path.to_path_buf(),
            source: Box::new(err),
        },
        other => other,
    }
}

fn remove_dataset_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clean up {}: {}", dir.display(), e);
        }
    }
}
