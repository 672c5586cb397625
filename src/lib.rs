//! Dataset ingestion library
//!
//! Accepts uploaded files, stores them under a per-dataset directory,
//! converts delimited text to parquet, extracts table schemas and records
//! everything in a SQLite catalog.

pub mod config;
pub mod dataset;
pub mod dataset_service;
pub mod db;
pub mod error;
pub mod ingestion;

pub use config::IngestConfig;
pub use dataset::{ColumnSpec, DatasetId, DatasetRecord, DatasetTable, TableSchema, UploadType};
pub use dataset_service::DatasetService;
pub use db::MetadataRepository;
pub use error::{ErrorKind, IngestError, Result};
pub use ingestion::{IngestionOptions, IngestionOrchestrator};
