//! Environment configuration
//!
//! Values come from the process environment (after loading `.env`), with
//! defaults that match a local single-node deployment.

use crate::error::{IngestError, Result};
use crate::ingestion::raw_store::DEFAULT_CHUNK_SIZE;
use std::path::PathBuf;

pub const DEFAULT_DATA_ROOT: &str = "datasets";
pub const DEFAULT_METADATA_DB: &str = "metadata.db";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestConfig {
    /// Directory holding one subdirectory per dataset
    pub data_root: PathBuf,
    /// SQLite catalog file
    pub metadata_db: PathBuf,
    /// Raw upload copy chunk in bytes
    pub chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            metadata_db: PathBuf::from(DEFAULT_METADATA_DB),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl IngestConfig {
    /// Load `.env` if present, then read `DATA_ROOT`, `METADATA_DB` and
    /// `UPLOAD_CHUNK_BYTES`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = non_empty(lookup("DATA_ROOT")) {
            config.data_root = PathBuf::from(root);
        }
        if let Some(db) = non_empty(lookup("METADATA_DB")) {
            config.metadata_db = PathBuf::from(db);
        }
        if let Some(raw) = non_empty(lookup("UPLOAD_CHUNK_BYTES")) {
            config.chunk_size = parse_chunk_size(&raw)?;
        }

        Ok(config)
    }

    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }

    pub fn with_metadata_db(mut self, metadata_db: impl Into<PathBuf>) -> Self {
        self.metadata_db = metadata_db.into();
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_chunk_size(raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(0) => Err(IngestError::InvalidInput(
            "UPLOAD_CHUNK_BYTES must be greater than zero".to_string(),
        )),
        Ok(n) => Ok(n),
        Err(e) => Err(IngestError::InvalidInput(format!(
            "UPLOAD_CHUNK_BYTES is not a byte count ({:?}): {}",
            raw, e
        ))),
    }
}
