//! Ingestion Module
//!
//! Turns one uploaded file into one cataloged dataset:
//! - Extension-based type detection
//! - Chunked raw persistence
//! - Delimited text to parquet conversion
//! - Schema extraction from parquet or embedded SQLite files

pub mod csv_converter;
pub mod orchestrator;
pub mod raw_store;
pub mod schema_extractor;
pub mod upload_type;

pub use csv_converter::CsvConverter;
pub use orchestrator::{IngestionOrchestrator, IngestionStage};
pub use raw_store::{RawStore, StoredFile};
pub use upload_type::{detect_upload_type, Pipeline};

use crate::error::{IngestError, Result};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied limits for a single ingestion.
#[derive(Clone, Debug, Default)]
pub struct IngestionOptions {
    /// Abort if the pipeline has not reached the catalog commit by this instant.
    pub deadline: Option<Instant>,
    pub cancellation: Option<CancellationToken>,
}

impl IngestionOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Fails with `Cancelled` once the token fires or the deadline passes.
    pub fn check(&self, stage: &str) -> Result<()> {
        if let Some(token) = &self.cancellation {
            if token.is_cancelled() {
                return Err(IngestError::Cancelled(format!("cancelled during {}", stage)));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(IngestError::Cancelled(format!(
                    "deadline exceeded during {}",
                    stage
                )));
            }
        }
        Ok(())
    }
}
