use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::{DatasetId, UploadType};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Malformed source: {0}")]
    MalformedSource(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Unsupported upload type: {0}")]
    Unsupported(UploadType),

    #[error("Ingestion cancelled: {0}")]
    Cancelled(String),

    /// Raw bytes reached disk but no catalog row exists for them.
    #[error("Dataset {dataset_id} was uploaded to {} but not cataloged: {source}", raw_path.display())]
    Uncataloged {
        dataset_id: DatasetId,
        raw_path: PathBuf,
        #[source]
        source: Box<IngestError>,
    },
}

/// Flat classification handed to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    MalformedSource,
    StorageFailure,
    Unsupported,
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidInput(_) => ErrorKind::InvalidInput,
            IngestError::NotFound(_) => ErrorKind::NotFound,
            IngestError::Conflict(_) => ErrorKind::Conflict,
            IngestError::MalformedSource(_) => ErrorKind::MalformedSource,
            IngestError::Storage(_) => ErrorKind::StorageFailure,
            IngestError::Unsupported(_) => ErrorKind::Unsupported,
            IngestError::Cancelled(_) => ErrorKind::Cancelled,
            IngestError::Uncataloged { source, .. } => source.kind(),
        }
    }

    /// True when the upload was written to disk but never became discoverable.
    pub fn is_uncataloged(&self) -> bool {
        matches!(self, IngestError::Uncataloged { .. })
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        IngestError::Storage(format!("Catalog error: {}", err))
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Storage(format!("Catalog encoding error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
