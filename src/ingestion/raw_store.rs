//! Raw Store - Persists uploads verbatim under a dataset directory

use crate::error::{IngestError, Result};
use crate::ingestion::IngestionOptions;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default copy chunk (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Result of a successful raw write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub byte_count: u64,
}

/// Raw Store - stream-copies an upload in fixed-size chunks.
#[derive(Clone, Debug)]
pub struct RawStore {
    chunk_size: usize,
}

impl RawStore {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn persist<R: Read>(&self, target_dir: &Path, filename: &str, stream: R) -> Result<StoredFile> {
        self.persist_with(target_dir, filename, stream, &IngestionOptions::default())
    }

    /// Copy `stream` to `target_dir/<filename>`.
    ///
    /// `target_dir` must already exist. Bytes go to a `.partial` sibling first and
    /// are renamed into place once flushed, so the final name only ever holds a
    /// complete upload.
    pub fn persist_with<R: Read>(
        &self,
        target_dir: &Path,
        filename: &str,
        mut stream: R,
        options: &IngestionOptions,
    ) -> Result<StoredFile> {
        if !target_dir.is_dir() {
            return Err(IngestError::NotFound(format!(
                "Target directory does not exist: {}",
                target_dir.display()
            )));
        }

        let file_name = stored_file_name(filename)?;
        let final_path = target_dir.join(&file_name);
        let partial_path = target_dir.join(format!(".{}.partial", file_name));

        let result = self.copy_chunks(&partial_path, &mut stream, options);
        let byte_count = match result {
            Ok(count) => count,
            Err(e) => {
                discard(&partial_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial_path, &final_path) {
            discard(&partial_path);
            return Err(IngestError::Storage(format!(
                "Failed to move upload into place at {}: {}",
                final_path.display(),
                e
            )));
        }

        debug!("Persisted {} bytes to {}", byte_count, final_path.display());

        Ok(StoredFile {
            path: final_path,
            byte_count,
        })
    }

    fn copy_chunks<R: Read>(
        &self,
        path: &Path,
        stream: &mut R,
        options: &IngestionOptions,
    ) -> Result<u64> {
        let mut file = File::create(path).map_err(|e| {
            IngestError::Storage(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;

        loop {
            options.check("raw persistence")?;

            let read = match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(IngestError::Storage(format!("Failed to read upload: {}", e)))
                }
            };

            file.write_all(&buffer[..read]).map_err(|e| {
                IngestError::Storage(format!("Failed to write {}: {}", path.display(), e))
            })?;
            written += read as u64;
        }

        file.flush()?;
        file.sync_all()?;

        Ok(written)
    }
}

impl Default for RawStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Final path component of the client-supplied name.
fn stored_file_name(filename: &str) -> Result<String> {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngestError::InvalidInput(format!("Unusable filename: {:?}", filename)))
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove partial upload {}: {}", path.display(), e);
        }
    }
}
