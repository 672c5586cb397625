//! CSV Converter - Delimited text to a single parquet table

use crate::error::{IngestError, Result};
use csv::{ReaderBuilder, StringRecord};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Subdirectory of a dataset directory that holds converted tables.
pub const COLUMNAR_DIR: &str = "parquet";

/// Converted table produced from one delimited file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnarArtifact {
    /// Logical table name (source file stem).
    pub table_name: String,
    pub path: PathBuf,
    pub row_count: usize,
}

/// CSV Converter
///
/// Validates the file with a strict `csv` pass (uniform column counts, UTF-8),
/// then lets Polars infer column types over every row and writes parquet.
#[derive(Clone, Debug)]
pub struct CsvConverter {
    delimiter: u8,
}

impl CsvConverter {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Convert `raw_path` into `<dataset_dir>/parquet/<stem>.parquet`.
    pub fn convert(&self, raw_path: &Path) -> Result<ColumnarArtifact> {
        let table_name = table_name_for(raw_path)?;
        let dataset_dir = raw_path.parent().ok_or_else(|| {
            IngestError::InvalidInput(format!("{} has no parent directory", raw_path.display()))
        })?;

        let row_count = self.validate(raw_path)?;

        let out_dir = dataset_dir.join(COLUMNAR_DIR);
        fs::create_dir_all(&out_dir)?;
        let final_path = out_dir.join(format!("{}.parquet", table_name));
        let partial_path = out_dir.join(format!(".{}.parquet.partial", table_name));

        if let Err(e) = self.write_parquet(raw_path, &partial_path) {
            discard_artifact(&partial_path, &out_dir);
            return Err(e);
        }
        if let Err(e) = fs::rename(&partial_path, &final_path) {
            discard_artifact(&partial_path, &out_dir);
            return Err(IngestError::Storage(format!(
                "Failed to move parquet into place at {}: {}",
                final_path.display(),
                e
            )));
        }

        info!(
            "Converted {} ({} rows) to {}",
            raw_path.display(),
            row_count,
            final_path.display()
        );

        Ok(ColumnarArtifact {
            table_name,
            path: final_path,
            row_count,
        })
    }

    /// Strict structural pass. Returns the number of data rows.
    fn validate(&self, raw_path: &Path) -> Result<usize> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .delimiter(self.delimiter)
            .from_path(raw_path)
            .map_err(|e| malformed(raw_path, e))?;

        let headers = rdr.headers().map_err(|e| malformed(raw_path, e))?.clone();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(IngestError::MalformedSource(format!(
                "{} has no header row",
                raw_path.display()
            )));
        }

        let mut seen = HashSet::new();
        for header in headers.iter() {
            if !seen.insert(header) {
                return Err(IngestError::MalformedSource(format!(
                    "{} repeats column {:?}",
                    raw_path.display(),
                    header
                )));
            }
        }

        let mut record = StringRecord::new();
        let mut rows = 0usize;
        while rdr.read_record(&mut record).map_err(|e| malformed(raw_path, e))? {
            rows += 1;
        }

        debug!(
            "Validated {}: {} columns, {} rows",
            raw_path.display(),
            headers.len(),
            rows
        );
        Ok(rows)
    }

    fn write_parquet(&self, raw_path: &Path, out_path: &Path) -> Result<()> {
        let mut df = LazyCsvReader::new(raw_path)
            .with_has_header(true)
            .with_separator(self.delimiter)
            .with_infer_schema_length(None)
            .with_try_parse_dates(true)
            .finish()
            .and_then(|lf| lf.collect())
            .map_err(|e| {
                IngestError::MalformedSource(format!(
                    "Failed to parse {}: {}",
                    raw_path.display(),
                    e
                ))
            })?;

        let mut file = File::create(out_path).map_err(|e| {
            IngestError::Storage(format!("Failed to create {}: {}", out_path.display(), e))
        })?;

        ParquetWriter::new(&mut file)
            .finish(&mut df)
            .map_err(|e| IngestError::Storage(format!("Failed to write parquet file: {}", e)))?;
        file.sync_all()?;

        Ok(())
    }
}

impl Default for CsvConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Logical table name for a source file: its base name without extension.
pub fn table_name_for(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::InvalidInput(format!("Cannot derive a table name from {}", path.display()))
        })
}

fn malformed(path: &Path, err: csv::Error) -> IngestError {
    IngestError::MalformedSource(format!("{}: {}", path.display(), err))
}

fn discard_artifact(partial_path: &Path, out_dir: &Path) {
    if partial_path.exists() {
        if let Err(e) = fs::remove_file(partial_path) {
            warn!("Failed to remove {}: {}", partial_path.display(), e);
        }
    }
    // Only succeeds when nothing else lives there.
    let _ = fs::remove_dir(out_dir);
}
