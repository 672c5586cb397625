//! Format Detector - Extension-based upload classification

use crate::dataset::UploadType;
use std::path::Path;

/// Classify an upload from its filename.
///
/// Only the last suffix counts, compared case-insensitively. Hidden files such
/// as `.csv` have no extension and resolve to `Unknown`.
pub fn detect_upload_type(filename: &str) -> UploadType {
    let extension = match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return UploadType::Unknown,
    };

    match extension.as_str() {
        "csv" => UploadType::Csv,
        "json" => UploadType::Json,
        "jsonl" => UploadType::Jsonl,
        "sqlite" => UploadType::Sqlite,
        "db" => UploadType::Db,
        "sql_dump" | "sql" | "dump" => UploadType::SqlDump,
        _ => UploadType::Unknown,
    }
}

/// Ingestion branch selected for an upload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Delimited text converted to one columnar table.
    Delimited,
    /// Embedded relational file whose tables are described in place.
    Embedded,
}

impl Pipeline {
    /// `None` for types detected but not wired to a branch yet.
    pub fn for_upload(upload_type: UploadType) -> Option<Pipeline> {
        match upload_type {
            UploadType::Csv => Some(Pipeline::Delimited),
            UploadType::Sqlite | UploadType::Db => Some(Pipeline::Embedded),
            UploadType::Json | UploadType::Jsonl | UploadType::SqlDump | UploadType::Unknown => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_known_extensions() {
        assert_eq!(detect_upload_type("sales.csv"), UploadType::Csv);
        assert_eq!(detect_upload_type("events.json"), UploadType::Json);
        assert_eq!(detect_upload_type("events.jsonl"), UploadType::Jsonl);
        assert_eq!(detect_upload_type("shop.sqlite"), UploadType::Sqlite);
        assert_eq!(detect_upload_type("shop.db"), UploadType::Db);
        assert_eq!(detect_upload_type("backup.sql_dump"), UploadType::SqlDump);
        assert_eq!(detect_upload_type("backup.sql"), UploadType::SqlDump);
    }

    #[test]
    fn test_detect_is_case_insensitive() {
        assert_eq!(detect_upload_type("a.CSV"), detect_upload_type("a.csv"));
        assert_eq!(detect_upload_type("Shop.SQLite"), UploadType::Sqlite);
    }

    #[test]
    fn test_detect_uses_last_suffix_only() {
        assert_eq!(detect_upload_type("sales.csv.gz"), UploadType::Unknown);
        assert_eq!(detect_upload_type("archive.json.csv"), UploadType::Csv);
    }

    #[test]
    fn test_detect_without_extension() {
        assert_eq!(detect_upload_type("README"), UploadType::Unknown);
        assert_eq!(detect_upload_type(".csv"), UploadType::Unknown);
        assert_eq!(detect_upload_type(""), UploadType::Unknown);
        assert_eq!(detect_upload_type("trailing."), UploadType::Unknown);
    }

    #[test]
    fn test_detect_is_deterministic() {
        for name in ["x.csv", "x.parquet", ".hidden", "y.DB"] {
            assert_eq!(detect_upload_type(name), detect_upload_type(name));
        }
    }

    #[test]
    fn test_pipeline_dispatch() {
        assert_eq!(Pipeline::for_upload(UploadType::Csv), Some(Pipeline::Delimited));
        assert_eq!(Pipeline::for_upload(UploadType::Db), Some(Pipeline::Embedded));
        assert_eq!(Pipeline::for_upload(UploadType::Sqlite), Some(Pipeline::Embedded));
        assert_eq!(Pipeline::for_upload(UploadType::Jsonl), None);
        assert_eq!(Pipeline::for_upload(UploadType::Unknown), None);
    }
}
