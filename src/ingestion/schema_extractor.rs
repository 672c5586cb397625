//! Schema Extractor - Normalized table -> column -> type maps
//!
//! Two sources are supported:
//! - parquet artifacts written by the CSV converter (one table, keyed by file stem)
//! - embedded SQLite files (one entry per user table, ordered by name)

use crate::dataset::TableSchema;
use crate::error::{IngestError, Result};
use crate::ingestion::csv_converter::table_name_for;
use polars::prelude::*;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Type tag for columns whose declared type is absent.
///
/// SQLite allows untyped columns; this is a default, not an inferred fact.
pub const DEFAULT_TYPE_TAG: &str = "TEXT";

/// Describe a parquet artifact as a single-table schema map.
pub fn describe_columnar(path: &Path) -> Result<BTreeMap<String, TableSchema>> {
    let table_name = table_name_for(path)?;

    let frame_schema = LazyFrame::scan_parquet(path, ScanArgsParquet::default())
        .and_then(|lf| lf.schema())
        .map_err(|e| {
            IngestError::MalformedSource(format!(
                "Failed to read parquet schema from {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut schema = TableSchema::new();
    for field in frame_schema.iter_fields() {
        schema.push(field.name().to_string(), type_tag(field.data_type()))?;
    }

    debug!("Described {} with {} columns", path.display(), schema.len());

    let mut tables = BTreeMap::new();
    tables.insert(table_name, schema);
    Ok(tables)
}

/// Normalized tag for a Polars column type.
pub fn type_tag(dtype: &DataType) -> String {
    match dtype {
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "INT".to_string(),
        DataType::Float32 | DataType::Float64 => "FLOAT".to_string(),
        DataType::String | DataType::Null => "VARCHAR".to_string(),
        DataType::Date => "DATE".to_string(),
        DataType::Datetime(_, _) => "TIMESTAMP".to_string(),
        DataType::Time => "TIME".to_string(),
        DataType::Duration(_) => "INTERVAL".to_string(),
        DataType::Binary => "BLOB".to_string(),
        other => other.to_string().to_uppercase(),
    }
}

/// Table names of an embedded SQLite file, excluding `sqlite_` internals.
pub fn relational_table_names(db_path: &Path) -> Result<Vec<String>> {
    let conn = open_embedded(db_path)?;
    list_tables(&conn, db_path)
}

/// Describe every user table of an embedded SQLite file.
pub fn describe_relational(db_path: &Path) -> Result<BTreeMap<String, TableSchema>> {
    let conn = open_embedded(db_path)?;
    let mut tables = BTreeMap::new();

    for table in list_tables(&conn, db_path)? {
        let schema = describe_table(&conn, &table, db_path)?;
        debug!("Table {} has {} columns", table, schema.len());
        tables.insert(table, schema);
    }

    Ok(tables)
}

fn open_embedded(db_path: &Path) -> Result<Connection> {
    if !db_path.is_file() {
        return Err(IngestError::NotFound(format!(
            "Database file does not exist: {}",
            db_path.display()
        )));
    }

    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        IngestError::MalformedSource(format!("Failed to open {}: {}", db_path.display(), e))
    })
}

fn list_tables(conn: &Connection, db_path: &Path) -> Result<Vec<String>> {
    let fetch = || -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY name
            "#,
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    };

    fetch().map_err(|e| {
        IngestError::MalformedSource(format!(
            "{} is not a readable SQLite database: {}",
            db_path.display(),
            e
        ))
    })
}

fn describe_table(conn: &Connection, table: &str, db_path: &Path) -> Result<TableSchema> {
    let fetch = || -> rusqlite::Result<Vec<(String, Option<String>)>> {
        let mut stmt =
            conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    };

    let columns = fetch().map_err(|e| {
        IngestError::MalformedSource(format!(
            "Failed to introspect table {} in {}: {}",
            table,
            db_path.display(),
            e
        ))
    })?;

    let mut schema = TableSchema::new();
    for (name, declared) in columns {
        let type_tag = declared
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TYPE_TAG.to_string());
        schema.push(name, type_tag).map_err(|e| {
            IngestError::MalformedSource(format!("Table {} in {}: {}", table, db_path.display(), e))
        })?;
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs::File;
    use tempfile::TempDir;

    fn shop_db(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("shop.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL, note);
            CREATE TABLE orders (id INTEGER, user_id INTEGER, total REAL, placed_at DATETIME);
            INSERT INTO users (email) VALUES ('a@example.com');
            CREATE INDEX idx_orders_user ON orders(user_id);
            CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
            "#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_relational_tables_are_sorted_and_exclude_internal_objects() {
        let temp_dir = TempDir::new().unwrap();
        let db = shop_db(temp_dir.path());

        // AUTOINCREMENT adds `sqlite_sequence` to the catalog.
        let names = relational_table_names(&db).unwrap();
        assert_eq!(names, vec!["orders".to_string(), "users".to_string()]);
    }

    #[test]
    fn test_relational_schema_defaults_untyped_columns() {
        let temp_dir = TempDir::new().unwrap();
        let db = shop_db(temp_dir.path());

        let tables = describe_relational(&db).unwrap();
        let users = &tables["users"];
        assert_eq!(users.len(), 3);
        assert_eq!(users.get("id"), Some("INTEGER"));
        assert_eq!(users.get("email"), Some("TEXT"));
        assert_eq!(users.get("note"), Some(DEFAULT_TYPE_TAG));

        let orders = &tables["orders"];
        let names: Vec<_> = orders.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "user_id", "total", "placed_at"]);
        assert_eq!(orders.get("placed_at"), Some("DATETIME"));
        assert!(!tables.contains_key("big_orders"));
    }

    #[test]
    fn test_non_database_file_is_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fake.db");
        std::fs::write(&path, b"this is definitely not a sqlite database file at all").unwrap();

        let err = describe_relational(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSource);
    }

    #[test]
    fn test_missing_database_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = describe_relational(&temp_dir.path().join("missing.db")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_columnar_schema_reads_back_types() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.parquet");
        let mut df = df![
            "name" => ["a", "b"],
            "count" => [1i64, 2],
            "ratio" => [0.5f64, 0.25],
            "active" => [true, false]
        ]
        .unwrap();
        let mut file = File::create(&path).unwrap();
        ParquetWriter::new(&mut file).finish(&mut df).unwrap();

        let tables = describe_columnar(&path).unwrap();
        assert_eq!(tables.len(), 1);
        let schema = &tables["metrics"];
        assert_eq!(schema.get("name"), Some("VARCHAR"));
        assert_eq!(schema.get("count"), Some("INT"));
        assert_eq!(schema.get("ratio"), Some("FLOAT"));
        assert_eq!(schema.get("active"), Some("BOOLEAN"));
    }

    #[test]
    fn test_type_tags_are_never_empty() {
        for dtype in [
            DataType::Int32,
            DataType::Float32,
            DataType::String,
            DataType::Date,
            DataType::Null,
            DataType::List(Box::new(DataType::Int64)),
        ] {
            assert!(!type_tag(&dtype).is_empty());
        }
    }
}
