//! Dataset record model
//!
//! A `DatasetRecord` keeps every logical table together with its location and
//! column schema, so the `tables` and `schema` maps exposed to callers always
//! share the same key set. The flat document form (`DatasetDocument`) is what
//! gets serialized for callers and what the catalog splits into columns.

use crate::error::{IngestError, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Opaque dataset identifier, generated once per ingestion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids name a directory directly under the data root, so they must be a
    /// single plain path component.
    pub fn validate(&self) -> Result<()> {
        let id = self.0.as_str();
        let mut components = Path::new(id).components();
        let single_component = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();

        if id.is_empty() || id.contains(|c: char| c == '/' || c == '\\') || !single_component {
            return Err(IngestError::InvalidInput(format!(
                "Invalid dataset id: {:?}",
                id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical format of an upload, decided from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    Csv,
    Json,
    Jsonl,
    Sqlite,
    SqlDump,
    Db,
    Unknown,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::Csv => "csv",
            UploadType::Json => "json",
            UploadType::Jsonl => "jsonl",
            UploadType::Sqlite => "sqlite",
            UploadType::SqlDump => "sql_dump",
            UploadType::Db => "db",
            UploadType::Unknown => "unknown",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "csv" => Some(UploadType::Csv),
            "json" => Some(UploadType::Json),
            "jsonl" => Some(UploadType::Jsonl),
            "sqlite" => Some(UploadType::Sqlite),
            "sql_dump" => Some(UploadType::SqlDump),
            "db" => Some(UploadType::Db),
            "unknown" => Some(UploadType::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_tag: String,
}

/// Columns of one logical table, in source order.
///
/// Serialized as a JSON object `{column: type_tag}`. Column names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Fails if the name is already present.
    pub fn push(&mut self, name: impl Into<String>, type_tag: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(IngestError::MalformedSource(format!(
                "Duplicate column name: {}",
                name
            )));
        }
        self.columns.push(ColumnSpec {
            name,
            type_tag: type_tag.into(),
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.type_tag.as_str())
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for TableSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for column in &self.columns {
            map.serialize_entry(&column.name, &column.type_tag)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = TableSchema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to type tag")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<TableSchema, A::Error> {
                let mut schema = TableSchema::new();
                while let Some((name, type_tag)) = access.next_entry::<String, String>()? {
                    schema.push(name, type_tag).map_err(serde::de::Error::custom)?;
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// One logical table: where its data lives and what its columns are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetTable {
    pub location: PathBuf,
    pub schema: TableSchema,
}

/// Catalog unit of storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "DatasetDocument", try_from = "DatasetDocument")]
pub struct DatasetRecord {
    pub dataset_id: DatasetId,
    pub upload_type: UploadType,
    pub raw_byte_size: u64,
    tables: BTreeMap<String, DatasetTable>,
}

impl DatasetRecord {
    pub fn new(
        dataset_id: DatasetId,
        upload_type: UploadType,
        raw_byte_size: u64,
        tables: BTreeMap<String, DatasetTable>,
    ) -> Self {
        Self {
            dataset_id,
            upload_type,
            raw_byte_size,
            tables,
        }
    }

    /// Table name -> storage location.
    pub fn tables(&self) -> BTreeMap<String, PathBuf> {
        self.tables
            .iter()
            .map(|(name, table)| (name.clone(), table.location.clone()))
            .collect()
    }

    /// Table name -> column schema.
    pub fn schema(&self) -> BTreeMap<String, TableSchema> {
        self.tables
            .iter()
            .map(|(name, table)| (name.clone(), table.schema.clone()))
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&DatasetTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn location(&self, name: &str) -> Option<&Path> {
        self.tables.get(name).map(|t| t.location.as_path())
    }

    /// Encode the `tables` field as canonical JSON text.
    pub fn encode_tables(&self) -> Result<String> {
        encode_tables(&self.tables())
    }

    /// Encode the `schema` field as canonical JSON text.
    pub fn encode_schema(&self) -> Result<String> {
        encode_schema(&self.schema())
    }
}

/// Flat wire/catalog shape of a dataset record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDocument {
    pub dataset_id: DatasetId,
    pub upload_type: UploadType,
    pub raw_byte_size: u64,
    pub tables: BTreeMap<String, PathBuf>,
    pub schema: BTreeMap<String, TableSchema>,
}

impl From<DatasetRecord> for DatasetDocument {
    fn from(record: DatasetRecord) -> Self {
        let mut tables = BTreeMap::new();
        let mut schema = BTreeMap::new();
        for (name, table) in record.tables {
            tables.insert(name.clone(), table.location);
            schema.insert(name, table.schema);
        }

        DatasetDocument {
            dataset_id: record.dataset_id,
            upload_type: record.upload_type,
            raw_byte_size: record.raw_byte_size,
            tables,
            schema,
        }
    }
}

impl TryFrom<DatasetDocument> for DatasetRecord {
    type Error = IngestError;

    fn try_from(doc: DatasetDocument) -> Result<Self> {
        let DatasetDocument {
            dataset_id,
            upload_type,
            raw_byte_size,
            tables,
            mut schema,
        } = doc;

        if tables.len() != schema.len() || !tables.keys().all(|k| schema.contains_key(k)) {
            return Err(IngestError::Storage(format!(
                "Dataset {} has mismatched tables/schema keys",
                dataset_id
            )));
        }

        let tables = tables
            .into_iter()
            .map(|(name, location)| {
                let schema = schema.remove(&name).unwrap_or_default();
                (name, DatasetTable { location, schema })
            })
            .collect();

        Ok(DatasetRecord::new(dataset_id, upload_type, raw_byte_size, tables))
    }
}

pub fn encode_tables(tables: &BTreeMap<String, PathBuf>) -> Result<String> {
    Ok(serde_json::to_string(tables)?)
}

pub fn decode_tables(text: &str) -> Result<BTreeMap<String, PathBuf>> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_schema(schema: &BTreeMap<String, TableSchema>) -> Result<String> {
    Ok(serde_json::to_string(schema)?)
}

pub fn decode_schema(text: &str) -> Result<BTreeMap<String, TableSchema>> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> TableSchema {
        let mut schema = TableSchema::new();
        schema.push("region", "VARCHAR").unwrap();
        schema.push("amount", "FLOAT").unwrap();
        schema.push("sold_on", "DATE").unwrap();
        schema
    }

    fn sample_record() -> DatasetRecord {
        let mut tables = BTreeMap::new();
        tables.insert(
            "users".to_string(),
            DatasetTable {
                location: PathBuf::from("datasets/x/shop.db"),
                schema: sample_schema(),
            },
        );
        tables.insert(
            "orders".to_string(),
            DatasetTable {
                location: PathBuf::from("datasets/x/shop.db"),
                schema: TableSchema::new(),
            },
        );
        DatasetRecord::new(DatasetId::new("x"), UploadType::Sqlite, 2048, tables)
    }

    #[test]
    fn test_dataset_id_must_be_one_plain_component() {
        assert!(DatasetId::generate().validate().is_ok());
        assert!(DatasetId::new("sales-2024").validate().is_ok());
        assert!(DatasetId::new("v1.2").validate().is_ok());

        for bad in ["", ".", "..", "../x", "a/b", "a\\b", "/abs", "x/"] {
            let err = DatasetId::new(bad).validate().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput, "{:?}", bad);
        }
    }

    #[test]
    fn test_schema_keeps_column_order_through_json() {
        let schema = sample_schema();
        let text = serde_json::to_string(&schema).unwrap();
        assert_eq!(text, r#"{"region":"VARCHAR","amount":"FLOAT","sold_on":"DATE"}"#);

        let decoded: TableSchema = serde_json::from_str(&text).unwrap();
        let names: Vec<_> = decoded.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["region", "amount", "sold_on"]);
    }

    #[test]
    fn test_schema_rejects_duplicate_columns() {
        let mut schema = TableSchema::new();
        schema.push("id", "INT").unwrap();
        assert!(schema.push("id", "VARCHAR").is_err());
    }

    #[test]
    fn test_encoded_fields_decode_to_identical_maps() {
        let record = sample_record();

        let tables = decode_tables(&record.encode_tables().unwrap()).unwrap();
        let schema = decode_schema(&record.encode_schema().unwrap()).unwrap();

        assert_eq!(tables, record.tables());
        assert_eq!(schema, record.schema());
    }

    #[test]
    fn test_document_shape_has_matching_keys() {
        let record = sample_record();
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["upload_type"], "sqlite");
        assert_eq!(value["raw_byte_size"], 2048);
        let table_keys: Vec<_> = value["tables"].as_object().unwrap().keys().collect();
        let schema_keys: Vec<_> = value["schema"].as_object().unwrap().keys().collect();
        assert_eq!(table_keys, schema_keys);

        let back: DatasetRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_document_with_mismatched_keys_is_rejected() {
        let mut doc = DatasetDocument::from(sample_record());
        doc.schema.remove("orders");
        assert!(DatasetRecord::try_from(doc).is_err());
    }

    #[test]
    fn test_upload_type_tags_round_trip() {
        for upload_type in [
            UploadType::Csv,
            UploadType::Json,
            UploadType::Jsonl,
            UploadType::Sqlite,
            UploadType::SqlDump,
            UploadType::Db,
            UploadType::Unknown,
        ] {
            assert_eq!(UploadType::parse(upload_type.as_str()), Some(upload_type));
        }
        assert_eq!(UploadType::parse("parquet"), None);
    }
}
