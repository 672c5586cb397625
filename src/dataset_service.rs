//! Dataset Service - Async facade over ingestion and the catalog
//!
//! Transport layers (HTTP handlers, the CLI) hold a cloned `DatasetService`.
//! All filesystem and SQLite work runs on the blocking pool.

use crate::config::IngestConfig;
use crate::dataset::{DatasetId, DatasetRecord};
use crate::db::MetadataRepository;
use crate::error::{IngestError, Result};
use crate::ingestion::{IngestionOptions, IngestionOrchestrator, RawStore};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DatasetService {
    orchestrator: Arc<IngestionOrchestrator>,
    catalog: Arc<MetadataRepository>,
}

impl DatasetService {
    /// Open the catalog and data root named by `config`.
    pub fn open(config: &IngestConfig) -> Result<Self> {
        let catalog = Arc::new(MetadataRepository::open(&config.metadata_db)?);
        let orchestrator = IngestionOrchestrator::with_raw_store(
            config.data_root.clone(),
            RawStore::with_chunk_size(config.chunk_size),
            Arc::clone(&catalog),
        )?;

        info!(
            "Dataset service ready (data root {}, catalog {})",
            config.data_root.display(),
            config.metadata_db.display()
        );
        Ok(Self::from_parts(orchestrator))
    }

    pub fn from_parts(orchestrator: IngestionOrchestrator) -> Self {
        let catalog = Arc::clone(orchestrator.catalog());
        Self {
            orchestrator: Arc::new(orchestrator),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<MetadataRepository> {
        &self.catalog
    }

    pub async fn ingest<R>(&self, filename: impl Into<String>, stream: R) -> Result<DatasetRecord>
    where
        R: Read + Send + 'static,
    {
        self.ingest_with_options(filename, stream, IngestionOptions::default())
            .await
    }

    pub async fn ingest_with_options<R>(
        &self,
        filename: impl Into<String>,
        stream: R,
        options: IngestionOptions,
    ) -> Result<DatasetRecord>
    where
        R: Read + Send + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        let filename = filename.into();
        blocking(move || orchestrator.ingest_with_options(&filename, stream, &options)).await
    }

    pub async fn get_dataset(&self, dataset_id: &DatasetId) -> Result<DatasetRecord> {
        let catalog = Arc::clone(&self.catalog);
        let dataset_id = dataset_id.clone();
        blocking(move || catalog.get(&dataset_id)).await
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetRecord>> {
        let catalog = Arc::clone(&self.catalog);
        blocking(move || catalog.list()).await
    }

    /// Remove the catalog row, then the dataset directory.
    ///
    /// Once the row is gone the dataset is unreachable; a directory that
    /// fails to delete is only logged and shows up in `uncataloged_dirs`.
    /// Rows whose id is not a valid directory name are removed without
    /// touching the filesystem.
    pub async fn delete_dataset(&self, dataset_id: &DatasetId) -> Result<DatasetRecord> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let dataset_id = dataset_id.clone();

        blocking(move || {
            let catalog = orchestrator.catalog();
            let record = catalog.get(&dataset_id)?;
            let dir = orchestrator.dataset_dir(&dataset_id);

            if !catalog.delete(&dataset_id)? {
                return Err(IngestError::NotFound(format!(
                    "Dataset not found: {}",
                    dataset_id
                )));
            }

            match dir {
                Ok(dir) => {
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!("Failed to remove {}: {}", dir.display(), e);
                        }
                    }
                }
                Err(e) => warn!("Skipping directory removal for {:?}: {}", dataset_id.as_str(), e),
            }
            info!("Deleted dataset {:?}", dataset_id.as_str());
            Ok(record)
        })
        .await
    }

    /// Dataset directories with no catalog row, sorted by path.
    ///
    /// Includes directories of ingestions still in flight.
    pub async fn uncataloged_dirs(&self) -> Result<Vec<PathBuf>> {
        let catalog = Arc::clone(&self.catalog);
        let data_root = self.orchestrator.data_root().to_path_buf();

        blocking(move || {
            let mut orphans = Vec::new();
            for entry in fs::read_dir(&data_root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    orphans.push(entry.path());
                    continue;
                };
                if !catalog.contains(&DatasetId::new(name))? {
                    orphans.push(entry.path());
                }
            }
            orphans.sort();
            Ok(orphans)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::Storage(format!("Blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn service(dir: &std::path::Path) -> DatasetService {
        let config = IngestConfig::default()
            .with_data_root(dir.join("datasets"))
            .with_metadata_db(dir.join("metadata.db"));
        DatasetService::open(&config).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_then_get_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(temp_dir.path());

        let record = svc
            .ingest("people.csv", Cursor::new(b"name,age\nann,31\nbo,27\n".to_vec()))
            .await
            .unwrap();

        assert_eq!(svc.get_dataset(&record.dataset_id).await.unwrap(), record);
        let all = svc.list_datasets().await.unwrap();
        assert_eq!(all, vec![record]);
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(temp_dir.path());

        let record = svc
            .ingest("people.csv", Cursor::new(b"name\nann\n".to_vec()))
            .await
            .unwrap();
        let dir = temp_dir.path().join("datasets").join(record.dataset_id.as_str());
        assert!(dir.is_dir());

        svc.delete_dataset(&record.dataset_id).await.unwrap();

        assert!(!dir.exists());
        let err = svc.get_dataset(&record.dataset_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = svc.delete_dataset(&record.dataset_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_with_unusable_id_keeps_data_root() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(temp_dir.path());

        let kept = svc
            .ingest("people.csv", Cursor::new(b"name\nann\n".to_vec()))
            .await
            .unwrap();
        let mut stray = kept.clone();
        stray.dataset_id = DatasetId::new("");
        svc.catalog().insert(&stray).unwrap();

        svc.delete_dataset(&DatasetId::new("")).await.unwrap();

        let data_root = temp_dir.path().join("datasets");
        assert!(data_root.join(kept.dataset_id.as_str()).is_dir());
        assert_eq!(svc.list_datasets().await.unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn test_uncataloged_dirs_lists_only_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(temp_dir.path());

        svc.ingest("people.csv", Cursor::new(b"name\nann\n".to_vec()))
            .await
            .unwrap();
        let orphan = temp_dir.path().join("datasets").join("left-behind");
        fs::create_dir(&orphan).unwrap();
        fs::write(orphan.join("x.csv"), b"a\n1\n").unwrap();

        assert_eq!(svc.uncataloged_dirs().await.unwrap(), vec![orphan]);
    }
}
