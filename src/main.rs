use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dataset_ingest::{DatasetId, DatasetService, IngestConfig, IngestionOptions};
use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dataset-ingest")]
#[command(about = "Upload files into a cataloged dataset store")]
struct Args {
    /// Directory holding dataset directories (or set DATA_ROOT)
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// SQLite catalog file (or set METADATA_DB)
    #[arg(long, global = true)]
    metadata_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one file and print its catalog record
    Ingest {
        file: PathBuf,

        /// Name to store the upload under (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Print one catalog record
    Show { dataset_id: String },
    /// Print every catalog record
    List,
    /// Remove a dataset and its files
    Delete { dataset_id: String },
    /// List dataset directories that have no catalog record
    Orphans,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dataset_ingest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = IngestConfig::from_env()?;
    if let Some(root) = args.data_root {
        config = config.with_data_root(root);
    }
    if let Some(db) = args.metadata_db {
        config = config.with_metadata_db(db);
    }

    let service = DatasetService::open(&config)?;

    match args.command {
        Command::Ingest {
            file,
            name,
            timeout_secs,
        } => {
            let filename = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .with_context(|| format!("{} has no usable file name", file.display()))?,
            };
            let stream = File::open(&file)
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let mut options = IngestionOptions::default();
            if let Some(secs) = timeout_secs {
                options = options.with_deadline(Instant::now() + Duration::from_secs(secs));
            }

            info!("Ingesting {} as {}", file.display(), filename);
            let record = service.ingest_with_options(filename, stream, options).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Show { dataset_id } => {
            let record = service.get_dataset(&DatasetId::new(dataset_id)).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::List => {
            let records = service.list_datasets().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Delete { dataset_id } => {
            let record = service.delete_dataset(&DatasetId::new(dataset_id)).await?;
            println!("Deleted dataset {}", record.dataset_id);
        }
        Command::Orphans => {
            for dir in service.uncataloged_dirs().await? {
                println!("{}", dir.display());
            }
        }
    }

    Ok(())
}
