//! Operator tool for inspecting and maintaining tenant storage
//!
//! Usage: cargo run --bin storage_admin -- <command>
//!
//! Uses the same environment configuration as the server (`STORAGE_TYPE`,
//! `BLOB_STORAGE_PATH`, `S3_STORAGE_*`, ...). Paths are given as segments,
//! e.g. `list <orgId> <chatflowId>`.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use flowstore::config::StorageSettings;
use flowstore::logging::{flush_object_logs, init_tracing};
use flowstore::models::bytes_to_megabytes;
use flowstore::storage::{create_storage_provider, storage_config_from_settings, StorageProvider};

#[derive(Parser)]
#[command(name = "storage_admin")]
#[command(about = "Inspect and maintain tenant file storage")]
struct Args {
    /// Also attach the backend's log sinks (files or uploaded log objects)
    #[arg(long)]
    log_sinks: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the active backend configuration (no secrets)
    Info,
    /// Total usage of an organization
    Size { org_id: String },
    /// List every file under a prefix
    List {
        #[arg(required = true)]
        segments: Vec<String>,
    },
    /// Read a file, migrating it from its legacy location if needed
    Get {
        file_name: String,
        #[arg(required = true)]
        segments: Vec<String>,
        /// Write the bytes here instead of printing a summary
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a local file under a prefix
    Put {
        source: PathBuf,
        #[arg(required = true)]
        segments: Vec<String>,
        /// Stored filename (defaults to the source filename)
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete one file; the last segment is the filename
    RemoveFile {
        #[arg(required = true)]
        segments: Vec<String>,
    },
    /// Delete everything under a prefix
    RemoveFolder {
        #[arg(required = true)]
        segments: Vec<String>,
        /// Only show what would be deleted
        #[arg(short, long)]
        dry_run: bool,
    },
}

fn as_refs(segments: &[String]) -> Vec<&str> {
    segments.iter().map(String::as_str).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = StorageSettings::from_env()?;
    let config = storage_config_from_settings(&settings)?;
    let storage = create_storage_provider(config).await?;

    if args.log_sinks {
        init_tracing(storage.as_ref(), &settings.logging)?;
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let outcome = run(args.command, storage.as_ref()).await;

    // Buffered log objects are lost unless drained before exit
    if args.log_sinks {
        if let Err(e) = flush_object_logs().await {
            eprintln!("Failed to upload final log batches: {}", e);
        }
    }

    outcome
}

async fn run(command: Command, storage: &dyn StorageProvider) -> Result<()> {
    match command {
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&storage.config_summary())?);
        }
        Command::Size { org_id } => {
            let bytes = storage.get_storage_size(&org_id).await?;
            println!("{}: {} bytes ({:.3} MB)", org_id, bytes, bytes_to_megabytes(bytes));
        }
        Command::List { segments } => {
            let files = storage.get_files_list_from_storage(&as_refs(&segments)).await?;
            for file in &files {
                println!("{:>12}  {}", file.size, file.path);
            }
            info!("📋 {} files under {}", files.len(), segments.join("/"));
        }
        Command::Get { file_name, segments, output } => {
            let data = storage.get_file_from_storage(&file_name, &as_refs(&segments)).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data).await?;
                    info!("💾 Wrote {} bytes to {}", data.len(), path.display());
                }
                None => println!("{}: {} bytes", file_name, data.len()),
            }
        }
        Command::Put { source, segments, name } => {
            let file_name = match name {
                Some(name) => name,
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| anyhow!("Cannot derive a filename from {}", source.display()))?,
            };
            let data = tokio::fs::read(&source).await?;
            let mime = mime_guess::from_path(&source).first_or_octet_stream().to_string();

            let result = storage
                .add_single_file_to_storage(&mime, &data, &file_name, &as_refs(&segments))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::RemoveFile { segments } => {
            let result = storage.remove_specific_file_from_storage(&as_refs(&segments)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::RemoveFolder { segments, dry_run } => {
            let refs = as_refs(&segments);
            if dry_run {
                let files = storage.get_files_list_from_storage(&refs).await?;
                info!("🔍 DRY RUN - Would delete {} files:", files.len());
                for file in &files {
                    info!("  - {} ({} bytes)", file.path, file.size);
                }
                return Ok(());
            }

            if refs.len() < 2 {
                warn!("Removing a whole organization folder: {}", segments.join("/"));
            }
            let result = storage.remove_folder_from_storage(&refs).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
