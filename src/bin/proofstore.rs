//! Command-line front end for the storage client
//!
//! Usage:
//!   proofstore [--config <file>] upload <file> [--name <name>] [--mime <type>]
//!   proofstore [--config <file>] download <id> [--name <name>]
//!   proofstore stats
//!   proofstore validate <id>

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proofstore::upload::ProgressFn;
use proofstore::{hash, ClientConfig, DeriveMode, HashDeriver, StorageClient, UploadFile};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "proofstore")]
#[command(about = "Store files by content identifier with local fallback", long_about = None)]
struct Cli {
    /// JSON config file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print the result
    Upload {
        file: PathBuf,
        /// Display name. Defaults to the file name.
        #[arg(short, long)]
        name: Option<String>,
        /// Override the MIME type guessed from the name
        #[arg(long = "mime")]
        mime_type: Option<String>,
    },
    /// Resolve an identifier and write a preview
    View {
        id: String,
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Resolve an identifier and save it to the downloads directory
    Download {
        id: String,
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Print usage counters
    Stats,
    /// Check whether a string is a well-formed identifier
    Validate { id: String },
    /// Derive the local identifier for a file without uploading
    Derive {
        file: PathBuf,
        #[arg(long)]
        pool: bool,
    },
    /// List cached identifiers
    List,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open(config: Option<&PathBuf>) -> anyhow::Result<StorageClient> {
    let config = match config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    }
    .apply_env()?;
    Ok(StorageClient::from_config(&config).await?)
}

async fn read_file(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let client = match cli.command {
        Command::Validate { id } => return print_json(&hash::validate(&id)),
        Command::Derive { file, pool } => {
            let bytes = read_file(&file).await?;
            let mode = if pool { DeriveMode::Pool } else { DeriveMode::Digest };
            println!("{}", HashDeriver::new(mode).derive(&bytes.into()).await);
            return Ok(());
        }
        Command::Upload {
            file,
            name,
            mime_type,
        } => {
            let client = open(cli.config.as_ref()).await?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let mut upload = UploadFile::new(read_file(&file).await?, name);
            if let Some(mime_type) = mime_type {
                upload = upload.with_mime_type(mime_type);
            }
            let progress: &ProgressFn = &|fraction| log::debug!("upload {:>3.0}%", fraction * 100.0);
            print_json(&client.upload(upload, Some(progress)).await)?;
            client
        }
        Command::View { id, name } => {
            let client = open(cli.config.as_ref()).await?;
            print_json(&client.view(&id, &name).await)?;
            client
        }
        Command::Download { id, name } => {
            let client = open(cli.config.as_ref()).await?;
            print_json(&client.download(&id, &name).await)?;
            client
        }
        Command::Stats => {
            let client = open(cli.config.as_ref()).await?;
            let stats = client.get_stats().await;
            print_json(&stats)?;
            println!("success rate: {:.1}%", stats.success_rate());
            client
        }
        Command::List => {
            let client = open(cli.config.as_ref()).await?;
            for id in client.cached_ids().await? {
                println!("{}", id);
            }
            client
        }
    };

    client.teardown().await;
    Ok(())
}
