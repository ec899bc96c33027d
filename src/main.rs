//! mediachunk - Chunked media storage over a local document store
//!
//! Usage:
//!   mediachunk init                          - Write a default configuration
//!   mediachunk upload <file> [--video]       - Encode and store a file
//!   mediachunk fetch <reference> -o <path>   - Resolve a reference to a file
//!   mediachunk delete <reference>            - Delete stored media
//!   mediachunk list                          - List stored records
//!   mediachunk sweep                         - Remove orphaned fragments
//!   mediachunk status                        - Show configuration and store status

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mediachunk::{
    cache::MediaCache,
    chunk::ManifestStatus,
    config::Config,
    media::{decode_data_uri, MediaKind, MediaReference, MediaService, ResourceHandle},
    store::{MediaRecord, SledStore},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mediachunk")]
#[command(version = "0.1.0")]
#[command(about = "Chunked media storage over a document store")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/mediachunk/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the data directory
    Init {
        /// Application id used to namespace collections
        #[arg(long)]
        app_id: Option<String>,
    },

    /// Encode and store a media file
    Upload {
        /// File to upload
        file: PathBuf,

        /// Store as video (no re-encoding, size ceiling applies)
        #[arg(long)]
        video: bool,
    },

    /// Resolve a stored reference and write the media to disk
    Fetch {
        /// Reference string (`chunked:<id>:<n>`, bare id, or data URI)
        reference: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Delete stored media and its fragments
    Delete {
        /// Reference string
        reference: String,
    },

    /// List stored records and manifests
    List,

    /// Remove fragments no manifest accounts for
    Sweep {
        /// Also remove pending uploads older than this many minutes
        #[arg(long)]
        stale_minutes: Option<u64>,
    },

    /// Show configuration and store status
    Status,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> anyhow::Result<()> {
    let command = match command {
        Commands::Init { app_id } => return cmd_init(config_path, app_id),
        other => other,
    };

    let config = Config::load_or_default(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime.block_on(run_with_store(command, &config, config_path))
}

async fn run_with_store(command: Commands, config: &Config, config_path: &Path) -> anyhow::Result<()> {
    let (service, sled) = open_service(config)?;

    let result = match command {
        Commands::Init { .. } => Ok(()),
        Commands::Upload { file, video } => cmd_upload(&service, &file, video).await,
        Commands::Fetch { reference, output } => cmd_fetch(&service, &reference, &output).await,
        Commands::Delete { reference } => cmd_delete(&service, &reference).await,
        Commands::List => cmd_list(&service).await,
        Commands::Sweep { stale_minutes } => cmd_sweep(&service, stale_minutes).await,
        Commands::Status => cmd_status(&service, config, config_path).await,
    };

    sled.flush().await?;
    result
}

fn open_service(config: &Config) -> anyhow::Result<(MediaService, Arc<SledStore>)> {
    config.ensure_directories()?;
    let db_path = config.store.data_dir.join("media.db");
    let sled = Arc::new(
        SledStore::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );
    let cache = Arc::new(MediaCache::new(&config.cache));
    let service = MediaService::new(config, sled.clone(), cache);
    Ok((service, sled))
}

fn cmd_init(config_path: &Path, app_id: Option<String>) -> anyhow::Result<()> {
    info!("Initializing mediachunk...");

    let mut config = Config::default();
    if let Some(app_id) = app_id {
        config.store.app_id = app_id;
    }
    config.validate()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;
    config.ensure_directories()?;

    info!("Configuration saved to {:?}", config_path);
    info!("Data directory: {:?}", config.store.data_dir);
    info!("Collections: {}", config.store.paths().manifests());

    Ok(())
}

async fn cmd_upload(service: &MediaService, file: &Path, video: bool) -> anyhow::Result<()> {
    let kind = if video { Some(MediaKind::Video) } else { None };
    let reference = service
        .upload_file(file, kind)
        .await
        .with_context(|| format!("uploading {}", file.display()))?;

    info!("Uploaded {}", file.display());
    println!("{}", reference);
    Ok(())
}

async fn cmd_fetch(service: &MediaService, raw: &str, output: &Path) -> anyhow::Result<()> {
    let reference = MediaReference::parse(raw)?;
    let handle = service.resolve(&reference).await?;

    let bytes = match &handle {
        ResourceHandle::Blob(blob) => blob.bytes.to_vec(),
        ResourceHandle::Url(url) if url.starts_with("data:") => decode_data_uri(url)?.bytes.to_vec(),
        ResourceHandle::Url(url) => bail!("{} is an external URL, nothing to download", url),
    };

    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Wrote {} bytes to {:?}", bytes.len(), output);
    Ok(())
}

async fn cmd_delete(service: &MediaService, raw: &str) -> anyhow::Result<()> {
    let reference = MediaReference::parse(raw)?;
    let report = service.delete(&reference).await?;

    if report.record_deleted || report.fragments_deleted > 0 {
        info!(
            "Deleted {} ({} fragments)",
            reference, report.fragments_deleted
        );
    } else {
        info!("Nothing stored for {}", reference);
    }
    Ok(())
}

async fn cmd_list(service: &MediaService) -> anyhow::Result<()> {
    let records = service.list().await?;

    if records.is_empty() {
        println!("No media stored");
        return Ok(());
    }

    for (id, record) in records {
        match record {
            MediaRecord::Direct(r) => {
                println!("{}  direct  {} chars", id, r.payload.len());
            }
            MediaRecord::Chunked(m) => {
                let status = match m.status {
                    ManifestStatus::Pending => "pending",
                    ManifestStatus::Complete => "complete",
                    ManifestStatus::Failed => "failed",
                };
                let reference = MediaReference::Chunked {
                    id: id.clone(),
                    fragment_count: m.fragment_count,
                };
                println!("{}  {}  {}", reference, status, m.fragment_count);
            }
        }
    }
    Ok(())
}

async fn cmd_sweep(service: &MediaService, stale_minutes: Option<u64>) -> anyhow::Result<()> {
    let stale = stale_minutes.map(|m| Duration::from_secs(m * 60));
    let report = service.sweep_orphans(stale).await?;

    println!("Fragments removed: {}", report.fragments_removed);
    println!("Manifests removed: {}", report.manifests_removed);
    Ok(())
}

async fn cmd_status(service: &MediaService, config: &Config, config_path: &Path) -> anyhow::Result<()> {
    let records = service.list().await?;
    let fragments = service.store().list_fragment_keys().await?;
    let chunked = records
        .iter()
        .filter(|(_, r)| matches!(r, MediaRecord::Chunked(_)))
        .count();

    println!("mediachunk Status");
    println!("=================");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Data directory: {:?}", config.store.data_dir);
    println!("Manifests: {}", config.store.paths().manifests());
    println!("Fragments: {}", config.store.paths().fragments());
    println!("Chunk size: {} chars", config.chunk.chunk_size);
    println!("Write pause: {} ms", config.chunk.write_pause_ms);
    println!("Read batch: {}", config.chunk.read_batch_size);
    println!("Max image width: {} px", config.encoder.max_image_width);
    println!("Max video size: {} MB", config.encoder.max_video_bytes / 1024 / 1024);
    println!();
    println!("Records: {} ({} chunked)", records.len(), chunked);
    println!("Fragment documents: {}", fragments.len());

    let stats = service.cache().stats();
    println!("Cache entries: {} ({} bytes)", stats.entries, stats.bytes);

    Ok(())
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
