//! PhotoPush CLI - push a local photo tree into Dropbox.
//!
//! The local tree is the source of truth for what should exist remotely;
//! nothing is ever deleted on either side.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use photopush_storage::DropboxStore;
use photopush_sync::{SnapshotCache, SyncEngine};

use crate::config::{FileConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "photopush")]
#[command(about = "PhotoPush - one-way photo library upload to Dropbox")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Values that may also come from the settings file.
#[derive(Args)]
struct SettingsArgs {
    /// Local folder to upload.
    #[arg(long, global = true)]
    local_path: Option<PathBuf>,

    /// Remote folder mirroring the local one.
    #[arg(long, global = true)]
    remote_path: Option<String>,

    /// Dropbox access token.
    #[arg(long, global = true, env = "PHOTOPUSH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Client identifier sent to Dropbox.
    #[arg(long, global = true)]
    client_identifier: Option<String>,

    /// Comma-separated file and folder names to ignore.
    #[arg(long, global = true, value_delimiter = ',')]
    skip_list: Option<Vec<String>>,

    /// Number of concurrent uploads.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Remote snapshot cache file.
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,
}

impl From<SettingsArgs> for FileConfig {
    fn from(args: SettingsArgs) -> Self {
        Self {
            access_token: args.access_token,
            client_identifier: args.client_identifier,
            local_path: args.local_path,
            remote_path: args.remote_path,
            skip_list: args.skip_list,
            concurrency: args.concurrency,
            cache_file: args.cache_file,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files missing from the remote folder.
    Upload {
        /// Only report what would be uploaded.
        #[arg(long)]
        dry_run: bool,
    },

    /// Move local files to the folders their remote copies live in.
    Restructure,

    /// Cache the remote listing and print a diff summary.
    Prefetch {
        /// List the remote again even if a cache exists.
        #[arg(long)]
        refresh: bool,
    },

    /// Delete the remote snapshot cache.
    CleanCache,

    /// Save the effective settings to the settings file.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = FileConfig::load(&cli.config)?.merged(cli.settings.into());

    match cli.command {
        Commands::Upload { dry_run } => cmd_upload(&settings, dry_run).await,
        Commands::Restructure => cmd_restructure(&settings).await,
        Commands::Prefetch { refresh } => cmd_prefetch(&settings, refresh).await,
        Commands::CleanCache => cmd_clean_cache(&settings).await,
        Commands::Config => cmd_config(&settings, &cli.config),
    }
}

/// Connect to Dropbox and build the engine.
async fn open_engine(settings: &FileConfig) -> Result<SyncEngine> {
    let sync_config = settings.sync_config()?;
    let store = DropboxStore::connect(settings.dropbox_config()?)
        .await
        .context("Failed to connect to Dropbox")?;
    Ok(SyncEngine::new(Arc::new(store), sync_config))
}

/// Upload missing files.
async fn cmd_upload(settings: &FileConfig, dry_run: bool) -> Result<()> {
    let engine = open_engine(settings).await?;
    let summary = engine.upload(dry_run).await.context("Upload failed")?;

    if dry_run {
        println!(
            "Dry run: {} files ({} bytes) would be uploaded, {} already uploaded, {} mismatched",
            summary.plan.uploads.len(),
            summary.plan.upload_bytes(),
            summary.plan.already_synced,
            summary.plan.mismatches.len()
        );
        return Ok(());
    }

    if let Some(report) = &summary.report {
        println!(
            "Uploaded {} of {} files in {:.1}s",
            report.succeeded.len(),
            report.scheduled,
            report.duration.as_secs_f64()
        );
        for failure in &report.failed {
            println!("  {}", failure);
        }
    }
    for mismatch in &summary.plan.mismatches {
        println!(
            "  Not uploaded, differs from remote: {} ({})",
            mismatch.local.relative, mismatch.remote.path
        );
    }

    if !summary.is_success() {
        anyhow::bail!("Some files could not be uploaded; run again to retry them");
    }
    Ok(())
}

/// Move misplaced local files.
async fn cmd_restructure(settings: &FileConfig) -> Result<()> {
    let engine = open_engine(settings).await?;
    let report = engine.restructure().await.context("Restructure failed")?;

    println!("Moved {} files", report.moved.len());
    for (from, to) in &report.moved {
        println!("  {} -> {}", from.display(), to.display());
    }
    if !report.skipped.is_empty() {
        println!("Left {} files with several possible locations:", report.skipped.len());
        for entry in &report.skipped {
            println!("  {}", entry.local.relative);
            for candidate in &entry.candidates {
                println!("    {}", candidate.path);
            }
        }
    }
    Ok(())
}

/// Cache the remote listing and summarize.
async fn cmd_prefetch(settings: &FileConfig, refresh: bool) -> Result<()> {
    let engine = open_engine(settings).await?;
    let summary = engine.prefetch(refresh).await.context("Prefetch failed")?;

    println!("Local files:     {}", summary.local_files);
    println!("Remote files:    {}", summary.remote_files);
    println!("Already synced:  {}", summary.already_synced);
    println!("To upload:       {} ({} bytes)", summary.to_upload, summary.upload_bytes);
    println!("Mismatched:      {}", summary.mismatched);
    println!(
        "Misplaced:       {} ({} ambiguous)",
        summary.misplaced, summary.ambiguous
    );
    Ok(())
}

/// Delete the snapshot cache. Needs no credentials.
async fn cmd_clean_cache(settings: &FileConfig) -> Result<()> {
    let path = settings
        .cache_file
        .clone()
        .unwrap_or_else(|| photopush_sync::SyncConfig::default().cache_file);
    let removed = SnapshotCache::new(&path)
        .invalidate()
        .await
        .context("Failed to remove snapshot cache")?;

    if removed {
        println!("Removed {}", path.display());
    } else {
        info!("No snapshot cache at {}", path.display());
    }
    Ok(())
}

/// Persist the merged settings.
fn cmd_config(settings: &FileConfig, path: &Path) -> Result<()> {
    settings.save(path)?;
    println!("Settings saved to {}", path.display());
    Ok(())
}
