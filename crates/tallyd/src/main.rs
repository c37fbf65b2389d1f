//! `tallyd`: the tally integrity service command line.
//!
//! Operates on the local metadata store. No pillar transport is bundled:
//! collection and repair run in programs that supply a
//! [`Collector`](tally_engine::Collector), while this binary checks what is
//! already stored and manages collection progress.
//!
//! # Usage
//!
//! ```text
//! tallyd check --collection books           # check stored metadata, write a report
//! tallyd status                             # per-collection and per-pillar counts
//! tallyd progress --collection books        # resumption cursors per pillar
//! tallyd reset-progress --collection books  # force a full recollection
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_engine::{
    CollectionRequest, Collector, CollectorError, EventHandler, IntegrityWorkflow, OperationEvent,
    WorkflowContext, WorkflowKind,
};
use tally_store::MetadataStore;
use tally_types::{Checksum, CollectionId, FileId, PillarId, Timestamp};
use tracing::{error, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "tallyd", version, about = "Integrity checking for replicated collections")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Override data directory.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the stored metadata of a collection and write an integrity report.
    Check {
        /// Collection to check.
        #[arg(long)]
        collection: String,
    },

    /// Show record counts for every configured collection.
    Status,

    /// Show the collection progress cursors of a collection.
    Progress {
        /// Collection to show.
        #[arg(long)]
        collection: String,
    },

    /// Forget the collection progress of a collection.
    ResetProgress {
        /// Collection to reset.
        #[arg(long)]
        collection: String,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.service.data_dir = dir;
    }

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Check { collection } => cmd_check(&config, &collection).await,
        Commands::Status => cmd_status(&config),
        Commands::Progress { collection } => cmd_progress(&config, &collection),
        Commands::ResetProgress { collection } => cmd_reset_progress(&config, &collection),
    }
}

fn open_store(config: &CliConfig) -> Result<MetadataStore> {
    let path = config.metadata_dir();
    MetadataStore::open(&path).map_err(|e| {
        error!(path = %path.display(), %e, "failed to open metadata store");
        anyhow::anyhow!("cannot open metadata at {} ({e})", path.display())
    })
}

fn format_timestamp(t: Option<Timestamp>) -> String {
    match t {
        Some(t) => format!("{} ({} ms)", t.compact_utc(), t.as_millis()),
        None => "none".to_string(),
    }
}

// -----------------------------------------------------------------------
// tallyd check
// -----------------------------------------------------------------------

/// Collector for runs that must not reach any pillar.
struct NoTransport;

const NO_TRANSPORT: &str = "no pillar transport configured";

#[async_trait::async_trait]
impl Collector for NoTransport {
    async fn get_file_ids(&self, _request: CollectionRequest, handler: EventHandler) {
        handler.handle(OperationEvent::Failed {
            reason: NO_TRANSPORT.to_string(),
        });
    }

    async fn get_checksums(&self, _request: CollectionRequest, handler: EventHandler) {
        handler.handle(OperationEvent::Failed {
            reason: NO_TRANSPORT.to_string(),
        });
    }

    async fn get_file_infos(&self, _request: CollectionRequest, handler: EventHandler) {
        handler.handle(OperationEvent::Failed {
            reason: NO_TRANSPORT.to_string(),
        });
    }

    async fn get_file(
        &self,
        _collection: &CollectionId,
        _file: &FileId,
        _source: &PillarId,
        _staging_url: &str,
    ) -> Result<(), CollectorError> {
        Err(CollectorError::Transport(NO_TRANSPORT.to_string()))
    }

    async fn put_file(
        &self,
        _collection: &CollectionId,
        _file: &FileId,
        _target: &PillarId,
        _staging_url: &str,
        _checksum: &Checksum,
        _size: Option<u64>,
    ) -> Result<(), CollectorError> {
        Err(CollectorError::Transport(NO_TRANSPORT.to_string()))
    }
}

async fn cmd_check(config: &CliConfig, collection: &str) -> Result<()> {
    let settings = config.collection(collection)?.clone();
    let store = Arc::new(open_store(config)?);
    let reports_dir = config.reports_dir();
    info!(collection, reports = %reports_dir.display(), "checking stored metadata");

    let ctx = WorkflowContext::new(settings, store, Arc::new(NoTransport), reports_dir);
    let outcome = IntegrityWorkflow::new(Arc::new(ctx), WorkflowKind::Incremental)
        .run_offline_checks()
        .await?;

    println!("{}", outcome.summary);
    println!("Report: {}", outcome.report_path.display());
    Ok(())
}

// -----------------------------------------------------------------------
// tallyd status
// -----------------------------------------------------------------------

fn cmd_status(config: &CliConfig) -> Result<()> {
    let store = open_store(config)?;

    if config.collections.is_empty() {
        println!("No collections configured.");
        return Ok(());
    }

    for settings in &config.collections {
        let stats = store.collection_stats(&settings.collection_id)?;
        println!(
            "Collection {}: {} files, {} pillars configured",
            settings.collection_id,
            stats.files,
            settings.pillars.len()
        );
        for pillar in &settings.pillars {
            let s = stats.pillars.get(pillar).cloned().unwrap_or_default();
            println!(
                "  {pillar} existing={} missing={} valid={} errors={} without_checksum={}",
                s.existing, s.missing, s.valid_checksums, s.checksum_errors, s.missing_checksums,
            );
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------
// tallyd progress / reset-progress
// -----------------------------------------------------------------------

fn cmd_progress(config: &CliConfig, collection: &str) -> Result<()> {
    let settings = config.collection(collection)?;
    let store = open_store(config)?;

    println!("Collection progress for {}:", settings.collection_id);
    for pillar in &settings.pillars {
        let progress = store.collection_progress(&settings.collection_id, pillar)?;
        println!(
            "  {pillar} files={} checksums={}",
            format_timestamp(progress.latest_file_timestamp),
            format_timestamp(progress.latest_checksum_timestamp),
        );
    }
    Ok(())
}

fn cmd_reset_progress(config: &CliConfig, collection: &str) -> Result<()> {
    let settings = config.collection(collection)?;
    let store = open_store(config)?;

    store.reset_file_collection_progress(&settings.collection_id)?;
    store.reset_checksum_collection_progress(&settings.collection_id)?;
    info!(collection = %settings.collection_id, "collection progress reset");
    println!(
        "Collection progress for {} reset; the next run recollects everything.",
        settings.collection_id
    );
    Ok(())
}
