//! AppCompat CSV loader
//!
//! Parses an appcompat CSV export, extracts features and queues the hosts
//! for the workers to store.
//!
//! Usage:
//!   appcompat-loader export.csv case42
//!   appcompat-loader export.csv case42 --chunk-size 100000 --verbose
//!   appcompat-loader export.csv.bz2 case42 --compression bz2

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use appcompat_core::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_HOST_BATCH_SIZE};
use appcompat_core::{JobQueue, RecordStore};
use appcompat_server::{
    config::Config,
    db, init_tracing,
    load::{load, LoadOptions},
    models::{PgJobQueue, PgRecordStore},
    source::{open_input, Compression},
};

/// Parses appcompat CSV, extracts features and queues it for loading
#[derive(Parser, Debug)]
#[command(name = "appcompat-loader")]
struct Args {
    /// CSV export to read
    read_file: PathBuf,

    /// Collection name (prefixed with 'appcompat-')
    index_name: String,

    /// Records per chunk; bigger uses more memory, too small weakens
    /// the unique-hosts feature
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Input compression; `infer` goes by the .gz / .bz2 extension
    #[arg(long, value_enum, default_value_t = Compression::Infer)]
    compression: Compression,

    /// Hosts per load job
    #[arg(long, default_value_t = DEFAULT_HOST_BATCH_SIZE)]
    batch_size: usize,

    /// Database URL (overrides DATABASE_URL from .env)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(if args.verbose {
        "appcompat_server=debug,appcompat_core=debug"
    } else {
        "appcompat_server=info,appcompat_core=info"
    });

    let mut config = Config::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    let pool = db::create_pool(&config.database_url, 4)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool).await.context("Failed to run migrations")?;

    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool));

    let input = open_input(&args.read_file, args.compression)
        .with_context(|| format!("Failed to open {}", args.read_file.display()))?;

    let options = LoadOptions {
        chunk_size: args.chunk_size,
        batch_size: args.batch_size,
        training_collection: config.training_collection.clone(),
        retry_delay: Duration::from_secs(2),
    };

    tracing::info!(
        "Reading {} ({:?})...",
        args.read_file.display(),
        args.compression.resolve(&args.read_file)
    );
    let summary = load(input, &args.index_name, store, queue, &options).await?;

    tracing::info!(
        "Queued {} hosts in {} jobs for {} ({} records, {} dropped, {} chunks, {} widened)",
        summary.hosts,
        summary.jobs,
        summary.collection,
        summary.chunks.records,
        summary.chunks.dropped,
        summary.chunks.chunks,
        summary.chunks.widened
    );
    Ok(())
}
