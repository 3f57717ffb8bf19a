//! AppCompat Triage Server
//!
//! Serves the review API and runs the job workers against PostgreSQL.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use appcompat_core::{JobQueue, ModelStore, PredictionCycle, RecordStore};
use appcompat_server::{
    config::Config,
    create_router, db, init_tracing,
    models::{PgJobQueue, PgRecordStore},
    worker::{spawn_workers, WorkerContext},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("appcompat_server=debug,appcompat_core=info,tower_http=debug");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("AppCompat server starting...");
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    let pool = db::create_pool(&config.database_url, (config.worker_count as u32 + 4).max(10))
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await.context("Failed to run migrations")?;

    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool.clone()));
    let jobs = PgJobQueue::new(pool.clone());
    let queue: Arc<dyn JobQueue> = Arc::new(jobs.clone());

    let requeued = jobs.requeue_stale().await.context("Failed to requeue stale jobs")?;
    if requeued > 0 {
        tracing::warn!("Requeued {} jobs abandoned by a previous run", requeued);
    }

    let models = match &config.model_dir {
        Some(dir) => ModelStore::from_path(dir.clone()),
        None => ModelStore::new(),
    };
    tracing::info!("Models stored in {}", models.dir().display());

    let cycle = Arc::new(
        PredictionCycle::new(Arc::clone(&store), config.cycle_config()).with_model_store(models.clone()),
    );

    let ctx = Arc::new(WorkerContext {
        queue: jobs,
        store: Arc::clone(&store),
        cycle,
        poll_interval: Duration::from_millis(config.job_poll_interval_ms),
        max_attempts: config.job_max_attempts,
        retry_backoff: Duration::from_secs(config.job_retry_backoff_secs),
    });
    let workers = spawn_workers(ctx, config.worker_count);
    tracing::info!("Spawned {} job workers", workers.len());

    let state = AppState {
        store,
        queue,
        models,
        config: config.clone(),
    };
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;

    for worker in workers {
        worker.abort();
    }
    Ok(())
}
