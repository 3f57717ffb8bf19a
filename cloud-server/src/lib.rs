//! AppCompat Triage Server
//!
//! Review API, job workers and the CSV loader around `appcompat-core`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   jobs    ┌─────────────┐   upserts / scores   ┌────────────┐
//! │ loader (CLI) │ ────────► │  jobs table │ ───► workers ──────► │  records   │
//! └──────────────┘           └─────────────┘                      └─────┬──────┘
//!                                   ▲                                   │
//!                          reprocess│                     entries/labels│
//!                            ┌──────┴───────────────────────────────────┴──┐
//!                            │            Review API (Axum)                │
//!                            └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod load;
pub mod models;
pub mod source;
pub mod worker;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appcompat_core::{JobQueue, ModelStore, RecordStore};

pub use config::Config;
pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub queue: Arc<dyn JobQueue>,
    pub models: ModelStore,
    pub config: Config,
}

/// Install the fmt subscriber; `RUST_LOG` overrides `default_filter`.
/// Core `log` records are forwarded through tracing-log.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/collections", get(handlers::collections::list))
        .route("/api/model/:collection", get(handlers::collections::model_summary))
        .route("/api/entries", get(handlers::entries::list_all))
        .route("/api/entries/:collection", get(handlers::entries::list))
        .route(
            "/api/label/:collection/:id",
            post(handlers::labels::set).delete(handlers::labels::clear),
        )
        .route("/api/entry_context/:collection/:id", get(handlers::entries::context))
        .route("/api/reprocess", post(handlers::jobs::reprocess_all))
        .route("/api/reprocess/:collection", post(handlers::jobs::reprocess))
        .route("/api/job_status/:id", get(handlers::jobs::status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests;
