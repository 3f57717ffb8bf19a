//! Health check handler

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use appcompat_core::constants::APP_VERSION;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    collections: Option<usize>,
    timestamp: i64,
}

/// Healthy when the record store answers; 503 otherwise
pub async fn check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let collections = match state.store.list_collections().await {
        Ok(c) => Some(c.len()),
        Err(e) => {
            tracing::warn!("Health check: store unavailable: {}", e);
            None
        }
    };

    let (code, status) = match collections {
        Some(_) => (StatusCode::OK, "healthy"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: APP_VERSION,
            collections,
            timestamp: chrono::Utc::now().timestamp(),
        }),
    )
}
