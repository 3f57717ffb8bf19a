//! Reprocess and job status handlers

use axum::{extract::{Path, State}, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use appcompat_core::constants::ALL_COLLECTIONS;
use appcompat_core::logic::store::collection_matches;
use appcompat_core::Job;

use crate::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ReprocessRequest {
    #[serde(default)]
    pub full_scan: bool,
}

/// Retrain and rescore one collection
pub async fn reprocess(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Option<Json<ReprocessRequest>>,
) -> AppResult<Json<Value>> {
    let Json(req) = body.unwrap_or_default();
    if !state.store.collection_exists(&collection).await? {
        return Err(AppError::NotFound(format!("Collection {} not found", collection)));
    }

    let handle = state.queue.enqueue(&Job::update_predict(&collection, req.full_scan)).await?;
    tracing::info!("Queued predict cycle {} for {}", handle.id, collection);

    Ok(Json(json!({ "result": "successful", "job_id": handle.id })))
}

/// One predict cycle per loaded collection
pub async fn reprocess_all(
    State(state): State<AppState>,
    body: Option<Json<ReprocessRequest>>,
) -> AppResult<Json<Value>> {
    let Json(req) = body.unwrap_or_default();
    let training = state.config.training_collection.as_str();

    let mut job_ids = Vec::new();
    for info in state.store.list_collections().await? {
        if info.name == training || !collection_matches(ALL_COLLECTIONS, &info.name) {
            continue;
        }
        let handle = state.queue.enqueue(&Job::update_predict(&info.name, req.full_scan)).await?;
        job_ids.push(handle.id);
    }
    tracing::info!("Queued {} predict cycles", job_ids.len());

    Ok(Json(json!({ "result": "successful", "job_ids": job_ids })))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let status = state
        .queue
        .status(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;

    Ok(Json(json!({ "result": "successful", "job_status": status.as_str() })))
}
