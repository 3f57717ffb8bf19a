//! Collection handlers

use axum::{extract::{Path, State}, Json};

use appcompat_core::logic::model::ModelSummary;
use appcompat_core::CollectionInfo;

use crate::{AppError, AppResult, AppState};

/// List collections with creation time and size
pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<CollectionInfo>>> {
    let collections = state.store.list_collections().await?;
    Ok(Json(collections))
}

/// Last model fitted for a collection
pub async fn model_summary(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> AppResult<Json<ModelSummary>> {
    let summary = state
        .models
        .summary(&collection)?
        .ok_or_else(|| AppError::NotFound(format!("No model trained for {}", collection)))?;

    Ok(Json(summary))
}
