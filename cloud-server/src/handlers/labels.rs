//! Label handlers
//!
//! Every label is mirrored into the training collection under the same id;
//! clearing a label removes the mirror.

use axum::{extract::{Path, State}, Json};
use serde::{Deserialize, Serialize};

use appcompat_core::ClassLabel;

use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct LabelResponse {
    pub result: &'static str,
    pub label: ClassLabel,
}

fn parse_label(raw: &str) -> AppResult<ClassLabel> {
    match raw.parse::<ClassLabel>() {
        Ok(label) if label.is_labeled() => Ok(label),
        _ => Err(AppError::ValidationError(format!(
            "Label must be one of evil, not_evil, suspicious (got '{}')",
            raw
        ))),
    }
}

/// Set a label and mirror the entry into the training collection
pub async fn set(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(req): Json<LabelRequest>,
) -> AppResult<Json<LabelResponse>> {
    let label = parse_label(&req.label)?;
    let training = state.config.training_collection.as_str();

    state.store.ensure_collection(training).await?;
    if state.store.get(training, &id).await?.is_some() {
        state.store.set_label(training, &id, label).await?;
    } else {
        let mut entry = state
            .store
            .get(&collection, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("Entry not found".to_string()))?;
        entry.record.class_label = label;
        state.store.put_record(training, &entry.mirrored_into(training)).await?;
    }

    if collection != training {
        state.store.set_label(&collection, &id, label).await?;
    }

    tracing::info!("Labelled {}/{} as {}", collection, id, label);
    Ok(Json(LabelResponse { result: "successful", label }))
}

/// Clear a label and drop the training mirror
pub async fn clear(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> AppResult<Json<LabelResponse>> {
    let training = state.config.training_collection.as_str();

    if state.store.collection_exists(training).await? {
        state.store.delete(training, &id).await?;
    }
    if collection != training {
        state.store.set_label(&collection, &id, ClassLabel::Unlabeled).await?;
    }

    tracing::info!("Cleared label on {}/{}", collection, id);
    Ok(Json(LabelResponse {
        result: "successful",
        label: ClassLabel::Unlabeled,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("evil").unwrap(), ClassLabel::Evil);
        assert_eq!(parse_label("not_evil").unwrap(), ClassLabel::NotEvil);
        assert_eq!(parse_label("suspicious").unwrap(), ClassLabel::Suspicious);
        assert!(parse_label("").is_err());
        assert!(parse_label("benign").is_err());
    }
}
