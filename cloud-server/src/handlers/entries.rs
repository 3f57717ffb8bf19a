//! Entry listing handlers
//!
//! Accepts both plain parameters (`sort`, `dir`, `search`) and the
//! DataTables ones (`order[0][column]`, `order[0][dir]`, `search[value]`).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use appcompat_core::constants::{ALL_COLLECTIONS, CONTEXT_RADIUS};
use appcompat_core::{SearchQuery, SortDir};

use crate::{AppError, AppResult, AppState};

const DEFAULT_PAGE_LENGTH: u64 = 50;
const MAX_PAGE_LENGTH: u64 = 10_000;

/// Table columns, in the order the review UI numbers them
pub const TABLE_COLUMNS: &[&str] = &[
    "_id",
    "_index",
    "class_label",
    "hostname",
    "predict",
    "path",
    "last_modified",
    "last_execution",
    "file_size",
    "file_executed",
    "f_neighbour_psexec",
    "f_shortname_ends_3264",
    "f_path_depth",
    "f_shortname_length",
    "f_staging_directory",
    "f_temp_dir",
    "f_system32_dir",
    "f_recon_cmd",
    "f_users_dir",
    "f_path_unique_hosts",
    "f_number_digits",
    "f_root_length",
    "f_executable_archive",
    "f_recon_cluster",
    "f_files_in_folder",
    "f_same_timestamp_different_name",
    "f_same_filesize_different_name",
];

#[derive(Debug, Default, Deserialize)]
pub struct EntriesParams {
    pub draw: Option<i64>,
    pub start: Option<u64>,
    pub length: Option<u64>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub search: Option<String>,
    #[serde(rename = "order[0][column]")]
    pub order_column: Option<usize>,
    #[serde(rename = "order[0][dir]")]
    pub order_dir: Option<String>,
    #[serde(rename = "search[value]")]
    pub search_value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntriesResponse {
    pub data: Vec<Value>,
    pub draw: i64,
    pub records_total: u64,
    pub records_filtered: u64,
}

impl EntriesParams {
    /// Sort field, `None` when ordering by id/collection (tie-break only)
    fn sort_field(&self) -> AppResult<Option<String>> {
        if let Some(field) = self.sort.as_deref().filter(|s| !s.is_empty()) {
            return Ok(Some(field.to_string()));
        }
        let idx = self.order_column.unwrap_or(0);
        let column = TABLE_COLUMNS
            .get(idx)
            .ok_or_else(|| AppError::ValidationError(format!("Invalid sort column {}", idx)))?;
        Ok((!column.starts_with('_')).then(|| column.to_string()))
    }

    fn sort_dir(&self) -> AppResult<SortDir> {
        match self.dir.as_deref().or(self.order_dir.as_deref()).unwrap_or("asc") {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(AppError::ValidationError(format!("Invalid sort direction '{}'", other))),
        }
    }

    fn search_text(&self) -> &str {
        self.search
            .as_deref()
            .or(self.search_value.as_deref())
            .unwrap_or("")
            .trim()
    }

    pub fn to_query(&self) -> AppResult<SearchQuery> {
        let length = self.length.unwrap_or(DEFAULT_PAGE_LENGTH).clamp(1, MAX_PAGE_LENGTH);
        let mut query = SearchQuery::new(self.start.unwrap_or(0), length).with_text(self.search_text())?;
        if let Some(field) = self.sort_field()? {
            query = query.sorted_by(&field, self.sort_dir()?)?;
        }
        Ok(query)
    }
}

/// Entries across every loaded collection
pub async fn list_all(
    state: State<AppState>,
    params: Query<EntriesParams>,
) -> AppResult<Json<EntriesResponse>> {
    search_entries(state, ALL_COLLECTIONS, params).await
}

/// Entries of one collection
pub async fn list(
    state: State<AppState>,
    Path(collection): Path<String>,
    params: Query<EntriesParams>,
) -> AppResult<Json<EntriesResponse>> {
    search_entries(state, &collection, params).await
}

async fn search_entries(
    State(state): State<AppState>,
    pattern: &str,
    Query(params): Query<EntriesParams>,
) -> AppResult<Json<EntriesResponse>> {
    let query = params.to_query()?;
    let page = state.store.search(pattern, &query).await?;

    let records_total = if query.filter.is_empty() {
        page.total
    } else {
        state.store.search(pattern, &SearchQuery::new(0, 0)).await?.total
    };

    Ok(Json(EntriesResponse {
        data: page.hits.iter().map(|r| r.to_document()).collect(),
        draw: params.draw.unwrap_or(-1),
        records_total,
        records_filtered: page.total,
    }))
}

/// Records within the context radius of one entry on the same host
pub async fn context(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let entry = state
        .store
        .get(&collection, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Entry not found".to_string()))?;

    let rows = state
        .store
        .neighbors(&collection, &entry.record.hostname, entry.record.run_order, CONTEXT_RADIUS)
        .await?;

    let data: Vec<Value> = rows.iter().map(|r| r.to_document()).collect();
    Ok(Json(json!({ "data": data })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatables_params_map_to_query() {
        let params = EntriesParams {
            order_column: Some(4),
            order_dir: Some("desc".into()),
            search_value: Some("hostname:WKS01".into()),
            start: Some(100),
            ..Default::default()
        };
        let query = params.to_query().unwrap();
        assert_eq!(query.sort, Some(("predict".to_string(), SortDir::Desc)));
        assert_eq!((query.offset, query.limit), (100, DEFAULT_PAGE_LENGTH));
        assert!(!query.filter.is_empty());
    }

    #[test]
    fn test_id_column_uses_tie_break_only() {
        let query = EntriesParams::default().to_query().unwrap();
        assert!(query.sort.is_none());
        assert!(query.filter.is_empty());
    }

    #[test]
    fn test_bad_params_rejected() {
        let params = EntriesParams { dir: Some("sideways".into()), sort: Some("predict".into()), ..Default::default() };
        assert!(matches!(params.to_query(), Err(AppError::ValidationError(_))));

        let params = EntriesParams { order_column: Some(99), ..Default::default() };
        assert!(matches!(params.to_query(), Err(AppError::ValidationError(_))));

        let params = EntriesParams { search: Some("bogus:1".into()), ..Default::default() };
        assert!(matches!(params.to_query(), Err(AppError::QuerySyntax { .. })));
    }
}
