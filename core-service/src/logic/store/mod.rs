//! Store Module - record persistence seam
//!
//! `RecordStore` is implemented by the PostgreSQL backend in the server
//! crate and by `memory::InMemoryStore` for tests and embedding.
//! Row ids are deterministic, so re-loading a host converges on the same rows.

pub mod memory;
pub mod query;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logic::dataset::{schema, ClassLabel, Record};
use crate::logic::error::{PipelineError, Result};
use crate::logic::features::{EnrichedRecord, FeatureVector, FEATURE_COUNT};

pub use query::{FieldValue, ParsedQuery, Term};

/// A record as persisted in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub collection: String,
    #[serde(flatten)]
    pub record: Record,
    #[serde(flatten)]
    pub features: FeatureVector,
}

impl StoredRecord {
    pub fn from_enriched(collection: &str, enriched: EnrichedRecord) -> Self {
        Self {
            id: record_id(collection, &enriched.record.hostname, enriched.record.run_order),
            collection: collection.to_string(),
            record: enriched.record,
            features: enriched.features,
        }
    }

    /// Classifier row; a missing column is `ScoreRowMalformed`
    pub fn to_row(&self) -> Result<[f32; FEATURE_COUNT]> {
        self.features
            .to_row()
            .map_err(|column| PipelineError::ScoreRowMalformed { id: self.id.clone(), column })
    }

    /// Copy into another collection, keeping the id
    pub fn mirrored_into(&self, collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..self.clone()
        }
    }

    /// Flat JSON object keyed by schema field names
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// SHA-256 over (collection, hostname, run_order)
pub fn record_id(collection: &str, hostname: &str, run_order: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(hostname.as_bytes());
    hasher.update([0u8]);
    hasher.update(run_order.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// `appcompat-*` matches by prefix, anything else exactly
pub fn collection_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortDir::Desc
        } else {
            SortDir::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Paging, ordering and filtering for `RecordStore::search`
///
/// Results are always tie-broken by hostname then run_order, ascending.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub filter: ParsedQuery,
    pub sort: Option<(String, SortDir)>,
    pub offset: u64,
    pub limit: u64,
}

impl SearchQuery {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    /// Parse and attach search text; empty text matches everything
    pub fn with_text(mut self, text: &str) -> Result<Self> {
        self.filter = query::parse(text)?;
        Ok(self)
    }

    pub fn sorted_by(mut self, field: &str, dir: SortDir) -> Result<Self> {
        if !schema::is_field(field) {
            return Err(PipelineError::query_syntax(format!("unknown sort field '{}'", field), field));
        }
        self.sort = Some((field.to_string(), dir));
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Page {
    pub hits: Vec<StoredRecord>,
    /// Matches before paging
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub records: u64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a collection; fails with `CollectionExists` if present
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Create a collection if missing; returns whether it was created
    async fn ensure_collection(&self, name: &str) -> Result<bool>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Insert new rows; existing rows keep their class_label and predict
    async fn upsert_records(&self, collection: &str, records: &[StoredRecord]) -> Result<u64>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>>;

    async fn search(&self, collection_pattern: &str, query: &SearchQuery) -> Result<Page>;

    async fn label_pool(&self, collection: &str, label: ClassLabel, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Unlabelled rows in random order; `seed` makes the draw reproducible
    async fn random_unlabeled(&self, collection: &str, limit: usize, seed: Option<u64>) -> Result<Vec<StoredRecord>>;

    /// Highest current predict first
    async fn top_by_predict(&self, collection: &str, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Keyset page ordered by id
    async fn scan(&self, collection: &str, after_id: Option<&str>, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Same-host rows within `radius` run orders, ascending
    async fn neighbors(&self, collection: &str, hostname: &str, run_order: u32, radius: u32) -> Result<Vec<StoredRecord>>;

    async fn update_predictions(&self, collection: &str, updates: &[(String, f32)]) -> Result<u64>;

    async fn set_label(&self, collection: &str, id: &str, label: ClassLabel) -> Result<()>;

    /// Full overwrite, label and predict included
    async fn put_record(&self, collection: &str, record: &StoredRecord) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_deterministic() {
        let a = record_id("appcompat-x", "host1", 5);
        assert_eq!(a, record_id("appcompat-x", "host1", 5));
        assert_ne!(a, record_id("appcompat-x", "host1", 6));
        assert_ne!(a, record_id("appcompat-y", "host1", 5));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_collection_matches() {
        assert!(collection_matches("appcompat-*", "appcompat-case1"));
        assert!(collection_matches("appcompat-*", "appcompat-training"));
        assert!(!collection_matches("appcompat-*", "other"));
        assert!(collection_matches("appcompat-case1", "appcompat-case1"));
        assert!(!collection_matches("appcompat-case1", "appcompat-case10"));
    }

    #[test]
    fn test_sort_field_checked_against_schema() {
        assert!(SearchQuery::new(0, 10).sorted_by("predict", SortDir::Desc).is_ok());
        let err = SearchQuery::new(0, 10).sorted_by("drop table", SortDir::Asc).unwrap_err();
        assert!(matches!(err, PipelineError::QuerySyntax { .. }));
    }

    #[test]
    fn test_stored_record_document_is_flat() {
        let enriched = EnrichedRecord {
            record: Record::new("h1", "c:\\temp\\a.exe", 3),
            features: FeatureVector::from_path("c:\\temp\\a.exe"),
        };
        let stored = StoredRecord::from_enriched("appcompat-x", enriched);
        let doc = stored.to_document();
        assert_eq!(doc["hostname"], "h1");
        assert_eq!(doc["run_order"], 3);
        assert_eq!(doc["file_root"], "\\temp");
        assert_eq!(doc["class_label"], "");

        let err = stored.to_row().unwrap_err();
        assert!(matches!(err, PipelineError::ScoreRowMalformed { column: "f_files_in_folder", .. }));
    }
}
