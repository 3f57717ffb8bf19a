//! Record model - PostgreSQL `RecordStore`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use appcompat_core::logic::dataset::{ClassLabel, Record};
use appcompat_core::logic::error::{PipelineError, Result};
use appcompat_core::logic::features::{FeatureVector, PathFeatures};
use appcompat_core::logic::store::{
    CollectionInfo, FieldValue, Page, ParsedQuery, RecordStore, SearchQuery, StoredRecord, Term,
};

/// Rows per INSERT; 34 binds each keeps us under the bind limit
const INSERT_BATCH: usize = 1000;

/// Columns rewritten when a load replays; review state is left alone
const LOAD_COLUMNS: &[&str] = &[
    "hostname", "run_order", "last_modified", "last_execution", "path", "file_size", "file_executed",
    "file_unc", "file_drive", "file_root", "file_shortname", "file_ext", "file_name",
    "f_path_unique_hosts", "f_recon_cluster", "f_files_in_folder", "f_neighbour_psexec",
    "f_same_timestamp_different_name", "f_same_filesize_different_name", "f_shortname_ends_3264",
    "f_path_depth", "f_staging_directory", "f_temp_dir", "f_system32_dir", "f_recon_cmd", "f_users_dir",
    "f_number_digits", "f_root_length", "f_shortname_length", "f_executable_archive",
];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecordRow {
    pub collection: String,
    pub id: String,
    pub class_label: String,
    pub predict: f32,
    pub hostname: String,
    pub run_order: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub path: String,
    pub file_size: Option<i64>,
    pub file_executed: Option<bool>,
    pub file_unc: String,
    pub file_drive: String,
    pub file_root: String,
    pub file_shortname: String,
    pub file_ext: String,
    pub file_name: String,
    pub f_path_unique_hosts: Option<i64>,
    pub f_recon_cluster: Option<i64>,
    pub f_files_in_folder: Option<i64>,
    pub f_neighbour_psexec: Option<bool>,
    pub f_same_timestamp_different_name: Option<i64>,
    pub f_same_filesize_different_name: Option<i64>,
    pub f_shortname_ends_3264: bool,
    pub f_path_depth: i64,
    pub f_staging_directory: bool,
    pub f_temp_dir: bool,
    pub f_system32_dir: bool,
    pub f_recon_cmd: bool,
    pub f_users_dir: bool,
    pub f_number_digits: i64,
    pub f_root_length: i64,
    pub f_shortname_length: i64,
    pub f_executable_archive: bool,
}

fn count(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        let class_label = row.class_label.parse().unwrap_or_else(|e| {
            tracing::warn!("Record {}: {}", row.id, e);
            ClassLabel::Unlabeled
        });

        StoredRecord {
            id: row.id.trim_end().to_string(),
            collection: row.collection,
            record: Record {
                hostname: row.hostname,
                path: row.path,
                last_modified: row.last_modified,
                last_executed: row.last_execution,
                file_size: row.file_size,
                file_executed: row.file_executed,
                run_order: count(row.run_order),
                class_label,
                predict: row.predict,
            },
            features: FeatureVector {
                path: PathFeatures {
                    unc: row.file_unc,
                    drive: row.file_drive,
                    root: row.file_root,
                    shortname: row.file_shortname,
                    extension: row.file_ext,
                    filename: row.file_name,
                    shortname_ends_3264: row.f_shortname_ends_3264,
                    path_depth: count(row.f_path_depth),
                    root_length: count(row.f_root_length),
                    shortname_length: count(row.f_shortname_length),
                    staging_directory: row.f_staging_directory,
                    temp_dir: row.f_temp_dir,
                    system32_dir: row.f_system32_dir,
                    recon_cmd: row.f_recon_cmd,
                    users_dir: row.f_users_dir,
                    number_digits: count(row.f_number_digits),
                    executable_archive: row.f_executable_archive,
                },
                path_unique_hosts: row.f_path_unique_hosts.map(count),
                recon_cluster: row.f_recon_cluster.map(count),
                neighbour_psexec: row.f_neighbour_psexec,
                files_in_folder: row.f_files_in_folder.map(count),
                same_timestamp_different_name: row.f_same_timestamp_different_name.map(count),
                same_filesize_different_name: row.f_same_filesize_different_name.map(count),
            },
        }
    }
}

fn store_err(e: sqlx::Error) -> PipelineError {
    PipelineError::Store(e.to_string())
}

fn wide(v: Option<u32>) -> Option<i64> {
    v.map(i64::from)
}

/// Escape LIKE metacharacters
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Multi-row upsert; `keep_review` leaves class_label and predict untouched on conflict
pub fn build_upsert(collection: &str, rows: &[StoredRecord], keep_review: bool) -> QueryBuilder<'static, Postgres> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new(
        "INSERT INTO records (collection, id, class_label, predict, ",
    );
    qb.push(LOAD_COLUMNS.join(", "));
    qb.push(") ");

    qb.push_values(rows, |mut b, r| {
        let p = &r.features.path;
        let f = &r.features;
        b.push_bind(collection.to_string())
            .push_bind(r.id.clone())
            .push_bind(r.record.class_label.as_str().to_string())
            .push_bind(r.record.predict)
            .push_bind(r.record.hostname.clone())
            .push_bind(i64::from(r.record.run_order))
            .push_bind(r.record.last_modified)
            .push_bind(r.record.last_executed)
            .push_bind(r.record.path.clone())
            .push_bind(r.record.file_size)
            .push_bind(r.record.file_executed)
            .push_bind(p.unc.clone())
            .push_bind(p.drive.clone())
            .push_bind(p.root.clone())
            .push_bind(p.shortname.clone())
            .push_bind(p.extension.clone())
            .push_bind(p.filename.clone())
            .push_bind(wide(f.path_unique_hosts))
            .push_bind(wide(f.recon_cluster))
            .push_bind(wide(f.files_in_folder))
            .push_bind(f.neighbour_psexec)
            .push_bind(wide(f.same_timestamp_different_name))
            .push_bind(wide(f.same_filesize_different_name))
            .push_bind(p.shortname_ends_3264)
            .push_bind(i64::from(p.path_depth))
            .push_bind(p.staging_directory)
            .push_bind(p.temp_dir)
            .push_bind(p.system32_dir)
            .push_bind(p.recon_cmd)
            .push_bind(p.users_dir)
            .push_bind(i64::from(p.number_digits))
            .push_bind(i64::from(p.root_length))
            .push_bind(i64::from(p.shortname_length))
            .push_bind(p.executable_archive);
    });

    qb.push(" ON CONFLICT (collection, id) DO UPDATE SET ");
    let mut assignments: Vec<String> = LOAD_COLUMNS.iter().map(|c| format!("{c} = EXCLUDED.{c}")).collect();
    if !keep_review {
        assignments.push("class_label = EXCLUDED.class_label".to_string());
        assignments.push("predict = EXCLUDED.predict".to_string());
    }
    qb.push(assignments.join(", "));
    qb
}

fn push_collection(qb: &mut QueryBuilder<'static, Postgres>, pattern: &str) {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            qb.push("collection LIKE ");
            qb.push_bind(format!("{}%", like_escape(prefix)));
        }
        None => {
            qb.push("collection = ");
            qb.push_bind(pattern.to_string());
        }
    }
}

/// Column names come from parsed terms, which only admit schema fields
fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &ParsedQuery) {
    for term in &filter.terms {
        qb.push(" AND ");
        match term {
            Term::Text(word) => {
                let like = format!("%{}%", like_escape(word));
                qb.push("(path ILIKE ");
                qb.push_bind(like.clone());
                qb.push(" OR hostname ILIKE ");
                qb.push_bind(like);
                qb.push(")");
            }
            Term::Field { name, value } => match value {
                FieldValue::Boolean(b) => {
                    qb.push(format!("{} = ", name));
                    qb.push_bind(*b);
                }
                FieldValue::Integer(i) => {
                    qb.push(format!("{} = ", name));
                    qb.push_bind(*i);
                }
                FieldValue::Float(f) => {
                    qb.push(format!("abs({} - ", name));
                    qb.push_bind(*f);
                    qb.push(") < 1e-6");
                }
                FieldValue::String(s) => {
                    qb.push(format!("lower({}) = ", name));
                    qb.push_bind(s.to_lowercase());
                }
                FieldValue::Date { from, to } => {
                    qb.push(format!("({} >= ", name));
                    qb.push_bind(*from);
                    qb.push(format!(" AND {} < ", name));
                    qb.push_bind(*to);
                    qb.push(")");
                }
            },
        }
    }
}

pub fn build_search(pattern: &str, query: &SearchQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT * FROM records WHERE ");
    push_collection(&mut qb, pattern);
    push_filter(&mut qb, &query.filter);

    qb.push(" ORDER BY ");
    if let Some((field, dir)) = &query.sort {
        qb.push(format!("{} {}, ", field, dir.as_sql()));
    }
    qb.push("hostname ASC, run_order ASC LIMIT ");
    qb.push_bind(query.limit as i64);
    qb.push(" OFFSET ");
    qb.push_bind(query.offset as i64);
    qb
}

pub fn build_count(pattern: &str, filter: &ParsedQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM records WHERE ");
    push_collection(&mut qb, pattern);
    push_filter(&mut qb, filter);
    qb
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_rows(&self, collection: &str, rows: &[StoredRecord], keep_review: bool) -> Result<u64> {
        let mut written = 0;
        for batch in rows.chunks(INSERT_BATCH) {
            let result = build_upsert(collection, batch, keep_review)
                .build()
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    async fn fetch_rows(&self, mut qb: QueryBuilder<'static, Postgres>) -> Result<Vec<StoredRecord>> {
        let rows = qb
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(StoredRecord::from).collect())
    }

    async fn insert_collection(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO collections (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        if !self.insert_collection(name).await? {
            return Err(PipelineError::CollectionExists(name.to_string()));
        }
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<bool> {
        self.insert_collection(name).await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM collections WHERE name = $1)")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>, i64)>(
            r#"
            SELECT c.name, c.created_at, COUNT(r.id)
            FROM collections c
            LEFT JOIN records r ON r.collection = c.name
            GROUP BY c.name, c.created_at
            ORDER BY c.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, created_at, records)| CollectionInfo { name, created_at, records: records as u64 })
            .collect())
    }

    async fn upsert_records(&self, collection: &str, records: &[StoredRecord]) -> Result<u64> {
        self.write_rows(collection, records, true).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query_as::<_, RecordRow>("SELECT * FROM records WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(StoredRecord::from))
    }

    async fn search(&self, collection_pattern: &str, query: &SearchQuery) -> Result<Page> {
        let total: i64 = build_count(collection_pattern, &query.filter)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let hits = if query.limit == 0 {
            Vec::new()
        } else {
            self.fetch_rows(build_search(collection_pattern, query)).await?
        };

        Ok(Page { hits, total: total as u64 })
    }

    async fn label_pool(&self, collection: &str, label: ClassLabel, limit: usize) -> Result<Vec<StoredRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM records WHERE collection = ");
        qb.push_bind(collection.to_string());
        qb.push(" AND class_label = ");
        qb.push_bind(label.as_str().to_string());
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
        self.fetch_rows(qb).await
    }

    async fn random_unlabeled(&self, collection: &str, limit: usize, seed: Option<u64>) -> Result<Vec<StoredRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM records WHERE collection = ");
        qb.push_bind(collection.to_string());
        qb.push(" AND class_label = '' ORDER BY ");
        match seed {
            // stable pseudo-random order per seed
            Some(s) => {
                qb.push("md5(id || ");
                qb.push_bind(s.to_string());
                qb.push(")");
            }
            None => {
                qb.push("random()");
            }
        }
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
        self.fetch_rows(qb).await
    }

    async fn top_by_predict(&self, collection: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM records WHERE collection = ");
        qb.push_bind(collection.to_string());
        qb.push(" ORDER BY predict DESC, id ASC LIMIT ");
        qb.push_bind(limit as i64);
        self.fetch_rows(qb).await
    }

    async fn scan(&self, collection: &str, after_id: Option<&str>, limit: usize) -> Result<Vec<StoredRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM records WHERE collection = ");
        qb.push_bind(collection.to_string());
        if let Some(after) = after_id {
            qb.push(" AND id > ");
            qb.push_bind(after.to_string());
        }
        qb.push(" ORDER BY id ASC LIMIT ");
        qb.push_bind(limit as i64);
        self.fetch_rows(qb).await
    }

    async fn neighbors(&self, collection: &str, hostname: &str, run_order: u32, radius: u32) -> Result<Vec<StoredRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM records WHERE collection = ");
        qb.push_bind(collection.to_string());
        qb.push(" AND hostname = ");
        qb.push_bind(hostname.to_string());
        qb.push(" AND run_order BETWEEN ");
        qb.push_bind(i64::from(run_order.saturating_sub(radius)));
        qb.push(" AND ");
        qb.push_bind(i64::from(run_order.saturating_add(radius)));
        qb.push(" ORDER BY run_order ASC");
        self.fetch_rows(qb).await
    }

    async fn update_predictions(&self, collection: &str, updates: &[(String, f32)]) -> Result<u64> {
        let (ids, probabilities): (Vec<String>, Vec<f32>) = updates.iter().cloned().unzip();
        let result = sqlx::query(
            r#"
            UPDATE records r
            SET predict = u.p
            FROM UNNEST($2::text[], $3::real[]) AS u(id, p)
            WHERE r.collection = $1 AND r.id = u.id
            "#,
        )
        .bind(collection)
        .bind(ids)
        .bind(probabilities)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn set_label(&self, collection: &str, id: &str, label: ClassLabel) -> Result<()> {
        let result = sqlx::query("UPDATE records SET class_label = $3 WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .bind(label.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("record {}/{}", collection, id)));
        }
        Ok(())
    }

    async fn put_record(&self, collection: &str, record: &StoredRecord) -> Result<()> {
        self.write_rows(collection, std::slice::from_ref(record), false).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appcompat_core::logic::store::SortDir;

    #[test]
    fn test_search_sql_exact_collection_and_tie_break() {
        let query = SearchQuery::new(20, 10).sorted_by("predict", SortDir::Desc).unwrap();
        let qb = build_search("appcompat-case1", &query);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM records WHERE collection = $1 ORDER BY predict DESC, hostname ASC, run_order ASC LIMIT $2 OFFSET $3"
        );
    }

    #[test]
    fn test_search_sql_pattern_and_terms() {
        let query = SearchQuery::new(0, 10)
            .with_text("psexec hostname:wks01 f_recon_cmd:true last_modified:2016-03-01")
            .unwrap();
        let qb = build_search("appcompat-*", &query);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM records WHERE collection LIKE $1 \
             AND (path ILIKE $2 OR hostname ILIKE $3) \
             AND lower(hostname) = $4 \
             AND f_recon_cmd = $5 \
             AND (last_modified >= $6 AND last_modified < $7) \
             ORDER BY hostname ASC, run_order ASC LIMIT $8 OFFSET $9"
        );
    }

    #[test]
    fn test_count_sql() {
        let filter = appcompat_core::logic::store::query::parse("run_order:3").unwrap();
        let qb = build_count("appcompat-*", &filter);
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM records WHERE collection LIKE $1 AND run_order = $2");
    }

    #[test]
    fn test_upsert_keeps_review_columns() {
        let keep = build_upsert("appcompat-a", &[], true);
        assert!(!keep.sql().contains("class_label = EXCLUDED.class_label"));
        assert!(keep.sql().contains("f_recon_cluster = EXCLUDED.f_recon_cluster"));

        let full = build_upsert("appcompat-a", &[], false);
        assert!(full.sql().contains("class_label = EXCLUDED.class_label"));
        assert!(full.sql().contains("predict = EXCLUDED.predict"));
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("a_b%c\\"), "a\\_b\\%c\\\\");
    }

    #[test]
    fn test_row_conversion() {
        let row = RecordRow {
            collection: "appcompat-a".into(),
            id: "x".repeat(64),
            class_label: "evil".into(),
            predict: 0.5,
            hostname: "h1".into(),
            run_order: 7,
            last_modified: None,
            last_execution: None,
            path: "c:\\temp\\a.exe".into(),
            file_size: Some(10),
            file_executed: Some(true),
            file_unc: String::new(),
            file_drive: "c:".into(),
            file_root: "\\temp".into(),
            file_shortname: "a".into(),
            file_ext: "exe".into(),
            file_name: "a.exe".into(),
            f_path_unique_hosts: Some(2),
            f_recon_cluster: Some(0),
            f_files_in_folder: Some(1),
            f_neighbour_psexec: Some(false),
            f_same_timestamp_different_name: Some(0),
            f_same_filesize_different_name: Some(1),
            f_shortname_ends_3264: false,
            f_path_depth: 1,
            f_staging_directory: false,
            f_temp_dir: true,
            f_system32_dir: false,
            f_recon_cmd: false,
            f_users_dir: false,
            f_number_digits: 0,
            f_root_length: 5,
            f_shortname_length: 1,
            f_executable_archive: false,
        };
        let stored = StoredRecord::from(row);
        assert_eq!(stored.record.class_label, ClassLabel::Evil);
        assert_eq!(stored.record.run_order, 7);
        assert!(stored.features.path.temp_dir);
        assert!(stored.to_row().is_ok());
    }
}
