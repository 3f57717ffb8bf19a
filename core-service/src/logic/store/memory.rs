//! In-memory backends
//!
//! Same semantics as the PostgreSQL backends, without durability.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;

use crate::logic::dataset::ClassLabel;
use crate::logic::dispatch::{Job, JobHandle, JobQueue, JobStatus};
use crate::logic::error::{PipelineError, Result};

use super::{collection_matches, CollectionInfo, Page, RecordStore, SearchQuery, SortDir, StoredRecord};

struct Collection {
    created_at: DateTime<Utc>,
    records: BTreeMap<String, StoredRecord>,
}

impl Collection {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            records: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, collection: &str, f: impl FnOnce(&Collection) -> T) -> Result<T> {
        let guard = self.collections.read();
        let c = guard
            .get(collection)
            .ok_or_else(|| PipelineError::NotFound(format!("collection {}", collection)))?;
        Ok(f(c))
    }

    fn write<T>(&self, collection: &str, f: impl FnOnce(&mut Collection) -> T) -> Result<T> {
        let mut guard = self.collections.write();
        let c = guard
            .get_mut(collection)
            .ok_or_else(|| PipelineError::NotFound(format!("collection {}", collection)))?;
        Ok(f(c))
    }
}

/// Nulls sort first, then numbers, strings and booleans by value
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn tie_break(a: &StoredRecord, b: &StoredRecord) -> Ordering {
    a.record
        .hostname
        .cmp(&b.record.hostname)
        .then(a.record.run_order.cmp(&b.record.run_order))
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut guard = self.collections.write();
        if guard.contains_key(name) {
            return Err(PipelineError::CollectionExists(name.to_string()));
        }
        guard.insert(name.to_string(), Collection::new());
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<bool> {
        let mut guard = self.collections.write();
        if guard.contains_key(name) {
            return Ok(false);
        }
        guard.insert(name.to_string(), Collection::new());
        Ok(true)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        Ok(self
            .collections
            .read()
            .iter()
            .map(|(name, c)| CollectionInfo {
                name: name.clone(),
                created_at: c.created_at,
                records: c.records.len() as u64,
            })
            .collect())
    }

    async fn upsert_records(&self, collection: &str, records: &[StoredRecord]) -> Result<u64> {
        self.write(collection, |c| {
            for incoming in records {
                let mut row = incoming.clone();
                row.collection = collection.to_string();
                if let Some(existing) = c.records.get(&row.id) {
                    row.record.class_label = existing.record.class_label;
                    row.record.predict = existing.record.predict;
                }
                c.records.insert(row.id.clone(), row);
            }
            records.len() as u64
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        self.read(collection, |c| c.records.get(id).cloned())
    }

    async fn search(&self, collection_pattern: &str, query: &SearchQuery) -> Result<Page> {
        let guard = self.collections.read();
        let mut hits: Vec<(Value, &StoredRecord)> = guard
            .iter()
            .filter(|(name, _)| collection_matches(collection_pattern, name))
            .flat_map(|(_, c)| c.records.values())
            .map(|r| (r.to_document(), r))
            .filter(|(doc, _)| query.filter.matches(doc))
            .collect();

        hits.sort_by(|(da, a), (db, b)| {
            let primary = match &query.sort {
                Some((field, dir)) => {
                    let o = compare_values(da.get(field), db.get(field));
                    if *dir == SortDir::Desc { o.reverse() } else { o }
                }
                None => Ordering::Equal,
            };
            primary.then_with(|| tie_break(a, b))
        });

        let total = hits.len() as u64;
        let hits = hits
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|(_, r)| r.clone())
            .collect();

        Ok(Page { hits, total })
    }

    async fn label_pool(&self, collection: &str, label: ClassLabel, limit: usize) -> Result<Vec<StoredRecord>> {
        self.read(collection, |c| {
            c.records
                .values()
                .filter(|r| r.record.class_label == label)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    async fn random_unlabeled(&self, collection: &str, limit: usize, seed: Option<u64>) -> Result<Vec<StoredRecord>> {
        let mut pool: Vec<StoredRecord> = self.read(collection, |c| {
            c.records
                .values()
                .filter(|r| r.record.class_label == ClassLabel::Unlabeled)
                .cloned()
                .collect()
        })?;

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        pool.shuffle(&mut rng);
        pool.truncate(limit);
        Ok(pool)
    }

    async fn top_by_predict(&self, collection: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        let mut rows: Vec<StoredRecord> = self.read(collection, |c| c.records.values().cloned().collect())?;
        rows.sort_by(|a, b| {
            b.record
                .predict
                .partial_cmp(&a.record.predict)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn scan(&self, collection: &str, after_id: Option<&str>, limit: usize) -> Result<Vec<StoredRecord>> {
        self.read(collection, |c| {
            let iter: Box<dyn Iterator<Item = &StoredRecord>> = match after_id {
                Some(after) => Box::new(
                    c.records
                        .range::<str, _>((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                        .map(|(_, r)| r),
                ),
                None => Box::new(c.records.values()),
            };
            iter.take(limit).cloned().collect()
        })
    }

    async fn neighbors(&self, collection: &str, hostname: &str, run_order: u32, radius: u32) -> Result<Vec<StoredRecord>> {
        let lo = run_order.saturating_sub(radius);
        let hi = run_order.saturating_add(radius);
        let mut rows: Vec<StoredRecord> = self.read(collection, |c| {
            c.records
                .values()
                .filter(|r| r.record.hostname == hostname && (lo..=hi).contains(&r.record.run_order))
                .cloned()
                .collect()
        })?;
        rows.sort_by_key(|r| r.record.run_order);
        Ok(rows)
    }

    async fn update_predictions(&self, collection: &str, updates: &[(String, f32)]) -> Result<u64> {
        self.write(collection, |c| {
            let mut written = 0;
            for (id, p) in updates {
                if let Some(r) = c.records.get_mut(id) {
                    r.record.predict = *p;
                    written += 1;
                }
            }
            written
        })
    }

    async fn set_label(&self, collection: &str, id: &str, label: ClassLabel) -> Result<()> {
        self.write(collection, |c| match c.records.get_mut(id) {
            Some(r) => {
                r.record.class_label = label;
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("record {}/{}", collection, id))),
        })?
    }

    async fn put_record(&self, collection: &str, record: &StoredRecord) -> Result<()> {
        self.write(collection, |c| {
            c.records.insert(record.id.clone(), record.mirrored_into(collection));
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.write(collection, |c| c.records.remove(id).is_some())
    }
}

/// Queue that records jobs instead of running them
#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<Vec<Job>>,
    statuses: Mutex<HashMap<String, JobStatus>>,
    failures: AtomicUsize,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` enqueues
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, AtomicOrdering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    pub fn set_status(&self, id: &str, status: JobStatus) {
        self.statuses.lock().insert(id.to_string(), status);
    }

    /// Remove and return queued jobs in submission order
    pub fn drain(&self) -> Vec<Job> {
        let jobs: Vec<Job> = self.jobs.lock().drain(..).collect();
        let mut statuses = self.statuses.lock();
        for job in &jobs {
            statuses.insert(job.id.clone(), JobStatus::Started);
        }
        jobs
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: &Job) -> Result<JobHandle> {
        let rejected = self
            .failures
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(PipelineError::Store("queue unavailable".to_string()));
        }

        let mut statuses = self.statuses.lock();
        if !statuses.contains_key(&job.id) {
            statuses.insert(job.id.clone(), JobStatus::Queued);
            self.jobs.lock().push(job.clone());
        }

        Ok(JobHandle {
            id: job.id.clone(),
            queue: job.queue.clone(),
        })
    }

    async fn status(&self, id: &str) -> Result<Option<JobStatus>> {
        Ok(self.statuses.lock().get(id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::dataset::Record;
    use crate::logic::features::{EnrichedRecord, FeatureVector};
    use crate::logic::store::{record_id, SearchQuery};

    fn stored(collection: &str, host: &str, run_order: u32, path: &str) -> StoredRecord {
        StoredRecord::from_enriched(
            collection,
            EnrichedRecord {
                record: Record::new(host, path, run_order),
                features: FeatureVector::from_path(path),
            },
        )
    }

    #[tokio::test]
    async fn test_create_collection_twice_fails() {
        let store = InMemoryStore::new();
        store.create_collection("appcompat-a").await.unwrap();
        let err = store.create_collection("appcompat-a").await.unwrap_err();
        assert!(matches!(err, PipelineError::CollectionExists(_)));
        assert!(!store.ensure_collection("appcompat-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_preserves_label_and_predict() {
        let store = InMemoryStore::new();
        store.ensure_collection("appcompat-a").await.unwrap();
        let row = stored("appcompat-a", "h1", 0, "c:\\a.exe");
        store.upsert_records("appcompat-a", &[row.clone()]).await.unwrap();
        store.set_label("appcompat-a", &row.id, ClassLabel::Evil).await.unwrap();
        store.update_predictions("appcompat-a", &[(row.id.clone(), 0.9)]).await.unwrap();

        // replayed load
        store.upsert_records("appcompat-a", &[row.clone()]).await.unwrap();

        let got = store.get("appcompat-a", &row.id).await.unwrap().unwrap();
        assert_eq!(got.record.class_label, ClassLabel::Evil);
        assert_eq!(got.record.predict, 0.9);
        assert_eq!(store.list_collections().await.unwrap()[0].records, 1);
    }

    #[tokio::test]
    async fn test_search_pattern_sort_and_tie_break() {
        let store = InMemoryStore::new();
        for c in ["appcompat-a", "appcompat-b", "other"] {
            store.ensure_collection(c).await.unwrap();
        }
        store
            .upsert_records("appcompat-a", &[stored("appcompat-a", "h2", 0, "c:\\x.exe"), stored("appcompat-a", "h1", 1, "c:\\x.exe")])
            .await
            .unwrap();
        store.upsert_records("appcompat-b", &[stored("appcompat-b", "h1", 0, "c:\\x.exe")]).await.unwrap();
        store.upsert_records("other", &[stored("other", "h0", 0, "c:\\x.exe")]).await.unwrap();

        let page = store.search("appcompat-*", &SearchQuery::new(0, 10)).await.unwrap();
        assert_eq!(page.total, 3);
        let order: Vec<(String, u32)> = page.hits.iter().map(|r| (r.record.hostname.clone(), r.record.run_order)).collect();
        assert_eq!(order, vec![("h1".into(), 0), ("h1".into(), 1), ("h2".into(), 0)]);

        let q = SearchQuery::new(1, 1).with_text("hostname:h1").unwrap();
        let page = store.search("appcompat-*", &q).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].record.run_order, 1);
    }

    #[tokio::test]
    async fn test_scan_is_keyset_ordered() {
        let store = InMemoryStore::new();
        store.ensure_collection("appcompat-a").await.unwrap();
        let rows: Vec<StoredRecord> = (0..5).map(|i| stored("appcompat-a", "h1", i, "c:\\a.exe")).collect();
        store.upsert_records("appcompat-a", &rows).await.unwrap();

        let mut seen = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = store.scan("appcompat-a", after.as_deref(), 2).await.unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(|r| r.id.clone());
            seen.extend(page.into_iter().map(|r| r.id));
        }
        let mut expected: Vec<String> = (0..5).map(|i| record_id("appcompat-a", "h1", i)).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_neighbors_window() {
        let store = InMemoryStore::new();
        store.ensure_collection("appcompat-a").await.unwrap();
        let mut rows: Vec<StoredRecord> = (0..30).map(|i| stored("appcompat-a", "h1", i, "c:\\a.exe")).collect();
        rows.push(stored("appcompat-a", "h2", 5, "c:\\a.exe"));
        store.upsert_records("appcompat-a", &rows).await.unwrap();

        let near = store.neighbors("appcompat-a", "h1", 5, 10).await.unwrap();
        let runs: Vec<u32> = near.iter().map(|r| r.record.run_order).collect();
        assert_eq!(runs, (0..=15).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_random_unlabeled_seeded() {
        let store = InMemoryStore::new();
        store.ensure_collection("appcompat-a").await.unwrap();
        let rows: Vec<StoredRecord> = (0..50).map(|i| stored("appcompat-a", "h1", i, "c:\\a.exe")).collect();
        store.upsert_records("appcompat-a", &rows).await.unwrap();
        store.set_label("appcompat-a", &rows[0].id, ClassLabel::NotEvil).await.unwrap();

        let a = store.random_unlabeled("appcompat-a", 10, Some(7)).await.unwrap();
        let b = store.random_unlabeled("appcompat-a", 10, Some(7)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.iter().all(|r| r.record.class_label == ClassLabel::Unlabeled));
    }

    #[tokio::test]
    async fn test_queue_dedups_by_id() {
        let queue = InMemoryQueue::new();
        let job = Job::update_predict("appcompat-a", false);
        queue.enqueue(&job).await.unwrap();
        queue.enqueue(&job).await.unwrap();
        assert_eq!(queue.jobs().len(), 1);
        assert_eq!(queue.status(&job.id).await.unwrap(), Some(JobStatus::Queued));
        assert_eq!(queue.status("missing").await.unwrap(), None);
    }
}
