//! Router tests over the in-memory backends

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use appcompat_core::logic::ingest::ChunkRecord;
use appcompat_core::logic::store::memory::{InMemoryQueue, InMemoryStore};
use appcompat_core::{enrich_host, ClassLabel, HostRecords, ModelStore, Record, RecordStore, StoredRecord};

use super::*;

const TRAINING: &str = "appcompat-training";

struct Harness {
    app: Router,
    store: Arc<InMemoryStore>,
    queue: Arc<InMemoryQueue>,
    _models: tempfile::TempDir,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let models = tempfile::tempdir().unwrap();

    let paths = [
        "c:\\windows\\system32\\net.exe",
        "c:\\windows\\system32\\ipconfig.exe",
        "c:\\users\\bob\\appdata\\local\\temp\\x.exe",
        "c:\\windows\\psexesvc.exe",
        "c:\\program files\\app\\app.exe",
    ];
    let host = HostRecords {
        hostname: "WKS01".to_string(),
        records: paths
            .iter()
            .enumerate()
            .map(|(i, p)| ChunkRecord {
                record: Record::new("WKS01", p, i as u32 + 1),
                path_unique_hosts: 1,
            })
            .collect(),
    };
    let rows: Vec<StoredRecord> = enrich_host(host)
        .records
        .into_iter()
        .map(|r| StoredRecord::from_enriched("appcompat-a", r))
        .collect();

    store.create_collection("appcompat-a").await.unwrap();
    store.upsert_records("appcompat-a", &rows).await.unwrap();

    let state = AppState {
        store: store.clone(),
        queue: queue.clone(),
        models: ModelStore::from_path(models.path().to_path_buf()),
        config: Config::from_lookup(|_| None),
    };

    Harness {
        app: create_router(state),
        store,
        queue,
        _models: models,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn first_id(store: &InMemoryStore) -> String {
    store.scan("appcompat-a", None, 1).await.unwrap().remove(0).id
}

#[tokio::test]
async fn test_health() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["collections"], 1);
}

#[tokio::test]
async fn test_entries_paging_and_sort() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/api/entries?start=1&length=2&sort=run_order&dir=desc&draw=7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["draw"], 7);
    assert_eq!(body["recordsTotal"], 5);
    assert_eq!(body["recordsFiltered"], 5);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["run_order"], 4);
    assert_eq!(data[1]["run_order"], 3);
}

#[tokio::test]
async fn test_entries_search_filters() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/api/entries/appcompat-a?search=f_system32_dir:true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recordsTotal"], 5);
    assert_eq!(body["recordsFiltered"], 2);
}

#[tokio::test]
async fn test_query_syntax_error_is_400_with_query() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/api/entries?search=nosuchfield:1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
    assert_eq!(body["query"], "nosuchfield:1");
}

#[tokio::test]
async fn test_label_mirrors_into_training() {
    let h = harness().await;
    let id = first_id(&h.store).await;
    let uri = format!("/api/label/appcompat-a/{}", id);

    let (status, _) = call(&h.app, Method::POST, &uri, Some(json!({ "label": "evil" }))).await;
    assert_eq!(status, StatusCode::OK);
    let mirror = h.store.get(TRAINING, &id).await.unwrap().unwrap();
    assert_eq!(mirror.record.class_label, ClassLabel::Evil);
    assert_eq!(mirror.collection, TRAINING);

    // relabel updates the existing mirror
    call(&h.app, Method::POST, &uri, Some(json!({ "label": "not_evil" }))).await;
    let mirror = h.store.get(TRAINING, &id).await.unwrap().unwrap();
    assert_eq!(mirror.record.class_label, ClassLabel::NotEvil);
    let entry = h.store.get("appcompat-a", &id).await.unwrap().unwrap();
    assert_eq!(entry.record.class_label, ClassLabel::NotEvil);

    let (status, _) = call(&h.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.get(TRAINING, &id).await.unwrap().is_none());
    let entry = h.store.get("appcompat-a", &id).await.unwrap().unwrap();
    assert_eq!(entry.record.class_label, ClassLabel::Unlabeled);
}

#[tokio::test]
async fn test_invalid_label_rejected() {
    let h = harness().await;
    let id = first_id(&h.store).await;
    let uri = format!("/api/label/appcompat-a/{}", id);
    let (status, _) = call(&h.app, Method::POST, &uri, Some(json!({ "label": "benign" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_entry_context_same_host_window() {
    let h = harness().await;
    let id = first_id(&h.store).await;
    let (status, body) = call(&h.app, Method::GET, &format!("/api/entry_context/appcompat-a/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 5);
    assert!(data.iter().all(|d| d["hostname"] == "WKS01"));

    let (status, _) = call(&h.app, Method::GET, "/api/entry_context/appcompat-a/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reprocess_and_status() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::POST, "/api/reprocess/appcompat-a", Some(json!({ "full_scan": true }))).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let jobs = h.queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].timeout_secs, 3600);

    let (status, body) = call(&h.app, Method::GET, &format!("/api/job_status/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_status"], "queued");

    let (status, _) = call(&h.app, Method::POST, "/api/reprocess/appcompat-missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, Method::GET, "/api/job_status/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reprocess_all_skips_training() {
    let h = harness().await;
    h.store.ensure_collection(TRAINING).await.unwrap();
    h.store.create_collection("appcompat-b").await.unwrap();

    let (status, body) = call(&h.app, Method::POST, "/api/reprocess", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_ids"].as_array().unwrap().len(), 2);
    assert!(h.queue.jobs().iter().all(|j| j.collection != TRAINING));
}

#[tokio::test]
async fn test_collections_and_missing_model() {
    let h = harness().await;
    let (status, body) = call(&h.app, Method::GET, "/api/collections", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "appcompat-a");
    assert_eq!(body[0]["records"], 5);

    let (status, _) = call(&h.app, Method::GET, "/api/model/appcompat-a", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
