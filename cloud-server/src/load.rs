//! CSV → queue load
//!
//! Reads the export, chunks it on host boundaries, enriches each host and
//! hands batches to the dispatcher. Workers do the actual writes.
//!
//! Decoding, chunking and enrichment run on a blocking thread and feed the
//! async dispatcher through a bounded channel.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use appcompat_core::constants::COLLECTION_PREFIX;
use appcompat_core::logic::ingest::ChunkStats;
use appcompat_core::{
    enrich_host, ChunkerConfig, EnrichedHost, HostBoundaryChunker, JobQueue, PipelineError, RecordStore,
    WorkDispatcher,
};

use crate::source::{CsvRecordSource, SourceError};

const FLUSH_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{0} hosts could not be queued")]
    Unsubmitted(usize),

    #[error("reader task failed: {0}")]
    Reader(String),
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub chunk_size: usize,
    pub batch_size: usize,
    pub training_collection: String,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub collection: String,
    pub chunks: ChunkStats,
    pub hosts: usize,
    pub jobs: usize,
}

/// `appcompat-<name>`
pub fn collection_name(name: &str) -> String {
    if name.starts_with(COLLECTION_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", COLLECTION_PREFIX, name)
    }
}

/// Create the target collection (must be new) and the training collection
pub async fn provision(store: &dyn RecordStore, collection: &str, training: &str) -> Result<(), PipelineError> {
    if store.ensure_collection(training).await? {
        tracing::info!("Created training collection {}", training);
    }
    store.create_collection(collection).await?;
    tracing::info!("Created collection {}", collection);
    Ok(())
}

/// Chunk and enrich on the calling (blocking) thread, sending each host
fn produce<R: Read>(
    reader: R,
    chunk_size: usize,
    tx: mpsc::Sender<EnrichedHost>,
) -> Result<ChunkStats, SourceError> {
    let source = CsvRecordSource::new(reader)?;
    let mut chunker = HostBoundaryChunker::new(source, ChunkerConfig { chunk_size });

    for chunk in chunker.by_ref() {
        tracing::debug!("Chunk {}: {} records", chunk.index, chunk.len());
        for host in chunk.into_hosts() {
            if tx.blocking_send(enrich_host(host)).is_err() {
                // receiver dropped
                return Ok(chunker.stats());
            }
        }
    }
    Ok(chunker.stats())
}

pub async fn load<R: Read + Send + 'static>(
    reader: R,
    name: &str,
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
    options: &LoadOptions,
) -> Result<LoadSummary, LoadError> {
    let collection = collection_name(name);
    provision(store.as_ref(), &collection, &options.training_collection).await?;

    let (tx, mut rx) = mpsc::channel(options.batch_size.max(1) * 2);
    let chunk_size = options.chunk_size;
    let producer = tokio::task::spawn_blocking(move || produce(reader, chunk_size, tx));

    let mut dispatcher = WorkDispatcher::with_batch_size(queue, &collection, options.batch_size);
    let mut hosts = 0;

    while let Some(host) = rx.recv().await {
        hosts += 1;
        if let Err(e) = dispatcher.push(host).await {
            tracing::warn!("Queue unavailable, {} hosts pending: {}", dispatcher.pending().len(), e);
        }
    }

    let stats = producer.await.map_err(|e| LoadError::Reader(e.to_string()))??;

    let mut attempt = 0;
    while let Err(e) = dispatcher.flush().await {
        attempt += 1;
        if attempt > FLUSH_RETRIES {
            tracing::error!("Giving up on {} pending hosts: {}", dispatcher.pending().len(), e);
            return Err(LoadError::Unsubmitted(dispatcher.pending().len()));
        }
        tokio::time::sleep(options.retry_delay).await;
    }

    let summary = LoadSummary {
        collection,
        chunks: stats,
        hosts,
        jobs: dispatcher.submitted().len(),
    };
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    use appcompat_core::logic::store::memory::{InMemoryQueue, InMemoryStore};
    use appcompat_core::JobPayload;

    const HEADER: &str = "hostname,last_modified,last_execution,path,file_size,file_executed,key_path\n";

    fn csv(hosts: &[(&str, usize)]) -> Cursor<Vec<u8>> {
        Cursor::new(csv_text(hosts).into_bytes())
    }

    fn csv_text(hosts: &[(&str, usize)]) -> String {
        let mut out = HEADER.to_string();
        for (host, n) in hosts {
            for i in 0..*n {
                out.push_str(&format!("{},01/02/16 03:04:05,,C:\\Tools\\t{}.exe,10,Yes,k\n", host, i));
            }
        }
        out.push_str(",,,,,,\n");
        out
    }

    fn options(chunk_size: usize, batch_size: usize) -> LoadOptions {
        LoadOptions {
            chunk_size,
            batch_size,
            training_collection: "appcompat-training".to_string(),
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("case42"), "appcompat-case42");
        assert_eq!(collection_name("appcompat-case42"), "appcompat-case42");
    }

    #[tokio::test]
    async fn test_load_batches_every_host_once() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let data = csv(&[("A", 7), ("B", 9), ("C", 3), ("D", 4), ("E", 1)]);

        let summary = load(data, "case", store.clone(), queue.clone(), &options(10, 2)).await.unwrap();
        assert_eq!(summary.collection, "appcompat-case");
        assert_eq!(summary.hosts, 5);
        assert_eq!(summary.jobs, 3);
        assert_eq!(summary.chunks.dropped, 1);
        assert!(store.collection_exists("appcompat-training").await.unwrap());

        let mut seen: HashMap<String, usize> = HashMap::new();
        for job in queue.jobs() {
            let JobPayload::LoadHosts { hosts } = job.payload else { panic!("unexpected job") };
            for host in hosts {
                let runs: Vec<u32> = host.records.iter().map(|r| r.record.run_order).collect();
                assert_eq!(runs, (0..runs.len() as u32).collect::<Vec<_>>());
                *seen.entry(host.hostname).or_default() += host.records.len();
            }
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen["A"], 7);
        assert_eq!(seen["B"], 9);
    }

    #[tokio::test]
    async fn test_existing_collection_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        store.create_collection("appcompat-case").await.unwrap();

        let err = load(csv(&[("A", 1)]), "case", store, queue, &options(10, 2)).await.unwrap_err();
        assert!(matches!(err, LoadError::Pipeline(PipelineError::CollectionExists(_))));
    }

    #[tokio::test]
    async fn test_queue_outage_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        queue.fail_next(2);

        let summary = load(csv(&[("A", 2), ("B", 2), ("C", 2)]), "case", store, queue.clone(), &options(100, 2))
            .await
            .unwrap();
        assert_eq!(summary.hosts, 3);
        let queued: usize = queue.jobs().iter().map(|j| j.host_count()).sum();
        assert_eq!(queued, 3);
    }

    #[tokio::test]
    async fn test_missing_column_surfaces_from_reader() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let data = Cursor::new(b"host,path\nx,y\n".to_vec());

        let err = load(data, "case", store, queue.clone(), &options(10, 2)).await.unwrap_err();
        assert!(matches!(err, LoadError::Source(SourceError::MissingColumn("hostname"))));
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_gzipped_export_loads() {
        use std::io::Write;
        use crate::source::{open_input, Compression};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv.gz");
        let mut gz = flate2::write::GzEncoder::new(std::fs::File::create(&path).unwrap(), flate2::Compression::default());
        gz.write_all(csv_text(&[("A", 7), ("B", 9)]).as_bytes()).unwrap();
        gz.finish().unwrap();

        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let input = open_input(&path, Compression::Infer).unwrap();

        let summary = load(input, "case", store, queue.clone(), &options(10, 2)).await.unwrap();
        assert_eq!(summary.hosts, 2);
        assert_eq!(summary.chunks.records, 16);
        let queued: usize = queue.jobs().iter().map(|j| j.host_count()).sum();
        assert_eq!(queued, 2);
    }
}
