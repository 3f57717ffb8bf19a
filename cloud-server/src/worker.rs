//! Job workers
//!
//! Each worker polls the jobs table, runs one job under its timeout and
//! records the outcome. Load jobs are replay-safe: record ids are derived
//! from (collection, hostname, run_order) and upserts keep review fields.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use appcompat_core::{
    CycleReport, Job, JobPayload, JobStatus, PipelineError, PredictionCycle, RecordStore, StoredRecord,
};

use crate::models::{retry_backoff, PgJobQueue};

/// What a finished job did
#[derive(Debug)]
pub enum JobOutcome {
    Loaded { hosts: usize, records: u64 },
    Scored(CycleReport),
}

/// Run one job against the store
pub async fn execute(
    job: &Job,
    store: &Arc<dyn RecordStore>,
    cycle: &PredictionCycle,
) -> Result<JobOutcome, PipelineError> {
    match &job.payload {
        JobPayload::LoadHosts { hosts } => {
            let rows: Vec<StoredRecord> = hosts
                .iter()
                .flat_map(|h| h.records.iter().cloned())
                .map(|r| StoredRecord::from_enriched(&job.collection, r))
                .collect();
            let records = store.upsert_records(&job.collection, &rows).await?;
            Ok(JobOutcome::Loaded {
                hosts: hosts.len(),
                records,
            })
        }
        JobPayload::UpdatePredict { full_scan, .. } => {
            let report = cycle.run(&job.collection, *full_scan).await?;
            Ok(JobOutcome::Scored(report))
        }
    }
}

/// Failures a later attempt can plausibly get past
pub fn is_retryable(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::Store(_) | PipelineError::Io(_) | PipelineError::CycleInProgress(_)
    )
}

pub struct WorkerContext {
    pub queue: PgJobQueue,
    pub store: Arc<dyn RecordStore>,
    pub cycle: Arc<PredictionCycle>,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    /// First retry delay; doubles per attempt
    pub retry_backoff: Duration,
}

pub fn spawn_workers(ctx: Arc<WorkerContext>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|n| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { run_worker(n, ctx).await })
        })
        .collect()
}

async fn run_worker(n: usize, ctx: Arc<WorkerContext>) {
    tracing::info!("Worker {} started", n);
    loop {
        let claimed = match ctx.queue.claim().await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!("Worker {}: claim failed: {}", n, e);
                tokio::time::sleep(ctx.poll_interval).await;
                continue;
            }
        };

        let Some((job, attempts)) = claimed else {
            tokio::time::sleep(ctx.poll_interval).await;
            continue;
        };

        tracing::info!(
            "Worker {}: {} job {} for {} (attempt {})",
            n,
            job.payload.kind(),
            &job.id[..12.min(job.id.len())],
            job.collection,
            attempts
        );

        let limit = Duration::from_secs(job.timeout_secs);
        let result = tokio::time::timeout(limit, execute(&job, &ctx.store, &ctx.cycle)).await;

        let recorded = match result {
            Ok(Ok(outcome)) => {
                log_outcome(n, &outcome);
                ctx.queue.finish(&job.id).await
            }
            Ok(Err(e)) => {
                let max = if is_retryable(&e) { ctx.max_attempts } else { 0 };
                record_failure(n, &ctx, &job, &e.to_string(), max, attempts).await
            }
            Err(_) => {
                let msg = format!("timed out after {}s", job.timeout_secs);
                record_failure(n, &ctx, &job, &msg, ctx.max_attempts, attempts).await
            }
        };

        if let Err(e) = recorded {
            tracing::error!("Worker {}: could not record outcome of {}: {}", n, job.id, e);
        }
    }
}

async fn record_failure(
    n: usize,
    ctx: &WorkerContext,
    job: &Job,
    error: &str,
    max_attempts: i32,
    attempts: i32,
) -> Result<(), sqlx::Error> {
    let backoff = retry_backoff(ctx.retry_backoff, attempts);
    let status = ctx.queue.fail(&job.id, error, max_attempts, backoff).await?;
    match status {
        JobStatus::Failed => tracing::error!("Worker {}: job {} failed: {}", n, job.id, error),
        _ => tracing::warn!("Worker {}: job {} requeued in {:?}: {}", n, job.id, backoff, error),
    }
    Ok(())
}

fn log_outcome(n: usize, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Loaded { hosts, records } => {
            tracing::debug!("Worker {}: loaded {} hosts ({} records)", n, hosts, records)
        }
        JobOutcome::Scored(report) => tracing::info!(
            "Worker {}: cycle {} scored {} ({} skipped)",
            n,
            report.cycle_id,
            report.scored,
            report.skipped
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appcompat_core::logic::store::memory::InMemoryStore;
    use appcompat_core::{enrich_host, ClassLabel, CycleConfig, HostRecords, Record};
    use appcompat_core::logic::ingest::ChunkRecord;

    fn host(name: &str, n: u32) -> HostRecords {
        HostRecords {
            hostname: name.to_string(),
            records: (1..=n)
                .map(|i| ChunkRecord {
                    record: Record::new(name, &format!("c:\\windows\\system32\\tool{}.exe", i), i),
                    path_unique_hosts: 1,
                })
                .collect(),
        }
    }

    fn setup() -> (Arc<dyn RecordStore>, PredictionCycle) {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let cycle = PredictionCycle::new(Arc::clone(&store), CycleConfig::default());
        (store, cycle)
    }

    #[tokio::test]
    async fn test_load_job_is_replay_safe() {
        let (store, cycle) = setup();
        store.create_collection("appcompat-a").await.unwrap();

        let job = Job::load_hosts("appcompat-a", vec![enrich_host(host("WKS01", 4)), enrich_host(host("WKS02", 3))]);
        let outcome = execute(&job, &store, &cycle).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Loaded { hosts: 2, records: 7 }));

        // reviewer labels one row, then the same job is delivered again
        let first = store.scan("appcompat-a", None, 1).await.unwrap().remove(0);
        store.set_label("appcompat-a", &first.id, ClassLabel::Evil).await.unwrap();
        execute(&job, &store, &cycle).await.unwrap();

        let page = store.search("appcompat-a", &appcompat_core::SearchQuery::new(0, 100)).await.unwrap();
        assert_eq!(page.total, 7);
        let kept = store.get("appcompat-a", &first.id).await.unwrap().unwrap();
        assert_eq!(kept.record.class_label, ClassLabel::Evil);
    }

    #[tokio::test]
    async fn test_predict_job_without_labels_is_not_retried() {
        let (store, cycle) = setup();
        store.create_collection("appcompat-a").await.unwrap();

        let job = Job::update_predict("appcompat-a", true);
        let err = execute(&job, &store, &cycle).await.unwrap_err();
        assert!(matches!(err, PipelineError::TrainingSetEmpty(_)));
        assert!(!is_retryable(&err));
        assert!(is_retryable(&PipelineError::Store("connection reset".into())));
    }
}
