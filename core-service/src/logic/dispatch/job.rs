//! Job Types
//!
//! Ids of host batches are SHA-256 digests of their content, so submitting
//! the same batch twice addresses the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_LOAD_TIMEOUT_SECS, DEFAULT_QUEUE, LOAD_QUEUE};
use crate::logic::error::Result;
use crate::logic::features::EnrichedHost;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Write enriched hosts into a collection
    LoadHosts { hosts: Vec<EnrichedHost> },
    /// Retrain on current labels and rescore the collection
    UpdatePredict {
        full_scan: bool,
        requested_at: DateTime<Utc>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::LoadHosts { .. } => "load_hosts",
            JobPayload::UpdatePredict { .. } => "update_predict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub collection: String,
    pub payload: JobPayload,
    pub timeout_secs: u64,
}

impl Job {
    pub fn new(queue: &str, collection: &str, payload: JobPayload, timeout_secs: u64) -> Self {
        Self {
            id: content_id(queue, collection, &payload),
            queue: queue.to_string(),
            collection: collection.to_string(),
            payload,
            timeout_secs,
        }
    }

    pub fn load_hosts(collection: &str, hosts: Vec<EnrichedHost>) -> Self {
        Self::new(LOAD_QUEUE, collection, JobPayload::LoadHosts { hosts }, DEFAULT_LOAD_TIMEOUT_SECS)
    }

    /// Every trigger is a distinct job; `requested_at` keeps ids apart
    pub fn update_predict(collection: &str, full_scan: bool) -> Self {
        Self::new(
            DEFAULT_QUEUE,
            collection,
            JobPayload::UpdatePredict { full_scan, requested_at: Utc::now() },
            DEFAULT_JOB_TIMEOUT_SECS,
        )
    }

    pub fn host_count(&self) -> usize {
        match &self.payload {
            JobPayload::LoadHosts { hosts } => hosts.len(),
            JobPayload::UpdatePredict { .. } => 0,
        }
    }
}

fn content_id(queue: &str, collection: &str, payload: &JobPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(queue.as_bytes());
    hasher.update([0u8]);
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    // serializing plain data into a Vec cannot fail
    hasher.update(serde_json::to_vec(payload).unwrap_or_default());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "started" => Some(JobStatus::Started),
            "finished" => Some(JobStatus::Finished),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
}

/// Durable, at-least-once work queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; enqueuing an id that already exists must not duplicate work
    async fn enqueue(&self, job: &Job) -> Result<JobHandle>;

    async fn status(&self, id: &str) -> Result<Option<JobStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::EnrichedHost;

    fn host(name: &str) -> EnrichedHost {
        EnrichedHost { hostname: name.to_string(), records: vec![] }
    }

    #[test]
    fn test_load_job_id_is_content_derived() {
        let a = Job::load_hosts("appcompat-x", vec![host("h1"), host("h2")]);
        let b = Job::load_hosts("appcompat-x", vec![host("h1"), host("h2")]);
        let c = Job::load_hosts("appcompat-y", vec![host("h1"), host("h2")]);
        let d = Job::load_hosts("appcompat-x", vec![host("h2")]);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_ne!(a.id, d.id);
        assert_eq!(a.id.len(), 64);
        assert_eq!(a.queue, LOAD_QUEUE);
    }

    #[test]
    fn test_payload_tagged_serialization() {
        let job = Job::update_predict("appcompat-x", true);
        let json = serde_json::to_value(&job.payload).unwrap();
        assert_eq!(json["kind"], "update_predict");
        assert_eq!(json["full_scan"], true);
        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, job.payload);
    }

    #[test]
    fn test_status_strings() {
        for s in [JobStatus::Queued, JobStatus::Started, JobStatus::Finished, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("deferred"), None);
    }
}
