//! Work Dispatcher
//!
//! Groups enriched hosts into fixed-size batches and hands each batch to
//! the job queue. A batch that fails to enqueue stays pending; retrying
//! submits byte-identical content and so the same job id.

use std::sync::Arc;

use crate::constants::DEFAULT_HOST_BATCH_SIZE;
use crate::logic::error::{PipelineError, Result};
use crate::logic::features::EnrichedHost;

use super::job::{Job, JobHandle, JobQueue};

pub struct WorkDispatcher {
    queue: Arc<dyn JobQueue>,
    collection: String,
    batch_size: usize,
    pending: Vec<EnrichedHost>,
    submitted: Vec<JobHandle>,
}

impl WorkDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, collection: &str) -> Self {
        Self::with_batch_size(queue, collection, DEFAULT_HOST_BATCH_SIZE)
    }

    pub fn with_batch_size(queue: Arc<dyn JobQueue>, collection: &str, batch_size: usize) -> Self {
        Self {
            queue,
            collection: collection.to_string(),
            batch_size: batch_size.max(1),
            pending: Vec::with_capacity(batch_size.max(1)),
            submitted: Vec::new(),
        }
    }

    /// Buffer a host; submits whenever a full batch is ready
    ///
    /// On error the host is retained and the failed batch will be
    /// resubmitted by the next `push` or `flush`.
    pub async fn push(&mut self, host: EnrichedHost) -> Result<()> {
        self.pending.push(host);
        while self.pending.len() >= self.batch_size {
            self.submit(self.batch_size).await?;
        }
        Ok(())
    }

    pub async fn push_all<I>(&mut self, hosts: I) -> Result<()>
    where
        I: IntoIterator<Item = EnrichedHost>,
    {
        for host in hosts {
            self.push(host).await?;
        }
        Ok(())
    }

    /// Submit whatever is left, including a short final batch
    pub async fn flush(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            let n = self.pending.len().min(self.batch_size);
            self.submit(n).await?;
        }
        Ok(())
    }

    async fn submit(&mut self, n: usize) -> Result<()> {
        let job = Job::load_hosts(&self.collection, self.pending[..n].to_vec());

        let handle = self.queue.enqueue(&job).await.map_err(|e| {
            log::warn!("Enqueue of {} hosts failed, batch kept for retry: {}", n, e);
            PipelineError::JobSubmission(e.to_string())
        })?;

        log::debug!("Submitted job {} ({} hosts) to {}", handle.id, n, handle.queue);
        self.pending.drain(..n);
        self.submitted.push(handle);
        Ok(())
    }

    pub fn pending(&self) -> &[EnrichedHost] {
        &self.pending
    }

    pub fn submitted(&self) -> &[JobHandle] {
        &self.submitted
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}
