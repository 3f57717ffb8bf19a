//! Dispatch Module - host batches → durable job queue
//!
//! The loader only enqueues; workers consuming the queue write to the
//! store. Queue implementations live with their backends.

pub mod dispatcher;
pub mod job;

pub use dispatcher::WorkDispatcher;
pub use job::{Job, JobHandle, JobPayload, JobQueue, JobStatus};
