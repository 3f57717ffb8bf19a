//! Logic Module - Pipeline Engines
//!
//! - `ingest/` - host-boundary chunking, run order, path normalization
//! - `features/` - structural path features and per-host sequence features
//! - `dispatch/` - host batching into queue jobs
//! - `model/` - training set curation, extra-trees classifier, predict cycle
//! - `store/` - storage collaborator trait, search query, in-memory backend
//! - `dataset/` - record types and persisted schema

pub mod error;
pub mod dataset;
pub mod ingest;
pub mod features;
pub mod dispatch;
pub mod model;
pub mod store;
