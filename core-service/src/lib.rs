//! AppCompat Triage Core
//!
//! Ingestion chunking, feature extraction and the train/score feedback loop
//! for host file-execution artifacts (appcompat / shimcache exports).
//!
//! ```text
//! raw stream ─► HostBoundaryChunker ─► HostRecords ─► path + sequence features
//!                                                         │
//!                                                         ▼
//!                      RecordStore ◄── queue ◄── WorkDispatcher
//!                          │
//!                          ▼
//!   TrainingSetCurator ─► ExtraTreesClassifier ─► probability updates
//! ```
//!
//! Storage and queueing are reached only through the [`RecordStore`] and
//! [`JobQueue`] traits; `appcompat-server` provides the PostgreSQL backends.

pub mod constants;
pub mod logic;

pub use logic::error::{PipelineError, Result};
pub use logic::dataset::{ClassLabel, RawRecord, Record};
pub use logic::dispatch::{Job, JobHandle, JobPayload, JobQueue, JobStatus, WorkDispatcher};
pub use logic::features::{enrich_host, EnrichedHost, EnrichedRecord, FeatureVector};
pub use logic::ingest::{ChunkerConfig, HostBoundaryChunker, HostRecords, RunOrderTracker};
pub use logic::model::{CycleConfig, CycleReport, ExtraTreesClassifier, ModelStore, PredictionCycle, TrainingSetCurator};
pub use logic::store::{CollectionInfo, Page, RecordStore, SearchQuery, SortDir, StoredRecord};
