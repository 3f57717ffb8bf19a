//! Central Configuration Constants
//!
//! Single source of truth for pipeline defaults.
//! Typed config structs (`ChunkerConfig`, `CuratorConfig`, ...) start from these.

/// Prefix for every record collection created by the loader
pub const COLLECTION_PREFIX: &str = "appcompat-";

/// Collection pattern matching every loaded collection
pub const ALL_COLLECTIONS: &str = "appcompat-*";

/// Collection holding the human-labelled training mirror
pub const TRAINING_COLLECTION: &str = "appcompat-training";

/// Default ingestion chunk size (records)
///
/// Large enough that path_unique_hosts sees a meaningful sample of hosts.
pub const DEFAULT_CHUNK_SIZE: usize = 250_000;

/// Hosts per load job
pub const DEFAULT_HOST_BATCH_SIZE: usize = 50;

/// Records scored per prediction batch
pub const DEFAULT_SCORE_BATCH_SIZE: usize = 20_000;

/// Records rescored when a cycle is not a full scan
pub const DEFAULT_TOP_N: usize = 10_000;

/// Retrieval cap for the evil label pool
pub const EVIL_POOL_CAP: usize = 1024;

/// Retrieval cap for the not_evil label pool
pub const NOT_EVIL_POOL_CAP: usize = 1024 * 3;

/// Target (not_evil + background) : evil ratio
pub const BACKGROUND_RATIO: usize = 3;

/// Trees in the default ensemble
pub const DEFAULT_N_ESTIMATORS: usize = 1000;

/// Queue used for load jobs (drained first to free loader memory)
pub const LOAD_QUEUE: &str = "high";

/// Queue used for prediction cycles
pub const DEFAULT_QUEUE: &str = "default";

/// Timeout for a predict cycle job (seconds)
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

/// Timeout for a host load job (seconds)
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 600;

/// Neighbouring records shown on each side in the entry context view
pub const CONTEXT_RADIUS: u32 = 10;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
