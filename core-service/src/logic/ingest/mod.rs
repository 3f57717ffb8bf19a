//! Ingest Module - stream → host-aligned chunks
//!
//! The chunker is the only stage that must run sequentially; everything
//! after `Chunk::into_hosts` is per host and can run on any worker.

pub mod chunker;
pub mod normalize;
pub mod run_order;

use serde::{Deserialize, Serialize};

use crate::logic::dataset::Record;

pub use chunker::{Chunk, ChunkStats, ChunkerConfig, HostBoundaryChunker};
pub use run_order::RunOrderTracker;

/// A record as emitted by the chunker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub record: Record,
    /// Distinct hosts showing this exact path within the chunk.
    /// An approximation of the corpus-wide count, bounded by chunk size.
    pub path_unique_hosts: u32,
}

/// All of one host's records from a chunk, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecords {
    pub hostname: String,
    pub records: Vec<ChunkRecord>,
}
