//! Host Boundary Chunker
//!
//! Cuts an arrival-ordered record stream into chunks of roughly
//! `chunk_size` records without ever splitting a host's contiguous run.
//!
//! At most the current chunk and one read-ahead unit are buffered. The
//! trailing host run of each chunk is deferred to the front of the next one;
//! a short read (stream about to end) is merged instead of deferred so the
//! last chunk is never pathologically small.

use std::collections::{HashMap, HashSet};
use std::iter::Fuse;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::logic::dataset::{RawRecord, Record};
use super::normalize::normalize_record;
use super::run_order::RunOrderTracker;
use super::{ChunkRecord, HostRecords};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target records per chunk (raw rows per read)
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// Running totals for the whole stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub chunks: usize,
    pub records: usize,
    /// Rows without hostname or path
    pub dropped: usize,
    /// Times a chunk held a single host and had to absorb the next read
    pub widened: usize,
}

/// A host-aligned slice of the stream with run orders assigned
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub records: Vec<ChunkRecord>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Group by hostname in order of first appearance
    pub fn into_hosts(self) -> Vec<HostRecords> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut hosts: Vec<HostRecords> = Vec::new();

        for record in self.records {
            let slot = match index.get(&record.record.hostname) {
                Some(&slot) => slot,
                None => {
                    index.insert(record.record.hostname.clone(), hosts.len());
                    hosts.push(HostRecords {
                        hostname: record.record.hostname.clone(),
                        records: Vec::new(),
                    });
                    hosts.len() - 1
                }
            };
            hosts[slot].records.push(record);
        }
        hosts
    }
}

struct Unit {
    rows: Vec<Record>,
    /// Fewer than chunk_size raw rows were available
    exhausted: bool,
}

pub struct HostBoundaryChunker<I: Iterator<Item = RawRecord>> {
    source: Fuse<I>,
    chunk_size: usize,
    tracker: RunOrderTracker,
    pending: Vec<Record>,
    started: bool,
    finished: bool,
    stats: ChunkStats,
}

impl<I: Iterator<Item = RawRecord>> HostBoundaryChunker<I> {
    pub fn new(source: I, config: ChunkerConfig) -> Self {
        Self::with_tracker(source, config, RunOrderTracker::new())
    }

    /// Resume run orders from an earlier ingestion of the same hosts
    pub fn with_tracker(source: I, config: ChunkerConfig, tracker: RunOrderTracker) -> Self {
        Self {
            source: source.fuse(),
            chunk_size: config.chunk_size.max(1),
            tracker,
            pending: Vec::new(),
            started: false,
            finished: false,
            stats: ChunkStats::default(),
        }
    }

    pub fn stats(&self) -> ChunkStats {
        self.stats
    }

    pub fn tracker(&self) -> &RunOrderTracker {
        &self.tracker
    }

    pub fn into_tracker(self) -> RunOrderTracker {
        self.tracker
    }

    fn read_unit(&mut self) -> Unit {
        let mut rows = Vec::with_capacity(self.chunk_size);
        let mut read = 0;

        while read < self.chunk_size {
            let Some(raw) = self.source.next() else { break };
            read += 1;
            match normalize_record(raw) {
                Some(record) => rows.push(record),
                None => self.stats.dropped += 1,
            }
        }

        Unit {
            rows,
            exhausted: read < self.chunk_size,
        }
    }

    fn finish(&mut self, rows: Vec<Record>) -> Chunk {
        let mut records: Vec<Record> = rows;
        for record in records.iter_mut() {
            record.run_order = self.tracker.assign(&record.hostname);
        }

        // distinct hosts per path, scoped to this chunk
        let mut hosts_per_path: HashMap<&str, HashSet<&str>> = HashMap::new();
        for record in &records {
            hosts_per_path
                .entry(record.path.as_str())
                .or_default()
                .insert(record.hostname.as_str());
        }
        let unique_hosts: Vec<u32> = records
            .iter()
            .map(|r| hosts_per_path[r.path.as_str()].len() as u32)
            .collect();

        let records: Vec<ChunkRecord> = records
            .into_iter()
            .zip(unique_hosts)
            .map(|(record, path_unique_hosts)| ChunkRecord { record, path_unique_hosts })
            .collect();

        let chunk = Chunk {
            index: self.stats.chunks,
            records,
        };
        self.stats.chunks += 1;
        self.stats.records += chunk.len();

        log::info!(
            "Chunk {} ready: {} records ({} hosts seen so far, {} dropped)",
            chunk.index,
            chunk.len(),
            self.tracker.hosts_seen(),
            self.stats.dropped
        );
        chunk
    }

    fn emit(&mut self, rows: Vec<Record>) -> Option<Chunk> {
        self.finished = true;
        if rows.is_empty() {
            None
        } else {
            Some(self.finish(rows))
        }
    }
}

impl<I: Iterator<Item = RawRecord>> Iterator for HostBoundaryChunker<I> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }

        let mut current = std::mem::take(&mut self.pending);
        if !self.started {
            self.started = true;
            let unit = self.read_unit();
            current = unit.rows;
            if unit.exhausted {
                return self.emit(current);
            }
        }

        loop {
            let unit = self.read_unit();
            if unit.exhausted {
                current.extend(unit.rows);
                return self.emit(current);
            }

            match last_host_boundary(&current) {
                Some(split) => {
                    let mut tail = current.split_off(split);
                    tail.extend(unit.rows);
                    self.pending = tail;
                    return Some(self.finish(current));
                }
                // one host so far, but the read-ahead starts a new one
                None if starts_new_host(&current, &unit.rows) => {
                    self.pending = unit.rows;
                    return Some(self.finish(current));
                }
                None => {
                    if !current.is_empty() {
                        self.stats.widened += 1;
                        log::warn!(
                            "No host boundary within {} records (host '{}'), widening chunk",
                            current.len(),
                            current[0].hostname
                        );
                    }
                    current.extend(unit.rows);
                }
            }
        }
    }
}

/// Start index of the trailing host run, `None` if the rows hold one host
pub fn last_host_boundary(rows: &[Record]) -> Option<usize> {
    let last = &rows.last()?.hostname;
    rows.iter().rposition(|r| &r.hostname != last).map(|i| i + 1)
}

fn starts_new_host(current: &[Record], next: &[Record]) -> bool {
    match (current.last(), next.first()) {
        (Some(a), Some(b)) => a.hostname != b.hostname,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(hosts: &[(&str, usize)]) -> Vec<RawRecord> {
        hosts
            .iter()
            .flat_map(|(host, n)| {
                (0..*n).map(move |i| RawRecord::new(host, &format!("c:\\tools\\{}_{}.exe", host, i)))
            })
            .collect()
    }

    fn sizes(chunks: &[Chunk]) -> Vec<usize> {
        chunks.iter().map(|c| c.len()).collect()
    }

    #[test]
    fn test_two_hosts_final_chunk_merged() {
        let chunks: Vec<Chunk> =
            HostBoundaryChunker::new(stream(&[("a", 7), ("b", 9)]).into_iter(), ChunkerConfig { chunk_size: 10 })
                .collect();
        assert_eq!(sizes(&chunks), vec![16]);
    }

    #[test]
    fn test_tail_host_deferred() {
        // a×7 b×3 | b×6 c×4 | c×10 | (end)
        let chunks: Vec<Chunk> = HostBoundaryChunker::new(
            stream(&[("a", 7), ("b", 9), ("c", 14)]).into_iter(),
            ChunkerConfig { chunk_size: 10 },
        )
        .collect();
        assert_eq!(sizes(&chunks), vec![7, 9, 14]);
        for chunk in &chunks {
            let hosts = chunk.clone().into_hosts();
            assert_eq!(hosts.len(), 1);
        }
    }

    #[test]
    fn test_short_final_read_merged_not_deferred() {
        // a×7 b×3 | b×6 c×4 | c×6 (short) → b and c share the last chunk
        let chunks: Vec<Chunk> = HostBoundaryChunker::new(
            stream(&[("a", 7), ("b", 9), ("c", 10)]).into_iter(),
            ChunkerConfig { chunk_size: 10 },
        )
        .collect();
        assert_eq!(sizes(&chunks), vec![7, 19]);
        let last = chunks[1].clone().into_hosts();
        assert_eq!(last.iter().map(|h| h.records.len()).collect::<Vec<_>>(), vec![9, 10]);
    }

    #[test]
    fn test_single_host_larger_than_chunk_widens() {
        let mut chunker = HostBoundaryChunker::new(
            stream(&[("big", 25), ("small", 10), ("tail", 10)]).into_iter(),
            ChunkerConfig { chunk_size: 10 },
        );
        let chunks: Vec<Chunk> = chunker.by_ref().collect();

        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 45);
        let first = chunks[0].clone().into_hosts();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].hostname, "big");
        assert_eq!(first[0].records.len(), 25);
        assert!(chunker.stats().widened > 0);
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let chunks: Vec<Chunk> =
            HostBoundaryChunker::new(stream(&[("a", 10), ("b", 10)]).into_iter(), ChunkerConfig { chunk_size: 10 })
                .collect();
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 20);
        for chunk in &chunks {
            assert_eq!(chunk.clone().into_hosts().len(), 1);
        }
    }

    #[test]
    fn test_malformed_rows_dropped_and_counted() {
        let mut rows = stream(&[("a", 3)]);
        rows.insert(1, RawRecord { hostname: None, path: Some("c:\\x.exe".into()), ..Default::default() });
        rows.push(RawRecord { hostname: Some("a".into()), path: None, ..Default::default() });

        let mut chunker = HostBoundaryChunker::new(rows.into_iter(), ChunkerConfig { chunk_size: 100 });
        let chunks: Vec<Chunk> = chunker.by_ref().collect();
        assert_eq!(sizes(&chunks), vec![3]);
        assert_eq!(chunker.stats().dropped, 2);
        let runs: Vec<u32> = chunks[0].records.iter().map(|r| r.record.run_order).collect();
        assert_eq!(runs, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_stream() {
        let mut chunker = HostBoundaryChunker::new(Vec::<RawRecord>::new().into_iter(), ChunkerConfig::default());
        assert!(chunker.next().is_none());
        assert!(chunker.next().is_none());
    }

    #[test]
    fn test_path_unique_hosts_per_chunk() {
        let rows = vec![
            RawRecord::new("a", "c:\\windows\\explorer.exe"),
            RawRecord::new("a", "c:\\temp\\x.exe"),
            RawRecord::new("b", "C:\\Windows\\Explorer.exe"),
            RawRecord::new("c", "c:\\windows\\explorer.exe"),
        ];
        let chunk = HostBoundaryChunker::new(rows.into_iter(), ChunkerConfig { chunk_size: 100 })
            .next()
            .unwrap();
        let counts: Vec<u32> = chunk.records.iter().map(|r| r.path_unique_hosts).collect();
        assert_eq!(counts, vec![3, 1, 3, 3]);
    }

    #[test]
    fn test_last_host_boundary() {
        let rows: Vec<Record> = ["a", "a", "b", "b", "b"].iter().map(|h| Record::new(h, "p", 0)).collect();
        assert_eq!(last_host_boundary(&rows), Some(2));
        assert_eq!(last_host_boundary(&rows[..2]), None);
        assert_eq!(last_host_boundary(&[]), None);
    }
}
