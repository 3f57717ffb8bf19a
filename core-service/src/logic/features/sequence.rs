//! Sequence Features - whole-host, order-dependent aggregates
//!
//! Every function here needs the complete record set of one host sorted by
//! run order. A host split across chunks yields wrong clusters and wrong
//! counts with no error, which is why the chunker never splits hosts.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use super::EnrichedRecord;

/// Max run-order gap between two recon commands of one cluster
pub const RECON_CLUSTER_GAP: u32 = 5;

/// Records this far before/after a cluster count as near it (end exclusive)
pub const RECON_WINDOW: u32 = 3;

/// Half-open window around a psexesvc record
pub const PSEXEC_WINDOW: u32 = 2;

pub const PSEXEC_SERVICE: &str = "psexesvc";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFeatures {
    pub recon_cluster: u32,
    pub neighbour_psexec: bool,
    pub files_in_folder: u32,
    pub same_timestamp_different_name: u32,
    pub same_filesize_different_name: u32,
}

/// Compute all five sequence features, parallel to `records`
///
/// `records` must be sorted ascending by run order.
pub fn compute_sequence_features(records: &[EnrichedRecord]) -> Vec<SequenceFeatures> {
    debug_assert!(records.windows(2).all(|w| w[0].record.run_order < w[1].record.run_order));

    let run_orders: Vec<u32> = records.iter().map(|r| r.record.run_order).collect();

    let recon_runs: Vec<u32> = records
        .iter()
        .filter(|r| r.features.path.recon_cmd)
        .map(|r| r.record.run_order)
        .collect();
    let psexec_runs: Vec<u32> = records
        .iter()
        .filter(|r| r.features.path.shortname == PSEXEC_SERVICE)
        .map(|r| r.record.run_order)
        .collect();

    let recon = recon_cluster(&run_orders, &recon_runs);
    let psexec = neighbour_psexec(&run_orders, &psexec_runs);
    let folder = distinct_names_per_key(records, |r| Some(r.features.path.root.as_str()));
    let timestamp = distinct_names_per_key(records, |r| r.record.last_modified);
    let filesize = distinct_names_per_key(records, |r| r.record.file_size);

    (0..records.len())
        .map(|i| SequenceFeatures {
            recon_cluster: recon[i],
            neighbour_psexec: psexec[i],
            files_in_folder: folder[i],
            same_timestamp_different_name: timestamp[i],
            same_filesize_different_name: filesize[i],
        })
        .collect()
}

/// Group recon run orders into clusters of consecutive gap <= RECON_CLUSTER_GAP
pub fn recon_clusters(recon_runs: &[u32]) -> Vec<Vec<u32>> {
    let mut sorted = recon_runs.to_vec();
    sorted.sort_unstable();

    let mut clusters: Vec<Vec<u32>> = Vec::new();
    for run in sorted {
        match clusters.last_mut() {
            Some(cluster) if run - cluster[cluster.len() - 1] <= RECON_CLUSTER_GAP => cluster.push(run),
            _ => clusters.push(vec![run]),
        }
    }
    clusters
}

/// Cluster size for every record within [min - 3, max + 3) of a cluster, else 0
///
/// Overlapping windows resolve left to right: the later cluster wins.
pub fn recon_cluster(run_orders: &[u32], recon_runs: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; run_orders.len()];

    for cluster in recon_clusters(recon_runs) {
        let (first, last) = (cluster[0], cluster[cluster.len() - 1]);
        let start = first.saturating_sub(RECON_WINDOW);
        let end = last + RECON_WINDOW;
        for i in window_indices(run_orders, start, end) {
            out[i] = cluster.len() as u32;
        }
    }
    out
}

/// True for records within [r - 2, r + 2) of any psexesvc record
pub fn neighbour_psexec(run_orders: &[u32], psexec_runs: &[u32]) -> Vec<bool> {
    let mut out = vec![false; run_orders.len()];

    for &run in psexec_runs {
        let start = run.saturating_sub(PSEXEC_WINDOW);
        for i in window_indices(run_orders, start, run + PSEXEC_WINDOW) {
            out[i] = true;
        }
    }
    out
}

/// Positions of sorted `run_orders` falling in [start, end)
fn window_indices(run_orders: &[u32], start: u32, end: u32) -> std::ops::Range<usize> {
    let lo = run_orders.partition_point(|&r| r < start);
    let hi = run_orders.partition_point(|&r| r < end);
    lo..hi.max(lo)
}

/// Distinct filenames sharing each key, broadcast back; a missing key gives 0
fn distinct_names_per_key<'a, K, F>(records: &'a [EnrichedRecord], key: F) -> Vec<u32>
where
    K: Eq + Hash,
    F: Fn(&'a EnrichedRecord) -> Option<K>,
{
    let mut names: HashMap<K, HashSet<&str>> = HashMap::new();
    for r in records {
        if let Some(k) = key(r) {
            names.entry(k).or_default().insert(r.features.path.filename.as_str());
        }
    }

    records
        .iter()
        .map(|r| match key(r) {
            Some(k) => names.get(&k).map(|s| s.len() as u32).unwrap_or(0),
            None => 0,
        })
        .collect()
}
