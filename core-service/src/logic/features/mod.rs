//! Features Module - Feature Extraction Engine
//!
//! `path` derives structural features per record, `sequence` derives
//! whole-host aggregates, `vector` holds both and projects classifier rows.

pub mod layout;
pub mod path;
pub mod sequence;
pub mod vector;


use serde::{Deserialize, Serialize};

use crate::logic::dataset::Record;
use crate::logic::ingest::HostRecords;

pub use layout::{CLASSIFIER_COLUMNS, FEATURE_COUNT};
pub use path::{extract_path_features, PathFeatures};
pub use sequence::{compute_sequence_features, SequenceFeatures};
pub use vector::FeatureVector;

/// A record with its derived features attached 1:1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: Record,
    #[serde(flatten)]
    pub features: FeatureVector,
}

/// One host's complete, run-order-sorted, feature-enriched record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedHost {
    pub hostname: String,
    pub records: Vec<EnrichedRecord>,
}

impl EnrichedHost {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Attach structural features to each record, then the host-wide aggregates
pub fn enrich_host(host: HostRecords) -> EnrichedHost {
    let mut records: Vec<EnrichedRecord> = host
        .records
        .into_iter()
        .map(|c| EnrichedRecord {
            features: FeatureVector::from_path(&c.record.path).with_path_unique_hosts(c.path_unique_hosts),
            record: c.record,
        })
        .collect();

    records.sort_by_key(|r| r.record.run_order);

    let sequence = compute_sequence_features(&records);
    for (record, seq) in records.iter_mut().zip(sequence) {
        record.features.apply_sequence(seq);
    }

    log::debug!("Enriched host {} ({} records)", host.hostname, records.len());

    EnrichedHost {
        hostname: host.hostname,
        records,
    }
}
