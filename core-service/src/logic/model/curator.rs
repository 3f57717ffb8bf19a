//! Training Set Curator
//!
//! Labels come from the training collection. When not_evil rows fall short
//! of `BACKGROUND_RATIO × evil`, unlabelled rows of the target collection are
//! drawn at random and treated as not_evil.

use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::constants::{BACKGROUND_RATIO, EVIL_POOL_CAP, NOT_EVIL_POOL_CAP, TRAINING_COLLECTION};
use crate::logic::dataset::ClassLabel;
use crate::logic::error::{PipelineError, Result};
use crate::logic::features::FEATURE_COUNT;
use crate::logic::store::{RecordStore, StoredRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    pub training_collection: String,
    pub evil_cap: usize,
    pub not_evil_cap: usize,
    pub background_ratio: usize,
    /// Fixed background draw; entropy per call otherwise
    pub seed: Option<u64>,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            training_collection: TRAINING_COLLECTION.to_string(),
            evil_cap: EVIL_POOL_CAP,
            not_evil_cap: NOT_EVIL_POOL_CAP,
            background_ratio: BACKGROUND_RATIO,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    pub evil: usize,
    pub not_evil: usize,
    pub background: usize,
    /// Rows dropped for missing feature columns
    pub skipped: usize,
}

impl PoolCounts {
    pub fn rows(&self) -> usize {
        self.evil + self.not_evil + self.background - self.skipped
    }
}

/// Feature matrix in classifier-column order plus 0/1 targets
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array2<f32>,
    pub y: Vec<u8>,
    pub counts: PoolCounts,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Background rows needed to reach the not_evil target
pub fn background_needed(evil: usize, not_evil: usize, ratio: usize) -> usize {
    (ratio * evil).saturating_sub(not_evil)
}

pub struct TrainingSetCurator {
    store: Arc<dyn RecordStore>,
    config: CuratorConfig,
}

impl TrainingSetCurator {
    pub fn new(store: Arc<dyn RecordStore>, config: CuratorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub async fn curate(&self, collection: &str) -> Result<TrainingSet> {
        let training = &self.config.training_collection;

        let (evil, not_evil) = if self.store.collection_exists(training).await? {
            (
                self.store.label_pool(training, ClassLabel::Evil, self.config.evil_cap).await?,
                self.store.label_pool(training, ClassLabel::NotEvil, self.config.not_evil_cap).await?,
            )
        } else {
            log::warn!("Training collection {} does not exist", training);
            (Vec::new(), Vec::new())
        };

        let wanted = background_needed(evil.len(), not_evil.len(), self.config.background_ratio);
        let background = if wanted > 0 {
            self.store.random_unlabeled(collection, wanted, self.config.seed).await?
        } else {
            Vec::new()
        };

        let mut counts = PoolCounts {
            evil: evil.len(),
            not_evil: not_evil.len(),
            background: background.len(),
            skipped: 0,
        };

        log::info!(
            "Training pools for {}: {} evil, {} not_evil, {} background (wanted {})",
            collection,
            counts.evil,
            counts.not_evil,
            counts.background,
            wanted
        );

        let mut values = Vec::with_capacity((counts.evil + counts.not_evil + counts.background) * FEATURE_COUNT);
        let mut y = Vec::with_capacity(counts.evil + counts.not_evil + counts.background);

        let labelled = evil.iter().map(|r| (r, 1u8));
        let negatives = not_evil.iter().chain(background.iter()).map(|r| (r, 0u8));
        for (record, target) in labelled.chain(negatives) {
            match row_of(record) {
                Some(row) => {
                    values.extend_from_slice(&row);
                    y.push(target);
                }
                None => counts.skipped += 1,
            }
        }

        if y.is_empty() {
            return Err(PipelineError::TrainingSetEmpty(collection.to_string()));
        }
        if !y.contains(&1) {
            log::warn!("No evil examples for {}; every score will be 0", collection);
        }

        let x = Array2::from_shape_vec((y.len(), FEATURE_COUNT), values)
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(TrainingSet { x, y, counts })
    }
}

fn row_of(record: &StoredRecord) -> Option<[f32; FEATURE_COUNT]> {
    match record.to_row() {
        Ok(row) => Some(row),
        Err(e) => {
            log::warn!("Skipping training row: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_needed() {
        assert_eq!(background_needed(10, 5, 3), 25);
        assert_eq!(background_needed(10, 30, 3), 0);
        assert_eq!(background_needed(10, 45, 3), 0);
        assert_eq!(background_needed(0, 0, 3), 0);
    }

    #[test]
    fn test_pool_counts_rows() {
        let c = PoolCounts { evil: 2, not_evil: 3, background: 4, skipped: 1 };
        assert_eq!(c.rows(), 8);
    }
}
