//! Prediction Cycle
//!
//! Idle → Training → Scoring → Idle, at most one cycle per collection.
//! A fresh classifier is fitted on every cycle; nothing carries over
//! between cycles except the persisted copy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_SCORE_BATCH_SIZE, DEFAULT_TOP_N};
use crate::logic::error::{PipelineError, Result};
use crate::logic::features::FEATURE_COUNT;
use crate::logic::store::{RecordStore, StoredRecord};

use super::curator::{CuratorConfig, PoolCounts, TrainingSetCurator};
use super::forest::{ExtraTreesClassifier, ForestConfig};
use super::persist::{ModelStore, PersistedModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Training,
    Scoring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    pub curator: CuratorConfig,
    pub forest: ForestConfig,
    pub score_batch_size: usize,
    /// Rows rescored when not a full scan
    pub top_n: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            curator: CuratorConfig::default(),
            forest: ForestConfig::default(),
            score_batch_size: DEFAULT_SCORE_BATCH_SIZE,
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub collection: String,
    pub full_scan: bool,
    pub training: PoolCounts,
    pub scored: u64,
    /// Rows without a complete feature vector
    pub skipped: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// GUARD
// ============================================================================

/// Tracks which collections have a cycle in flight
#[derive(Default)]
pub struct CycleGuard {
    active: Mutex<HashMap<String, CycleState>>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(self: &Arc<Self>, collection: &str) -> Result<ActiveCycle> {
        let mut active = self.active.lock();
        if active.contains_key(collection) {
            return Err(PipelineError::CycleInProgress(collection.to_string()));
        }
        active.insert(collection.to_string(), CycleState::Training);
        Ok(ActiveCycle {
            guard: Arc::clone(self),
            collection: collection.to_string(),
        })
    }

    pub fn state(&self, collection: &str) -> CycleState {
        self.active.lock().get(collection).copied().unwrap_or(CycleState::Idle)
    }
}

/// Held for the duration of a cycle; dropping it returns the collection to Idle
pub struct ActiveCycle {
    guard: Arc<CycleGuard>,
    collection: String,
}

impl ActiveCycle {
    fn set(&self, state: CycleState) {
        self.guard.active.lock().insert(self.collection.clone(), state);
    }
}

impl Drop for ActiveCycle {
    fn drop(&mut self) {
        self.guard.active.lock().remove(&self.collection);
    }
}

// ============================================================================
// CYCLE
// ============================================================================

pub struct PredictionCycle {
    store: Arc<dyn RecordStore>,
    models: Option<ModelStore>,
    guard: Arc<CycleGuard>,
    config: CycleConfig,
}

impl PredictionCycle {
    pub fn new(store: Arc<dyn RecordStore>, config: CycleConfig) -> Self {
        Self {
            store,
            models: None,
            guard: Arc::new(CycleGuard::new()),
            config,
        }
    }

    pub fn with_model_store(mut self, models: ModelStore) -> Self {
        self.models = Some(models);
        self
    }

    /// Share one guard across cycles built for different workers
    pub fn with_guard(mut self, guard: Arc<CycleGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn state(&self, collection: &str) -> CycleState {
        self.guard.state(collection)
    }

    pub async fn run(&self, collection: &str, full_scan: bool) -> Result<CycleReport> {
        let active = self.guard.acquire(collection)?;
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!("Cycle {} started for {} (full_scan={})", cycle_id, collection, full_scan);

        let curator = TrainingSetCurator::new(Arc::clone(&self.store), self.config.curator.clone());
        let set = curator.curate(collection).await?;
        let training = set.counts;

        let forest = self.config.forest.clone();
        let model = tokio::task::spawn_blocking(move || ExtraTreesClassifier::fit(set.x.view(), &set.y, &forest))
            .await
            .map_err(|e| PipelineError::Model(format!("training task failed: {}", e)))??;
        let model = Arc::new(model);

        if let Some(models) = &self.models {
            let persisted = PersistedModel {
                collection: collection.to_string(),
                trained_at: Utc::now(),
                counts: training,
                model: (*model).clone(),
            };
            let models = models.clone();
            match tokio::task::spawn_blocking(move || models.save(&persisted)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::warn!("Model for {} not persisted: {}", collection, e),
                Err(e) => log::warn!("Model for {} not persisted: save task failed: {}", collection, e),
            }
        }

        active.set(CycleState::Scoring);
        let (scored, skipped) = if full_scan {
            self.score_full(collection, &model).await?
        } else {
            self.score_top(collection, &model).await?
        };

        let report = CycleReport {
            cycle_id,
            collection: collection.to_string(),
            full_scan,
            training,
            scored,
            skipped,
            started_at,
            finished_at: Utc::now(),
        };
        log::info!(
            "Cycle {} finished for {}: {} scored, {} skipped",
            cycle_id,
            collection,
            report.scored,
            report.skipped
        );
        Ok(report)
    }

    async fn score_full(&self, collection: &str, model: &Arc<ExtraTreesClassifier>) -> Result<(u64, u64)> {
        let mut totals = (0u64, 0u64);
        let mut after: Option<String> = None;

        loop {
            let batch = self
                .store
                .scan(collection, after.as_deref(), self.config.score_batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id.clone());

            let (scored, skipped) = self.score_batch(collection, model, batch).await?;
            totals.0 += scored;
            totals.1 += skipped;
        }

        Ok(totals)
    }

    async fn score_top(&self, collection: &str, model: &Arc<ExtraTreesClassifier>) -> Result<(u64, u64)> {
        let mut rows = self.store.top_by_predict(collection, self.config.top_n).await?;
        let mut totals = (0u64, 0u64);

        while !rows.is_empty() {
            let rest = rows.split_off(rows.len().min(self.config.score_batch_size));
            let (scored, skipped) = self.score_batch(collection, model, rows).await?;
            totals.0 += scored;
            totals.1 += skipped;
            rows = rest;
        }

        Ok(totals)
    }

    async fn score_batch(
        &self,
        collection: &str,
        model: &Arc<ExtraTreesClassifier>,
        batch: Vec<StoredRecord>,
    ) -> Result<(u64, u64)> {
        let mut ids = Vec::with_capacity(batch.len());
        let mut values = Vec::with_capacity(batch.len() * FEATURE_COUNT);
        let mut skipped = 0u64;

        for record in batch {
            match record.to_row() {
                Ok(row) => {
                    values.extend_from_slice(&row);
                    ids.push(record.id);
                }
                Err(e) => {
                    log::debug!("{}", e);
                    skipped += 1;
                }
            }
        }

        if ids.is_empty() {
            return Ok((0, skipped));
        }

        let x = Array2::from_shape_vec((ids.len(), FEATURE_COUNT), values)
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let model = Arc::clone(model);
        let probabilities = tokio::task::spawn_blocking(move || model.predict_proba_batch(x.view()))
            .await
            .map_err(|e| PipelineError::Model(format!("scoring task failed: {}", e)))?;

        let updates: Vec<(String, f32)> = ids.into_iter().zip(probabilities).collect();
        let written = self.store.update_predictions(collection, &updates).await?;
        log::debug!("Scored {} rows in {} ({} skipped)", written, collection, skipped);

        Ok((written, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_excludes_second_cycle() {
        let guard = Arc::new(CycleGuard::new());
        let first = guard.acquire("appcompat-a").unwrap();
        assert_eq!(guard.state("appcompat-a"), CycleState::Training);

        assert!(matches!(guard.acquire("appcompat-a"), Err(PipelineError::CycleInProgress(_))));
        assert!(guard.acquire("appcompat-b").is_ok());

        first.set(CycleState::Scoring);
        assert_eq!(guard.state("appcompat-a"), CycleState::Scoring);

        drop(first);
        assert_eq!(guard.state("appcompat-a"), CycleState::Idle);
        assert!(guard.acquire("appcompat-a").is_ok());
    }
}
