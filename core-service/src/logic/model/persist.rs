//! Model persistence
//!
//! One JSON file per collection. The feature layout is stored with the
//! trees and checked on load. A small `.summary.json` next to each model
//! answers metadata queries without reading the trees.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::error::{PipelineError, Result};

use super::curator::PoolCounts;
use super::forest::ExtraTreesClassifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    pub collection: String,
    pub trained_at: DateTime<Utc>,
    pub counts: PoolCounts,
    pub model: ExtraTreesClassifier,
}

/// What the review API shows about a stored model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub collection: String,
    pub trained_at: DateTime<Utc>,
    pub counts: PoolCounts,
    pub n_trees: usize,
    pub n_samples: usize,
    pub layout_hash: u32,
}

impl From<&PersistedModel> for ModelSummary {
    fn from(p: &PersistedModel) -> Self {
        Self {
            collection: p.collection.clone(),
            trained_at: p.trained_at,
            counts: p.counts,
            n_trees: p.model.n_trees(),
            n_samples: p.model.n_samples,
            layout_hash: p.model.layout.hash,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// `<data_local_dir>/appcompat/model`
    pub fn new() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::from_path(base.join("appcompat").join("model"))
    }

    pub fn from_path(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(collection: &str) -> String {
        collection
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn file_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(collection)))
    }

    fn summary_file_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.summary.json", Self::stem(collection)))
    }

    /// Temp file + rename, so readers never see a partial file
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Blocking; async callers go through `spawn_blocking`
    pub fn save(&self, model: &PersistedModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_for(&model.collection);

        Self::write_atomic(&path, &serde_json::to_vec(model)?)?;
        Self::write_atomic(
            &self.summary_file_for(&model.collection),
            &serde_json::to_vec(&ModelSummary::from(model))?,
        )?;

        log::info!("Saved model for {} to {}", model.collection, path.display());
        Ok(path)
    }

    pub fn load(&self, collection: &str) -> Result<Option<PersistedModel>> {
        let path = self.file_for(collection);
        if !path.exists() {
            return Ok(None);
        }

        let persisted: PersistedModel = serde_json::from_slice(&fs::read(&path)?)?;
        persisted
            .model
            .layout
            .validate()
            .map_err(|e| PipelineError::Model(format!("{}: {}", path.display(), e)))?;

        Ok(Some(persisted))
    }

    /// Reads the sidecar; models saved without one are loaded in full
    pub fn summary(&self, collection: &str) -> Result<Option<ModelSummary>> {
        let sidecar = self.summary_file_for(collection);
        if sidecar.exists() {
            return Ok(Some(serde_json::from_slice(&fs::read(&sidecar)?)?));
        }
        Ok(self.load(collection)?.as_ref().map(ModelSummary::from))
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}
