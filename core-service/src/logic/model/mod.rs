//! Model Module - classifier feedback loop
//!
//! `curator` builds the training set from reviewer labels, `forest` fits
//! the extra-trees ensemble, `cycle` retrains and rescores a collection,
//! `persist` keeps the last fitted model on disk.

pub mod curator;
pub mod cycle;
pub mod forest;
pub mod persist;


pub use curator::{background_needed, CuratorConfig, PoolCounts, TrainingSet, TrainingSetCurator};
pub use cycle::{ActiveCycle, CycleConfig, CycleGuard, CycleReport, CycleState, PredictionCycle};
pub use forest::{ExtraTreesClassifier, ForestConfig};
pub use persist::{ModelStore, ModelSummary, PersistedModel};
