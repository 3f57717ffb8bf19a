//! Classifier Column Layout
//!
//! **This file controls the classifier input schema.**
//!
//! Adding, removing or reordering a column changes the layout hash, and a
//! model persisted under another layout is refused at load time.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current classifier layout version
pub const FEATURE_VERSION: u8 = 1;

/// Classifier columns in the exact order rows are projected
pub const CLASSIFIER_COLUMNS: &[&str] = &[
    "f_executable_archive",
    "f_files_in_folder",
    "f_neighbour_psexec",
    "f_number_digits",
    "f_path_depth",
    "f_path_unique_hosts",
    "f_recon_cluster",
    "f_recon_cmd",
    "f_root_length",
    "f_same_filesize_different_name",
    "f_same_timestamp_different_name",
    "f_shortname_ends_3264",
    "f_shortname_length",
    "f_staging_directory",
    "f_system32_dir",
    "f_temp_dir",
    "f_users_dir",
];

/// Must match CLASSIFIER_COLUMNS.len()
pub const FEATURE_COUNT: usize = 17;

/// CRC32 over version + column names
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);

    for name in CLASSIFIER_COLUMNS {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }

    hasher.finalize()
}

/// Layout a model was fitted under, stored next to its trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub columns: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("classifier layout v{found_version} ({found_hash:08x}) does not match v{expected_version} ({expected_hash:08x})")]
pub struct LayoutMismatch {
    pub found_version: u8,
    pub found_hash: u32,
    pub expected_version: u8,
    pub expected_hash: u32,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
            columns: CLASSIFIER_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// A model from another layout would read columns out of position
    pub fn validate(&self) -> Result<(), LayoutMismatch> {
        let expected_hash = layout_hash();
        if self.version == FEATURE_VERSION && self.hash == expected_hash {
            return Ok(());
        }
        Err(LayoutMismatch {
            found_version: self.version,
            found_hash: self.hash,
            expected_version: FEATURE_VERSION,
            expected_hash,
        })
    }
}

impl Default for LayoutInfo {
    fn default() -> Self {
        Self::current()
    }
}

pub fn feature_index(column: &str) -> Option<usize> {
    CLASSIFIER_COLUMNS.iter().position(|&c| c == column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_count_and_order() {
        assert_eq!(CLASSIFIER_COLUMNS.len(), FEATURE_COUNT);
        let mut sorted = CLASSIFIER_COLUMNS.to_vec();
        sorted.sort();
        assert_eq!(sorted, CLASSIFIER_COLUMNS);
    }

    #[test]
    fn test_hash_is_stable_and_nonzero() {
        assert_eq!(layout_hash(), layout_hash());
        assert_ne!(layout_hash(), 0);
    }

    #[test]
    fn test_foreign_layout_rejected() {
        assert!(LayoutInfo::current().validate().is_ok());

        let newer = LayoutInfo { version: FEATURE_VERSION + 1, ..LayoutInfo::current() };
        assert_eq!(newer.validate().unwrap_err().found_version, FEATURE_VERSION + 1);

        let reordered = LayoutInfo { hash: layout_hash().wrapping_add(1), ..LayoutInfo::current() };
        assert!(reordered.validate().is_err());
    }

    #[test]
    fn test_feature_index() {
        assert_eq!(feature_index("f_executable_archive"), Some(0));
        assert_eq!(feature_index("f_users_dir"), Some(16));
        assert_eq!(feature_index("f_recon_cluster"), Some(6));
        assert_eq!(feature_index("hostname"), None);
    }
}
