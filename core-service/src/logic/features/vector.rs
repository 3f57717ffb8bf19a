//! Feature Vector - every derived attribute of one record
//!
//! Structural features are always present (pure function of the path).
//! Sequence and corpus features are `None` until the host has been enriched,
//! or when a stored row predates them; such rows cannot be scored.

use serde::{Deserialize, Serialize};

use super::layout::{CLASSIFIER_COLUMNS, FEATURE_COUNT};
use super::path::{extract_path_features, PathFeatures};
use super::sequence::SequenceFeatures;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(flatten)]
    pub path: PathFeatures,
    #[serde(rename = "f_path_unique_hosts")]
    pub path_unique_hosts: Option<u32>,
    #[serde(rename = "f_recon_cluster")]
    pub recon_cluster: Option<u32>,
    #[serde(rename = "f_neighbour_psexec")]
    pub neighbour_psexec: Option<bool>,
    #[serde(rename = "f_files_in_folder")]
    pub files_in_folder: Option<u32>,
    #[serde(rename = "f_same_timestamp_different_name")]
    pub same_timestamp_different_name: Option<u32>,
    #[serde(rename = "f_same_filesize_different_name")]
    pub same_filesize_different_name: Option<u32>,
}

impl FeatureVector {
    /// Structural features only
    pub fn from_path(path: &str) -> Self {
        Self {
            path: extract_path_features(path),
            ..Default::default()
        }
    }

    pub fn with_path_unique_hosts(mut self, count: u32) -> Self {
        self.path_unique_hosts = Some(count);
        self
    }

    pub fn apply_sequence(&mut self, seq: SequenceFeatures) {
        self.recon_cluster = Some(seq.recon_cluster);
        self.neighbour_psexec = Some(seq.neighbour_psexec);
        self.files_in_folder = Some(seq.files_in_folder);
        self.same_timestamp_different_name = Some(seq.same_timestamp_different_name);
        self.same_filesize_different_name = Some(seq.same_filesize_different_name);
    }

    /// Value of one classifier column, booleans as 0/1
    pub fn column(&self, name: &str) -> Option<f32> {
        let p = &self.path;
        let value = match name {
            "f_executable_archive" => flag(p.executable_archive),
            "f_files_in_folder" => self.files_in_folder? as f32,
            "f_neighbour_psexec" => flag(self.neighbour_psexec?),
            "f_number_digits" => p.number_digits as f32,
            "f_path_depth" => p.path_depth as f32,
            "f_path_unique_hosts" => self.path_unique_hosts? as f32,
            "f_recon_cluster" => self.recon_cluster? as f32,
            "f_recon_cmd" => flag(p.recon_cmd),
            "f_root_length" => p.root_length as f32,
            "f_same_filesize_different_name" => self.same_filesize_different_name? as f32,
            "f_same_timestamp_different_name" => self.same_timestamp_different_name? as f32,
            "f_shortname_ends_3264" => flag(p.shortname_ends_3264),
            "f_shortname_length" => p.shortname_length as f32,
            "f_staging_directory" => flag(p.staging_directory),
            "f_system32_dir" => flag(p.system32_dir),
            "f_temp_dir" => flag(p.temp_dir),
            "f_users_dir" => flag(p.users_dir),
            _ => return None,
        };
        Some(value)
    }

    /// Project onto the classifier layout; `Err` names the first missing column
    pub fn to_row(&self) -> Result<[f32; FEATURE_COUNT], &'static str> {
        let mut row = [0.0f32; FEATURE_COUNT];
        for (i, name) in CLASSIFIER_COLUMNS.iter().enumerate() {
            row[i] = self.column(name).ok_or(*name)?;
        }
        Ok(row)
    }

    pub fn is_complete(&self) -> bool {
        self.to_row().is_ok()
    }

    pub fn to_log_entry(&self) -> serde_json::Value {
        serde_json::json!({
            "root": self.path.root,
            "filename": self.path.filename,
            "named_values": CLASSIFIER_COLUMNS.iter()
                .filter_map(|name| self.column(name).map(|v| (name.to_string(), v)))
                .collect::<std::collections::HashMap<_, _>>(),
        })
    }
}

fn flag(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}
