//! Persisted Record Schema
//!
//! Authoritative field → type table for every record collection.
//! Storage backends mirror it column for column; the search query parser and
//! the sort-column check in the review API read it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Date,
    String,
}

pub const SCHEMA: &[(&str, FieldType)] = &[
    ("class_label", FieldType::String),
    ("predict", FieldType::Float),
    ("hostname", FieldType::String),
    ("run_order", FieldType::Integer),
    ("last_modified", FieldType::Date),
    ("last_execution", FieldType::Date),
    ("path", FieldType::String),
    ("file_size", FieldType::Integer),
    ("file_executed", FieldType::Boolean),
    ("file_unc", FieldType::String),
    ("file_drive", FieldType::String),
    ("file_root", FieldType::String),
    ("file_shortname", FieldType::String),
    ("file_ext", FieldType::String),
    ("file_name", FieldType::String),
    ("f_path_unique_hosts", FieldType::Integer),
    ("f_recon_cluster", FieldType::Integer),
    ("f_files_in_folder", FieldType::Integer),
    ("f_neighbour_psexec", FieldType::Boolean),
    ("f_same_timestamp_different_name", FieldType::Integer),
    ("f_same_filesize_different_name", FieldType::Integer),
    ("f_shortname_ends_3264", FieldType::Boolean),
    ("f_path_depth", FieldType::Integer),
    ("f_staging_directory", FieldType::Boolean),
    ("f_temp_dir", FieldType::Boolean),
    ("f_system32_dir", FieldType::Boolean),
    ("f_recon_cmd", FieldType::Boolean),
    ("f_users_dir", FieldType::Boolean),
    ("f_number_digits", FieldType::Integer),
    ("f_root_length", FieldType::Integer),
    ("f_shortname_length", FieldType::Integer),
    ("f_executable_archive", FieldType::Boolean),
];

pub fn field_type(name: &str) -> Option<FieldType> {
    SCHEMA.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}

pub fn is_field(name: &str) -> bool {
    field_type(name).is_some()
}
