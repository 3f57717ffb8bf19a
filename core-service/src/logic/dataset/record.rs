use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reviewer verdict attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    #[default]
    #[serde(rename = "")]
    Unlabeled,
    Evil,
    NotEvil,
    Suspicious,
}

impl ClassLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Unlabeled => "",
            ClassLabel::Evil => "evil",
            ClassLabel::NotEvil => "not_evil",
            ClassLabel::Suspicious => "suspicious",
        }
    }

    /// Binary training target (evil = 1), `None` for labels that never train
    pub fn training_target(&self) -> Option<u8> {
        match self {
            ClassLabel::Evil => Some(1),
            ClassLabel::NotEvil | ClassLabel::Unlabeled => Some(0),
            ClassLabel::Suspicious => None,
        }
    }

    pub fn is_labeled(&self) -> bool {
        *self != ClassLabel::Unlabeled
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClassLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(ClassLabel::Unlabeled),
            "evil" => Ok(ClassLabel::Evil),
            "not_evil" => Ok(ClassLabel::NotEvil),
            "suspicious" => Ok(ClassLabel::Suspicious),
            other => Err(format!("unknown class label '{}'", other)),
        }
    }
}

/// One row as it arrives from the source export, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub hostname: Option<String>,
    pub path: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_executed: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    /// Free-form flag from the export ("Yes", "No", "True", "False", ...)
    pub file_executed: Option<String>,
}

impl RawRecord {
    pub fn new(hostname: &str, path: &str) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            path: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

/// A validated, normalized file event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub hostname: String,
    pub path: String,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "last_execution")]
    pub last_executed: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub file_executed: Option<bool>,
    pub run_order: u32,
    #[serde(default)]
    pub class_label: ClassLabel,
    #[serde(default)]
    pub predict: f32,
}

impl Record {
    pub fn new(hostname: &str, path: &str, run_order: u32) -> Self {
        Self {
            hostname: hostname.to_string(),
            path: path.to_string(),
            last_modified: None,
            last_executed: None,
            file_size: None,
            file_executed: None,
            run_order,
            class_label: ClassLabel::Unlabeled,
            predict: 0.0,
        }
    }
}
