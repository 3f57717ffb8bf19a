//! Pipeline error taxonomy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Search text the storage backend could not parse
    #[error("Query syntax error: {message}")]
    QuerySyntax { message: String, query: String },

    /// No labelled or background rows available to fit a classifier
    #[error("Training set is empty for collection '{0}'")]
    TrainingSetEmpty(String),

    /// A stored record lacks a classifier column
    #[error("Record {id} is missing feature column '{column}'")]
    ScoreRowMalformed { id: String, column: &'static str },

    /// Queue rejected a job; the batch stays pending for retry
    #[error("Job submission failed: {0}")]
    JobSubmission(String),

    /// Another predict cycle already owns this collection
    #[error("A prediction cycle is already running for '{0}'")]
    CycleInProgress(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn query_syntax(message: impl Into<String>, query: &str) -> Self {
        PipelineError::QuerySyntax {
            message: message.into(),
            query: query.to_string(),
        }
    }
}
