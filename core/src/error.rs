use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloseoutError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("SQL error = {0}")]
    Query(String),

    #[error("Audit file already exists: {}", path.display())]
    ArtifactConflict { path: PathBuf },

    #[error("Row for account {account} cannot be mapped: {reason}")]
    RecordShape { account: String, reason: String },

    #[error("Batch reported a failure at offset {offset}, but only {submitted} rows were submitted")]
    UnresolvedOffset { offset: usize, submitted: usize },

    #[error("Record at position {position} finished the run without a disposition")]
    Unaccounted { position: usize },

    #[error("Mail transport error: {0}")]
    Mail(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CloseoutError {
    pub fn config(message: impl Into<String>) -> Self {
        CloseoutError::Configuration(message.into())
    }
}

pub type CloseoutResult<T> = Result<T, CloseoutError>;
