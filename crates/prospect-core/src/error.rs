use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing heuristics file: {0}")]
    MissingResource(PathBuf),

    #[error("Malformed heuristics file {file}: {message}")]
    MalformedResource { file: String, message: String },

    #[error("Invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("Invalid relation type: {0}")]
    InvalidRelationType(String),

    #[error("Invalid source tier: {0}")]
    InvalidSourceTier(String),

    #[error("Invalid run status: {0}")]
    InvalidRunStatus(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] crate::tagger::ExtractionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient persistence failures are retried with backoff; everything
    /// else surfaces immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() || db_err.is_check_violation() {
                return Self::DataIntegrity(db_err.to_string());
            }
        }
        Self::Database(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
