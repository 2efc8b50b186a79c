use std::time::Duration;

/// Errors surfaced by the ingestion pipeline and the record store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed identifiers on an inbound message.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The backend could not be reached (closed connection, poisoned lock, failed open).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("unknown scope '{0}'")]
    UnknownScope(String),

    #[error("unknown duration '{0}'")]
    UnknownDuration(String),

    #[error("aggregation timed out after {0:?}")]
    AggregationTimeout(Duration),

    /// Sentiment scoring or embedding failed for a single message.
    #[error("enrichment failed: {0}")]
    Enrichment(String),

    #[error("malformed record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("concurrency gate closed")]
    GateClosed,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::MalformedRecord {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
