//! Error types for eventlens-core

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the eventlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A statistic was asked to summarize zero samples
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Sessionizer input was not sorted by (user_id, occurred_at)
    #[error("events out of order for user {user_id}: {current} follows {previous}")]
    OrderingViolation {
        user_id: String,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// The event source or signup source could not be read
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl Error {
    /// Whether this error means "could not fetch" rather than "bad data".
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Io(_) | Error::UpstreamUnavailable(_)
        )
    }
}

/// Result type alias for eventlens-core
pub type Result<T> = std::result::Result<T, Error>;
