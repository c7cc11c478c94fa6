use thiserror::Error;

/// Errors raised by a [`crate::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write to {0}: updated_at moved under us")]
    Conflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient backend failures a caller should retry with backoff:
    /// a locked/busy database, a filesystem hiccup, or a losing race
    /// against another writer. `NotFound` and `Serde` are never transient
    /// — retrying a malformed record or a missing key changes nothing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::Io(_) | Self::Conflict(_))
    }
}
