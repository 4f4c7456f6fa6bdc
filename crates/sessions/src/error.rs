use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read session store {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document exists but is not a JSON array of session records.
    #[error("session store {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write session store {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize session records: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("session store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("session store writer has shut down")]
    WriterClosed,
}

impl StoreError {
    /// True when the document could be read but not parsed.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
