//! Error types for the gymsync engine.

use crate::{EntityId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the gymsync engine.
#[derive(Debug, Error)]
pub enum Error {
    // Local store errors
    #[error("local store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("stored schema version {stored} is newer than supported version {supported}")]
    SchemaTooNew {
        stored: SchemaVersion,
        supported: SchemaVersion,
    },

    #[error("collection '{collection}' has no sort key '{key}'")]
    UnsupportedSortKey {
        collection: &'static str,
        key: &'static str,
    },

    #[error("{collection} record not found: {id}")]
    NotFound {
        collection: &'static str,
        id: EntityId,
    },

    // Queue errors
    #[error("malformed sync queue item {id}: {reason}")]
    MalformedQueueItem { id: String, reason: String },

    // Remote errors
    #[error("remote write to '{path}' failed: {reason}")]
    RemoteWriteFailed { path: String, reason: String },

    #[error("remote read from '{path}' failed: {reason}")]
    RemoteReadFailed { path: String, reason: String },

    #[error("network is offline")]
    Offline,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a failed remote write.
    pub fn remote_write(path: impl Into<String>, reason: impl ToString) -> Self {
        Error::RemoteWriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a failed remote read.
    pub fn remote_read(path: impl Into<String>, reason: impl ToString) -> Self {
        Error::RemoteReadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from the remote side rather than local state.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::RemoteWriteFailed { .. } | Error::RemoteReadFailed { .. } | Error::Offline
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
