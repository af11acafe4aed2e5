use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse draft JSON at {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize draft for {path}: {source}")]
    JsonSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("draft {path} has unsupported version {found}; expected 1")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("draft {path} belongs to '{found}', expected '{expected}'")]
    DraftKeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("draft {path} has invalid RFC3339 timestamp: {value}")]
    InvalidTimestamp { path: PathBuf, value: String },

    #[error("failed to format current UTC timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),

    #[error("message id '{id}' is already durable")]
    AlreadyDurable { id: String },

    #[error("thread is already persisted as '{id}'")]
    AlreadyPersisted { id: String },

    #[error("'{value}' is not a valid durable id")]
    InvalidDurableId { value: String },
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonParse {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonSerialize {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a durable message store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown thread '{0}'")]
    UnknownThread(String),

    #[error("unknown message '{0}'")]
    UnknownMessage(String),

    #[error("message store unavailable: {0}")]
    Unavailable(String),
}
