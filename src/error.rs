use session_store::{SessionStoreError, StoreError};
use thiserror::Error;

/// Regeneration was requested from a point that has no valid ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TruncationError {
    #[error("message '{id}' is not in the timeline")]
    UnknownMessage { id: String },

    #[error("no user message at or before '{id}'; nothing to regenerate from")]
    NoUserAncestor { id: String },

    #[error("message '{id}' is not a user message and cannot be edited")]
    NotEditable { id: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a response is already in progress on this thread")]
    Busy,

    #[error("nothing to send")]
    EmptySubmission,

    #[error("failed to start stream: {0}")]
    StartFailed(String),

    #[error(transparent)]
    Truncation(#[from] TruncationError),

    #[error(transparent)]
    Drafts(#[from] SessionStoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },
}
