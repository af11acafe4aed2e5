use thiserror::Error;

/// Per-attachment failure. Always recovered locally into a text notice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    #[error("attachment {name} is {size_bytes} bytes; limit is {limit_bytes} bytes")]
    TooLarge {
        name: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("attachment {id} has no storage source")]
    MissingSource { id: String },

    #[error("invalid attachment URL {value}: {message}")]
    InvalidUrl { value: String, message: String },

    #[error("fetch failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("fetch failed: {0}")]
    Request(String),

    #[error("fetch failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("attachment fetch was cancelled")]
    Cancelled,
}

impl AttachmentError {
    pub fn invalid_url(value: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidUrl {
            value: value.into(),
            message: message.to_string(),
        }
    }
}

impl From<agent_provider::Cancelled> for AttachmentError {
    fn from(_: agent_provider::Cancelled) -> Self {
        Self::Cancelled
    }
}
