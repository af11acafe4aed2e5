use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame line")]
    EmptyLine,

    #[error("frame line has no tag separator: {line:?}")]
    MissingSeparator { line: String },

    #[error("unknown frame tag {tag:?}")]
    UnknownTag { tag: String },

    #[error("malformed JSON payload for frame tag '{tag}': {source}")]
    MalformedPayload {
        tag: char,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame tag '{tag}' expects a {expected} payload")]
    UnexpectedPayload { tag: char, expected: &'static str },

    #[error("frame line is not valid UTF-8")]
    InvalidUtf8,

    #[error("stream ended inside a partial frame line")]
    TruncatedLine,
}

impl ProtocolError {
    #[must_use]
    pub fn malformed(tag: char, source: serde_json::Error) -> Self {
        Self::MalformedPayload { tag, source }
    }
}
