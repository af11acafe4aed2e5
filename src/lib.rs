//! Client side of a streaming chat transcript.
//!
//! Invariant: the timeline is owned by [`ChatSession`] and rebuilt only through
//! [`merge`]; the consumer, the store snapshot, and the draft are merge inputs.
//!
//! # Public API Overview
//! - Read a framed response body into a live message with [`StreamConsumer`].
//! - Merge live, persisted, and draft messages with [`merge`] into a [`Timeline`].
//! - Plan truncations for regenerate/edit with [`RegenerationController`].
//! - Drive a whole thread through [`ChatSession`] and a [`SessionHost`].
//! - Post requests and receive framed bodies over HTTP with [`HttpTransport`].

pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod reconciler;
pub mod regeneration;
pub mod session;
pub mod transport;

/// Environment configuration.
pub use crate::config::EnvConfig;
/// Frame stream consumer.
pub use crate::consumer::{StreamConsumer, UNTERMINATED_STREAM_MESSAGE};
/// Error types.
pub use crate::error::{LoggingError, SessionError, TransportError, TruncationError};
/// Logging setup.
pub use crate::logging::init_logging;
/// Timeline reconciliation.
pub use crate::reconciler::{merge, timeline_order, MessageOrigin, Promotion, ReconciliationAnomaly, Timeline};
/// Regeneration planning and state.
pub use crate::regeneration::{
    plan_edit, plan_regeneration, RegenerationController, RegenerationPlan, RegenerationState,
};
/// Per-thread session state.
pub use crate::session::{ChatSession, SessionHost, StreamRequest};
/// HTTP transport.
pub use crate::transport::{ByteStream, ChatRequest, ChatRequestMessage, HttpTransport, HttpTransportConfig};

/// Shared data model, re-exported for hosts.
pub use agent_provider::{Attachment, Role, RunId};
pub use frame_codec::{Frame, ProtocolError};
pub use session_store::{
    DraftManager, DurableId, DurableThreadId, GenerationState, Message, MessageId, MessagePart,
    MessageStore, Thread, ThreadKey, Timestamp,
};
