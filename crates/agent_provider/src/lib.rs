//! Minimal provider-agnostic contract for executing a single model call.
//!
//! This crate defines the shared vocabulary between the server-side stream
//! producer and concrete model providers: roles, attachment references,
//! model-ready prompt parts, per-provider capabilities, and the
//! [`ProviderAdapter`] trait yielding a lazy sequence of text deltas. It
//! excludes provider transport details and wire framing.

use std::fmt;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod cancel;

pub use cancel::{await_or_cancel, cancel, cancel_signal, is_cancelled, CancelSignal, Cancelled};

/// Identifier for one provider run.
pub type RunId = u64;

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Ordering rank used when two messages share a timestamp.
    #[must_use]
    pub fn sort_rank(&self) -> u8 {
        match self {
            Self::User => 0,
            Self::Assistant => 1,
        }
    }
}

/// Opaque file reference attached to a thread, optionally linked to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    /// Message the attachment was uploaded with; `None` while the upload has
    /// not been linked yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Storage reference handed to the attachment source; `None` when the
    /// upload has not produced a storage object yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

impl Attachment {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let id = id.into();
        Self {
            source_ref: Some(id.clone()),
            id,
            message_id: None,
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    #[must_use]
    pub fn linked_to(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_source_ref(mut self, source_ref: Option<String>) -> Self {
        self.source_ref = source_ref;
        self
    }
}

/// One model-consumable piece of a prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    InlineData { mime_type: String, data_base64: String },
    RemoteUrl { mime_type: String, url: String },
}

impl ContentPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}

/// Provider-neutral model-facing message history item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl PromptMessage {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::text(text)],
        }
    }
}

/// How a provider accepts image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageInput {
    /// Base64 payload embedded in the request.
    InlineData,
    /// The provider fetches the image itself from a URL.
    RemoteUrl,
}

/// Static input capabilities of a provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub image_input: ImageInput,
    pub native_pdf: bool,
}

/// Provider family, selected once when a request is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Google,
    OpenAi,
    OpenRouter,
    Groq,
    Mock,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "google" => Self::Google,
            "openai" => Self::OpenAi,
            "openrouter" => Self::OpenRouter,
            "groq" => Self::Groq,
            "mock" => Self::Mock,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Groq => "groq",
            Self::Mock => "mock",
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> ProviderCapabilities {
        match self {
            Self::Google => ProviderCapabilities {
                image_input: ImageInput::RemoteUrl,
                native_pdf: true,
            },
            Self::OpenAi | Self::OpenRouter | Self::Groq => ProviderCapabilities {
                image_input: ImageInput::InlineData,
                native_pdf: false,
            },
            Self::Mock => ProviderCapabilities {
                image_input: ImageInput::InlineData,
                native_pdf: true,
            },
        }
    }
}

/// Immutable metadata describing a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub model_id: String,
}

/// Input required to start a provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub run_id: RunId,
    pub model_id: String,
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    /// Provider-specific knobs (search grounding, reasoning effort, ...).
    pub options: Value,
}

impl ProviderRequest {
    #[must_use]
    pub fn new(run_id: RunId, model_id: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            run_id,
            model_id: model_id.into(),
            system: None,
            messages,
            options: Value::Null,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// One raw increment yielded by a provider.
///
/// Providers that expose reasoning as a separate channel yield
/// [`ProviderDelta::Reasoning`]; everything else arrives as plain text and may
/// still carry inline reasoning markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderDelta {
    Text(String),
    Reasoning(String),
}

/// Error raised by a provider before or during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider refused the request (bad key, unsupported model, ...).
    Rejected(String),
    /// The call failed after it started.
    Failed(String),
    Cancelled,
}

impl ProviderError {
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(message) => write!(f, "provider rejected request: {message}"),
            Self::Failed(message) => f.write_str(message),
            Self::Cancelled => f.write_str("provider call was cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<Cancelled> for ProviderError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Lazy sequence of deltas produced by one provider call.
pub type DeltaStream = BoxStream<'static, Result<ProviderDelta, ProviderError>>;

/// Provider interface for executing one model call.
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Returns the input capabilities used when resolving attachments.
    fn capabilities(&self) -> ProviderCapabilities {
        self.profile().kind.capabilities()
    }

    /// Starts a call. Nothing is awaited until the returned stream is polled;
    /// implementations must stop yielding once `cancel` is set.
    fn stream(&self, request: ProviderRequest, cancel: CancelSignal) -> Result<DeltaStream, ProviderError>;
}
