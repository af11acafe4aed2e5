use agent_provider::{Attachment, Role};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::SessionStoreError;
use crate::ids::{DurableThreadId, MessageId};

/// Title used for threads whose first message has no text.
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";
/// Number of characters of the first user message used as thread title.
pub const TITLE_SEED_CHARS: usize = 60;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Self((nanos / 1_000_000) as i64)
    }

    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn offset(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    #[default]
    Idle,
    Streaming,
    Stopped,
    Complete,
}

impl GenerationState {
    /// Whether the message can no longer change through streaming.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Stopped | Self::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        complete: bool,
    },
    ImageGeneration {
        prompt: String,
        #[serde(default)]
        images: Vec<String>,
        is_generating: bool,
        #[serde(default)]
        is_stopped: bool,
    },
}

/// One transcript entry, shared by the live stream, the durable store, and
/// drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub generation_state: GenerationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Newest store timestamp the client had seen when it created this
    /// message. Only stored messages newer than this can be its durable copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_horizon: Option<Timestamp>,
}

impl Message {
    /// New local user message; user messages are complete on creation.
    #[must_use]
    pub fn user(content: impl Into<String>, created_at: Timestamp) -> Self {
        let content = content.into();
        Self {
            id: MessageId::new_local(),
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: content.clone(),
            }],
            content,
            attachments: Vec::new(),
            created_at,
            model: None,
            generation_state: GenerationState::Complete,
            error: None,
            store_horizon: None,
        }
    }

    /// New empty local assistant message about to be streamed into.
    #[must_use]
    pub fn assistant_placeholder(model: Option<String>, created_at: Timestamp) -> Self {
        Self {
            id: MessageId::new_local(),
            role: Role::Assistant,
            content: String::new(),
            parts: Vec::new(),
            attachments: Vec::new(),
            created_at,
            model,
            generation_state: GenerationState::Streaming,
            error: None,
            store_horizon: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_store_horizon(mut self, horizon: Option<Timestamp>) -> Self {
        self.store_horizon = horizon;
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.generation_state == GenerationState::Streaming
    }

    /// Appends to `content` and to the trailing text part.
    pub fn append_text(&mut self, delta: &str) {
        self.content.push_str(delta);
        match self.parts.last_mut() {
            Some(MessagePart::Text { text }) => text.push_str(delta),
            _ => self.parts.push(MessagePart::Text {
                text: delta.to_string(),
            }),
        }
    }

    /// Appends to the open reasoning part, starting a new one if needed.
    pub fn append_reasoning(&mut self, delta: &str) {
        match self.parts.last_mut() {
            Some(MessagePart::Reasoning {
                text,
                complete: false,
            }) => text.push_str(delta),
            _ => self.parts.push(MessagePart::Reasoning {
                text: delta.to_string(),
                complete: false,
            }),
        }
    }

    /// Marks every open reasoning part complete.
    pub fn close_reasoning(&mut self) {
        for part in &mut self.parts {
            if let MessagePart::Reasoning { complete, .. } = part {
                *complete = true;
            }
        }
    }

    /// Stops every in-progress image generation, keeping generated images.
    pub fn stop_image_generation(&mut self) {
        for part in &mut self.parts {
            if let MessagePart::ImageGeneration {
                is_generating,
                is_stopped,
                ..
            } = part
            {
                if *is_generating {
                    *is_generating = false;
                    *is_stopped = true;
                }
            }
        }
    }

    /// Concatenated reasoning text, if any.
    #[must_use]
    pub fn reasoning(&self) -> Option<String> {
        let mut reasoning: Option<String> = None;
        for part in &self.parts {
            if let MessagePart::Reasoning { text, .. } = part {
                reasoning.get_or_insert_with(String::new).push_str(text);
            }
        }
        reasoning
    }

    #[must_use]
    pub fn has_open_reasoning(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, MessagePart::Reasoning { complete: false, .. }))
    }
}

/// Identity of a thread: client-only until first persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum ThreadKey {
    Unpersisted,
    Persisted(DurableThreadId),
}

impl ThreadKey {
    /// Local storage key for the thread's draft.
    #[must_use]
    pub fn draft_key(&self) -> String {
        match self {
            Self::Unpersisted => "draft-new".to_string(),
            Self::Persisted(id) => format!("draft-{id}"),
        }
    }

    #[must_use]
    pub fn durable(&self) -> Option<&DurableThreadId> {
        match self {
            Self::Persisted(id) => Some(id),
            Self::Unpersisted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub key: ThreadKey,
    pub title: String,
    pub pinned: bool,
}

impl Default for Thread {
    fn default() -> Self {
        Self {
            key: ThreadKey::Unpersisted,
            title: DEFAULT_THREAD_TITLE.to_string(),
            pinned: false,
        }
    }
}

impl Thread {
    #[must_use]
    pub fn persisted(id: DurableThreadId, title: impl Into<String>) -> Self {
        Self {
            key: ThreadKey::Persisted(id),
            title: title.into(),
            pinned: false,
        }
    }

    /// Moves the thread to its persisted state. Allowed exactly once.
    pub fn persist(&mut self, id: DurableThreadId) -> Result<(), SessionStoreError> {
        if let ThreadKey::Persisted(existing) = &self.key {
            return Err(SessionStoreError::AlreadyPersisted {
                id: existing.to_string(),
            });
        }
        self.key = ThreadKey::Persisted(id);
        Ok(())
    }
}

/// Thread title derived from the first user message.
#[must_use]
pub fn title_seed(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return DEFAULT_THREAD_TITLE.to_string();
    }
    trimmed.chars().take(TITLE_SEED_CHARS).collect()
}
