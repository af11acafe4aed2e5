use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionStoreError;

const LOCAL_PREFIX: &str = "local-";

/// Client-generated identifier of a message the store has not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{LOCAL_PREFIX}{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Permanent identifier assigned by the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DurableId(String);

impl DurableId {
    /// Store ids are 24 to 32 ASCII alphanumerics.
    pub fn parse(value: impl Into<String>) -> Result<Self, SessionStoreError> {
        let value = value.into();
        if is_durable_shape(&value) {
            Ok(Self(value))
        } else {
            Err(SessionStoreError::InvalidDurableId { value })
        }
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DurableId {
    type Error = SessionStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DurableId> for String {
    fn from(value: DurableId) -> Self {
        value.0
    }
}

fn is_durable_shape(value: &str) -> bool {
    (24..=32).contains(&value.len()) && value.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

/// Identifier of a message: local until the store acknowledges it, durable
/// afterwards. The only transition is [`MessageId::promote`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageId {
    Local(LocalId),
    Durable(DurableId),
}

impl MessageId {
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(LocalId::generate())
    }

    /// Interprets an id received over the wire.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match DurableId::parse(value) {
            Ok(durable) => Self::Durable(durable),
            Err(_) => Self::Local(LocalId(value.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local(id) => id.as_str(),
            Self::Durable(id) => id.as_str(),
        }
    }

    #[must_use]
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }

    #[must_use]
    pub fn durable(&self) -> Option<&DurableId> {
        match self {
            Self::Durable(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Replaces a local id with its durable counterpart and returns the
    /// replaced local id. Fails if the id is already durable.
    pub fn promote(&mut self, durable: DurableId) -> Result<LocalId, SessionStoreError> {
        match self {
            Self::Local(local) => {
                let local = local.clone();
                *self = Self::Durable(durable);
                Ok(local)
            }
            Self::Durable(existing) => Err(SessionStoreError::AlreadyDurable {
                id: existing.as_str().to_string(),
            }),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permanent thread identifier assigned on first persistence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurableThreadId(String);

impl DurableThreadId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DurableThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
