use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::SessionStoreError;
use crate::paths::draft_file_name;
use crate::schema::{Message, ThreadKey};

pub const DRAFT_VERSION: u32 = 1;

/// Unsent input and not-yet-durable messages of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Draft {
    pub version: u32,
    pub key: String,
    pub input: String,
    pub unpersisted_messages: Vec<Message>,
    pub saved_at: String,
}

impl Draft {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.unpersisted_messages.is_empty()
    }
}

/// Outcome of [`DraftManager::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftSync {
    Saved,
    Cleared,
}

/// Synchronous, file-backed draft storage: one JSON file per thread key.
#[derive(Debug, Clone)]
pub struct DraftManager {
    root: PathBuf,
}

impl DraftManager {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating draft directory", &root, source))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, key: &ThreadKey) -> PathBuf {
        self.root.join(draft_file_name(&key.draft_key()))
    }

    /// Writes the draft before returning; the file is replaced atomically.
    pub fn save(
        &self,
        key: &ThreadKey,
        input: &str,
        unpersisted_messages: &[Message],
    ) -> Result<Draft, SessionStoreError> {
        let path = self.path_for(key);
        let draft = Draft {
            version: DRAFT_VERSION,
            key: key.draft_key(),
            input: input.to_string(),
            unpersisted_messages: unpersisted_messages.to_vec(),
            saved_at: now_rfc3339()?,
        };

        let bytes = serde_json::to_vec_pretty(&draft)
            .map_err(|source| SessionStoreError::json_serialize(&path, source))?;
        write_atomic(&path, &bytes)?;
        debug!(draft = %draft.key, messages = draft.unpersisted_messages.len(), "draft saved");
        Ok(draft)
    }

    pub fn load(&self, key: &ThreadKey) -> Result<Option<Draft>, SessionStoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionStoreError::io("reading draft", &path, source)),
        };

        let draft: Draft =
            serde_json::from_slice(&bytes).map_err(|source| SessionStoreError::json_parse(&path, source))?;
        validate_draft(&path, key, &draft)?;
        Ok(Some(draft))
    }

    /// Removes the draft; returns whether one existed.
    pub fn clear(&self, key: &ThreadKey) -> Result<bool, SessionStoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(draft = %key.draft_key(), "draft cleared");
                Ok(true)
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SessionStoreError::io("removing draft", &path, source)),
        }
    }

    /// Saves when there is unsent state, clears otherwise.
    pub fn sync(
        &self,
        key: &ThreadKey,
        input: &str,
        unpersisted_messages: &[Message],
    ) -> Result<DraftSync, SessionStoreError> {
        if input.is_empty() && unpersisted_messages.is_empty() {
            self.clear(key)?;
            return Ok(DraftSync::Cleared);
        }
        self.save(key, input, unpersisted_messages)?;
        Ok(DraftSync::Saved)
    }

    /// Moves a draft to a new key, e.g. when a thread gets its durable id.
    pub fn rekey(&self, from: &ThreadKey, to: &ThreadKey) -> Result<Option<Draft>, SessionStoreError> {
        let Some(draft) = self.load(from)? else {
            return Ok(None);
        };
        let moved = self.save(to, &draft.input, &draft.unpersisted_messages)?;
        self.clear(from)?;
        Ok(Some(moved))
    }
}

fn validate_draft(path: &Path, key: &ThreadKey, draft: &Draft) -> Result<(), SessionStoreError> {
    if draft.version != DRAFT_VERSION {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: draft.version,
        });
    }

    let expected = key.draft_key();
    if draft.key != expected {
        return Err(SessionStoreError::DraftKeyMismatch {
            path: path.to_path_buf(),
            expected,
            found: draft.key.clone(),
        });
    }

    if OffsetDateTime::parse(&draft.saved_at, &Rfc3339).is_err() {
        return Err(SessionStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            value: draft.saved_at.clone(),
        });
    }

    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionStoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let mut file = File::create(&tmp_path)
        .map_err(|source| SessionStoreError::io("creating draft temp file", &tmp_path, source))?;
    file.write_all(bytes)
        .map_err(|source| SessionStoreError::io("writing draft temp file", &tmp_path, source))?;
    file.sync_all()
        .map_err(|source| SessionStoreError::io("syncing draft temp file", &tmp_path, source))?;
    fs::rename(&tmp_path, path).map_err(|source| SessionStoreError::io("replacing draft", path, source))
}

fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::ClockFormat)
}
