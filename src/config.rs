//! Environment configuration.

use std::env;
use std::path::PathBuf;

use attachment_resolver::{AttachmentPolicy, MAX_ATTACHMENT_SIZE};
use session_store::{draft_root, DraftManager, SessionStoreError};

pub const DRAFT_DIR_ENV_VAR: &str = "CHAT_STREAM_DRAFT_DIR";
pub const MAX_ATTACHMENT_BYTES_ENV_VAR: &str = "CHAT_STREAM_MAX_ATTACHMENT_BYTES";
pub const LOG_ENV_VAR: &str = "CHAT_STREAM_LOG";
pub const DEBUG_ENV_VAR: &str = "CHAT_STREAM_DEBUG";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub draft_dir: PathBuf,
    pub max_attachment_bytes: u64,
    pub log_filter: String,
    pub debug: bool,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let draft_dir = env_string_opt(DRAFT_DIR_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| draft_root(&env::current_dir().unwrap_or_else(|_| PathBuf::from("."))));

        Self {
            draft_dir,
            max_attachment_bytes: env_u64_opt(MAX_ATTACHMENT_BYTES_ENV_VAR)
                .filter(|value| *value > 0)
                .unwrap_or(MAX_ATTACHMENT_SIZE),
            log_filter: env_string_opt(LOG_ENV_VAR).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            debug: env_flag(DEBUG_ENV_VAR),
        }
    }

    /// Filter directive handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_filter
        }
    }

    pub fn attachment_policy(&self) -> AttachmentPolicy {
        AttachmentPolicy::default().with_max_size_bytes(self.max_attachment_bytes)
    }

    pub fn draft_manager(&self) -> Result<DraftManager, SessionStoreError> {
        DraftManager::open(&self.draft_dir)
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_u64_opt(key: &str) -> Option<u64> {
    env_string_opt(key).and_then(|value| value.trim().parse().ok())
}
