//! Turns opaque attachment references into model-consumable prompt parts.
//!
//! Resolution never fails as a whole: size limits, unsupported types, and
//! fetch errors each degrade to a text notice for the affected attachment
//! only.

mod error;
mod policy;
mod prompt;
mod resolver;
mod retry;
mod source;

pub use error::AttachmentError;
pub use policy::{
    classify, AttachmentClass, AttachmentPolicy, BinaryDelivery, EXTRA_TEXT_MIME_TYPES,
    MAX_ATTACHMENT_SIZE,
};
pub use prompt::{build_prompt_message, link_attachments, ANALYZE_ATTACHMENTS_PROMPT};
pub use resolver::{AttachmentResolver, ResolvedPart};
pub use retry::{is_retryable_fetch_error, retry_delay, BASE_DELAY_MS, MAX_RETRIES};
pub use source::{
    AttachmentSource, HttpAttachmentSource, HttpAttachmentSourceConfig, InMemoryAttachmentSource,
};
