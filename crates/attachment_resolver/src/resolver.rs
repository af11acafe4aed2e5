use std::sync::Arc;

use agent_provider::{
    await_or_cancel, Attachment, CancelSignal, ContentPart, ProviderCapabilities,
};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::AttachmentError;
use crate::policy::{classify, AttachmentClass, AttachmentPolicy, BinaryDelivery};
use crate::source::AttachmentSource;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Model-ready form of one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPart {
    InlineBinary {
        mime_type: String,
        data_base64: String,
    },
    RemoteBinary {
        mime_type: String,
        url: String,
    },
    InlinedText {
        name: String,
        text: String,
    },
    Base64Fallback {
        name: String,
        mime_type: String,
        size_bytes: u64,
        data_base64: String,
    },
    /// Human-readable substitute for an attachment that could not be used.
    Notice {
        text: String,
        reason: AttachmentError,
    },
}

impl ResolvedPart {
    /// Whether this part carries binary payload (inline or by URL).
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::InlineBinary { .. } | Self::RemoteBinary { .. })
    }

    #[must_use]
    pub fn into_content_part(self) -> ContentPart {
        match self {
            Self::InlineBinary {
                mime_type,
                data_base64,
            } => ContentPart::InlineData {
                mime_type,
                data_base64,
            },
            Self::RemoteBinary { mime_type, url } => ContentPart::RemoteUrl { mime_type, url },
            Self::InlinedText { name, text } => ContentPart::text(format!("{name}:\n{text}")),
            Self::Base64Fallback {
                name,
                mime_type,
                size_bytes,
                data_base64,
            } => ContentPart::text(format!(
                "Binary file {name} (type {mime_type}, {} KB) encoded in base64 below:\n{data_base64}",
                (size_bytes as f64 / 1024.0).round() as u64
            )),
            Self::Notice { text, .. } => ContentPart::text(text),
        }
    }
}

/// Resolves attachments for one request against one provider.
#[derive(Clone)]
pub struct AttachmentResolver {
    source: Arc<dyn AttachmentSource>,
    policy: AttachmentPolicy,
    capabilities: ProviderCapabilities,
}

impl std::fmt::Debug for AttachmentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentResolver")
            .field("policy", &self.policy)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl AttachmentResolver {
    pub fn new(source: Arc<dyn AttachmentSource>, capabilities: ProviderCapabilities) -> Self {
        Self {
            source,
            policy: AttachmentPolicy::default(),
            capabilities,
        }
    }

    pub fn with_policy(mut self, policy: AttachmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &AttachmentPolicy {
        &self.policy
    }

    /// Resolves one attachment. Every failure degrades to
    /// [`ResolvedPart::Notice`].
    pub async fn resolve(&self, attachment: &Attachment, cancel: &CancelSignal) -> ResolvedPart {
        match self.try_resolve(attachment, cancel).await {
            Ok(part) => part,
            Err(reason) => {
                warn!(attachment = %attachment.id, name = %attachment.name, error = %reason, "attachment degraded to notice");
                ResolvedPart::Notice {
                    text: self.notice_text(attachment, &reason),
                    reason,
                }
            }
        }
    }

    /// Resolves all attachments concurrently; the output order matches the
    /// input order and failures stay isolated per attachment.
    pub async fn resolve_all(&self, attachments: &[Attachment], cancel: &CancelSignal) -> Vec<ResolvedPart> {
        join_all(attachments.iter().map(|attachment| self.resolve(attachment, cancel))).await
    }

    async fn try_resolve(&self, attachment: &Attachment, cancel: &CancelSignal) -> Result<ResolvedPart, AttachmentError> {
        self.check_size(attachment, attachment.size_bytes)?;

        let source_ref = attachment
            .source_ref
            .as_deref()
            .ok_or_else(|| AttachmentError::MissingSource {
                id: attachment.id.clone(),
            })?;
        let url = await_or_cancel(self.source.resolve_url(source_ref), cancel).await??;

        let class = classify(&attachment.mime_type, &self.policy, self.capabilities);
        if class == AttachmentClass::InlineBinary(BinaryDelivery::RemoteUrl) {
            debug!(attachment = %attachment.id, "passing attachment by URL");
            return Ok(ResolvedPart::RemoteBinary {
                mime_type: attachment.mime_type.clone(),
                url: url.to_string(),
            });
        }

        let bytes = await_or_cancel(self.source.fetch(url, cancel.clone()), cancel).await??;
        let size_bytes = bytes.len() as u64;
        self.check_size(attachment, size_bytes)?;

        debug!(attachment = %attachment.id, size_bytes, ?class, "attachment resolved");
        Ok(match class {
            AttachmentClass::InlineBinary(_) => ResolvedPart::InlineBinary {
                mime_type: attachment.mime_type.clone(),
                data_base64: BASE64_STANDARD.encode(&bytes),
            },
            AttachmentClass::InlinedText => ResolvedPart::InlinedText {
                name: attachment.name.clone(),
                text: String::from_utf8_lossy(&bytes).into_owned(),
            },
            AttachmentClass::Base64Fallback => ResolvedPart::Base64Fallback {
                name: attachment.name.clone(),
                mime_type: attachment.mime_type.clone(),
                size_bytes,
                data_base64: BASE64_STANDARD.encode(&bytes),
            },
        })
    }

    fn check_size(&self, attachment: &Attachment, size_bytes: u64) -> Result<(), AttachmentError> {
        if self.policy.exceeds_limit(size_bytes) {
            return Err(AttachmentError::TooLarge {
                name: attachment.name.clone(),
                size_bytes,
                limit_bytes: self.policy.max_size_bytes,
            });
        }
        Ok(())
    }

    fn notice_text(&self, attachment: &Attachment, reason: &AttachmentError) -> String {
        match reason {
            AttachmentError::TooLarge { size_bytes, .. } => format!(
                "Attachment {} skipped – file size {:.1} MB exceeds {} MB limit.",
                attachment.name,
                *size_bytes as f64 / BYTES_PER_MIB,
                self.policy.limit_mib()
            ),
            other => format!("Attachment {} could not be loaded: {other}", attachment.name),
        }
    }
}
