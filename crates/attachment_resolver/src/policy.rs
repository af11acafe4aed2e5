use agent_provider::{ImageInput, ProviderCapabilities};

/// Largest attachment forwarded to a model as content (30 MiB).
pub const MAX_ATTACHMENT_SIZE: u64 = 30 * 1024 * 1024;

/// Non-`text/*` MIME types that are still inlined as UTF-8 text.
pub const EXTRA_TEXT_MIME_TYPES: [&str; 5] = [
    "application/json",
    "application/xml",
    "application/csv",
    "application/x-yaml",
    "application/sql",
];

/// Size and type rules applied during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPolicy {
    pub max_size_bytes: u64,
    pub extra_text_mime_types: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: MAX_ATTACHMENT_SIZE,
            extra_text_mime_types: EXTRA_TEXT_MIME_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl AttachmentPolicy {
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_extra_text_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.extra_text_mime_types.push(mime_type.into());
        self
    }

    pub fn exceeds_limit(&self, size_bytes: u64) -> bool {
        size_bytes > self.max_size_bytes
    }

    pub fn is_text_mime(&self, mime_type: &str) -> bool {
        let essence = mime_essence(mime_type);
        essence.starts_with("text/")
            || self
                .extra_text_mime_types
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&essence))
    }

    /// Human-readable limit in whole MiB, as shown in notices.
    pub fn limit_mib(&self) -> u64 {
        self.max_size_bytes / (1024 * 1024)
    }
}

/// How an inline-binary attachment reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryDelivery {
    /// Fetched and embedded as base64.
    Inline,
    /// Handed over as a URL; the provider fetches it. Bytes are not fetched.
    RemoteUrl,
}

/// Handling class of an attachment, decided from its declared MIME type and
/// the active provider's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentClass {
    InlineBinary(BinaryDelivery),
    InlinedText,
    Base64Fallback,
}

pub fn classify(
    mime_type: &str,
    policy: &AttachmentPolicy,
    capabilities: ProviderCapabilities,
) -> AttachmentClass {
    let essence = mime_essence(mime_type);

    if essence == "application/pdf" {
        return if capabilities.native_pdf {
            AttachmentClass::InlineBinary(BinaryDelivery::Inline)
        } else {
            AttachmentClass::Base64Fallback
        };
    }

    if policy.is_text_mime(&essence) {
        return AttachmentClass::InlinedText;
    }

    if essence.starts_with("image/") {
        return AttachmentClass::InlineBinary(match capabilities.image_input {
            ImageInput::InlineData => BinaryDelivery::Inline,
            ImageInput::RemoteUrl => BinaryDelivery::RemoteUrl,
        });
    }

    AttachmentClass::Base64Fallback
}

// Lowercased `type/subtype` without parameters such as `; charset=utf-8`.
fn mime_essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use agent_provider::ProviderKind;

    use super::*;

    #[test]
    fn text_like_types_are_inlined() {
        let policy = AttachmentPolicy::default();
        let caps = ProviderKind::OpenAi.capabilities();

        for mime in [
            "text/plain",
            "text/markdown; charset=utf-8",
            "application/json",
            "APPLICATION/X-YAML",
            "application/sql",
        ] {
            assert_eq!(classify(mime, &policy, caps), AttachmentClass::InlinedText, "{mime}");
        }
    }

    #[test]
    fn images_follow_provider_image_input() {
        let policy = AttachmentPolicy::default();

        assert_eq!(
            classify("image/png", &policy, ProviderKind::Google.capabilities()),
            AttachmentClass::InlineBinary(BinaryDelivery::RemoteUrl)
        );
        assert_eq!(
            classify("image/png", &policy, ProviderKind::Groq.capabilities()),
            AttachmentClass::InlineBinary(BinaryDelivery::Inline)
        );
    }

    #[test]
    fn pdf_requires_native_support() {
        let policy = AttachmentPolicy::default();

        assert_eq!(
            classify("application/pdf", &policy, ProviderKind::Google.capabilities()),
            AttachmentClass::InlineBinary(BinaryDelivery::Inline)
        );
        assert_eq!(
            classify("application/pdf", &policy, ProviderKind::OpenRouter.capabilities()),
            AttachmentClass::Base64Fallback
        );
    }

    #[test]
    fn unknown_binary_types_fall_back_to_base64() {
        let policy = AttachmentPolicy::default();
        let caps = ProviderKind::Mock.capabilities();

        assert_eq!(classify("application/zip", &policy, caps), AttachmentClass::Base64Fallback);
        assert_eq!(classify("", &policy, caps), AttachmentClass::Base64Fallback);
    }

    #[test]
    fn policy_limit_is_strictly_greater_than() {
        let policy = AttachmentPolicy::default().with_max_size_bytes(10);
        assert!(!policy.exceeds_limit(10));
        assert!(policy.exceeds_limit(11));
        assert_eq!(AttachmentPolicy::default().limit_mib(), 30);
    }

    #[test]
    fn extra_text_types_can_be_extended() {
        let policy = AttachmentPolicy::default().with_extra_text_mime_type("application/toml");
        assert!(policy.is_text_mime("application/toml"));
    }
}
