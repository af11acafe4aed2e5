use agent_provider::{Attachment, ContentPart, PromptMessage, Role};

use crate::resolver::ResolvedPart;

/// Instruction inserted when a message carries attachments but no text.
pub const ANALYZE_ATTACHMENTS_PROMPT: &str = "Analyze the attached file(s).";

/// Distributes thread attachments over the request messages.
///
/// Returns one list per message, in message order. An attachment linked to a
/// message id goes to that message; an unlinked attachment goes to the last
/// user message. Attachments without a storage source are skipped.
pub fn link_attachments<'a, I>(messages: I, attachments: &[Attachment]) -> Vec<Vec<Attachment>>
where
    I: IntoIterator<Item = (&'a str, Role)>,
{
    let messages: Vec<(&str, Role)> = messages.into_iter().collect();
    let last_user = messages.iter().rposition(|(_, role)| *role == Role::User);
    let mut linked = vec![Vec::new(); messages.len()];

    for attachment in attachments.iter().filter(|attachment| attachment.source_ref.is_some()) {
        let target = match attachment.message_id.as_deref() {
            Some(message_id) => messages.iter().position(|(id, _)| *id == message_id),
            None => last_user,
        };
        if let Some(index) = target {
            linked[index].push(attachment.clone());
        }
    }

    linked
}

/// Builds a prompt message from its text content and resolved attachments.
pub fn build_prompt_message(role: Role, content: &str, resolved: Vec<ResolvedPart>) -> PromptMessage {
    if resolved.is_empty() {
        return PromptMessage::text(role, content);
    }

    let mut parts = Vec::with_capacity(resolved.len() + 1);
    if !content.trim().is_empty() {
        parts.push(ContentPart::text(content));
    }
    parts.extend(resolved.into_iter().map(ResolvedPart::into_content_part));

    if !parts.iter().any(ContentPart::is_text) {
        parts.insert(0, ContentPart::text(ANALYZE_ATTACHMENTS_PROMPT));
    }

    PromptMessage { role, parts }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ids(lists: &[Vec<Attachment>]) -> Vec<Vec<&str>> {
        lists
            .iter()
            .map(|list| list.iter().map(|attachment| attachment.id.as_str()).collect())
            .collect()
    }

    #[test]
    fn unlinked_attachments_go_to_last_user_message() {
        let messages = [
            ("u1", Role::User),
            ("a1", Role::Assistant),
            ("u2", Role::User),
            ("a2", Role::Assistant),
        ];
        let attachments = vec![
            Attachment::new("old", "old.txt", "text/plain", 1).linked_to("u1"),
            Attachment::new("new", "new.txt", "text/plain", 1),
            Attachment::new("orphan", "gone.txt", "text/plain", 1).linked_to("deleted"),
            Attachment::new("pending", "up.txt", "text/plain", 1).with_source_ref(None),
        ];

        let linked = link_attachments(messages, &attachments);

        assert_eq!(ids(&linked), vec![vec!["old"], vec![], vec!["new"], vec![]]);
    }

    #[test]
    fn image_only_message_gets_analyze_instruction() {
        let message = build_prompt_message(
            Role::User,
            "   ",
            vec![ResolvedPart::InlineBinary {
                mime_type: "image/png".to_string(),
                data_base64: "AAAA".to_string(),
            }],
        );

        assert_eq!(
            message.parts,
            vec![
                ContentPart::text(ANALYZE_ATTACHMENTS_PROMPT),
                ContentPart::InlineData {
                    mime_type: "image/png".to_string(),
                    data_base64: "AAAA".to_string(),
                },
            ]
        );
    }

    #[test]
    fn text_content_precedes_attachment_parts() {
        let message = build_prompt_message(
            Role::User,
            "Summarise this",
            vec![ResolvedPart::InlinedText {
                name: "notes.md".to_string(),
                text: "# Notes".to_string(),
            }],
        );

        assert_eq!(
            message.parts,
            vec![
                ContentPart::text("Summarise this"),
                ContentPart::text("notes.md:\n# Notes"),
            ]
        );
    }

    #[test]
    fn message_without_attachments_is_plain_text() {
        assert_eq!(
            build_prompt_message(Role::Assistant, "hi", Vec::new()),
            PromptMessage::text(Role::Assistant, "hi")
        );
    }
}
