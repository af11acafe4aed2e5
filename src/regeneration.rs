//! Truncate-and-restart bookkeeping for regenerate and edit.

use agent_provider::{Role, RunId};
use session_store::{DurableId, Message, MessageId};
use tracing::debug;

use crate::error::{SessionError, TruncationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegenerationState {
    #[default]
    Idle,
    ArmedForRegeneration,
    Streaming {
        run_id: RunId,
    },
}

/// What a regeneration keeps and what it discards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationPlan {
    /// Timeline up to and including the anchor user message.
    pub retained: Vec<Message>,
    /// Ids removed from the visible timeline.
    pub dropped: Vec<MessageId>,
    /// Durable ids the store should overwrite.
    pub overwrite: Vec<DurableId>,
}

impl RegenerationPlan {
    /// The user message the new reply answers.
    pub fn anchor(&self) -> Option<&Message> {
        self.retained.last()
    }
}

/// Plans a regeneration from `target`: keeps everything up to the nearest user
/// message at or before it and drops the rest.
pub fn plan_regeneration(timeline: &[Message], target: &MessageId) -> Result<RegenerationPlan, TruncationError> {
    let target_at = timeline
        .iter()
        .position(|message| &message.id == target)
        .ok_or_else(|| TruncationError::UnknownMessage {
            id: target.to_string(),
        })?;
    let anchor_at = timeline[..=target_at]
        .iter()
        .rposition(|message| message.role == Role::User)
        .ok_or_else(|| TruncationError::NoUserAncestor {
            id: target.to_string(),
        })?;

    let (retained, dropped) = timeline.split_at(anchor_at + 1);
    Ok(RegenerationPlan {
        retained: retained.to_vec(),
        dropped: dropped.iter().map(|message| message.id.clone()).collect(),
        overwrite: dropped
            .iter()
            .filter_map(|message| message.id.durable().cloned())
            .collect(),
    })
}

/// Like [`plan_regeneration`], but `target` must be a user message whose
/// content is replaced. The edited message gets a fresh local id; its old
/// durable copy is overwritten.
pub fn plan_edit(
    timeline: &[Message],
    target: &MessageId,
    content: &str,
) -> Result<RegenerationPlan, TruncationError> {
    let is_user = timeline
        .iter()
        .find(|message| &message.id == target)
        .map(|message| message.role == Role::User);
    if is_user == Some(false) {
        return Err(TruncationError::NotEditable {
            id: target.to_string(),
        });
    }

    let mut plan = plan_regeneration(timeline, target)?;
    if let Some(anchor) = plan.retained.last_mut() {
        let replaced = std::mem::replace(&mut anchor.id, MessageId::new_local());
        if let MessageId::Durable(durable) = &replaced {
            plan.overwrite.insert(0, durable.clone());
        }
        plan.dropped.insert(0, replaced);

        let edited = Message::user(content, anchor.created_at);
        anchor.content = edited.content;
        anchor.parts = edited.parts;
        anchor.error = None;
    }
    Ok(plan)
}

/// `Idle -> ArmedForRegeneration -> Streaming -> Idle`. Fresh submissions
/// move straight from `Idle` to `Streaming`.
#[derive(Debug, Default)]
pub struct RegenerationController {
    state: RegenerationState,
}

impl RegenerationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RegenerationState {
        self.state
    }

    /// Whether a new user submission may start now.
    pub fn can_submit(&self) -> bool {
        self.state == RegenerationState::Idle
    }

    pub fn active_run(&self) -> Option<RunId> {
        match self.state {
            RegenerationState::Streaming { run_id } => Some(run_id),
            _ => None,
        }
    }

    pub fn is_active_run(&self, run_id: RunId) -> bool {
        matches!(self.state, RegenerationState::Streaming { run_id: active } if active == run_id)
    }

    pub fn arm(&mut self, timeline: &[Message], target: &MessageId) -> Result<RegenerationPlan, SessionError> {
        self.ensure_idle()?;
        let plan = plan_regeneration(timeline, target)?;
        self.armed(&plan);
        Ok(plan)
    }

    pub fn arm_edit(
        &mut self,
        timeline: &[Message],
        target: &MessageId,
        content: &str,
    ) -> Result<RegenerationPlan, SessionError> {
        self.ensure_idle()?;
        let plan = plan_edit(timeline, target, content)?;
        self.armed(&plan);
        Ok(plan)
    }

    /// Returns to `Idle` when a stream could not be started.
    pub fn disarm(&mut self) {
        if self.state == RegenerationState::ArmedForRegeneration {
            self.state = RegenerationState::Idle;
        }
    }

    pub fn begin_streaming(&mut self, run_id: RunId) -> Result<(), SessionError> {
        if matches!(self.state, RegenerationState::Streaming { .. }) {
            return Err(SessionError::Busy);
        }
        self.state = RegenerationState::Streaming { run_id };
        Ok(())
    }

    /// Ends `run_id`; returns false for runs that are not active.
    pub fn finish(&mut self, run_id: RunId) -> bool {
        if !self.is_active_run(run_id) {
            return false;
        }
        self.state = RegenerationState::Idle;
        true
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.can_submit() {
            Ok(())
        } else {
            Err(SessionError::Busy)
        }
    }

    fn armed(&mut self, plan: &RegenerationPlan) {
        debug!(
            retained = plan.retained.len(),
            dropped = plan.dropped.len(),
            "armed for regeneration"
        );
        self.state = RegenerationState::ArmedForRegeneration;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use session_store::{GenerationState, Timestamp};

    use super::*;

    fn durable(tag: char) -> MessageId {
        MessageId::Durable(DurableId::parse(tag.to_string().repeat(24)).expect("valid durable id"))
    }

    fn assistant(id: MessageId, at: i64) -> Message {
        let mut message = Message::assistant_placeholder(None, Timestamp::from_millis(at)).with_id(id);
        message.append_text("reply");
        message.generation_state = GenerationState::Complete;
        message
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("one", Timestamp::from_millis(1)).with_id(durable('a')),
            assistant(durable('b'), 2),
            Message::user("two", Timestamp::from_millis(3)).with_id(durable('c')),
            assistant(MessageId::from_wire("local-d"), 4),
        ]
    }

    #[test]
    fn regenerating_an_answer_keeps_its_question() {
        let timeline = conversation();
        let plan = plan_regeneration(&timeline, &durable('b')).expect("plan");

        assert_eq!(plan.retained.len(), 1);
        assert_eq!(plan.anchor().map(|message| message.content.as_str()), Some("one"));
        assert_eq!(
            plan.dropped,
            vec![durable('b'), durable('c'), MessageId::from_wire("local-d")]
        );
        assert_eq!(plan.overwrite.len(), 2);
    }

    #[test]
    fn regenerating_a_user_message_keeps_it() {
        let timeline = conversation();
        let plan = plan_regeneration(&timeline, &durable('c')).expect("plan");
        assert_eq!(plan.retained.len(), 3);
        assert_eq!(plan.dropped, vec![MessageId::from_wire("local-d")]);
        assert!(plan.overwrite.is_empty());
    }

    #[test]
    fn no_user_ancestor_is_rejected() {
        let timeline = vec![assistant(durable('x'), 1)];
        assert_eq!(
            plan_regeneration(&timeline, &durable('x')),
            Err(TruncationError::NoUserAncestor {
                id: durable('x').to_string()
            })
        );
        assert!(matches!(
            plan_regeneration(&timeline, &durable('z')),
            Err(TruncationError::UnknownMessage { .. })
        ));
    }

    #[test]
    fn edit_replaces_anchor_and_overwrites_old_copy() {
        let timeline = conversation();
        let plan = plan_edit(&timeline, &durable('c'), "two, revised").expect("plan");

        let anchor = plan.anchor().expect("anchor");
        assert_eq!(anchor.content, "two, revised");
        assert!(!anchor.id.is_durable());
        assert_eq!(anchor.created_at, Timestamp::from_millis(3));
        assert_eq!(plan.overwrite, vec![durable('c').durable().cloned().expect("durable")]);
        assert_eq!(plan.dropped[0], durable('c'));

        assert!(matches!(
            plan_edit(&timeline, &durable('b'), "nope"),
            Err(TruncationError::NotEditable { .. })
        ));
    }

    #[test]
    fn controller_blocks_submissions_until_finished() {
        let timeline = conversation();
        let mut controller = RegenerationController::new();

        controller.arm(&timeline, &durable('b')).expect("arm");
        assert_eq!(controller.state(), RegenerationState::ArmedForRegeneration);
        assert!(!controller.can_submit());
        assert!(matches!(controller.arm(&timeline, &durable('b')), Err(SessionError::Busy)));

        controller.begin_streaming(4).expect("stream");
        assert!(!controller.finish(3));
        assert!(controller.finish(4));
        assert!(controller.can_submit());
    }

    #[test]
    fn disarm_returns_to_idle() {
        let mut controller = RegenerationController::new();
        controller.arm(&conversation(), &durable('b')).expect("arm");
        controller.disarm();
        assert_eq!(controller.state(), RegenerationState::Idle);
    }
}
