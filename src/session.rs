//! Per-thread client state: the live messages, the last store snapshot, the
//! thread's draft, and the regeneration state machine, glued together by the
//! reconciler.

use std::collections::HashSet;

use agent_provider::{Attachment, Role, RunId};
use session_store::{
    title_seed, DraftManager, DraftSync, DurableId, DurableThreadId, GenerationState, Message,
    MessageId, MessageStore, Thread, ThreadKey, Timestamp,
};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::reconciler::{merge, MessageOrigin, Timeline};
use crate::regeneration::{RegenerationController, RegenerationPlan, RegenerationState};

/// Everything a host needs to start one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub thread: ThreadKey,
    pub model: Option<String>,
    /// Conversation up to and including the prompting user message.
    pub history: Vec<Message>,
    /// Attachments of `history`, linked to their message ids.
    pub attachments: Vec<Attachment>,
    /// Placeholder the stream will fill.
    pub assistant: Message,
}

/// Side effects the session asks of its embedding host.
pub trait SessionHost {
    fn start_stream(&mut self, request: StreamRequest) -> Result<RunId, String>;
    fn cancel_stream(&mut self, run_id: RunId);
    fn request_overwrite(&mut self, thread: &DurableThreadId, ids: Vec<DurableId>);
    fn request_render(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveStream {
    run_id: RunId,
    assistant: MessageId,
}

type Clock = Box<dyn Fn() -> Timestamp + Send + Sync>;

pub struct ChatSession {
    thread: Thread,
    drafts: Option<DraftManager>,
    input: String,
    ephemeral: Vec<Message>,
    persisted: Vec<Message>,
    draft_messages: Vec<Message>,
    hidden: HashSet<String>,
    controller: RegenerationController,
    active: Option<ActiveStream>,
    activated: bool,
    timeline: Timeline,
    clock: Clock,
}

impl ChatSession {
    pub fn new(thread: Thread) -> Self {
        Self {
            thread,
            drafts: None,
            input: String::new(),
            ephemeral: Vec::new(),
            persisted: Vec::new(),
            draft_messages: Vec::new(),
            hidden: HashSet::new(),
            controller: RegenerationController::new(),
            active: None,
            activated: false,
            timeline: Timeline::default(),
            clock: Box::new(Timestamp::now),
        }
    }

    pub fn with_drafts(mut self, drafts: DraftManager) -> Self {
        self.drafts = Some(drafts);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn messages(&self) -> &[Message] {
        &self.timeline.messages
    }

    pub fn regeneration_state(&self) -> RegenerationState {
        self.controller.state()
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|active| active.run_id)
    }

    /// Loads the thread's draft. Only the first call per session reads
    /// storage; returns whether a draft was restored.
    pub fn activate(&mut self) -> Result<bool, SessionError> {
        if self.activated {
            return Ok(false);
        }
        self.activated = true;

        let restored = match &self.drafts {
            Some(drafts) => drafts.load(&self.thread.key)?,
            None => None,
        };
        let found = restored.is_some();
        if let Some(draft) = restored {
            debug!(draft = %draft.key, messages = draft.unpersisted_messages.len(), "draft restored");
            self.input = draft.input;
            self.draft_messages = draft.unpersisted_messages;
        }
        self.rebuild();
        Ok(found)
    }

    pub fn set_input(&mut self, input: impl Into<String>) -> Result<DraftSync, SessionError> {
        self.input = input.into();
        self.snapshot_draft()
    }

    /// Sends a new user message and starts streaming its reply.
    pub fn submit<H>(
        &mut self,
        host: &mut H,
        input: &str,
        model: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<RunId, SessionError>
    where
        H: SessionHost + ?Sized,
    {
        if !self.controller.can_submit() {
            return Err(SessionError::Busy);
        }
        if input.trim().is_empty() && attachments.is_empty() {
            return Err(SessionError::EmptySubmission);
        }

        self.adopt_drafts();
        let now = self.next_timestamp();
        let mut user = Message::user(input, now).with_store_horizon(self.store_horizon());
        let user_id = user.id.as_str().to_string();
        user.attachments = attachments
            .into_iter()
            .map(|attachment| attachment.linked_to(user_id.clone()))
            .collect();
        let user_id = user.id.clone();
        self.ephemeral.push(user);
        self.input.clear();
        self.rebuild();

        let history = self.history_through(&user_id);
        let assistant = Message::assistant_placeholder(model.clone(), now);
        self.start(host, history, assistant, model)
    }

    /// Applies the consumer's view of the streaming reply of `run_id`.
    /// Events of any other run are ignored. Returns whether anything changed.
    pub fn on_stream_update(&mut self, run_id: RunId, update: &Message) -> bool {
        let Some(active) = self.active.clone().filter(|active| active.run_id == run_id) else {
            debug!(run_id, "ignoring update for inactive run");
            return false;
        };
        let Some(slot) = self
            .ephemeral
            .iter_mut()
            .find(|message| message.id == active.assistant)
        else {
            warn!(run_id, message_id = %active.assistant, "streaming message missing from session");
            return false;
        };

        slot.content.clone_from(&update.content);
        slot.parts.clone_from(&update.parts);
        slot.generation_state = update.generation_state;
        slot.error.clone_from(&update.error);
        if update.model.is_some() {
            slot.model.clone_from(&update.model);
        }

        if update.generation_state.is_settled() {
            debug!(run_id, state = ?update.generation_state, "run settled");
            self.controller.finish(run_id);
            self.active = None;
            self.rebuild();
            if let Err(error) = self.snapshot_draft() {
                warn!(run_id, error = %error, "failed to save draft");
            }
        } else {
            self.rebuild();
        }
        true
    }

    /// Cancels the active run and marks every streaming message stopped,
    /// keeping partial content. Returns whether anything was stopped.
    pub fn stop<H>(&mut self, host: &mut H) -> bool
    where
        H: SessionHost + ?Sized,
    {
        let mut stopped = false;
        if let Some(active) = self.active.take() {
            info!(run_id = active.run_id, "stopping run");
            host.cancel_stream(active.run_id);
            self.controller.finish(active.run_id);
            stopped = true;
        }
        for message in self.ephemeral.iter_mut().filter(|message| message.is_streaming()) {
            message.stop_image_generation();
            message.generation_state = GenerationState::Stopped;
            stopped = true;
        }

        if stopped {
            self.rebuild();
            if let Err(error) = self.snapshot_draft() {
                warn!(error = %error, "failed to save draft");
            }
            host.request_render();
        }
        stopped
    }

    /// Drops `target` and everything after it back to its user message, then
    /// streams a new reply.
    pub fn regenerate<H>(&mut self, host: &mut H, target: &MessageId, model: Option<String>) -> Result<RunId, SessionError>
    where
        H: SessionHost + ?Sized,
    {
        self.stop(host);
        let plan = self.controller.arm(&self.timeline.messages, target)?;
        self.restart(host, plan, model)
    }

    /// Replaces the content of user message `target`, drops everything after
    /// it, then streams a new reply.
    pub fn edit_and_regenerate<H>(
        &mut self,
        host: &mut H,
        target: &MessageId,
        content: &str,
        model: Option<String>,
    ) -> Result<RunId, SessionError>
    where
        H: SessionHost + ?Sized,
    {
        self.stop(host);
        let plan = self.controller.arm_edit(&self.timeline.messages, target, content)?;
        self.restart(host, plan, model)
    }

    /// Records the durable thread id. Moves the draft to its new key; a no-op
    /// when the thread is already persisted.
    pub fn on_thread_persisted(&mut self, id: DurableThreadId) -> Result<bool, SessionError> {
        if self.thread.key.durable().is_some() {
            return Ok(false);
        }
        let previous = self.thread.key.clone();
        self.thread.persist(id)?;
        if let Some(drafts) = &self.drafts {
            drafts.rekey(&previous, &self.thread.key)?;
        }
        info!(thread = %self.thread.key.draft_key(), "thread persisted");
        Ok(true)
    }

    /// Promotes a local message id after the store acknowledged the message.
    pub fn on_message_durable(&mut self, local: &MessageId, durable: DurableId) -> Result<bool, SessionError> {
        let Some(message) = self
            .ephemeral
            .iter_mut()
            .chain(self.draft_messages.iter_mut())
            .find(|message| &message.id == local)
        else {
            return Ok(false);
        };

        message.id.promote(durable)?;
        let promoted = message.id.clone();
        if let Some(active) = self.active.as_mut().filter(|active| &active.assistant == local) {
            active.assistant = promoted;
        }
        self.rebuild();
        self.snapshot_draft()?;
        Ok(true)
    }

    /// Replaces the store snapshot and re-merges.
    pub fn on_store_snapshot(&mut self, persisted: Vec<Message>) {
        self.persisted = persisted;
        self.rebuild();
    }

    /// Writes (or clears) the draft for the current thread key.
    pub fn snapshot_draft(&mut self) -> Result<DraftSync, SessionError> {
        let Some(drafts) = &self.drafts else {
            return Ok(DraftSync::Cleared);
        };

        let unpersisted: Vec<Message> = self
            .timeline
            .messages
            .iter()
            .zip(&self.timeline.origins)
            .filter(|(message, origin)| {
                matches!(origin, MessageOrigin::Ephemeral | MessageOrigin::Draft) && !message.id.is_durable()
            })
            .map(|(message, _)| {
                let mut message = message.clone();
                if message.is_streaming() {
                    message.generation_state = GenerationState::Stopped;
                }
                message
            })
            .collect();

        Ok(drafts.sync(&self.thread.key, &self.input, &unpersisted)?)
    }

    /// Creates the thread in `store` if needed, titled after the first user
    /// message.
    pub async fn persist_thread<S>(&mut self, store: &S) -> Result<DurableThreadId, SessionError>
    where
        S: MessageStore + ?Sized,
    {
        if let Some(id) = self.thread.key.durable() {
            return Ok(id.clone());
        }

        let first_user = self
            .timeline
            .messages
            .iter()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        let title = title_seed(first_user);
        let id = store.create_thread(title.clone()).await?;
        self.on_thread_persisted(id.clone())?;
        self.thread.title = title;
        Ok(id)
    }

    /// Appends every settled local message to `store`, promoting ids as they
    /// are acknowledged. Returns the number of messages stored.
    pub async fn persist_pending<S>(&mut self, store: &S) -> Result<usize, SessionError>
    where
        S: MessageStore + ?Sized,
    {
        let thread = self.persist_thread(store).await?;
        let pending: Vec<Message> = self
            .timeline
            .messages
            .iter()
            .zip(&self.timeline.origins)
            .filter(|(message, origin)| {
                **origin != MessageOrigin::Persisted
                    && !message.id.is_durable()
                    && message.generation_state.is_settled()
            })
            .map(|(message, _)| message.clone().with_store_horizon(None))
            .collect();

        let mut stored = 0;
        for message in pending {
            let local = message.id.clone();
            let durable = store.append_message(&thread, message).await?;
            self.on_message_durable(&local, durable)?;
            stored += 1;
        }
        Ok(stored)
    }

    fn restart<H>(&mut self, host: &mut H, plan: RegenerationPlan, model: Option<String>) -> Result<RunId, SessionError>
    where
        H: SessionHost + ?Sized,
    {
        let dropped: HashSet<String> = plan.dropped.iter().map(|id| id.as_str().to_string()).collect();
        self.ephemeral.retain(|message| !dropped.contains(message.id.as_str()));
        self.draft_messages.retain(|message| !dropped.contains(message.id.as_str()));
        self.hidden.extend(dropped);

        if let (Some(thread), false) = (self.thread.key.durable(), plan.overwrite.is_empty()) {
            host.request_overwrite(thread, plan.overwrite.clone());
        }

        let Some(anchor) = plan.anchor().cloned() else {
            self.controller.disarm();
            return Err(SessionError::EmptySubmission);
        };
        if !self.ephemeral.iter().any(|message| message.id == anchor.id) && !anchor.id.is_durable() {
            self.ephemeral
                .push(anchor.clone().with_store_horizon(self.store_horizon()));
        }
        self.rebuild();

        let created_at = self.next_timestamp().max(anchor.created_at.offset(1));
        let assistant = Message::assistant_placeholder(model.clone(), created_at);
        self.start(host, plan.retained, assistant, model)
    }

    fn start<H>(
        &mut self,
        host: &mut H,
        history: Vec<Message>,
        assistant: Message,
        model: Option<String>,
    ) -> Result<RunId, SessionError>
    where
        H: SessionHost + ?Sized,
    {
        let attachments = history
            .iter()
            .flat_map(|message| {
                message
                    .attachments
                    .iter()
                    .cloned()
                    .map(|attachment| attachment.linked_to(message.id.as_str()))
            })
            .collect();
        let assistant = assistant.with_store_horizon(self.store_horizon());
        let assistant_id = assistant.id.clone();
        let request = StreamRequest {
            thread: self.thread.key.clone(),
            model,
            history,
            attachments,
            assistant: assistant.clone(),
        };

        self.ephemeral.push(assistant);
        match host.start_stream(request) {
            Ok(run_id) => {
                self.controller.begin_streaming(run_id)?;
                self.active = Some(ActiveStream {
                    run_id,
                    assistant: assistant_id,
                });
                info!(run_id, "run started");
                self.rebuild();
                self.snapshot_draft()?;
                host.request_render();
                Ok(run_id)
            }
            Err(message) => {
                warn!(error = %message, "failed to start run");
                self.controller.disarm();
                if let Some(slot) = self.ephemeral.iter_mut().find(|message| message.id == assistant_id) {
                    slot.generation_state = GenerationState::Stopped;
                    slot.error = Some(message.clone());
                }
                self.rebuild();
                self.snapshot_draft()?;
                host.request_render();
                Err(SessionError::StartFailed(message))
            }
        }
    }

    /// Moves restored draft messages into the live session so new messages
    /// follow them.
    fn adopt_drafts(&mut self) {
        if self.draft_messages.is_empty() {
            return;
        }
        let adopted: Vec<Message> = self
            .timeline
            .messages
            .iter()
            .zip(&self.timeline.origins)
            .filter(|(_, origin)| **origin == MessageOrigin::Draft)
            .map(|(message, _)| message.clone())
            .collect();
        self.ephemeral.extend(adopted);
        self.draft_messages.clear();
    }

    fn history_through(&self, id: &MessageId) -> Vec<Message> {
        match self.timeline.position(id) {
            Some(index) => self.timeline.messages[..=index].to_vec(),
            None => Vec::new(),
        }
    }

    /// Client timestamp for a new message: the clock, but never earlier than
    /// the newest message already in the timeline or the store.
    fn next_timestamp(&self) -> Timestamp {
        let now = (self.clock)();
        let newest = self
            .timeline
            .messages
            .iter()
            .map(|message| message.created_at)
            .chain(self.store_horizon())
            .max();
        match newest {
            Some(newest) if newest >= now => newest.offset(1),
            _ => now,
        }
    }

    /// Newest timestamp in the last store snapshot, hidden messages included.
    fn store_horizon(&self) -> Option<Timestamp> {
        self.persisted.iter().map(|message| message.created_at).max()
    }

    fn rebuild(&mut self) {
        let visible = |message: &&Message| !self.hidden.contains(message.id.as_str());
        let persisted: Vec<Message> = self.persisted.iter().filter(visible).cloned().collect();
        let drafts: Vec<Message> = self.draft_messages.iter().filter(visible).cloned().collect();

        let timeline = merge(&self.ephemeral, &persisted, &drafts);
        for promotion in &timeline.promotions {
            if let Some(active) = self
                .active
                .as_mut()
                .filter(|active| active.assistant == MessageId::Local(promotion.local.clone()))
            {
                active.assistant = MessageId::Durable(promotion.durable.clone());
            }
        }

        let kept_drafts: HashSet<&str> = timeline
            .messages
            .iter()
            .zip(&timeline.origins)
            .filter(|(_, origin)| **origin == MessageOrigin::Draft)
            .map(|(message, _)| message.id.as_str())
            .collect();
        self.draft_messages
            .retain(|message| kept_drafts.contains(message.id.as_str()));

        self.ephemeral = timeline.ephemeral_subset();
        self.timeline = timeline;
    }
}
