use std::sync::Arc;

use agent_provider::{
    await_or_cancel, cancel, cancel_signal, Attachment, CancelSignal, ProviderAdapter, ProviderDelta,
    ProviderError, ProviderRequest, Role, RunId,
};
use attachment_resolver::{
    build_prompt_message, link_attachments, AttachmentPolicy, AttachmentResolver, AttachmentSource,
};
use frame_codec::Frame;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::reasoning::{ReasoningMarkers, ReasoningSplitter, SplitOutput};
use crate::sink::{frame_channel, FrameBody, FrameSink, SinkClosed};

/// Error frame text emitted when a run is cancelled.
pub const CANCELLED_MESSAGE: &str = "request was cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Started,
    Streaming,
    Finished,
    Failed,
}

/// One message of the conversation as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl TurnMessage {
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
        }
    }
}

/// Everything needed to answer one chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub run_id: RunId,
    /// Overrides the provider's default model when set.
    pub model_id: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<TurnMessage>,
    /// Thread attachments; linked to messages before resolution.
    pub attachments: Vec<Attachment>,
    pub options: Value,
}

impl TurnRequest {
    #[must_use]
    pub fn new(run_id: RunId, messages: Vec<TurnMessage>) -> Self {
        Self {
            run_id,
            model_id: None,
            system: None,
            messages,
            attachments: Vec::new(),
            options: Value::Null,
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Final state of a run and the error it terminated with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOutcome {
    pub state: ProducerState,
    pub error: Option<String>,
}

enum Step {
    Delta(ProviderDelta),
    Done,
    Failed(String),
}

/// Drives one provider call and emits its frames.
///
/// The stream always ends with exactly one `Finish` or `Error` frame unless
/// the sink itself goes away.
pub struct StreamProducer {
    provider: Arc<dyn ProviderAdapter>,
    resolver: AttachmentResolver,
    markers: ReasoningMarkers,
    state: ProducerState,
}

impl StreamProducer {
    pub fn new(provider: Arc<dyn ProviderAdapter>, attachments: Arc<dyn AttachmentSource>) -> Self {
        let resolver = AttachmentResolver::new(attachments, provider.capabilities());
        Self {
            provider,
            resolver,
            markers: ReasoningMarkers::default(),
            state: ProducerState::Idle,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AttachmentPolicy) -> Self {
        self.resolver = self.resolver.with_policy(policy);
        self
    }

    #[must_use]
    pub fn with_markers(mut self, markers: ReasoningMarkers) -> Self {
        self.markers = markers;
        self
    }

    #[must_use]
    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub async fn run<S>(&mut self, request: TurnRequest, sink: &mut S, cancel_flag: CancelSignal) -> ProducerOutcome
    where
        S: FrameSink + ?Sized,
    {
        let run_id = request.run_id;
        match self.drive(request, sink, &cancel_flag).await {
            Ok(outcome) => outcome,
            Err(SinkClosed) => {
                warn!(run_id, "frame sink closed; abandoning run");
                cancel(&cancel_flag);
                self.state = ProducerState::Failed;
                ProducerOutcome {
                    state: self.state,
                    error: Some(SinkClosed.to_string()),
                }
            }
        }
    }

    async fn drive<S>(
        &mut self,
        request: TurnRequest,
        sink: &mut S,
        cancel_flag: &CancelSignal,
    ) -> Result<ProducerOutcome, SinkClosed>
    where
        S: FrameSink + ?Sized,
    {
        let run_id = request.run_id;
        self.state = ProducerState::Started;
        debug!(run_id, "stream started");
        sink.send(Frame::Start).await?;

        let provider_request = self.build_provider_request(request, cancel_flag).await;
        let mut deltas = match self.provider.stream(provider_request, cancel_flag.clone()) {
            Ok(deltas) => deltas,
            Err(error) => return self.fail(sink, run_id, error_message(&error)).await,
        };

        let mut splitter = ReasoningSplitter::new(self.markers.clone());
        loop {
            let step = match await_or_cancel(deltas.next(), cancel_flag).await {
                Err(_) | Ok(Some(Err(ProviderError::Cancelled))) => Step::Failed(CANCELLED_MESSAGE.to_string()),
                Ok(None) => Step::Done,
                Ok(Some(Ok(delta))) => Step::Delta(delta),
                Ok(Some(Err(error))) => Step::Failed(error_message(&error)),
            };

            match step {
                Step::Delta(delta) => {
                    self.state = ProducerState::Streaming;
                    let outputs = match &delta {
                        ProviderDelta::Text(text) => splitter.push_text(text),
                        ProviderDelta::Reasoning(text) => splitter.push_reasoning(text),
                    };
                    emit_outputs(sink, outputs).await?;
                }
                Step::Done => {
                    emit_outputs(sink, splitter.finish()).await?;
                    sink.send(Frame::stop()).await?;
                    self.state = ProducerState::Finished;
                    debug!(run_id, "stream finished");
                    return Ok(ProducerOutcome {
                        state: self.state,
                        error: None,
                    });
                }
                Step::Failed(message) => {
                    emit_outputs(sink, splitter.finish()).await?;
                    return self.fail(sink, run_id, message).await;
                }
            }
        }
    }

    async fn build_provider_request(&self, request: TurnRequest, cancel_flag: &CancelSignal) -> ProviderRequest {
        let linked = link_attachments(
            request
                .messages
                .iter()
                .map(|message| (message.id.as_str(), message.role)),
            &request.attachments,
        );

        let mut messages = Vec::with_capacity(request.messages.len());
        for (message, attachments) in request.messages.iter().zip(linked) {
            let resolved = self.resolver.resolve_all(&attachments, cancel_flag).await;
            messages.push(build_prompt_message(message.role, &message.content, resolved));
        }

        let model_id = request
            .model_id
            .unwrap_or_else(|| self.provider.profile().model_id);
        ProviderRequest {
            run_id: request.run_id,
            model_id,
            system: request.system,
            messages,
            options: request.options,
        }
    }

    async fn fail<S>(&mut self, sink: &mut S, run_id: RunId, message: String) -> Result<ProducerOutcome, SinkClosed>
    where
        S: FrameSink + ?Sized,
    {
        error!(run_id, error = %message, "stream terminated with error");
        sink.send(Frame::Error(message.clone())).await?;
        self.state = ProducerState::Failed;
        Ok(ProducerOutcome {
            state: self.state,
            error: Some(message),
        })
    }
}

async fn emit_outputs<S>(sink: &mut S, outputs: Vec<SplitOutput>) -> Result<(), SinkClosed>
where
    S: FrameSink + ?Sized,
{
    for output in outputs {
        let frame = match output {
            SplitOutput::Text(text) => Frame::TextDelta(text),
            SplitOutput::Reasoning(text) => Frame::ReasoningDelta(text),
        };
        sink.send(frame).await?;
    }
    Ok(())
}

fn error_message(error: &ProviderError) -> String {
    match error {
        ProviderError::Cancelled => CANCELLED_MESSAGE.to_string(),
        other => other.to_string(),
    }
}

/// Runs `producer` on a background task and returns the response body, the
/// task handle, and the run's cancel flag. Dropping the body cancels the run.
pub fn spawn_producer(
    mut producer: StreamProducer,
    request: TurnRequest,
    capacity: usize,
) -> (FrameBody, JoinHandle<ProducerOutcome>, CancelSignal) {
    let (mut sink, body) = frame_channel(capacity);
    let cancel_flag = cancel_signal();
    let task_cancel = cancel_flag.clone();
    let handle = tokio::spawn(async move { producer.run(request, &mut sink, task_cancel).await });
    (body, handle, cancel_flag)
}
