//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{
    is_cancelled, CancelSignal, DeltaStream, ProviderAdapter, ProviderDelta, ProviderError,
    ProviderKind, ProviderProfile, ProviderRequest,
};
use futures_util::stream::{self, StreamExt};

/// Default model identifier reported by the mock.
pub const MOCK_MODEL_ID: &str = "mock";

/// One scripted step of a mock call. Each `Text`/`Reasoning` step is yielded
/// verbatim as a single delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    Text(String),
    Reasoning(String),
    /// Fails the call with [`ProviderError::Failed`] at this point.
    Fail(String),
}

/// Deterministic mock provider used by producer tests and local runs.
#[derive(Debug)]
pub struct MockProvider {
    kind: ProviderKind,
    model_id: String,
    steps: Vec<MockStep>,
    token_delay: Duration,
    rejection: Option<String>,
    last_request: Mutex<Option<ProviderRequest>>,
}

impl MockProvider {
    /// Creates a mock provider with caller-provided steps.
    #[must_use]
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            kind: ProviderKind::Mock,
            model_id: MOCK_MODEL_ID.to_string(),
            steps,
            token_delay: Duration::ZERO,
            rejection: None,
            last_request: Mutex::new(None),
        }
    }

    /// Creates a mock provider that streams `text` one word token at a time,
    /// the way chat providers usually chunk their output.
    #[must_use]
    pub fn from_words(text: &str) -> Self {
        Self::new(word_tokens(text).into_iter().map(MockStep::Text).collect())
    }

    /// Creates a provider whose calls are refused before any delta is produced.
    #[must_use]
    pub fn rejecting(message: impl Into<String>) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.rejection = Some(message.into());
        provider
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Sleeps before every yielded delta.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Returns the request seen by the most recent `stream` call.
    pub fn last_request(&self) -> Option<ProviderRequest> {
        lock_unpoisoned(&self.last_request).clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::from_words(
            "<thinking>The user wants a short demo reply. Keep it deterministic.</thinking>\
             Hello from the mock provider.\nThis reply is streamed one word at a time.\n",
        )
    }
}

struct MockRun {
    pending: VecDeque<Result<ProviderDelta, ProviderError>>,
    cancel: CancelSignal,
    token_delay: Duration,
    done: bool,
}

impl ProviderAdapter for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            kind: self.kind,
            model_id: self.model_id.clone(),
        }
    }

    fn stream(&self, request: ProviderRequest, cancel: CancelSignal) -> Result<DeltaStream, ProviderError> {
        *lock_unpoisoned(&self.last_request) = Some(request);

        if let Some(message) = &self.rejection {
            return Err(ProviderError::rejected(message.clone()));
        }

        let pending = self
            .steps
            .iter()
            .map(|step| match step {
                MockStep::Text(text) => Ok(ProviderDelta::Text(text.clone())),
                MockStep::Reasoning(text) => Ok(ProviderDelta::Reasoning(text.clone())),
                MockStep::Fail(message) => Err(ProviderError::failed(message.clone())),
            })
            .collect();

        let run = MockRun {
            pending,
            cancel,
            token_delay: self.token_delay,
            done: false,
        };

        Ok(stream::unfold(run, |mut run| async move {
            if run.done {
                return None;
            }

            if !run.token_delay.is_zero() && !run.pending.is_empty() {
                tokio::time::sleep(run.token_delay).await;
            }

            if is_cancelled(&run.cancel) {
                run.done = true;
                return Some((Err(ProviderError::Cancelled), run));
            }

            let next = run.pending.pop_front()?;
            if next.is_err() {
                run.done = true;
            }
            Some((next, run))
        })
        .boxed())
    }
}

/// Splits `text` into tokens that end after each space or newline.
#[must_use]
pub fn word_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending_token = String::new();
    for ch in text.chars() {
        pending_token.push(ch);
        if matches!(ch, ' ' | '\n') {
            tokens.push(std::mem::take(&mut pending_token));
        }
    }
    if !pending_token.is_empty() {
        tokens.push(pending_token);
    }
    tokens
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
