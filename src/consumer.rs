//! Client side of the frame stream: turns a transport body into a live
//! assistant message.

use std::fmt::Display;

use agent_provider::{await_or_cancel, CancelSignal};
use frame_codec::{Frame, FrameDecoder, ProtocolError};
use futures_util::{Stream, StreamExt};
use session_store::{GenerationState, Message};
use tracing::{debug, warn};

/// Error recorded when the body ends without a `Finish` or `Error` frame.
pub const UNTERMINATED_STREAM_MESSAGE: &str = "stream ended before a finish frame";

/// Applies decoded frames to one ephemeral assistant message.
///
/// Partial output is never removed: errors, aborts, and protocol failures
/// only change `generation_state` and `error`.
#[derive(Debug)]
pub struct StreamConsumer {
    message: Message,
    decoder: FrameDecoder,
    terminated: bool,
}

impl StreamConsumer {
    pub fn new(mut message: Message) -> Self {
        message.generation_state = GenerationState::Streaming;
        Self {
            message,
            decoder: FrameDecoder::new(),
            terminated: false,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    /// Whether a terminal frame (or failure) has been applied.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feeds raw transport bytes. Returns whether the message changed.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        let mut changed = false;
        for decoded in self.decoder.feed(bytes) {
            changed |= match decoded {
                Ok(frame) => self.apply_frame(frame),
                Err(error) => self.fail_protocol(error),
            };
        }
        changed
    }

    /// Applies one decoded frame. Returns whether the message changed.
    pub fn apply_frame(&mut self, frame: Frame) -> bool {
        if self.terminated {
            warn!(message_id = %self.message.id, tag = %frame.tag(), "frame after stream end ignored");
            return false;
        }

        match frame {
            Frame::Start => false,
            Frame::TextDelta(text) => {
                self.message.close_reasoning();
                self.message.append_text(&text);
                true
            }
            Frame::ReasoningDelta(text) => {
                self.message.append_reasoning(&text);
                true
            }
            Frame::Finish(reason) => {
                debug!(message_id = %self.message.id, reason = reason.as_str(), "stream finished");
                self.message.close_reasoning();
                self.settle(GenerationState::Complete, None);
                true
            }
            Frame::Error(message) => {
                warn!(message_id = %self.message.id, error = %message, "stream ended with error");
                self.settle(GenerationState::Stopped, Some(message));
                true
            }
        }
    }

    /// Stops consuming, keeping whatever content arrived so far.
    pub fn abort(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        debug!(message_id = %self.message.id, "stream aborted");
        self.message.stop_image_generation();
        self.settle(GenerationState::Stopped, None);
        true
    }

    /// Called when the transport body ends.
    pub fn finish_transport(&mut self) -> bool {
        let mut changed = match self.decoder.finish() {
            Some(Ok(frame)) => self.apply_frame(frame),
            Some(Err(error)) => self.fail_protocol(error),
            None => false,
        };
        if !self.terminated {
            warn!(message_id = %self.message.id, "transport closed before a terminal frame");
            self.settle(GenerationState::Stopped, Some(UNTERMINATED_STREAM_MESSAGE.to_string()));
            changed = true;
        }
        changed
    }

    /// Records a transport-level read failure.
    pub fn fail_transport(&mut self, message: impl Into<String>) -> bool {
        if self.terminated {
            return false;
        }
        let message = message.into();
        warn!(message_id = %self.message.id, error = %message, "transport read failed");
        self.settle(GenerationState::Stopped, Some(message));
        true
    }

    /// Reads `body` to completion, invoking `on_update` after every change.
    ///
    /// Cancellation drops the body immediately and leaves the message
    /// `Stopped` with its partial content.
    pub async fn consume<S, B, E, F>(&mut self, body: S, cancel: &CancelSignal, mut on_update: F) -> GenerationState
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        F: FnMut(&Message),
    {
        let mut body = std::pin::pin!(body);
        while !self.terminated {
            let changed = match await_or_cancel(body.next(), cancel).await {
                Err(_) => self.abort(),
                Ok(Some(Ok(chunk))) => self.feed(chunk.as_ref()),
                Ok(Some(Err(error))) => self.fail_transport(error.to_string()),
                Ok(None) => self.finish_transport(),
            };
            if changed {
                on_update(&self.message);
            }
        }
        self.message.generation_state
    }

    fn fail_protocol(&mut self, error: ProtocolError) -> bool {
        if self.terminated {
            return false;
        }
        warn!(message_id = %self.message.id, error = %error, "undecodable frame");
        self.settle(GenerationState::Stopped, Some(error.to_string()));
        true
    }

    fn settle(&mut self, state: GenerationState, error: Option<String>) {
        self.message.generation_state = state;
        if error.is_some() {
            self.message.error = error;
        }
        self.terminated = true;
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use agent_provider::{cancel, cancel_signal};
    use frame_codec::{encode, FinishReason};
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use session_store::{MessagePart, Timestamp};

    use super::*;

    fn consumer() -> StreamConsumer {
        StreamConsumer::new(Message::assistant_placeholder(None, Timestamp::from_millis(1)))
    }

    fn body(frames: &[Frame]) -> String {
        frames.iter().map(encode).collect()
    }

    #[test]
    fn text_deltas_then_finish_complete_the_message() {
        let mut consumer = consumer();
        consumer.feed(
            body(&[
                Frame::Start,
                Frame::TextDelta("a".to_string()),
                Frame::TextDelta("b".to_string()),
                Frame::stop(),
            ])
            .as_bytes(),
        );

        assert_eq!(consumer.message().content, "ab");
        assert_eq!(consumer.message().generation_state, GenerationState::Complete);
        assert!(consumer.message().error.is_none());
    }

    #[test]
    fn reasoning_stays_incomplete_until_closed() {
        let mut consumer = consumer();
        consumer.feed(body(&[Frame::Start, Frame::ReasoningDelta("hmm".to_string())]).as_bytes());

        assert!(consumer.message().has_open_reasoning());
        assert_eq!(consumer.message().reasoning().as_deref(), Some("hmm"));

        consumer.feed(body(&[Frame::TextDelta("ok".to_string())]).as_bytes());
        assert!(!consumer.message().has_open_reasoning());
        assert_eq!(
            consumer.message().parts,
            vec![
                MessagePart::Reasoning {
                    text: "hmm".to_string(),
                    complete: true
                },
                MessagePart::Text { text: "ok".to_string() },
            ]
        );
    }

    #[test]
    fn error_frame_stops_and_keeps_partial_output() {
        let mut consumer = consumer();
        consumer.feed(
            body(&[
                Frame::Start,
                Frame::TextDelta("part".to_string()),
                Frame::Error("boom".to_string()),
            ])
            .as_bytes(),
        );

        assert_eq!(consumer.message().content, "part");
        assert_eq!(consumer.message().generation_state, GenerationState::Stopped);
        assert_eq!(consumer.message().error.as_deref(), Some("boom"));
    }

    #[test]
    fn frames_after_terminal_are_ignored() {
        let mut consumer = consumer();
        consumer.apply_frame(Frame::Finish(FinishReason::Stop));
        assert!(!consumer.apply_frame(Frame::TextDelta("late".to_string())));
        assert_eq!(consumer.message().content, "");
    }

    #[test]
    fn malformed_line_surfaces_as_error_state() {
        let mut consumer = consumer();
        consumer.feed(b"0:\"ok\"\n0:{not json\n");

        assert_eq!(consumer.message().content, "ok");
        assert_eq!(consumer.message().generation_state, GenerationState::Stopped);
        assert!(consumer.message().error.is_some());
    }

    #[test]
    fn body_without_terminal_frame_is_stopped() {
        let mut consumer = consumer();
        consumer.feed(body(&[Frame::Start, Frame::TextDelta("x".to_string())]).as_bytes());
        consumer.finish_transport();

        assert_eq!(consumer.message().generation_state, GenerationState::Stopped);
        assert_eq!(consumer.message().error.as_deref(), Some(UNTERMINATED_STREAM_MESSAGE));
    }

    #[test]
    fn unterminated_final_frame_is_decoded() {
        let mut consumer = consumer();
        consumer.feed(b"0:\"x\"\nd:{\"finishReason\":\"stop\"}");
        consumer.finish_transport();

        assert_eq!(consumer.message().generation_state, GenerationState::Complete);
    }

    #[tokio::test]
    async fn consume_reports_every_change() {
        let chunks: Vec<Result<Vec<u8>, Infallible>> = body(&[
            Frame::Start,
            Frame::TextDelta("a".to_string()),
            Frame::TextDelta("b".to_string()),
            Frame::stop(),
        ])
        .into_bytes()
        .chunks(3)
        .map(|chunk| Ok(chunk.to_vec()))
        .collect();

        let mut consumer = consumer();
        let mut updates = 0;
        let state = consumer
            .consume(stream::iter(chunks), &cancel_signal(), |_| updates += 1)
            .await;

        assert_eq!(state, GenerationState::Complete);
        assert_eq!(consumer.message().content, "ab");
        assert_eq!(updates, 3);
    }

    #[tokio::test]
    async fn cancelled_consume_keeps_partial_content() {
        let cancel_flag = cancel_signal();
        let first: Vec<Result<String, Infallible>> = vec![
            Ok(encode(&Frame::Start)),
            Ok(encode(&Frame::TextDelta("a".to_string()))),
            Ok(encode(&Frame::TextDelta("b".to_string()))),
        ];
        let stalled = stream::iter(first).chain(stream::pending());

        let mut consumer = consumer();
        let flag = cancel_flag.clone();
        let state = consumer
            .consume(stalled, &cancel_flag, move |message| {
                if message.content == "ab" {
                    cancel(&flag);
                }
            })
            .await;

        assert_eq!(state, GenerationState::Stopped);
        assert_eq!(consumer.message().content, "ab");
        assert!(consumer.message().error.is_none());
    }
}
