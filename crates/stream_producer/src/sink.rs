use std::pin::Pin;
use std::task::{Context, Poll};

use frame_codec::{encode, Frame};
use futures_util::future::BoxFuture;
use futures_util::Stream;
use tokio::sync::mpsc;

/// The receiving side went away; nothing more can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl std::fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("frame sink closed")
    }
}

impl std::error::Error for SinkClosed {}

/// Destination for produced frames.
pub trait FrameSink: Send {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<(), SinkClosed>>;
}

/// Collects frames in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub frames: Vec<Frame>,
}

impl FrameSink for VecSink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<(), SinkClosed>> {
        self.frames.push(frame);
        Box::pin(async { Ok(()) })
    }
}

/// Encodes frames onto a bounded channel feeding a [`FrameBody`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl FrameSink for ChannelSink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<(), SinkClosed>> {
        let line = encode(&frame);
        Box::pin(async move { self.tx.send(line).await.map_err(|_| SinkClosed) })
    }
}

/// Response body: a stream of encoded, `\n`-terminated frame lines.
#[derive(Debug)]
pub struct FrameBody {
    rx: mpsc::Receiver<String>,
}

impl Stream for FrameBody {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Creates a connected sink/body pair buffering at most `capacity` lines.
#[must_use]
pub fn frame_channel(capacity: usize) -> (ChannelSink, FrameBody) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, FrameBody { rx })
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_encoded_lines() {
        let (mut sink, body) = frame_channel(4);
        sink.send(Frame::Start).await.expect("body is open");
        sink.send(Frame::stop()).await.expect("body is open");
        drop(sink);

        let lines: Vec<String> = body.collect().await;
        assert_eq!(lines, vec!["f:{}\n".to_string(), "d:{\"finishReason\":\"stop\"}\n".to_string()]);
    }

    #[tokio::test]
    async fn dropped_body_closes_sink() {
        let (mut sink, body) = frame_channel(1);
        drop(body);
        assert_eq!(sink.send(Frame::Start).await, Err(SinkClosed));
    }
}
