//! Server side of the streaming pipeline: drives one provider call, resolves
//! its attachments, separates reasoning from answer text, and writes protocol
//! frames to the response body.

mod producer;
mod reasoning;
mod sink;

pub use producer::{
    spawn_producer, ProducerOutcome, ProducerState, StreamProducer, TurnMessage, TurnRequest,
    CANCELLED_MESSAGE,
};
pub use reasoning::{ReasoningMarkers, ReasoningSplitter, SplitOutput};
pub use sink::{frame_channel, ChannelSink, FrameBody, FrameSink, SinkClosed, VecSink};
