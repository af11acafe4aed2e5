//! Line-framed streaming protocol shared by the stream producer and consumer.
//!
//! Every frame is one `\n`-terminated line of the form `<tag>:<json-payload>`.
//! [`encode`]/[`decode`] work on single lines; [`FrameDecoder`] reassembles
//! lines from arbitrarily split network chunks.

mod codec;
mod decoder;
mod error;
mod frame;

pub use codec::{decode, encode, encode_all};
pub use decoder::FrameDecoder;
pub use error::ProtocolError;
pub use frame::{FinishReason, Frame, UnknownFinishReason};

/// `Content-Type` of a framed response body.
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";
