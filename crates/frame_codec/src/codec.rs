use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::frame::{FinishReason, Frame};

/// Encodes `frame` as one `\n`-terminated protocol line.
#[must_use]
pub fn encode(frame: &Frame) -> String {
    let payload = match frame {
        Frame::Start => json!({}),
        Frame::TextDelta(text) | Frame::ReasoningDelta(text) | Frame::Error(text) => {
            Value::String(text.clone())
        }
        Frame::Finish(reason) => json!({ "finishReason": reason.as_str() }),
    };

    format!("{}:{payload}\n", frame.tag())
}

/// Encodes a sequence of frames into one body string.
#[must_use]
pub fn encode_all<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> String {
    frames.into_iter().map(encode).collect()
}

/// Decodes one protocol line. A trailing `\n` or `\r\n` is ignored.
pub fn decode(line: &str) -> Result<Frame, ProtocolError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let Some((tag, payload)) = line.split_once(':') else {
        return Err(ProtocolError::MissingSeparator {
            line: line.to_string(),
        });
    };

    let mut chars = tag.chars();
    let tag = match (chars.next(), chars.next()) {
        (Some(tag), None) => tag,
        _ => {
            return Err(ProtocolError::UnknownTag {
                tag: tag.to_string(),
            })
        }
    };

    let parse = |payload: &str| -> Result<Value, ProtocolError> {
        serde_json::from_str(payload).map_err(|source| ProtocolError::malformed(tag, source))
    };

    match tag {
        Frame::START_TAG => match parse(payload)? {
            Value::Object(_) => Ok(Frame::Start),
            _ => Err(ProtocolError::UnexpectedPayload {
                tag,
                expected: "object",
            }),
        },
        Frame::TEXT_TAG => string_payload(tag, parse(payload)?).map(Frame::TextDelta),
        Frame::REASONING_TAG => string_payload(tag, parse(payload)?).map(Frame::ReasoningDelta),
        Frame::ERROR_TAG => string_payload(tag, parse(payload)?).map(Frame::Error),
        Frame::FINISH_TAG => finish_payload(tag, parse(payload)?).map(Frame::Finish),
        other => Err(ProtocolError::UnknownTag {
            tag: other.to_string(),
        }),
    }
}

fn string_payload(tag: char, value: Value) -> Result<String, ProtocolError> {
    match value {
        Value::String(text) => Ok(text),
        _ => Err(ProtocolError::UnexpectedPayload {
            tag,
            expected: "string",
        }),
    }
}

// Accepts `{"finishReason": "..."}` (extra fields such as usage are ignored)
// and a bare JSON string.
fn finish_payload(tag: char, value: Value) -> Result<FinishReason, ProtocolError> {
    let reason = match &value {
        Value::String(reason) => Some(reason.as_str()),
        Value::Object(map) => map.get("finishReason").and_then(Value::as_str),
        _ => None,
    };

    reason
        .map(FinishReason::parse)
        .ok_or(ProtocolError::UnexpectedPayload {
            tag,
            expected: "finishReason",
        })
}
