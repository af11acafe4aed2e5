use crate::codec::decode;
use crate::error::ProtocolError;
use crate::frame::Frame;

/// Incremental decoder for framed byte streams.
///
/// Bytes are buffered until a `\n` is seen, so frames (and multi-byte UTF-8
/// sequences) may be split across any number of chunks. Blank lines are
/// skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed arbitrary bytes into the decoder and drain every complete line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=split).collect();
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flushes a final line that was not `\n`-terminated. A leftover that does
    /// not decode is reported as [`ProtocolError::TruncatedLine`].
    pub fn finish(&mut self) -> Option<Result<Frame, ProtocolError>> {
        if self.is_empty_buffer() {
            self.buffer.clear();
            return None;
        }

        let line = std::mem::take(&mut self.buffer);
        decode_line(&line).map(|result| result.map_err(|_| ProtocolError::TruncatedLine))
    }

    /// Decode a complete body in one shot.
    pub fn decode_all(input: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input);
        frames.extend(decoder.finish());
        frames
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<Frame, ProtocolError>> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(_) => return Some(Err(ProtocolError::InvalidUtf8)),
    };

    if line.trim().is_empty() {
        return None;
    }

    Some(decode(line))
}
