//! Encoder and decoder for PepTalk request and response lines.

use crate::error::{PepError, ProtocolError};
use crate::framer::LineFramer;
use crate::message::{parse_line, Command, InboundMessage};
use bytes::{BufMut, BytesMut};

/// Line terminator used in both directions.
pub const LINE_END: &str = "\r\n";

/// Encodes requests into wire lines.
pub struct Encoder;

impl Encoder {
    /// Encodes `command` as request text, returning the text (for
    /// diagnostics) alongside the complete `<id> <text>\r\n` line.
    pub fn encode_request(id: u64, command: &Command) -> Result<(String, BytesMut), PepError> {
        let text = command.encode()?;
        let line = Self::encode_line(id, &text);
        Ok((text, line))
    }

    /// Frames pre-encoded request text with its id.
    pub fn encode_line(id: u64, text: &str) -> BytesMut {
        let id = id.to_string();
        let mut buf = BytesMut::with_capacity(id.len() + 1 + text.len() + LINE_END.len());
        buf.put_slice(id.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(text.as_bytes());
        buf.put_slice(LINE_END.as_bytes());
        buf
    }
}

/// Decodes the inbound byte stream into messages.
#[derive(Debug, Default)]
pub struct Decoder {
    framer: LineFramer,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            framer: LineFramer::new(),
        }
    }

    /// Feeds a chunk and returns every message it completes, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<InboundMessage>, ProtocolError> {
        let lines = self.framer.feed(chunk)?;
        Ok(lines.iter().filter_map(|line| parse_line(line)).collect())
    }

    /// Returns the number of bytes held for an incomplete line.
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.framer.clear();
    }
}
