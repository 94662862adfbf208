//! Incremental line framing for PepTalk.
//!
//! PepTalk lines end in `\r\n`, but a line may carry length-prefixed
//! literals (`{N}` followed by exactly `N` bytes) that contain raw line
//! breaks of their own. Chunks arriving from the socket are cut at arbitrary
//! points, so the framer keeps the bytes of an incomplete line together with
//! the number of literal bytes still owed:
//!
//! ```text
//! 5 ok {10}<a>\r\nb</a>\r\n
//!      ^^^^ marker   ^^^^ line end
//!          ^^^^^^^^^ 10 literal bytes, the inner \r\n is not a line end
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};

/// Maximum size of a single line, literals included (64 MiB).
pub const MAX_LINE_SIZE: usize = 64 * 1024 * 1024;

/// Line framer state.
///
/// Invariants: `scanned <= buffer.len()`; while `literal_remaining > 0` all
/// of `buffer[..scanned]` has been consumed and `literal_remaining` only
/// decreases until the literal completes.
#[derive(Debug, Clone, Default)]
pub struct LineFramer {
    /// Bytes of the current, not yet terminated line (and anything after it).
    buffer: BytesMut,
    /// Bytes of `buffer` already examined for markers and terminators.
    scanned: usize,
    /// Literal payload bytes still expected.
    literal_remaining: usize,
}

enum Marker {
    /// `{N}` of `len` bytes announcing `size` literal bytes.
    Complete { len: usize, size: usize },
    /// Buffer ends before the marker could be classified.
    Partial,
    NotAMarker,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completes, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProtocolError> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(line) = self.next_line() {
            lines.push(line);
        }

        let size = self.buffer.len() + self.literal_remaining;
        if size > MAX_LINE_SIZE {
            self.clear();
            return Err(ProtocolError::LineTooLarge {
                size,
                max: MAX_LINE_SIZE,
            });
        }

        Ok(lines)
    }

    /// Pure form of [`feed`](Self::feed): consumes the state and returns the
    /// completed lines with the successor state.
    pub fn step(mut self, chunk: &[u8]) -> Result<(Vec<String>, Self), ProtocolError> {
        let lines = self.feed(chunk)?;
        Ok((lines, self))
    }

    /// Number of literal bytes the current partial line is still waiting for.
    pub fn pending_literal(&self) -> usize {
        self.literal_remaining
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns whether a partial line is being held.
    pub fn has_leftover(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.literal_remaining = 0;
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            if self.literal_remaining > 0 {
                let available = self.buffer.len() - self.scanned;
                let take = available.min(self.literal_remaining);
                self.scanned += take;
                self.literal_remaining -= take;
                if self.literal_remaining > 0 {
                    return None;
                }
            }

            // Skip straight to the next byte that can start a marker or end a line.
            let offset = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == b'{' || b == b'\r')?;
            self.scanned += offset;

            if self.buffer[self.scanned] == b'{' {
                match parse_marker(&self.buffer[self.scanned..]) {
                    Marker::Complete { len, size } => {
                        self.scanned += len;
                        self.literal_remaining = size;
                    }
                    Marker::Partial => return None,
                    Marker::NotAMarker => self.scanned += 1,
                }
                continue;
            }

            match self.buffer.get(self.scanned + 1) {
                Some(b'\n') => {
                    let line = self.buffer.split_to(self.scanned);
                    self.buffer.advance(2);
                    self.scanned = 0;
                    return Some(String::from_utf8_lossy(&line).into_owned());
                }
                Some(_) => self.scanned += 1,
                None => return None,
            }
        }
    }
}

fn parse_marker(bytes: &[u8]) -> Marker {
    let digits = bytes[1..].iter().take_while(|b| b.is_ascii_digit()).count();
    match bytes.get(1 + digits) {
        None => Marker::Partial,
        Some(b'}') if digits > 0 => {
            // All-digit ASCII, so from_utf8 cannot fail; overflow is not a marker.
            let size = std::str::from_utf8(&bytes[1..1 + digits])
                .ok()
                .and_then(|s| s.parse::<usize>().ok());
            match size {
                Some(size) => Marker::Complete {
                    len: digits + 2,
                    size,
                },
                None => Marker::NotAMarker,
            }
        }
        Some(_) => Marker::NotAMarker,
    }
}
