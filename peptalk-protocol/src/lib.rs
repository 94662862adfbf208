//! # peptalk-protocol
//!
//! Wire protocol implementation for PepTalk, the control protocol of the
//! Vizrt Media Sequencer Engine.
//!
//! This crate provides:
//! - Incremental `\r\n` line framing aware of `{N}` length-prefixed literals
//! - Inbound message decoding (responses, events, errors)
//! - Command encoding and argument escaping
//! - The PepTalk error taxonomy

pub mod codec;
pub mod error;
pub mod escape;
pub mod framer;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorKind, PepError, ProtocolError, RequestId};
pub use escape::{escape, unescape};
pub use framer::{LineFramer, MAX_LINE_SIZE};
pub use message::{parse_line, Command, InboundMessage, Location, Outcome, Response};

/// Default PepTalk port of a Media Sequencer Engine.
pub const DEFAULT_PORT: u16 = 8595;

/// Default HTTP command port of a Media Sequencer Engine.
pub const DEFAULT_REST_PORT: u16 = 8580;
