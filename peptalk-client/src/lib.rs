//! # peptalk-client
//!
//! Async client for PepTalk, the tree protocol of the Vizrt Media Sequencer
//! Engine.
//!
//! This crate provides:
//! - TCP connection management with protocol negotiation
//! - Request/response correlation by id, with per-request timeouts
//! - A broadcast stream of server events and connection lifecycle changes
//! - A high-level API for every PepTalk verb

pub mod client;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{PepTalkClient, PONG};
pub use connection::{Connection, ConnectionConfig, ConnectionEvent};
pub use error::ClientError;
