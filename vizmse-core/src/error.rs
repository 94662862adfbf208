//! Error types for the session and rundown layer.

use crate::config::ConfigError;
use peptalk_client::ClientError;
use peptalk_protocol::{ErrorKind, PepError};
use thiserror::Error;

/// Errors returned by sessions, rundowns and the HTTP command client.
#[derive(Debug, Error)]
pub enum MseError {
    /// Transport-level PepTalk failure (not connected, closed, I/O).
    #[error(transparent)]
    Client(ClientError),

    /// Error reported by the MSE (or a request timeout).
    #[error(transparent)]
    Pep(#[from] PepError),

    #[error("HTTP client error {status} for '{path}': {response}")]
    HttpClient {
        path: String,
        status: u16,
        response: String,
    },

    #[error("HTTP server error {status} for '{path}': {response}")]
    HttpServer {
        path: String,
        status: u16,
        response: String,
    },

    #[error("HTTP request to {base_url} failed: {message}")]
    HttpRequest { base_url: String, message: String },

    #[error("element {0} already exists")]
    ElementExists(String),

    #[error("element {0} is not known in this rundown")]
    NotInRundown(String),

    #[error("template '{0}' has no field schema")]
    UnknownFieldSchema(String),

    #[error("{given} values given but template '{template}' declares {declared} fields")]
    TooManyFields {
        template: String,
        given: usize,
        declared: usize,
    },

    #[error("show {0} not found")]
    ShowNotFound(String),

    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("rundown {0} already exists")]
    RundownExists(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ClientError> for MseError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Pep(e) => MseError::Pep(e),
            other => MseError::Client(other),
        }
    }
}

impl From<quick_xml::Error> for MseError {
    fn from(err: quick_xml::Error) -> Self {
        MseError::Xml(err.to_string())
    }
}

impl MseError {
    /// Returns the PepTalk error kind, if this error came from the protocol.
    pub fn pep_kind(&self) -> Option<ErrorKind> {
        match self {
            MseError::Pep(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Returns whether this is a PepTalk `inexistent` error.
    pub fn is_inexistent(&self) -> bool {
        self.pep_kind() == Some(ErrorKind::Inexistent)
    }

    /// Returns whether repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MseError::Client(e) => e.is_retryable(),
            MseError::Pep(e) => e.is_retryable(),
            MseError::HttpServer { .. } | MseError::HttpRequest { .. } => true,
            _ => false,
        }
    }
}
