//! Protocol error types and the PepTalk error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Protocol-level errors that can occur while framing the inbound stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line too large: {size} bytes buffered (max {max})")]
    LineTooLarge { size: usize, max: usize },
}

/// Identifier of the request an error or event belongs to.
///
/// Server-pushed events and errors raised outside a request carry the
/// wildcard id, written `*` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestId {
    Id(u64),
    Wildcard,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Id(id) => write!(f, "{}", id),
            RequestId::Wildcard => write!(f, "*"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Id(id)
    }
}

/// Kind of a PepTalk error.
///
/// The wire spelling of each kind is stable and part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Path does not exist.
    Inexistent,
    /// XML failed validation.
    Invalid,
    /// Command was understood but rejected.
    NotAllowed,
    /// Command was malformed.
    Syntax,
    /// Anything else.
    Unspecified,
    /// No response within the request timeout. Never sent by a server.
    Timeout,
    /// A kind token this client does not recognise.
    Other,
}

impl ErrorKind {
    /// Maps a server kind token to a known kind.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "inexistent" | "inexist" => Some(ErrorKind::Inexistent),
            "invalid" => Some(ErrorKind::Invalid),
            "not_allowed" => Some(ErrorKind::NotAllowed),
            "syntax" => Some(ErrorKind::Syntax),
            "unspecified" => Some(ErrorKind::Unspecified),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Inexistent => write!(f, "inexistent"),
            ErrorKind::Invalid => write!(f, "invalid"),
            ErrorKind::NotAllowed => write!(f, "not_allowed"),
            ErrorKind::Syntax => write!(f, "syntax"),
            ErrorKind::Unspecified => write!(f, "unspecified"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// A typed PepTalk error.
///
/// `sent` holds the request text (without id) that provoked the error, when
/// one is known, so failures can be reproduced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PepError {
    #[error("request {id}: path '{path}' does not exist")]
    Inexistent {
        id: RequestId,
        path: String,
        sent: Option<String>,
    },

    #[error("request {id}: invalid XML: {description}")]
    Invalid {
        id: RequestId,
        description: String,
        sent: Option<String>,
    },

    #[error("request {id}: not allowed: {description}")]
    NotAllowed {
        id: RequestId,
        description: String,
        sent: Option<String>,
    },

    #[error("request {id}: syntax error: {description}")]
    Syntax {
        id: RequestId,
        description: String,
        sent: Option<String>,
    },

    #[error("request {id}: unspecified error: {description}")]
    Unspecified {
        id: RequestId,
        description: String,
        sent: Option<String>,
    },

    #[error("request {id}: no response within {}ms", .timeout.as_millis())]
    Timeout {
        id: RequestId,
        sent: Option<String>,
        timeout: Duration,
    },

    #[error("request {id}: error '{kind}': {description}")]
    Other {
        id: RequestId,
        kind: String,
        description: String,
        sent: Option<String>,
    },
}

impl PepError {
    /// Builds an error from a server kind token.
    ///
    /// Unknown tokens never fail: they produce [`PepError::Other`] carrying
    /// the raw token.
    pub fn from_server(
        id: impl Into<RequestId>,
        kind: &str,
        description: impl Into<String>,
        sent: Option<String>,
    ) -> Self {
        let id = id.into();
        let description = description.into();
        match ErrorKind::from_token(kind) {
            Some(ErrorKind::Inexistent) => PepError::Inexistent {
                id,
                path: description,
                sent,
            },
            Some(ErrorKind::Invalid) => PepError::Invalid {
                id,
                description,
                sent,
            },
            Some(ErrorKind::NotAllowed) => PepError::NotAllowed {
                id,
                description,
                sent,
            },
            Some(ErrorKind::Syntax) => PepError::Syntax {
                id,
                description,
                sent,
            },
            Some(ErrorKind::Unspecified) => PepError::Unspecified {
                id,
                description,
                sent,
            },
            _ => PepError::Other {
                id,
                kind: kind.to_string(),
                description,
                sent,
            },
        }
    }

    /// Shorthand for an unspecified error.
    pub fn unspecified(
        id: impl Into<RequestId>,
        description: impl Into<String>,
        sent: Option<String>,
    ) -> Self {
        PepError::Unspecified {
            id: id.into(),
            description: description.into(),
            sent,
        }
    }

    /// Shorthand for an inexistent-path error raised on the client side.
    pub fn inexistent(path: impl Into<String>) -> Self {
        PepError::Inexistent {
            id: RequestId::Wildcard,
            path: path.into(),
            sent: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PepError::Inexistent { .. } => ErrorKind::Inexistent,
            PepError::Invalid { .. } => ErrorKind::Invalid,
            PepError::NotAllowed { .. } => ErrorKind::NotAllowed,
            PepError::Syntax { .. } => ErrorKind::Syntax,
            PepError::Unspecified { .. } => ErrorKind::Unspecified,
            PepError::Timeout { .. } => ErrorKind::Timeout,
            PepError::Other { .. } => ErrorKind::Other,
        }
    }

    pub fn id(&self) -> RequestId {
        match self {
            PepError::Inexistent { id, .. }
            | PepError::Invalid { id, .. }
            | PepError::NotAllowed { id, .. }
            | PepError::Syntax { id, .. }
            | PepError::Unspecified { id, .. }
            | PepError::Timeout { id, .. }
            | PepError::Other { id, .. } => *id,
        }
    }

    /// Returns the request text that provoked this error, if known.
    pub fn sent(&self) -> Option<&str> {
        match self {
            PepError::Inexistent { sent, .. }
            | PepError::Invalid { sent, .. }
            | PepError::NotAllowed { sent, .. }
            | PepError::Syntax { sent, .. }
            | PepError::Unspecified { sent, .. }
            | PepError::Timeout { sent, .. }
            | PepError::Other { sent, .. } => sent.as_deref(),
        }
    }

    /// Returns whether repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PepError::Timeout { .. })
    }
}
