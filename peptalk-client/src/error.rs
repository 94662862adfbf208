//! Client error types.

use peptalk_protocol::{ErrorKind, PepError, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Pep(#[from] PepError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out connecting to {addr} after {}ms", .timeout.as_millis())]
    ConnectTimeout { addr: String, timeout: Duration },
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::ConnectTimeout { .. } => true,
            ClientError::Pep(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the PepTalk error kind, if this is a PepTalk error.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.pep().map(PepError::kind)
    }

    pub fn pep(&self) -> Option<&PepError> {
        match self {
            ClientError::Pep(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peptalk_protocol::RequestId;

    #[test]
    fn test_retryable_classification() {
        let timeout = ClientError::Pep(PepError::Timeout {
            id: RequestId::Id(1),
            sent: None,
            timeout: Duration::from_millis(10),
        });
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), Some(ErrorKind::Timeout));

        let invalid = ClientError::Pep(PepError::from_server(2, "invalid", "xml", None));
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.kind(), Some(ErrorKind::Invalid));

        assert!(!ClientError::NotConnected.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert_eq!(ClientError::NotConnected.kind(), None);
    }
}
