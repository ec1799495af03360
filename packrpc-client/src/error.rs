//! Client error types.

use packrpc_protocol::CallId;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] packrpc_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    /// The server answered with an error message.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("unexpected call id in reply: expected {expected}, got {got}")]
    UnexpectedCallId { expected: u32, got: CallId },

    #[error("value conversion error: {0}")]
    Value(#[from] rmpv::ext::Error),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}
