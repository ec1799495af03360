//! Server error types.

use bytes::Bytes;
use packrpc_protocol::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Server errors.
///
/// These end a connection (or fail a server operation). Failures of a single
/// call are [`RpcError`]s and are reported to the caller instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid method name {0:?}: names must be non-empty and must not start with '_'")]
    InvalidMethodName(String),

    #[error("server shutting down")]
    ShuttingDown,
}

/// Classified failure of a single call, turned into an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The decoded value is not a usable call frame.
    #[error("{message}")]
    Protocol {
        call_id: Option<u64>,
        message: String,
        /// Wire bytes of the offending value, kept for diagnostics.
        raw: Bytes,
    },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// The method ran and failed.
    #[error("{0}")]
    Application(String),
}

impl RpcError {
    /// Returns a short name for the error class, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Protocol { .. } => "protocol",
            RpcError::MethodNotFound(_) => "method_not_found",
            RpcError::Application(_) => "application",
        }
    }
}

/// Failure returned by a method implementation.
///
/// Only the message travels back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodError(pub String);

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MethodError {}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_messages() {
        let err = RpcError::MethodNotFound("unknown".to_string());
        assert_eq!(err.to_string(), "Method not found: unknown");
        assert_eq!(err.kind(), "method_not_found");

        let err = RpcError::Application("division by zero".to_string());
        assert_eq!(err.to_string(), "division by zero");

        let err = RpcError::Protocol {
            call_id: None,
            message: "Invalid protocol".to_string(),
            raw: Bytes::from_static(&[0xa1, b'x']),
        };
        assert_eq!(err.to_string(), "Invalid protocol");
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn test_method_error_conversions() {
        let err: MethodError = "boom".into();
        assert_eq!(err.message(), "boom");
        assert_eq!(MethodError::from(format!("code {}", 7)).to_string(), "code 7");
    }

    #[test]
    fn test_invalid_method_name_display() {
        let err = ServerError::InvalidMethodName("_secret".to_string());
        assert!(err.to_string().contains("\"_secret\""));
    }
}
