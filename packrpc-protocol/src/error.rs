//! Protocol error types.

use crate::codec::TextEncoding;
use crate::message::CallId;
use thiserror::Error;

/// Protocol-level errors that can occur while framing or encoding values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed MessagePack data: {0}")]
    Decode(String),

    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("MessagePack encode error: {0}")]
    Encode(String),

    #[error("value of length {0} exceeds MessagePack limits")]
    ValueTooLarge(usize),

    #[error("character {ch:?} cannot be encoded as {encoding}")]
    Unencodable { ch: char, encoding: TextEncoding },

    #[error("invalid response frame: {0}")]
    InvalidResponse(String),
}

/// A decoded value that is not a usable call frame.
///
/// `call_id` is only set when the frame had the call shape and carried a
/// trustworthy id; replies to everything else use [`CallId::Sentinel`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InvalidRequest {
    pub call_id: Option<u64>,
    pub message: String,
}

impl InvalidRequest {
    /// The frame is not a 4-element sequence tagged as a request.
    pub fn malformed() -> Self {
        Self {
            call_id: None,
            message: "Invalid protocol".to_string(),
        }
    }

    /// The frame has the call shape but one of its fields is unusable.
    pub fn field(call_id: u64, message: impl Into<String>) -> Self {
        Self {
            call_id: Some(call_id),
            message: message.into(),
        }
    }

    /// Returns the id to echo in the reply frame.
    pub fn reply_call_id(&self) -> CallId {
        self.call_id.map(CallId::Id).unwrap_or(CallId::Sentinel)
    }
}
