//! # packrpc-protocol
//!
//! Wire protocol implementation for packrpc (MessagePack-RPC).
//!
//! This crate provides:
//! - Incremental MessagePack framing over a byte stream
//! - Call frame (request) validation and reply frame (response) types
//! - Encode/decode options (text encodings, binary type marker)
//! - Protocol error types and wire constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{CodecConfig, Decoder, Encoder, TextEncoding};
pub use error::{InvalidRequest, ProtocolError};
pub use frame::{Frame, FrameScanner, MessageType, MAX_NESTING};
pub use message::{CallId, Request, Response};

/// Re-exported value model used for params and results.
pub use rmpv::Value;

/// Call id used in replies to frames that could not be correlated.
pub const SENTINEL_CALL_ID: i64 = -1;

/// Default port for packrpc servers.
pub const DEFAULT_PORT: u16 = 6000;

/// Maximum number of bytes read from the transport at once (1 MiB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum number of bytes a single pending value may occupy (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
