//! Encoder and decoder for packrpc frames and messages.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameScanner};
use crate::message::{Request, Response};
use crate::MAX_FRAME_SIZE;
use bytes::{Bytes, BytesMut};
use rmpv::{Utf8String, Value};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Text encoding applied to MessagePack string payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8 (the MessagePack default).
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// ISO-8859-1, one byte per character.
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    /// Returns the bytes to put on the wire for a string value.
    pub fn encode_str<'a>(&self, s: &'a Utf8String) -> Result<Cow<'a, [u8]>, ProtocolError> {
        match (self, s.as_str()) {
            (TextEncoding::Latin1, Some(text)) => text
                .chars()
                .map(|ch| {
                    u8::try_from(u32::from(ch)).map_err(|_| ProtocolError::Unencodable {
                        ch,
                        encoding: TextEncoding::Latin1,
                    })
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Cow::Owned),
            // Strings that were not valid UTF-8 on the way in go back out untouched
            _ => Ok(Cow::Borrowed(s.as_bytes())),
        }
    }

    /// Re-interprets every string payload in `value` using this encoding.
    pub fn decode_strings(&self, value: Value) -> Value {
        match self {
            TextEncoding::Utf8 => value,
            TextEncoding::Latin1 => latin1_strings(value),
        }
    }
}

fn latin1_strings(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let text: String = s.as_bytes().iter().map(|&b| char::from(b)).collect();
            Value::String(text.into())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(latin1_strings).collect()),
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (latin1_strings(k), latin1_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf-8"),
            TextEncoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(format!("unknown text encoding: {}", other)),
        }
    }
}

/// Encode/decode options shared by both ends of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Encoding used for outgoing strings.
    pub pack_encoding: TextEncoding,
    /// Encoding used to interpret incoming strings.
    pub unpack_encoding: TextEncoding,
    /// Write binary values with the bin type marker instead of raw/str.
    pub use_bin_type: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            pack_encoding: TextEncoding::Utf8,
            unpack_encoding: TextEncoding::Utf8,
            use_bin_type: true,
        }
    }
}

/// Encodes requests and responses into wire bytes.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    config: CodecConfig,
}

impl Encoder {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Encodes a request into a frame.
    pub fn encode_request(&self, request: &Request) -> Result<Bytes, ProtocolError> {
        self.encode_value(&request.to_value())
    }

    /// Encodes a response into a frame.
    pub fn encode_response(&self, response: &Response) -> Result<Bytes, ProtocolError> {
        self.encode_value(&response.to_value())
    }

    /// Encodes any value into a frame.
    pub fn encode_value(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        Frame::encode(value, &self.config)
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

/// Incremental decoder holding the partial-frame buffer of one connection.
pub struct Decoder {
    buffer: BytesMut,
    scanner: FrameScanner,
    encoding: TextEncoding,
    max_frame_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_encoding(TextEncoding::Utf8)
    }

    /// Creates a decoder interpreting strings with `encoding`.
    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanner: FrameScanner::new(),
            encoding,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Sets the maximum number of bytes a single pending value may occupy.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// The scan picks up where the previous call stopped, so a value that
    /// arrives in many pieces is only walked once.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match self.scanner.scan(&self.buffer)? {
            Some(len) => {
                self.scanner.reset();
                let raw = self.buffer.split_to(len).freeze();
                Frame::from_raw(raw, self.encoding).map(Some)
            }
            None if self.buffer.len() > self.max_frame_size => Err(ProtocolError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            }),
            None => Ok(None),
        }
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Ok(Some(Response::from_value(frame.value)?)),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanner.reset();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
