//! MessagePack framing for packrpc.
//!
//! MessagePack values are self-delimiting, so a frame is simply one complete
//! top-level value. The stream carries frames back to back with no extra
//! header:
//!
//! ```text
//! +----------------------+----------------------+-----
//! | value (call frame)   | value (call frame)   | ...
//! +----------------------+----------------------+-----
//! ```
//!
//! Call and reply frames are 4-element arrays whose first element is the
//! [`MessageType`] tag.

use crate::codec::{CodecConfig, TextEncoding};
use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};
use rmp::encode;
use rmpv::Value;

/// Message type tags carried in the first element of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request = 0,
    Response = 1,
}

impl MessageType {
    /// Returns the wire tag.
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Parses a wire tag.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_u64()? {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Response),
            _ => None,
        }
    }
}

/// One complete decoded value together with the bytes it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Decoded value.
    pub value: Value,
    /// Exact wire bytes of the value.
    pub raw: Bytes,
}

impl Frame {
    /// Decodes the next value from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` and consumes its bytes if a complete value
    /// is buffered, `Ok(None)` without consuming anything if more data is
    /// needed, or `Err` if the bytes are not valid MessagePack.
    ///
    /// Each call scans `buf` from the start; [`crate::Decoder`] keeps a
    /// [`FrameScanner`] across calls instead.
    pub fn decode(
        buf: &mut BytesMut,
        encoding: TextEncoding,
    ) -> Result<Option<Self>, ProtocolError> {
        match FrameScanner::new().scan(buf)? {
            Some(len) => Self::from_raw(buf.split_to(len).freeze(), encoding).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes `raw`, which must hold exactly one complete value.
    pub fn from_raw(raw: Bytes, encoding: TextEncoding) -> Result<Self, ProtocolError> {
        let value = rmpv::decode::read_value(&mut &raw[..])
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(Self {
            value: encoding.decode_strings(value),
            raw,
        })
    }

    /// Encodes a value using the given options.
    pub fn encode(value: &Value, config: &CodecConfig) -> Result<Bytes, ProtocolError> {
        let mut buf = Vec::with_capacity(64);
        write_value(&mut buf, value, config)?;
        Ok(Bytes::from(buf))
    }
}

/// Finds where the first complete value in a growing buffer ends.
///
/// Only headers are read, never payloads, and the scan resumes where it
/// stopped. Feeding one large value in small pieces therefore costs time
/// linear in its size.
#[derive(Debug)]
pub struct FrameScanner {
    /// Offset of the next unread header.
    pos: usize,
    /// Items still expected by each open container, outermost first. The
    /// bottom entry stands for the top-level value itself.
    open: Vec<u64>,
    /// Buffer length required before the scan can move on.
    need: usize,
    headers: usize,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            pos: 0,
            open: vec![1],
            need: 1,
            headers: 0,
        }
    }

    /// Forgets the current value. Call after consuming the scanned bytes.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
        self.open.push(1);
        self.need = 1;
    }

    /// Returns the length of the first value once `buf` holds all of it.
    ///
    /// `buf` must be the same buffer as on previous calls, possibly with
    /// more bytes appended.
    pub fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
        if buf.len() < self.need {
            return Ok(None);
        }

        loop {
            while self.open.last() == Some(&0) {
                self.open.pop();
            }
            if self.open.is_empty() {
                return Ok(Some(self.pos));
            }

            let header = match Header::parse(&buf[self.pos..])? {
                Some(header) => header,
                None => {
                    self.need = buf.len() + 1;
                    return Ok(None);
                }
            };
            self.headers += 1;

            let len = usize::try_from(header.len).unwrap_or(usize::MAX);
            let end = self.pos.saturating_add(len);
            if buf.len() < end {
                self.need = end;
                return Ok(None);
            }
            self.pos = end;

            if let Some(remaining) = self.open.last_mut() {
                *remaining -= 1;
            }
            if header.items > 0 {
                if self.open.len() > MAX_NESTING {
                    return Err(ProtocolError::Decode(format!(
                        "containers nested deeper than {} levels",
                        MAX_NESTING
                    )));
                }
                self.open.push(header.items);
            }
        }
    }

    /// Number of headers read so far, across all frames.
    #[cfg(test)]
    pub(crate) fn headers_read(&self) -> usize {
        self.headers
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Deepest container nesting accepted in a frame.
pub const MAX_NESTING: usize = 1024;

/// Size of one value's header plus its inline payload, and how many nested
/// values follow it.
struct Header {
    len: u64,
    items: u64,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let marker = match bytes.first() {
            Some(&marker) => marker,
            None => return Ok(None),
        };
        match marker {
            0x00..=0x7f | 0xc0 | 0xc2 | 0xc3 | 0xe0..=0xff => Self::fixed(1),
            0x80..=0x8f => Ok(Some(Self {
                len: 1,
                items: 2 * u64::from(marker & 0x0f),
            })),
            0x90..=0x9f => Ok(Some(Self {
                len: 1,
                items: u64::from(marker & 0x0f),
            })),
            0xa0..=0xbf => Self::fixed(1 + u64::from(marker & 0x1f)),
            0xc1 => Err(ProtocolError::Decode("reserved marker 0xc1".to_string())),
            // bin, str
            0xc4 | 0xd9 => Self::sized(bytes, 1, 0),
            0xc5 | 0xda => Self::sized(bytes, 2, 0),
            0xc6 | 0xdb => Self::sized(bytes, 4, 0),
            // ext: one type byte before the data
            0xc7 => Self::sized(bytes, 1, 1),
            0xc8 => Self::sized(bytes, 2, 1),
            0xc9 => Self::sized(bytes, 4, 1),
            0xca => Self::fixed(5),
            0xcb => Self::fixed(9),
            0xcc | 0xd0 => Self::fixed(2),
            0xcd | 0xd1 => Self::fixed(3),
            0xce | 0xd2 => Self::fixed(5),
            0xcf | 0xd3 => Self::fixed(9),
            // fixext 1, 2, 4, 8, 16
            0xd4 => Self::fixed(3),
            0xd5 => Self::fixed(4),
            0xd6 => Self::fixed(6),
            0xd7 => Self::fixed(10),
            0xd8 => Self::fixed(18),
            0xdc => Self::counted(bytes, 2, 1),
            0xdd => Self::counted(bytes, 4, 1),
            0xde => Self::counted(bytes, 2, 2),
            0xdf => Self::counted(bytes, 4, 2),
        }
    }

    fn fixed(len: u64) -> Result<Option<Self>, ProtocolError> {
        Ok(Some(Self { len, items: 0 }))
    }

    /// A length field of `width` bytes, `extra` bytes, then the payload.
    fn sized(bytes: &[u8], width: usize, extra: u64) -> Result<Option<Self>, ProtocolError> {
        Ok(read_be(bytes, width).map(|n| Self {
            len: 1 + width as u64 + extra + n,
            items: 0,
        }))
    }

    /// A count field of `width` bytes; each counted entry is `per` values.
    fn counted(bytes: &[u8], width: usize, per: u64) -> Result<Option<Self>, ProtocolError> {
        Ok(read_be(bytes, width).map(|n| Self {
            len: 1 + width as u64,
            items: n * per,
        }))
    }
}

/// Reads the big-endian field of `width` bytes following the marker.
fn read_be(bytes: &[u8], width: usize) -> Option<u64> {
    let field = bytes.get(1..1 + width)?;
    Some(field.iter().fold(0u64, |n, &b| (n << 8) | u64::from(b)))
}

fn encode_err(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Encode(e.to_string())
}

fn wire_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::ValueTooLarge(len))
}

fn write_value(
    wr: &mut Vec<u8>,
    value: &Value,
    config: &CodecConfig,
) -> Result<(), ProtocolError> {
    match value {
        Value::Nil => encode::write_nil(wr).map_err(encode_err)?,
        Value::Boolean(b) => encode::write_bool(wr, *b).map_err(encode_err)?,
        Value::Integer(n) => {
            if let Some(u) = n.as_u64() {
                encode::write_uint(wr, u).map_err(encode_err)?;
            } else if let Some(i) = n.as_i64() {
                encode::write_sint(wr, i).map_err(encode_err)?;
            }
        }
        Value::F32(f) => encode::write_f32(wr, *f).map_err(encode_err)?,
        Value::F64(f) => encode::write_f64(wr, *f).map_err(encode_err)?,
        Value::String(s) => {
            let bytes = config.pack_encoding.encode_str(s)?;
            encode::write_str_len(wr, wire_len(bytes.len())?).map_err(encode_err)?;
            wr.extend_from_slice(&bytes);
        }
        Value::Binary(data) => {
            // Legacy peers only know the raw family, which is the str markers.
            let len = wire_len(data.len())?;
            if config.use_bin_type {
                encode::write_bin_len(wr, len).map_err(encode_err)?;
            } else {
                encode::write_str_len(wr, len).map_err(encode_err)?;
            }
            wr.extend_from_slice(data);
        }
        Value::Array(items) => {
            encode::write_array_len(wr, wire_len(items.len())?).map_err(encode_err)?;
            for item in items {
                write_value(wr, item, config)?;
            }
        }
        Value::Map(entries) => {
            encode::write_map_len(wr, wire_len(entries.len())?).map_err(encode_err)?;
            for (key, val) in entries {
                write_value(wr, key, config)?;
                write_value(wr, val, config)?;
            }
        }
        Value::Ext(ty, data) => {
            encode::write_ext_meta(wr, wire_len(data.len())?, *ty).map_err(encode_err)?;
            wr.extend_from_slice(data);
        }
    }
    Ok(())
}
