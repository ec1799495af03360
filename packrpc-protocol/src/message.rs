//! Call and reply frames.

use crate::error::{InvalidRequest, ProtocolError};
use crate::frame::MessageType;
use crate::SENTINEL_CALL_ID;
use rmpv::Value;
use std::fmt;

/// Call id carried by a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallId {
    /// Echo of the id sent by the caller.
    Id(u64),
    /// The inbound frame could not be correlated; written as `-1`.
    Sentinel,
}

impl CallId {
    pub fn to_value(self) -> Value {
        match self {
            CallId::Id(id) => Value::from(id),
            CallId::Sentinel => Value::from(SENTINEL_CALL_ID),
        }
    }

    /// Reads a reply id: any non-negative integer, or the sentinel.
    pub fn from_value(value: &Value) -> Option<Self> {
        match (value.as_u64(), value.as_i64()) {
            (Some(id), _) => Some(CallId::Id(id)),
            (None, Some(SENTINEL_CALL_ID)) => Some(CallId::Sentinel),
            _ => None,
        }
    }
}

impl From<u64> for CallId {
    fn from(id: u64) -> Self {
        CallId::Id(id)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallId::Id(id) => write!(f, "{}", id),
            CallId::Sentinel => write!(f, "{}", SENTINEL_CALL_ID),
        }
    }
}

/// A validated call frame: `[0, call_id, method, params]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Client-chosen correlation token.
    pub call_id: u64,
    /// Name of the method to invoke.
    pub method: String,
    /// Positional arguments.
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(call_id: u64, method: impl Into<String>) -> Self {
        Self {
            call_id,
            method: method.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Builds the wire value for this call.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(MessageType::Request.code()),
            Value::from(self.call_id),
            Value::from(self.method.as_str()),
            Value::Array(self.params.clone()),
        ])
    }

    /// Validates a decoded value as a call frame.
    ///
    /// Anything that is not a 4-element array tagged as a request, or whose
    /// id is not a non-negative integer, is rejected without a usable id.
    /// Bad method names and params are rejected with the id so the caller
    /// can correlate.
    pub fn from_value(value: Value) -> Result<Self, InvalidRequest> {
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(InvalidRequest::malformed()),
        };
        let [tag, call_id, method, params]: [Value; 4] =
            items.try_into().map_err(|_| InvalidRequest::malformed())?;

        if MessageType::from_value(&tag) != Some(MessageType::Request) {
            return Err(InvalidRequest::malformed());
        }

        let call_id = call_id.as_u64().ok_or_else(InvalidRequest::malformed)?;

        let method = match method {
            Value::String(s) => s.into_str(),
            Value::Binary(bytes) => String::from_utf8(bytes).ok(),
            _ => None,
        }
        .ok_or_else(|| InvalidRequest::field(call_id, "Invalid method name"))?;

        let params = match params {
            Value::Array(params) => params,
            _ => {
                return Err(InvalidRequest::field(
                    call_id,
                    "Invalid params: expected an array",
                ))
            }
        };

        Ok(Self {
            call_id,
            method,
            params,
        })
    }
}

/// A reply frame: `[1, call_id, error, result]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Echoed call id, or the sentinel when the call could not be correlated.
    pub call_id: CallId,
    /// Error message, set only on failure.
    pub error: Option<String>,
    /// Method result, nil on failure.
    pub result: Value,
}

impl Response {
    /// Creates a success reply.
    pub fn ok(call_id: u64, result: Value) -> Self {
        Self {
            call_id: CallId::Id(call_id),
            error: None,
            result,
        }
    }

    /// Creates an error reply to a correlated call.
    pub fn error(call_id: u64, message: impl Into<String>) -> Self {
        Self::failure(CallId::Id(call_id), message)
    }

    /// Creates an error reply carrying the sentinel id.
    pub fn uncorrelated(message: impl Into<String>) -> Self {
        Self::failure(CallId::Sentinel, message)
    }

    pub fn failure(call_id: CallId, message: impl Into<String>) -> Self {
        Self {
            call_id,
            error: Some(message.into()),
            result: Value::Nil,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Builds the wire value for this reply.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(MessageType::Response.code()),
            self.call_id.to_value(),
            self.error
                .as_deref()
                .map(Value::from)
                .unwrap_or(Value::Nil),
            self.result.clone(),
        ])
    }

    /// Parses a decoded reply frame.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(ProtocolError::InvalidResponse(format!(
                    "expected an array, got {}",
                    other
                )))
            }
        };
        let len = items.len();
        let [tag, call_id, error, result]: [Value; 4] = items.try_into().map_err(|_| {
            ProtocolError::InvalidResponse(format!("expected 4 elements, got {}", len))
        })?;

        if MessageType::from_value(&tag) != Some(MessageType::Response) {
            return Err(ProtocolError::InvalidResponse(format!(
                "unexpected message type {}",
                tag
            )));
        }

        let call_id = CallId::from_value(&call_id)
            .ok_or_else(|| ProtocolError::InvalidResponse(format!("bad call id {}", call_id)))?;

        let error = match error {
            Value::Nil => None,
            Value::String(s) => Some(match s.into_str() {
                Some(text) => text,
                None => "<undecodable error message>".to_string(),
            }),
            other => Some(other.to_string()),
        };

        Ok(Self {
            call_id,
            error,
            result,
        })
    }
}
