//! Call handling: validation, dispatch and reply construction.

use crate::error::RpcError;
use crate::registry::{MethodRegistry, Service};
use futures::FutureExt;
use packrpc_protocol::{CallId, Frame, Request, Response, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Raw bytes of a rejected frame shown in the log line.
const LOGGED_RAW_PREFIX: usize = 64;

/// Turns decoded frames into replies.
///
/// One handler (and therefore one method cache) may be shared by every
/// connection of a server.
pub struct RpcHandler {
    registry: MethodRegistry,
}

impl RpcHandler {
    /// Creates a handler resolving methods through `service`.
    pub fn new(service: impl Service) -> Self {
        Self {
            registry: MethodRegistry::new(service),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Handles one decoded frame and returns the reply for it.
    ///
    /// Every frame gets exactly one reply.
    pub async fn handle(&self, frame: Frame) -> Response {
        let Frame { value, raw } = frame;

        let request = match Request::from_value(value) {
            Ok(request) => request,
            Err(invalid) => {
                let err = RpcError::Protocol {
                    call_id: invalid.call_id,
                    message: invalid.message,
                    raw,
                };
                return Self::error_response(&err);
            }
        };

        let call_id = request.call_id;
        tracing::debug!("Request: {} (id={})", request.method, call_id);

        match self.dispatch(request).await {
            Ok(result) => Response::ok(call_id, result),
            Err(e) => {
                tracing::debug!("Call {} failed ({}): {}", call_id, e.kind(), e);
                Response::error(call_id, e.to_string())
            }
        }
    }

    /// Resolves and invokes the method named by `request`.
    ///
    /// Method failures, including panics, come back as
    /// [`RpcError::Application`].
    pub async fn dispatch(&self, request: Request) -> Result<Value, RpcError> {
        let method = self.registry.resolve(&request.method)?;

        match AssertUnwindSafe(method.call(request.params))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RpcError::Application(e.0)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!("Method {} panicked: {}", request.method, message);
                Err(RpcError::Application(message))
            }
        }
    }

    fn error_response(err: &RpcError) -> Response {
        match err {
            RpcError::Protocol { call_id, raw, .. } => {
                tracing::warn!("Protocol error: {} ({})", err, raw_summary(raw));
                let call_id = call_id.map(CallId::Id).unwrap_or(CallId::Sentinel);
                Response::failure(call_id, err.to_string())
            }
            _ => Response::uncorrelated(err.to_string()),
        }
    }
}

/// Describes rejected wire bytes by length and a short hex prefix.
fn raw_summary(raw: &[u8]) -> String {
    if raw.len() <= LOGGED_RAW_PREFIX {
        format!("{} raw bytes: {:02x?}", raw.len(), raw)
    } else {
        format!(
            "{} raw bytes, first {}: {:02x?}",
            raw.len(),
            LOGGED_RAW_PREFIX,
            &raw[..LOGGED_RAW_PREFIX]
        )
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "method panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MethodError;
    use crate::registry::MethodTable;
    use bytes::{Bytes, BytesMut};
    use packrpc_protocol::TextEncoding;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn frame(bytes: Vec<u8>) -> Frame {
        let mut buf = BytesMut::from(&bytes[..]);
        Frame::decode(&mut buf, TextEncoding::Utf8).unwrap().unwrap()
    }

    fn test_handler() -> (Arc<MethodTable>, RpcHandler) {
        let table = Arc::new(MethodTable::new());
        table
            .register("sum", |a: i64, b: i64| Ok::<_, MethodError>(a + b))
            .unwrap();
        table
            .register("echo", |s: String| Ok::<_, MethodError>(s))
            .unwrap();
        (table.clone(), RpcHandler::new(table))
    }

    #[tokio::test]
    async fn test_sum() {
        let (_, handler) = test_handler();
        let response = handler
            .handle(frame(rmp_serde::to_vec(&(0, 1, "sum", (2, 3))).unwrap()))
            .await;
        assert_eq!(response, Response::ok(1, Value::from(5)));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_, handler) = test_handler();
        let response = handler
            .handle(frame(
                rmp_serde::to_vec(&(0, 2, "unknown", Vec::<i64>::new())).unwrap(),
            ))
            .await;
        assert_eq!(response, Response::error(2, "Method not found: unknown"));
    }

    #[tokio::test]
    async fn test_underscore_method() {
        let (_, handler) = test_handler();
        let response = handler
            .handle(frame(
                rmp_serde::to_vec(&(0, 3, "_sum", (1, 2))).unwrap(),
            ))
            .await;
        assert_eq!(response.call_id, CallId::Id(3));
        assert!(response.is_error());
        assert_eq!(response.result, Value::Nil);
    }

    #[tokio::test]
    async fn test_malformed_frames_use_sentinel() {
        let (_, handler) = test_handler();
        let frames = vec![
            rmp_serde::to_vec(&"hello").unwrap(),
            rmp_serde::to_vec(&(0, 1, "sum")).unwrap(),
            rmp_serde::to_vec(&(1, 1, "sum", (1, 2))).unwrap(),
            rmp_serde::to_vec(&(0, -5, "sum", (1, 2))).unwrap(),
        ];
        for bytes in frames {
            let response = handler.handle(frame(bytes)).await;
            assert_eq!(response, Response::uncorrelated("Invalid protocol"));
        }
    }

    #[tokio::test]
    async fn test_wide_call_ids_are_echoed() {
        let (_, handler) = test_handler();

        let id = 1u64 << 32;
        let response = handler
            .handle(frame(rmp_serde::to_vec(&(0, id, "sum", (1, 2))).unwrap()))
            .await;
        assert_eq!(response, Response::ok(id, Value::from(3)));

        let response = handler
            .handle(frame(
                rmp_serde::to_vec(&(0, u64::MAX, "unknown", Vec::<i64>::new())).unwrap(),
            ))
            .await;
        assert_eq!(response, Response::error(u64::MAX, "Method not found: unknown"));
    }

    #[tokio::test]
    async fn test_bad_fields_keep_call_id() {
        let (_, handler) = test_handler();

        let response = handler
            .handle(frame(rmp_serde::to_vec(&(0, 4, 99, (1, 2))).unwrap()))
            .await;
        assert_eq!(response, Response::error(4, "Invalid method name"));

        let response = handler
            .handle(frame(rmp_serde::to_vec(&(0, 5, "sum", 7)).unwrap()))
            .await;
        assert_eq!(
            response,
            Response::error(5, "Invalid params: expected an array")
        );
    }

    #[tokio::test]
    async fn test_cache_transparency() {
        let (_, handler) = test_handler();
        let first = handler
            .dispatch(Request::new(1, "sum").with_params(vec![Value::from(1), Value::from(2)]))
            .await
            .unwrap();
        let second = handler
            .dispatch(Request::new(2, "sum").with_params(vec![Value::from(3), Value::from(4)]))
            .await
            .unwrap();
        assert_eq!(first, Value::from(3));
        assert_eq!(second, Value::from(7));
        assert_eq!(handler.registry().cached(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached_as_outcome() {
        let (table, handler) = test_handler();
        let failed = Arc::new(AtomicBool::new(false));
        let flag = failed.clone();
        table
            .register("flaky", move |x: i64| {
                if !flag.swap(true, Ordering::SeqCst) {
                    Err(MethodError::new("first call fails"))
                } else {
                    Ok(x * 2)
                }
            })
            .unwrap();

        let err = handler
            .dispatch(Request::new(1, "flaky").with_params(vec![Value::from(4)]))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::Application("first call fails".to_string()));

        let ok = handler
            .dispatch(Request::new(2, "flaky").with_params(vec![Value::from(4)]))
            .await
            .unwrap();
        assert_eq!(ok, Value::from(8));
    }

    #[tokio::test]
    async fn test_panic_becomes_error_reply() {
        let (table, handler) = test_handler();
        table
            .register("explode", || -> Result<i64, MethodError> { panic!("kaboom") })
            .unwrap();

        let response = handler
            .handle(frame(
                rmp_serde::to_vec(&(0, 9, "explode", Vec::<i64>::new())).unwrap(),
            ))
            .await;
        assert_eq!(response, Response::error(9, "kaboom"));

        // The handler keeps working
        let response = handler
            .handle(frame(rmp_serde::to_vec(&(0, 10, "sum", (1, 1))).unwrap()))
            .await;
        assert_eq!(response, Response::ok(10, Value::from(2)));
    }

    #[tokio::test]
    async fn test_arity_error_reply() {
        let (_, handler) = test_handler();
        let response = handler
            .handle(frame(rmp_serde::to_vec(&(0, 6, "sum", (1,))).unwrap()))
            .await;
        assert_eq!(response, Response::error(6, "expected 2 arguments, got 1"));
    }

    #[test]
    fn test_protocol_error_response() {
        let err = RpcError::Protocol {
            call_id: Some(12),
            message: "Invalid method name".to_string(),
            raw: Bytes::from_static(&[0x94]),
        };
        let response = RpcHandler::error_response(&err);
        assert_eq!(response.call_id, CallId::Id(12));
        assert_eq!(response.error.as_deref(), Some("Invalid method name"));
    }

    #[test]
    fn test_protocol_error_response_for_large_frame() {
        let err = RpcError::Protocol {
            call_id: None,
            message: "Invalid protocol".to_string(),
            raw: Bytes::from(vec![0xc0; 1 << 20]),
        };
        let response = RpcHandler::error_response(&err);
        assert_eq!(response, Response::uncorrelated("Invalid protocol"));
    }

    #[test]
    fn test_raw_summary_is_bounded() {
        assert_eq!(raw_summary(&[0x94, 0x00]), "2 raw bytes: [94, 00]");

        let summary = raw_summary(&vec![0xab; 16 * 1024 * 1024]);
        assert!(summary.starts_with("16777216 raw bytes, first 64: [ab, "));
        assert_eq!(summary.matches("ab").count(), LOGGED_RAW_PREFIX);
        assert!(summary.len() < 512);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "method panicked");
    }
}
