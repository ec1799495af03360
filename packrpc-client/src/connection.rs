//! Connection management.

use crate::error::ClientError;
use packrpc_protocol::{CallId, CodecConfig, Decoder, Encoder, Request, Response, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
    /// Encode/decode options, which must match the server's.
    pub codec: CodecConfig,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            nodelay: true,
            codec: CodecConfig::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }
}

struct Session {
    stream: TcpStream,
    decoder: Decoder,
}

/// A connection to a packrpc server.
///
/// Calls are sent one at a time; a call holds the connection until its
/// reply arrives.
pub struct Connection {
    config: ConnectionConfig,
    encoder: Encoder,
    session: Mutex<Option<Session>>,
    next_id: AtomicU32,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            encoder: Encoder::new(config.codec.clone()),
            config,
            session: Mutex::new(None),
            next_id: AtomicU32::new(1),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        if self.config.nodelay {
            stream.set_nodelay(true).ok();
        }

        *self.session.lock().await = Some(Session {
            stream,
            decoder: Decoder::with_encoding(self.config.codec.unpack_encoding),
        });
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Connected to {}", self.config.addr);
        Ok(())
    }

    /// Sends a call and waits for its reply.
    ///
    /// An error reply is returned as a [`Response`]; only transport and
    /// framing problems are errors here.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Response, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(u64::from(id), method).with_params(params);
        let encoded = self.encoder.encode_request(&request)?;

        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ClientError::NotConnected)?;

        tracing::debug!(
            "Sending call id={} method={} ({} bytes)",
            id,
            method,
            encoded.len()
        );
        let result = tokio::time::timeout(
            self.config.request_timeout,
            Self::exchange(session, &encoded, self.config.read_buffer_size),
        )
        .await;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.drop_session(&mut guard);
                return Err(e);
            }
            Err(_) => {
                tracing::debug!("Call id={} timed out", id);
                // A late reply would otherwise be read as the next call's
                self.drop_session(&mut guard);
                return Err(ClientError::Timeout);
            }
        };

        if response.call_id != CallId::Id(u64::from(id)) {
            self.drop_session(&mut guard);
            return Err(ClientError::UnexpectedCallId {
                expected: id,
                got: response.call_id,
            });
        }

        tracing::debug!("Call id={} got reply (ok={})", id, response.is_ok());
        Ok(response)
    }

    async fn exchange(
        session: &mut Session,
        encoded: &[u8],
        buffer_size: usize,
    ) -> Result<Response, ClientError> {
        session.stream.write_all(encoded).await?;

        let mut buf = vec![0u8; buffer_size];
        loop {
            if let Some(response) = session.decoder.decode_response()? {
                return Ok(response);
            }

            let n = session.stream.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!("Connection closed by server");
                return Err(ClientError::ConnectionClosed);
            }
            session.decoder.extend(&buf[..n]);
        }
    }

    fn drop_session(&self, guard: &mut Option<Session>) {
        self.connected.store(false, Ordering::SeqCst);
        guard.take();
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut session) = self.session.lock().await.take() {
            let _ = session.stream.shutdown().await;
        }
        Ok(())
    }
}
