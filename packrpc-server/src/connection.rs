//! Per-connection protocol loop.

use crate::error::ServerError;
use crate::handler::RpcHandler;
use crate::server::ServerStats;
use bytes::Bytes;
use packrpc_protocol::{CodecConfig, Decoder, Encoder, Frame, Response, MAX_CHUNK_SIZE};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Drives one connection until the peer closes it.
///
/// Calls are processed strictly one at a time: a frame is validated,
/// dispatched and answered before the next frame is decoded or more bytes
/// are read.
pub struct Connection<S> {
    stream: S,
    peer: String,
    handler: Arc<RpcHandler>,
    decoder: Decoder,
    encoder: Encoder,
    chunk_size: usize,
    stats: Option<Arc<ServerStats>>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, handler: Arc<RpcHandler>, codec: &CodecConfig) -> Self {
        Self {
            stream,
            peer: "-".to_string(),
            handler,
            decoder: Decoder::with_encoding(codec.unpack_encoding),
            encoder: Encoder::new(codec.clone()),
            chunk_size: MAX_CHUNK_SIZE,
            stats: None,
        }
    }

    /// Sets the label used in log lines.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    /// Sets the read size, clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn with_stats(mut self, stats: Arc<ServerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Runs the loop.
    ///
    /// Returns `Ok(())` when the peer closes the stream. Read and write
    /// failures, undecodable bytes and oversized frames end the connection
    /// with an error.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = match self.stream.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("[{}] Connection closed by client", self.peer);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("[{}] Read error: {}", self.peer, e);
                    return Err(ServerError::Io(e));
                }
            };
            tracing::debug!("[{}] Received {} bytes", self.peer, n);
            self.decoder.extend(&buf[..n]);

            loop {
                let frame = match self.decoder.decode_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("[{}] Unreadable stream: {}", self.peer, e);
                        return Err(ServerError::Protocol(e));
                    }
                };
                self.process(frame).await?;
            }
        }
    }

    async fn process(&mut self, frame: Frame) -> Result<(), ServerError> {
        let response = self.handler.handle(frame).await;

        if let Some(stats) = &self.stats {
            stats.requests_total.fetch_add(1, Ordering::Relaxed);
            if response.is_error() {
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
        }

        let bytes = self.encode(&response)?;
        tracing::debug!("[{}] Sending {} bytes", self.peer, bytes.len());
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Encodes a reply, falling back to an error reply when the result
    /// cannot be represented with the configured options.
    fn encode(&self, response: &Response) -> Result<Bytes, ServerError> {
        match self.encoder.encode_response(response) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::warn!(
                    "[{}] Failed to encode reply {}: {}",
                    self.peer,
                    response.call_id,
                    e
                );
                let message = format!(
                    "Failed to encode response: {}",
                    e.to_string().escape_default()
                );
                let fallback = Response::failure(response.call_id, message);
                Ok(self.encoder.encode_response(&fallback)?)
            }
        }
    }
}
