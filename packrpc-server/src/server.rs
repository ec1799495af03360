//! TCP server implementation.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::handler::RpcHandler;
use crate::registry::Service;
use packrpc_protocol::{CodecConfig, MAX_CHUNK_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Disable Nagle's algorithm on accepted sockets.
    pub tcp_nodelay: bool,
    /// Maximum bytes read from a socket at once.
    pub read_chunk_size: usize,
    /// Encode/decode options for every connection.
    pub codec: CodecConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], packrpc_protocol::DEFAULT_PORT)),
            tcp_nodelay: false,
            read_chunk_size: MAX_CHUNK_SIZE,
            codec: CodecConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            tcp_nodelay: config.network.tcp_nodelay,
            read_chunk_size: config.network.read_chunk_size,
            codec: config.codec.clone(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for packrpc.
pub struct Server {
    config: ServerConfig,
    handler: Arc<RpcHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    running: AtomicBool,
}

impl Server {
    /// Creates a server exposing the methods of `service`.
    pub fn new(config: ServerConfig, service: impl Service) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(RpcHandler::new(service)),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            shutting_down: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<RpcHandler> {
        &self.handler
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops accepting and closes live connections.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let local_addr = listener.local_addr()?;
        tracing::info!(
            "Server listening on {} (nodelay={})",
            local_addr,
            self.config.tcp_nodelay
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => self.spawn_connection(tcp_stream, addr),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_connection(&self, tcp_stream: TcpStream, addr: SocketAddr) {
        if self.config.tcp_nodelay {
            if let Err(e) = tcp_stream.set_nodelay(true) {
                tracing::warn!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
            }
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let conn_id = Uuid::new_v4();
        let conn = Connection::new(tcp_stream, self.handler.clone(), &self.config.codec)
            .with_peer(format!("{} {}", addr, conn_id))
            .with_chunk_size(self.config.read_chunk_size)
            .with_stats(self.stats.clone());
        let stats = self.stats.clone();
        let mut conn_shutdown = self.shutdown.subscribe();

        tracing::info!("Client connected: {} ({})", addr, conn_id);

        tokio::spawn(async move {
            let result = tokio::select! {
                result = conn.run() => result,
                _ = conn_shutdown.recv() => Err(ServerError::ShuttingDown),
            };

            match result {
                Ok(()) => {}
                Err(ServerError::ShuttingDown) => {
                    tracing::debug!("[{}] Closed by server shutdown", addr);
                }
                Err(e) => {
                    tracing::debug!("Connection {} error: {}", addr, e);
                }
            }

            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {} ({})", addr, conn_id);
        });
    }
}
