//! packrpc - MessagePack-RPC server
//!
//! Runs a host exposing a few demo methods over TCP.

use packrpc_protocol::Value;
use packrpc_server::{Config, MethodError, MethodTable, Server, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn demo_methods() -> Result<MethodTable, Box<dyn std::error::Error>> {
    let table = MethodTable::new();

    table.register("ping", || Ok::<_, MethodError>("pong"))?;
    table.register("sum", |a: i64, b: i64| {
        a.checked_add(b)
            .ok_or_else(|| MethodError::new("integer overflow"))
    })?;
    table.register_raw("echo", |params| {
        Ok(match params.len() {
            1 => params.into_iter().next().unwrap_or(Value::Nil),
            _ => Value::Array(params),
        })
    })?;
    table.register_async("sleep", |ms: u64| async move {
        if ms > 60_000 {
            return Err(MethodError::new("sleep is capped at 60000 ms"));
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    })?;

    Ok(table)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if PACKRPC_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("PACKRPC_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting packrpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  TCP_NODELAY: {}", config.network.tcp_nodelay);
    tracing::info!(
        "  Encoding: pack={} unpack={} bin_type={}",
        config.codec.pack_encoding,
        config.codec.unpack_encoding,
        config.codec.use_bin_type
    );

    let table = demo_methods()?;
    tracing::info!("  Methods: {}", table.names().join(", "));

    let server = Arc::new(Server::new(ServerConfig::from(&config), table));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
