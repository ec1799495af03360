//! # packrpc-server
//!
//! MessagePack-RPC server.
//!
//! This crate provides:
//! - Method registration with typed, async and raw adapters
//! - A caching method registry in front of any method source
//! - Call validation, dispatch and reply construction
//! - The per-connection protocol loop over any async byte stream
//! - A TCP server running one loop per accepted connection
//! - YAML and environment configuration

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig};
pub use connection::Connection;
pub use error::{MethodError, RpcError, ServerError};
pub use handler::RpcHandler;
pub use registry::{AsyncHandler, Handler, Method, MethodRegistry, MethodTable, Service};
pub use server::{Server, ServerConfig, ServerStats};
