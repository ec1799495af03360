//! # packrpc-client
//!
//! Client library for packrpc.
//!
//! This crate provides:
//! - Async TCP connection with connect and request timeouts
//! - Sequential calls matching the server's one-call-at-a-time model
//! - Typed calls using serde for arguments and results

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
