//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use packrpc_protocol::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// High-level client for packrpc.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Calls `method` and returns its result.
    ///
    /// An error reply becomes [`ClientError::Remote`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let response = self.conn.call(method, params).await?;
        match response.error {
            Some(message) => Err(ClientError::Remote(message)),
            None => Ok(response.result),
        }
    }

    /// Calls `method` with serde-encoded arguments.
    ///
    /// `args` is usually a tuple, which becomes the positional parameter
    /// list; `()` sends no parameters and any other value is sent as the
    /// only parameter.
    pub async fn call_typed<A, R>(&self, method: &str, args: A) -> Result<R, ClientError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let params = match rmpv::ext::to_value(args)? {
            Value::Array(items) => items,
            Value::Nil => Vec::new(),
            other => vec![other],
        };
        let result = self.call(method, params).await?;
        Ok(rmpv::ext::from_value(result)?)
    }

    /// Calls the host's `ping` method, if it has one.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call("ping", Vec::new()).await?;
        Ok(())
    }
}
