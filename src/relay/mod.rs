//! Connection relay for `WebSocket` message delivery.
//!
//! The relay is the directed delivery channel the broadcast router fans out
//! through: opaque connection identifier in, payload out. Session
//! membership is NOT tracked here — it lives in the state store — so the
//! relay stays a flat map from connection id to the socket's sender half.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// A message destined for a specific `WebSocket` client.
pub type WsTx = mpsc::UnboundedSender<String>;

/// Delivery failure for one recipient.
#[derive(Debug)]
pub enum RelayError {
    /// The connection is unknown or its socket has closed.
    ConnectionGone(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionGone(id) => write!(f, "connection {id} is gone"),
        }
    }
}

impl std::error::Error for RelayError {}

/// Directed message delivery keyed by opaque connection identifiers.
#[async_trait]
pub trait ConnectionRelay: Send + Sync {
    /// Deliver `payload` to one connection. At-most-once, no retry.
    async fn deliver(&self, connection_id: &str, payload: &str) -> Result<(), RelayError>;
}

/// In-process relay over the live `WebSocket` sender channels.
#[derive(Debug, Clone, Default)]
pub struct WsRelay {
    connections: Arc<DashMap<String, WsTx>>,
}

impl WsRelay {
    /// Create a new empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's sender channel. Rebinding an id replaces the
    /// previous sender (last write wins).
    pub fn register(&self, connection_id: &str, tx: WsTx) {
        self.connections.insert(connection_id.to_string(), tx);
    }

    /// Unregister a connection. Unknown ids are ignored.
    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    /// Check if a connection is currently registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }
}

#[async_trait]
impl ConnectionRelay for WsRelay {
    async fn deliver(&self, connection_id: &str, payload: &str) -> Result<(), RelayError> {
        let Some(tx) = self.connections.get(connection_id) else {
            return Err(RelayError::ConnectionGone(connection_id.to_string()));
        };
        tx.send(payload.to_string())
            .map_err(|_| RelayError::ConnectionGone(connection_id.to_string()))
    }
}
