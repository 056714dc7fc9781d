//! Broadcast router: fan one payload out to a session's connection set.
//!
//! Best-effort, at-most-once per recipient per call. The payload is
//! serialized once; each delivery is independent, so one stale connection
//! never blocks the rest.

use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreError;
use crate::relay::ConnectionRelay;

#[derive(Clone)]
pub struct BroadcastRouter {
    relay: Arc<dyn ConnectionRelay>,
}

impl BroadcastRouter {
    #[must_use]
    pub fn new(relay: Arc<dyn ConnectionRelay>) -> Self {
        Self { relay }
    }

    /// Deliver `message` to every connection in the set. Per-recipient
    /// failures are logged and skipped. Returns the number delivered.
    ///
    /// # Errors
    ///
    /// `Delivery` only when the message itself cannot be serialized; a
    /// failed recipient is never an error.
    pub async fn broadcast<T: Serialize + Sync>(
        &self,
        connection_ids: &[String],
        message: &T,
    ) -> Result<usize, CoreError> {
        let payload =
            serde_json::to_string(message).map_err(|err| CoreError::Delivery(err.to_string()))?;

        let mut delivered = 0;
        for connection_id in connection_ids {
            match self.relay.deliver(connection_id, &payload).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(%connection_id, "skipping undeliverable recipient: {err}");
                }
            }
        }
        Ok(delivered)
    }

    /// Deliver `message` to one connection.
    ///
    /// # Errors
    ///
    /// `Delivery` if serialization or the single delivery fails.
    pub async fn send_to<T: Serialize + Sync>(
        &self,
        connection_id: &str,
        message: &T,
    ) -> Result<(), CoreError> {
        let payload =
            serde_json::to_string(message).map_err(|err| CoreError::Delivery(err.to_string()))?;
        self.relay
            .deliver(connection_id, &payload)
            .await
            .map_err(|err| CoreError::Delivery(err.to_string()))
    }
}
