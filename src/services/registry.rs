//! Connection registry: connection-to-session membership over the store.
//!
//! Two records per live connection: the `CONN#` mapping (for lookup when an
//! inbound action carries no session code, and on disconnect) and the
//! connection id inside the session meta's `connections` set (for fan-out).
//! Both sides of each membership change go through one store transaction so
//! the mapping and the set never disagree.

use std::sync::Arc;

use serde_json::Value;

use crate::error::CoreError;
use crate::services::engine::FIELD_CONNECTIONS;
use crate::store::{Attrs, ItemKey, StateStore, WriteOp, string_set};

/// Field name on connection mapping records.
const FIELD_SESSION_ID: &str = "sessionId";

/// Outcome of a disconnect that found a mapping.
#[derive(Debug, Clone)]
pub struct Departure {
    pub session_id: String,
    /// The session's connection set after removal.
    pub remaining: Vec<String>,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn StateStore>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Attach a connection to a session: write the mapping record and add
    /// the id to the session's connection set, atomically.
    ///
    /// The set-add no-ops when the session meta is absent — connecting
    /// ahead of `createSession` (the bootstrap flow) records only the
    /// mapping and never materializes a partial session.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn connect(&self, connection_id: &str, code: &str) -> Result<(), CoreError> {
        let mut mapping = Attrs::new();
        mapping.insert(
            FIELD_SESSION_ID.to_string(),
            Value::String(code.to_string()),
        );

        self.store
            .transact(vec![
                WriteOp::Put {
                    key: ItemKey::connection(connection_id),
                    attrs: mapping,
                },
                WriteOp::SetAdd {
                    key: ItemKey::session_meta(code),
                    field: FIELD_CONNECTIONS.to_string(),
                    member: connection_id.to_string(),
                },
            ])
            .await?;
        Ok(())
    }

    /// Detach a connection. No mapping means nothing to do (`Ok(None)`),
    /// not an error. Otherwise the mapping delete and the set removal are
    /// one transaction; removal from a set the id never made it into is a
    /// no-op. Returns the post-removal connection set.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn disconnect(&self, connection_id: &str) -> Result<Option<Departure>, CoreError> {
        let Some(code) = self.session_id_for(connection_id).await? else {
            return Ok(None);
        };
        let meta_key = ItemKey::session_meta(&code);

        self.store
            .transact(vec![
                WriteOp::Delete {
                    key: ItemKey::connection(connection_id),
                },
                WriteOp::SetRemove {
                    key: meta_key.clone(),
                    field: FIELD_CONNECTIONS.to_string(),
                    member: connection_id.to_string(),
                },
            ])
            .await?;

        let remaining = match self.store.get(&meta_key).await? {
            Some(meta) => string_set(&meta.attrs, FIELD_CONNECTIONS),
            None => Vec::new(),
        };
        Ok(Some(Departure {
            session_id: code,
            remaining,
        }))
    }

    /// Which session, if any, a connection is attached to.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn session_id_for(&self, connection_id: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .store
            .get(&ItemKey::connection(connection_id))
            .await?
            .and_then(|item| {
                item.attrs
                    .get(FIELD_SESSION_ID)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }))
    }
}
