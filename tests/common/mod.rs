use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use rollcall_api::dispatch::ActionDispatcher;
use rollcall_api::relay::{ConnectionRelay, RelayError};
use rollcall_api::services::{BroadcastRouter, ConnectionRegistry, SessionEngine};
use rollcall_api::store::StateStore;
use rollcall_api::store::memory::MemoryStore;

/// Relay test double: records every delivery and can simulate stale
/// connections that fail delivery.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    delivered: Mutex<Vec<(String, String)>>,
    stale: Mutex<HashSet<String>>,
}

impl RecordingRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make future deliveries to `connection_id` fail with `ConnectionGone`.
    pub fn mark_stale(&self, connection_id: &str) {
        if let Ok(mut stale) = self.stale.lock() {
            stale.insert(connection_id.to_string());
        }
    }

    /// Every payload delivered to `connection_id`, in order.
    pub fn messages_for(&self, connection_id: &str) -> Vec<serde_json::Value> {
        self.delivered
            .lock()
            .map(|delivered| {
                delivered
                    .iter()
                    .filter(|(id, _)| id == connection_id)
                    .map(|(_, payload)| {
                        serde_json::from_str(payload).unwrap_or(serde_json::Value::Null)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of deliveries across all connections.
    pub fn delivery_count(&self) -> usize {
        self.delivered.lock().map(|d| d.len()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ConnectionRelay for RecordingRelay {
    async fn deliver(&self, connection_id: &str, payload: &str) -> Result<(), RelayError> {
        let is_stale = self
            .stale
            .lock()
            .map(|stale| stale.contains(connection_id))
            .unwrap_or_default();
        if is_stale {
            return Err(RelayError::ConnectionGone(connection_id.to_string()));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((connection_id.to_string(), payload.to_string()));
        }
        Ok(())
    }
}

/// Fully wired core over a fresh in-memory store and a recording relay.
pub struct Harness {
    pub engine: SessionEngine,
    pub registry: ConnectionRegistry,
    pub relay: Arc<RecordingRelay>,
    pub dispatcher: ActionDispatcher,
}

pub fn harness() -> Harness {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let relay = RecordingRelay::new();

    let engine = SessionEngine::new(Arc::clone(&store));
    let registry = ConnectionRegistry::new(Arc::clone(&store));
    let router = BroadcastRouter::new(Arc::clone(&relay) as Arc<dyn ConnectionRelay>);
    let dispatcher = ActionDispatcher::new(engine.clone(), registry.clone(), router);

    Harness {
        engine,
        registry,
        relay,
        dispatcher,
    }
}

/// Test helper: send a GET request to the app and return (status, body).
pub async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap_or_default();

    let response = app.clone().oneshot(request).await.unwrap_or_default();

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default();
    let body_str = String::from_utf8(body.to_vec()).unwrap_or_default();

    (status, body_str)
}
