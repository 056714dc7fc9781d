//! End-to-end `WebSocket` tests: a real server, real client sockets, the
//! full create → join → update → turn → disconnect lifecycle.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use rollcall_api::config::{Config, Environment};
use rollcall_api::dispatch::ActionDispatcher;
use rollcall_api::relay::WsRelay;
use rollcall_api::services::{BroadcastRouter, ConnectionRegistry, SessionEngine};
use rollcall_api::state::AppState;
use rollcall_api::store::StateStore;
use rollcall_api::store::memory::MemoryStore;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spin up the full app on an ephemeral port; returns the ws base url.
async fn spawn_app() -> String {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let relay = WsRelay::new();
    let engine = SessionEngine::new(Arc::clone(&store));
    let registry = ConnectionRegistry::new(Arc::clone(&store));
    let router = BroadcastRouter::new(Arc::new(relay.clone()));
    let dispatcher = Arc::new(ActionDispatcher::new(engine, registry, router));

    let state = AppState {
        config: Config {
            database_url: String::new(),
            server_host: IpAddr::from([127, 0, 0, 1]),
            server_port: 0,
            environment: Environment::Development,
            log_level: "warn".to_string(),
            frontend_url: "http://localhost:3001".to_string(),
        },
        relay,
        dispatcher,
    };
    let app = rollcall_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{addr}")
}

async fn connect(base: &str, session_id: &str) -> WsClient {
    let (ws, _) = connect_async(format!("{base}/ws?sessionId={session_id}"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut WsClient, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn connect_without_session_id_is_rejected() {
    let base = spawn_app().await;
    assert!(connect_async(format!("{base}/ws")).await.is_err());
}

#[tokio::test]
async fn full_session_lifecycle_over_websocket() {
    let base = spawn_app().await;

    // Bootstrap: connect with a placeholder code, create the real session.
    let mut creator = connect(&base, "000000").await;
    send(&mut creator, &json!({"action": "createSession"})).await;
    let created = recv_json(&mut creator).await;
    assert_eq!(created["action"], "sessionCreated");
    let code = created["sessionId"].as_str().unwrap().to_string();
    creator.close(None).await.unwrap();

    // First player joins on a fresh connection bound to the new code.
    let mut alice = connect(&base, &code).await;
    send(
        &mut alice,
        &json!({"action": "joinSession", "payload": {"playerData": {"name": "Alice"}}}),
    )
    .await;
    let update = recv_json(&mut alice).await;
    assert_eq!(update["action"], "gameStateUpdate");
    assert_eq!(update["gameState"]["sessionId"], code.as_str());
    assert_eq!(update["gameState"]["players"][0]["name"], "Alice");

    // Second client attaches. The unknown-action round trip guarantees its
    // membership write has landed before we depend on fan-out reaching it.
    let mut bob = connect(&base, &code).await;
    send(&mut bob, &json!({"action": "sync"})).await;
    let err = recv_json(&mut bob).await;
    assert_eq!(err["error"], "Unknown action: sync");

    // A dice update fans out to every member.
    send(
        &mut alice,
        &json!({"action": "updateDice", "payload": {"challengeDice": 4}}),
    )
    .await;
    let for_alice = recv_json(&mut alice).await;
    let for_bob = recv_json(&mut bob).await;
    assert_eq!(for_alice["gameState"]["challengeDice"], 4);
    assert_eq!(for_bob["gameState"]["challengeDice"], 4);

    // Turn rotation: exactly one player ends up current.
    send(&mut alice, &json!({"action": "nextTurn"})).await;
    let turn_state = recv_json(&mut bob).await;
    let players = turn_state["gameState"]["players"].as_array().unwrap();
    assert_eq!(
        players.iter().filter(|p| p["turn"] == json!(true)).count(),
        1
    );
    let _ = recv_json(&mut alice).await;

    // Bob leaves; the remaining member is notified.
    bob.close(None).await.unwrap();
    let departure = recv_json(&mut alice).await;
    assert_eq!(departure["action"], "userDisconnected");
    assert_eq!(departure["players"].as_array().unwrap().len(), 1);
}
