use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQueryParams {
    session_id: Option<String>,
}

/// `GET /ws?sessionId=<code>` — attach a client to a session's realtime
/// channel.
///
/// A missing `sessionId` is rejected before any state mutation. The session
/// itself is not required to exist yet: the create-session flow connects
/// with a placeholder code, receives the allocated one, and reconnects.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, CoreError> {
    let session_id = params
        .session_id
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            CoreError::Validation("sessionId query parameter is required".to_string())
        })?;

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(state, session_id, socket)))
}

/// Handle a single `WebSocket` connection: register with the relay, attach
/// membership, pump inbound actions, and run the disconnect path on close.
async fn handle_ws_connection(state: AppState, session_id: String, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    state.relay.register(&connection_id, tx);
    if let Err(err) = state
        .dispatcher
        .handle_connect(&connection_id, &session_id)
        .await
    {
        tracing::error!(%connection_id, %session_id, "failed to attach connection: {err}");
        state.relay.unregister(&connection_id);
        return;
    }
    tracing::info!(%connection_id, %session_id, "connection attached");

    // Forward outbound messages from the relay to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Process inbound messages sequentially; actions from one client must
    // not reorder against each other.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                state.dispatcher.dispatch(&connection_id, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup on disconnect
    send_task.abort();
    state.relay.unregister(&connection_id);
    state.dispatcher.handle_disconnect(&connection_id).await;
    tracing::info!(%connection_id, "connection detached");
}
