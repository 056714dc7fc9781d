mod health;
mod ws;

use axum::Router;

use crate::state::AppState;

/// Build the complete application router.
///
/// Structure:
/// - `GET /health` — lightweight health check
/// - `GET /ws` — `WebSocket` entrypoint for all session traffic
pub fn router() -> Router<AppState> {
    Router::new().merge(health::router()).merge(ws::router())
}
