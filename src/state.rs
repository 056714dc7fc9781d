use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::ActionDispatcher;
use crate::relay::WsRelay;

/// Shared application state available to all request handlers via Axum's
/// `State` extractor. The store and relay clients are constructed once at
/// process start and injected here; no component holds ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub relay: WsRelay,
    pub dispatcher: Arc<ActionDispatcher>,
}
