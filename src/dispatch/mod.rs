//! Action dispatcher: the state machine over inbound client actions.
//!
//! Routing mirrors the wire protocol: `createSession` is special-cased
//! (direct reply, no broadcast — the creator is not yet joined to the new
//! session's connection set); every other successful action concludes with
//! a fresh snapshot broadcast to the session's current members. The
//! snapshot, not the individual mutation, is the unit of consistency
//! clients observe. Errors go to the originating connection only.

use serde_json::Value;

use crate::dto::{ActionEnvelope, ErrorReply, Outbound};
use crate::error::CoreError;
use crate::services::{BroadcastRouter, ConnectionRegistry, SessionEngine};

pub struct ActionDispatcher {
    engine: SessionEngine,
    registry: ConnectionRegistry,
    router: BroadcastRouter,
}

impl ActionDispatcher {
    #[must_use]
    pub const fn new(
        engine: SessionEngine,
        registry: ConnectionRegistry,
        router: BroadcastRouter,
    ) -> Self {
        Self {
            engine,
            registry,
            router,
        }
    }

    /// Route one inbound wire message from `connection_id`. Never returns
    /// an error: every failure becomes an error reply to the origin.
    pub async fn dispatch(&self, connection_id: &str, raw: &str) {
        let envelope: ActionEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reply_error(connection_id, &format!("invalid message: {err}"))
                    .await;
                return;
            }
        };
        tracing::debug!(connection_id, action = %envelope.action, "inbound action");

        if envelope.action == "createSession" {
            match self.engine.create_session().await {
                Ok(session_id) => {
                    // The creator reconnects with this code; until then they
                    // are not in the session's connection set.
                    self.reply(connection_id, &Outbound::SessionCreated { session_id })
                        .await;
                }
                Err(err) => self.reply_error(connection_id, &err.to_string()).await,
            }
            return;
        }

        let session_id = match self.resolve_session(connection_id, &envelope).await {
            Ok(Some(code)) => code,
            Ok(None) => {
                self.reply_error(
                    connection_id,
                    "sessionId not found and is required for this action.",
                )
                .await;
                return;
            }
            Err(err) => {
                self.reply_error(connection_id, &err.to_string()).await;
                return;
            }
        };

        match self.apply_action(&session_id, &envelope).await {
            Ok(()) => {
                if let Err(err) = self.broadcast_snapshot(&session_id).await {
                    tracing::error!(%session_id, "snapshot broadcast failed: {err}");
                    self.reply_error(connection_id, &err.to_string()).await;
                }
            }
            Err(err) => self.reply_error(connection_id, &err.to_string()).await,
        }
    }

    /// Attach a connection to its session at `WebSocket` connect time.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn handle_connect(&self, connection_id: &str, code: &str) -> Result<(), CoreError> {
        self.registry.connect(connection_id, code).await
    }

    /// Relay-level disconnect: membership cleanup, then either full session
    /// teardown (last connection out) or a membership-changed notification
    /// to the remaining members.
    pub async fn handle_disconnect(&self, connection_id: &str) {
        let departure = match self.registry.disconnect(connection_id).await {
            Ok(Some(departure)) => departure,
            Ok(None) => {
                tracing::debug!(connection_id, "no session mapping; nothing to do");
                return;
            }
            Err(err) => {
                tracing::error!(connection_id, "disconnect cleanup failed: {err}");
                return;
            }
        };

        if departure.remaining.is_empty() {
            tracing::info!(session_id = %departure.session_id, "last connection left; tearing down session");
            if let Err(err) = self.engine.delete_session(&departure.session_id).await {
                tracing::error!(session_id = %departure.session_id, "session teardown failed: {err}");
            }
            return;
        }

        match self.engine.game_state(&departure.session_id).await {
            Ok(state) => {
                if let Err(err) = self
                    .router
                    .broadcast(
                        &departure.remaining,
                        &Outbound::UserDisconnected {
                            players: state.players,
                        },
                    )
                    .await
                {
                    tracing::warn!(session_id = %departure.session_id, "departure broadcast failed: {err}");
                }
            }
            Err(err) => {
                tracing::warn!(session_id = %departure.session_id, "could not read players after departure: {err}");
            }
        }
    }

    async fn apply_action(&self, code: &str, envelope: &ActionEnvelope) -> Result<(), CoreError> {
        match envelope.action.as_str() {
            "joinSession" => {
                let fields = envelope.payload.player_data.clone().unwrap_or_default();
                self.engine.join_session(code, fields).await.map(|_| ())
            }
            "updatePlayer" => {
                let fields = envelope.payload.player_data.clone().unwrap_or_default();
                let player_id = fields
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        CoreError::Validation(
                            "playerData.id is required for updatePlayer".to_string(),
                        )
                    })?;
                self.engine.update_player(code, &player_id, fields).await
            }
            "updateDice" => {
                let value = envelope.payload.challenge_dice.ok_or_else(|| {
                    CoreError::Validation("challengeDice is required for updateDice".to_string())
                })?;
                self.engine.update_challenge_dice(code, value).await
            }
            "nextTurn" => self.engine.advance_turn(code).await,
            other => Err(CoreError::Validation(format!("Unknown action: {other}"))),
        }
    }

    /// Session code resolution: explicit payload value first, then the
    /// registry mapping for the originating connection.
    async fn resolve_session(
        &self,
        connection_id: &str,
        envelope: &ActionEnvelope,
    ) -> Result<Option<String>, CoreError> {
        if let Some(code) = &envelope.payload.session_id {
            return Ok(Some(code.clone()));
        }
        self.registry.session_id_for(connection_id).await
    }

    /// Read a fresh snapshot and fan it out to the session's members.
    async fn broadcast_snapshot(&self, code: &str) -> Result<(), CoreError> {
        let game_state = self.engine.game_state(code).await?;
        let connections = game_state.connections.clone();
        self.router
            .broadcast(&connections, &Outbound::GameStateUpdate { game_state })
            .await
            .map(|_| ())
    }

    async fn reply(&self, connection_id: &str, message: &Outbound) {
        if let Err(err) = self.router.send_to(connection_id, message).await {
            tracing::warn!(connection_id, "reply failed: {err}");
        }
    }

    async fn reply_error(&self, connection_id: &str, error: &str) {
        let reply = ErrorReply {
            error: error.to_string(),
        };
        if let Err(err) = self.router.send_to(connection_id, &reply).await {
            tracing::warn!(connection_id, "error reply failed: {err}");
        }
    }
}
