//! Wire-format types for the `WebSocket` protocol.
//!
//! Inbound: one envelope shape, `{action, payload}`. Outbound: the snapshot
//! broadcast and the few direct replies. Everything crossing this boundary
//! is normalized first: store numerics become plain integers/floats and
//! set-typed fields become ordered lists.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Attrs;

/// Inbound client action: `{action: string, payload: {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEnvelope {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: ActionPayload,
}

/// Payload of an inbound action; all fields optional, validated per action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub player_data: Option<Attrs>,
    /// Non-negative by construction; a negative wire value fails the parse.
    #[serde(default)]
    pub challenge_dice: Option<u32>,
}

/// Full assembled session view, the unit of consistency clients observe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub session_id: String,
    pub challenge_dice: i64,
    pub players: Vec<Attrs>,
    pub connections: Vec<String>,
}

/// Outbound messages carrying an `action` discriminator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    SessionCreated { session_id: String },
    #[serde(rename_all = "camelCase")]
    GameStateUpdate { game_state: GameState },
    UserDisconnected { players: Vec<Attrs> },
}

/// Error reply to a single originating connection: `{error: string}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    pub error: String,
}

/// Normalize a store value for client serialization: whole-number floats
/// (the precise-decimal artifacts some backends hand back) collapse to
/// plain integers; containers normalize recursively.
#[must_use]
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::Number(num) => normalize_number(num),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

fn normalize_number(num: serde_json::Number) -> Value {
    let Some(f) = num.as_f64().filter(|_| num.is_f64()) else {
        return Value::Number(num);
    };
    if f.fract() == 0.0 && f.abs() < 9e15 {
        // Inside i64 range, so the cast is exact.
        #[allow(clippy::cast_possible_truncation)]
        return Value::from(f as i64);
    }
    Value::Number(num)
}

/// Normalize every attribute of one record.
#[must_use]
pub fn normalize_attrs(attrs: Attrs) -> Attrs {
    attrs
        .into_iter()
        .map(|(k, v)| (k, normalize_value(v)))
        .collect()
}
