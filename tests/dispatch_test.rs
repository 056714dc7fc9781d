//! Action dispatcher tests: routing, error replies, broadcast fan-out, and
//! the disconnect/teardown path.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use serde_json::{Value, json};

use rollcall_api::error::CoreError;

#[tokio::test]
async fn create_session_replies_to_caller_only() {
    let h = common::harness();

    h.dispatcher
        .dispatch("c1", r#"{"action":"createSession"}"#)
        .await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["action"], "sessionCreated");
    let code = messages[0]["sessionId"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    // Direct reply, no broadcast.
    assert_eq!(h.relay.delivery_count(), 1);
}

#[tokio::test]
async fn unresolvable_session_yields_error_reply_only() {
    let h = common::harness();

    h.dispatcher.dispatch("c1", r#"{"action":"nextTurn"}"#).await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0]["error"],
        "sessionId not found and is required for this action."
    );
}

#[tokio::test]
async fn unknown_action_replies_error_without_mutation() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();

    h.dispatcher.dispatch("c1", r#"{"action":"dance"}"#).await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["error"], "Unknown action: dance");

    let state = h.engine.game_state(&code).await.unwrap();
    assert!(state.players.is_empty());
}

#[tokio::test]
async fn malformed_json_replies_error() {
    let h = common::harness();

    h.dispatcher.dispatch("c1", "{not json").await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert!(
        messages[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid message")
    );
}

#[tokio::test]
async fn join_broadcasts_snapshot_to_all_members() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();
    h.registry.connect("c2", &code).await.unwrap();

    let raw = json!({
        "action": "joinSession",
        "payload": {"sessionId": code, "playerData": {"name": "Ada"}}
    });
    h.dispatcher.dispatch("c1", &raw.to_string()).await;

    for conn in ["c1", "c2"] {
        let messages = h.relay.messages_for(conn);
        assert_eq!(messages.len(), 1, "{conn} missed the snapshot");
        assert_eq!(messages[0]["action"], "gameStateUpdate");
        let players = messages[0]["gameState"]["players"].as_array().unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0]["name"], "Ada");
    }
}

#[tokio::test]
async fn session_code_resolves_from_registry_when_payload_omits_it() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();

    let raw = json!({"action": "updateDice", "payload": {"challengeDice": 5}});
    h.dispatcher.dispatch("c1", &raw.to_string()).await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["gameState"]["challengeDice"], 5);
}

#[tokio::test]
async fn update_player_requires_player_id() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();

    let raw = json!({
        "action": "updatePlayer",
        "payload": {"sessionId": code, "playerData": {"name": "Ada"}}
    });
    h.dispatcher.dispatch("c1", &raw.to_string()).await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["error"], "playerData.id is required for updatePlayer");
}

#[tokio::test]
async fn update_dice_requires_value() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();

    let raw = json!({"action": "updateDice", "payload": {"sessionId": code}});
    h.dispatcher.dispatch("c1", &raw.to_string()).await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["error"], "challengeDice is required for updateDice");
}

#[tokio::test]
async fn stale_recipient_does_not_block_the_rest() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();
    h.registry.connect("stale", &code).await.unwrap();
    h.relay.mark_stale("stale");

    let raw = json!({
        "action": "joinSession",
        "payload": {"sessionId": code, "playerData": {"name": "Ada"}}
    });
    h.dispatcher.dispatch("c1", &raw.to_string()).await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["action"], "gameStateUpdate");
    assert!(h.relay.messages_for("stale").is_empty());
}

#[tokio::test]
async fn next_turn_flow_marks_exactly_one_player() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();
    for name in ["a", "b"] {
        let raw = json!({
            "action": "joinSession",
            "payload": {"sessionId": code, "playerData": {"name": name}}
        });
        h.dispatcher.dispatch("c1", &raw.to_string()).await;
    }

    let raw = json!({"action": "nextTurn", "payload": {"sessionId": code}});
    h.dispatcher.dispatch("c1", &raw.to_string()).await;

    let messages = h.relay.messages_for("c1");
    let last = messages.last().unwrap();
    let players = last["gameState"]["players"].as_array().unwrap();
    let current: Vec<&Value> = players
        .iter()
        .filter(|p| p["turn"] == Value::Bool(true))
        .collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["name"], "a");
}

#[tokio::test]
async fn disconnect_of_last_connection_tears_down_session() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();
    h.engine
        .join_session(&code, serde_json::Map::new())
        .await
        .unwrap();

    h.dispatcher.handle_disconnect("c1").await;

    assert!(matches!(
        h.engine.game_state(&code).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(h.registry.session_id_for("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_notifies_remaining_members() {
    let h = common::harness();
    let code = h.engine.create_session().await.unwrap();
    h.registry.connect("c1", &code).await.unwrap();
    h.registry.connect("c2", &code).await.unwrap();
    h.engine
        .join_session(&code, serde_json::Map::new())
        .await
        .unwrap();

    h.dispatcher.handle_disconnect("c2").await;

    let messages = h.relay.messages_for("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["action"], "userDisconnected");
    assert_eq!(messages[0]["players"].as_array().unwrap().len(), 1);

    // The session survives with c1 still attached.
    let state = h.engine.game_state(&code).await.unwrap();
    assert_eq!(state.connections, vec!["c1"]);
}

#[tokio::test]
async fn disconnect_without_mapping_is_a_noop() {
    let h = common::harness();

    h.dispatcher.handle_disconnect("ghost").await;

    assert_eq!(h.relay.delivery_count(), 0);
}
