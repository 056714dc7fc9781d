//! Session engine: the business operations over session and player state.
//!
//! Every operation reads and writes the store directly; nothing is cached
//! across calls. Multi-item invariants (exactly one current player) are
//! protected by the store's transactional batch, not by in-process locks.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::dto::{GameState, normalize_attrs};
use crate::error::CoreError;
use crate::store::{
    Attrs, Item, ItemKey, StateStore, WriteOp, int_field, session_pk, string_set,
};
use crate::utils::draw_session_code;

/// Field names on session meta records.
pub const FIELD_CHALLENGE_DICE: &str = "challengeDice";
pub const FIELD_CONNECTIONS: &str = "connections";
pub const FIELD_PLAYER_SEQ: &str = "playerSeq";

/// Field names on player records.
pub const FIELD_ID: &str = "id";
pub const FIELD_JOIN_SEQUENCE: &str = "joinSequence";
pub const FIELD_TURN: &str = "turn";

/// Allocation attempts before the code space is declared saturated.
const MAX_CODE_ATTEMPTS: usize = 20;

#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn StateStore>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Allocate a fresh session code and create its meta record.
    ///
    /// The conditional put IS the uniqueness gate: a candidate code whose
    /// meta record already exists writes nothing and the next candidate is
    /// drawn, so allocation is one atomic attempt per draw rather than a
    /// racy check-then-act pair.
    ///
    /// # Errors
    ///
    /// `CapacityExhausted` after `MAX_CODE_ATTEMPTS` collisions;
    /// `StoreUnavailable` if the store fails.
    pub async fn create_session(&self) -> Result<String, CoreError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = draw_session_code();
            let mut meta = Attrs::new();
            meta.insert(FIELD_CHALLENGE_DICE.to_string(), Value::from(0));
            meta.insert(FIELD_CONNECTIONS.to_string(), Value::Array(Vec::new()));
            meta.insert(FIELD_PLAYER_SEQ.to_string(), Value::from(0));

            if self
                .store
                .put_if_absent(ItemKey::session_meta(&code), meta)
                .await?
            {
                tracing::info!(session_id = %code, "session created");
                return Ok(code);
            }
        }
        Err(CoreError::CapacityExhausted)
    }

    /// Add a player to a session and return the generated player id.
    ///
    /// The session must exist — joining never creates orphan player records
    /// under a dead code. Each join claims the next `joinSequence` value
    /// from the meta record's counter, which is what turn rotation orders
    /// by.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session meta record is absent.
    pub async fn join_session(
        &self,
        code: &str,
        player_fields: Attrs,
    ) -> Result<String, CoreError> {
        let meta_key = ItemKey::session_meta(code);
        if self.store.get(&meta_key).await?.is_none() {
            return Err(CoreError::NotFound(format!("session {code}")));
        }

        let seq = self.store.increment(&meta_key, FIELD_PLAYER_SEQ, 1).await?;
        let player_id = Uuid::new_v4().to_string();

        let mut fields = strip_key_fields(player_fields);
        fields.insert(FIELD_ID.to_string(), Value::String(player_id.clone()));
        fields.insert(FIELD_JOIN_SEQUENCE.to_string(), Value::from(seq));

        self.store
            .put(ItemKey::player(code, &player_id), fields)
            .await?;
        tracing::info!(session_id = %code, player_id = %player_id, "player joined");
        Ok(player_id)
    }

    /// Partial field-level update of one player.
    ///
    /// Key fields are stripped from the input so a caller cannot move the
    /// record. Updating an absent player fails rather than creating one.
    ///
    /// # Errors
    ///
    /// `NotFound` if the player record is absent.
    pub async fn update_player(
        &self,
        code: &str,
        player_id: &str,
        fields: Attrs,
    ) -> Result<(), CoreError> {
        let fields = strip_key_fields(fields);
        let key = ItemKey::player(code, player_id);
        if !self.store.update(&key, fields).await? {
            return Err(CoreError::NotFound(format!(
                "player {player_id} in session {code}"
            )));
        }
        Ok(())
    }

    /// Unconditional set of the session's shared challenge dice value.
    /// Game-specific range validation is the caller's concern.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session meta record is absent.
    pub async fn update_challenge_dice(&self, code: &str, value: u32) -> Result<(), CoreError> {
        let mut fields = Attrs::new();
        fields.insert(FIELD_CHALLENGE_DICE.to_string(), Value::from(value));
        if !self
            .store
            .update(&ItemKey::session_meta(code), fields)
            .await?
        {
            return Err(CoreError::NotFound(format!("session {code}")));
        }
        Ok(())
    }

    /// Rotate the turn to the next player in join order.
    ///
    /// The clear-old and set-new writes go through one store transaction,
    /// so no interleaving observer sees zero or two current players. An
    /// empty player list is a no-op; when nobody is current yet, the first
    /// joiner becomes current.
    ///
    /// # Errors
    ///
    /// `NotFound` if a targeted player vanished mid-rotation (session
    /// teardown race); `StoreUnavailable` on store failure.
    pub async fn advance_turn(&self, code: &str) -> Result<(), CoreError> {
        let players = self.ordered_players(code).await?;
        if players.is_empty() {
            return Ok(());
        }

        let pivot = players
            .iter()
            .position(|p| p.attrs.get(FIELD_TURN) == Some(&Value::Bool(true)));
        let next = pivot.map_or(0, |i| (i + 1) % players.len());

        let mut ops = Vec::with_capacity(2);
        if let Some(pivot) = pivot
            && pivot != next
        {
            ops.push(WriteOp::Update {
                key: players[pivot].key.clone(),
                fields: turn_fields(false),
            });
        }
        ops.push(WriteOp::Update {
            key: players[next].key.clone(),
            fields: turn_fields(true),
        });

        self.store.transact(ops).await?;
        Ok(())
    }

    /// Assemble the full session snapshot: meta plus all players, ordered
    /// by join sequence, with boundary normalization applied. Read fresh on
    /// every call.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session meta record is absent.
    pub async fn game_state(&self, code: &str) -> Result<GameState, CoreError> {
        let items = self.store.query_partition(&session_pk(code)).await?;

        let mut meta: Option<Attrs> = None;
        let mut players: Vec<Item> = Vec::new();
        for item in items {
            if item.is_meta() {
                meta = Some(item.attrs);
            } else if item.is_player() {
                players.push(item);
            }
        }

        let Some(meta) = meta else {
            return Err(CoreError::NotFound(format!("session {code}")));
        };
        sort_players(&mut players);

        Ok(GameState {
            session_id: code.to_string(),
            challenge_dice: int_field(&meta, FIELD_CHALLENGE_DICE).unwrap_or(0),
            players: players
                .into_iter()
                .map(|p| normalize_attrs(p.attrs))
                .collect(),
            connections: string_set(&meta, FIELD_CONNECTIONS),
        })
    }

    /// Full session teardown: meta and every player record. Not reversible.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn delete_session(&self, code: &str) -> Result<(), CoreError> {
        self.store.delete_partition(&session_pk(code)).await?;
        tracing::info!(session_id = %code, "session deleted");
        Ok(())
    }

    async fn ordered_players(&self, code: &str) -> Result<Vec<Item>, CoreError> {
        let mut players: Vec<Item> = self
            .store
            .query_partition(&session_pk(code))
            .await?
            .into_iter()
            .filter(Item::is_player)
            .collect();
        sort_players(&mut players);
        Ok(players)
    }
}

/// Join order: ascending `joinSequence`, sort key as the tiebreak (and the
/// full order for records written before the sequence field existed).
fn sort_players(players: &mut [Item]) {
    players.sort_by(|a, b| {
        let seq_a = int_field(&a.attrs, FIELD_JOIN_SEQUENCE).unwrap_or(i64::MAX);
        let seq_b = int_field(&b.attrs, FIELD_JOIN_SEQUENCE).unwrap_or(i64::MAX);
        seq_a.cmp(&seq_b).then_with(|| a.key.sk.cmp(&b.key.sk))
    });
}

/// Drop the store addressing fields a client must not control.
fn strip_key_fields(mut fields: Attrs) -> Attrs {
    fields.remove("PK");
    fields.remove("SK");
    fields
}

fn turn_fields(current: bool) -> Attrs {
    let mut fields = Attrs::new();
    fields.insert(FIELD_TURN.to_string(), Value::Bool(current));
    fields
}
