//! State store adapter.
//!
//! All persisted state lives in one flat collection of items addressed by a
//! (partition key, sort key) pair, with free-form JSON attributes. The
//! adapter is the sole mutator of persisted records: the session engine and
//! connection registry never cache state across calls, so the store is the
//! single source of truth.
//!
//! Two implementations: [`sql::SqlStore`] (SeaORM, production) and
//! [`memory::MemoryStore`] (tests, single-process development).

pub mod memory;
pub mod sql;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

/// Free-form attributes of one stored item.
pub type Attrs = serde_json::Map<String, Value>;

/// Sort key of a session's meta record.
pub const META_SK: &str = "META";
/// Sort-key prefix of player records within a session partition.
pub const PLAYER_SK_PREFIX: &str = "PLAYER#";
/// Sort key of a connection's session mapping record.
pub const CONNECTION_SK: &str = "SESSION";

/// Build the partition key for a session code.
#[must_use]
pub fn session_pk(code: &str) -> String {
    format!("SESSION#{code}")
}

/// Two-part address of one stored item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    /// Key of a session's meta record.
    #[must_use]
    pub fn session_meta(code: &str) -> Self {
        Self {
            pk: session_pk(code),
            sk: META_SK.to_string(),
        }
    }

    /// Key of one player record within a session.
    #[must_use]
    pub fn player(code: &str, player_id: &str) -> Self {
        Self {
            pk: session_pk(code),
            sk: format!("{PLAYER_SK_PREFIX}{player_id}"),
        }
    }

    /// Key of a connection's session mapping record.
    #[must_use]
    pub fn connection(connection_id: &str) -> Self {
        Self {
            pk: format!("CONN#{connection_id}"),
            sk: CONNECTION_SK.to_string(),
        }
    }
}

/// One stored item: its address plus its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    pub attrs: Attrs,
}

impl Item {
    /// Whether this item is a session meta record.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.key.sk == META_SK
    }

    /// Whether this item is a player record.
    #[must_use]
    pub fn is_player(&self) -> bool {
        self.key.sk.starts_with(PLAYER_SK_PREFIX)
    }
}

/// Store-level failures, translated into `CoreError` at component seams.
#[derive(Debug)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    Unavailable(String),
    /// A transaction was canceled because a targeted item was missing.
    Conflict(String),
    /// A persisted item could not be decoded (non-object attributes).
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Conflict(msg) => write!(f, "transaction canceled: {msg}"),
            Self::Corrupt(msg) => write!(f, "corrupt item: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// One write in a multi-item transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Unconditional put, replacing any existing item.
    Put { key: ItemKey, attrs: Attrs },
    /// Field-level merge into an existing item; cancels the transaction if
    /// the item is absent.
    Update { key: ItemKey, fields: Attrs },
    /// Unconditional delete; deleting an absent item is a no-op.
    Delete { key: ItemKey },
    /// Add a member to a string-set field of an existing item. Absent item:
    /// no-op (a set-add must never materialize a partial record).
    SetAdd {
        key: ItemKey,
        field: String,
        member: String,
    },
    /// Remove a member from a string-set field. Absent item or absent
    /// member: no-op, not an error.
    SetRemove {
        key: ItemKey,
        field: String,
        member: String,
    },
}

/// The external key-value store, reduced to the operations the session core
/// needs. Per-item operations are atomic; `transact` applies a small batch
/// of writes all-or-nothing.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Point lookup.
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Unconditional put, replacing any existing item.
    async fn put(&self, key: ItemKey, attrs: Attrs) -> Result<(), StoreError>;

    /// Create-if-absent. Returns `false` (and writes nothing) when an item
    /// already exists under the key. This is the uniqueness gate for
    /// session code allocation.
    async fn put_if_absent(&self, key: ItemKey, attrs: Attrs) -> Result<bool, StoreError>;

    /// Field-level merge into an existing item. Returns `false` (and writes
    /// nothing) when the item is absent; update-of-absent never creates.
    async fn update(&self, key: &ItemKey, fields: Attrs) -> Result<bool, StoreError>;

    /// All items in one partition, ordered ascending by sort key.
    async fn query_partition(&self, pk: &str) -> Result<Vec<Item>, StoreError>;

    /// Atomically add `by` to an integer field of an existing item (missing
    /// field counts as 0) and return the new value. Fails with `Conflict`
    /// when the item is absent.
    async fn increment(&self, key: &ItemKey, field: &str, by: i64) -> Result<i64, StoreError>;

    /// Apply a batch of writes all-or-nothing.
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Delete every item in a partition. Deleting an empty partition is a
    /// no-op.
    async fn delete_partition(&self, pk: &str) -> Result<(), StoreError>;
}

/// Read a string-set field as an ordered list. Absent or malformed fields
/// read as empty.
#[must_use]
pub fn string_set(attrs: &Attrs, field: &str) -> Vec<String> {
    let mut members: Vec<String> = attrs
        .get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    members.sort();
    members.dedup();
    members
}

/// Read an integer field. Absent or non-integer fields read as `None`.
#[must_use]
pub fn int_field(attrs: &Attrs, field: &str) -> Option<i64> {
    attrs.get(field).and_then(Value::as_i64)
}

/// Set-union a member into a string-set field, keeping the stored list
/// sorted and deduplicated.
pub(crate) fn apply_set_add(attrs: &mut Attrs, field: &str, member: &str) {
    let mut members = string_set(attrs, field);
    if !members.iter().any(|m| m == member) {
        members.push(member.to_string());
        members.sort();
    }
    attrs.insert(
        field.to_string(),
        Value::Array(members.into_iter().map(Value::String).collect()),
    );
}

/// Set-difference a member out of a string-set field. Removing an absent
/// member leaves the field unchanged.
pub(crate) fn apply_set_remove(attrs: &mut Attrs, field: &str, member: &str) {
    let mut members = string_set(attrs, field);
    members.retain(|m| m != member);
    attrs.insert(
        field.to_string(),
        Value::Array(members.into_iter().map(Value::String).collect()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs_with_set(members: &[&str]) -> Attrs {
        let mut attrs = Attrs::new();
        attrs.insert("connections".to_string(), json!(members));
        attrs
    }

    #[test]
    fn session_keys_follow_addressing_scheme() {
        let meta = ItemKey::session_meta("123456");
        assert_eq!(meta.pk, "SESSION#123456");
        assert_eq!(meta.sk, "META");

        let player = ItemKey::player("123456", "abc");
        assert_eq!(player.pk, "SESSION#123456");
        assert_eq!(player.sk, "PLAYER#abc");

        let conn = ItemKey::connection("c1");
        assert_eq!(conn.pk, "CONN#c1");
        assert_eq!(conn.sk, "SESSION");
    }

    #[test]
    fn set_add_is_idempotent_and_sorted() {
        let mut attrs = attrs_with_set(&["b"]);
        apply_set_add(&mut attrs, "connections", "a");
        apply_set_add(&mut attrs, "connections", "a");
        assert_eq!(string_set(&attrs, "connections"), vec!["a", "b"]);
    }

    #[test]
    fn set_remove_of_absent_member_is_noop() {
        let mut attrs = attrs_with_set(&["a"]);
        apply_set_remove(&mut attrs, "connections", "zz");
        assert_eq!(string_set(&attrs, "connections"), vec!["a"]);
    }

    #[test]
    fn string_set_of_missing_field_is_empty() {
        let attrs = Attrs::new();
        assert!(string_set(&attrs, "connections").is_empty());
    }
}
