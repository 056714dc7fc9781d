//! In-memory state store.
//!
//! A `BTreeMap` keyed by (partition, sort) gives the same ascending
//! sort-key ordering the SQL backend's indexed queries provide. Backs unit
//! and engine tests; also usable for single-process development.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Attrs, Item, ItemKey, StateStore, StoreError, WriteOp, apply_set_add, apply_set_remove,
    int_field,
};

type Shelf = BTreeMap<(String, String), Attrs>;

/// Whole-store mutex: every operation, including `transact`, holds the lock
/// for its full duration, which is what makes the batch atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Shelf>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Shelf>, StoreError> {
        self.items
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

fn entry_key(key: &ItemKey) -> (String, String) {
    (key.pk.clone(), key.sk.clone())
}

fn apply(shelf: &mut Shelf, op: WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Put { key, attrs } => {
            shelf.insert(entry_key(&key), attrs);
        }
        WriteOp::Update { key, fields } => {
            let Some(attrs) = shelf.get_mut(&entry_key(&key)) else {
                return Err(StoreError::Conflict(format!(
                    "{}/{} is gone",
                    key.pk, key.sk
                )));
            };
            for (name, value) in fields {
                attrs.insert(name, value);
            }
        }
        WriteOp::Delete { key } => {
            shelf.remove(&entry_key(&key));
        }
        WriteOp::SetAdd { key, field, member } => {
            if let Some(attrs) = shelf.get_mut(&entry_key(&key)) {
                apply_set_add(attrs, &field, &member);
            }
        }
        WriteOp::SetRemove { key, field, member } => {
            if let Some(attrs) = shelf.get_mut(&entry_key(&key)) {
                apply_set_remove(attrs, &field, &member);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let shelf = self.lock()?;
        Ok(shelf.get(&entry_key(key)).map(|attrs| Item {
            key: key.clone(),
            attrs: attrs.clone(),
        }))
    }

    async fn put(&self, key: ItemKey, attrs: Attrs) -> Result<(), StoreError> {
        let mut shelf = self.lock()?;
        shelf.insert(entry_key(&key), attrs);
        Ok(())
    }

    async fn put_if_absent(&self, key: ItemKey, attrs: Attrs) -> Result<bool, StoreError> {
        let mut shelf = self.lock()?;
        let slot = entry_key(&key);
        if shelf.contains_key(&slot) {
            return Ok(false);
        }
        shelf.insert(slot, attrs);
        Ok(true)
    }

    async fn update(&self, key: &ItemKey, fields: Attrs) -> Result<bool, StoreError> {
        let mut shelf = self.lock()?;
        let Some(attrs) = shelf.get_mut(&entry_key(key)) else {
            return Ok(false);
        };
        for (name, value) in fields {
            attrs.insert(name, value);
        }
        Ok(true)
    }

    async fn query_partition(&self, pk: &str) -> Result<Vec<Item>, StoreError> {
        let shelf = self.lock()?;
        Ok(shelf
            .range((pk.to_string(), String::new())..)
            .take_while(|((item_pk, _), _)| item_pk == pk)
            .map(|((item_pk, item_sk), attrs)| Item {
                key: ItemKey {
                    pk: item_pk.clone(),
                    sk: item_sk.clone(),
                },
                attrs: attrs.clone(),
            })
            .collect())
    }

    async fn increment(&self, key: &ItemKey, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut shelf = self.lock()?;
        let Some(attrs) = shelf.get_mut(&entry_key(key)) else {
            return Err(StoreError::Conflict(format!(
                "{}/{} is gone",
                key.pk, key.sk
            )));
        };
        let next = int_field(attrs, field).unwrap_or(0) + by;
        attrs.insert(field.to_string(), serde_json::Value::from(next));
        Ok(next)
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut shelf = self.lock()?;
        // Validate the only conditional op kind up front so a failure leaves
        // the shelf untouched.
        for op in &ops {
            if let WriteOp::Update { key, .. } = op {
                if !shelf.contains_key(&entry_key(key)) {
                    return Err(StoreError::Conflict(format!(
                        "{}/{} is gone",
                        key.pk, key.sk
                    )));
                }
            }
        }
        for op in ops {
            apply(&mut shelf, op)?;
        }
        Ok(())
    }

    async fn delete_partition(&self, pk: &str) -> Result<(), StoreError> {
        let mut shelf = self.lock()?;
        shelf.retain(|(item_pk, _), _| item_pk != pk);
        Ok(())
    }
}
