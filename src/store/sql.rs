//! SeaORM-backed state store.
//!
//! Maps the (partition, sort) item model onto the single `item` table.
//! Per-item atomicity comes from the row-level write; the multi-item
//! `transact` wraps its batch in one database transaction.

use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use serde_json::Value;

use crate::entities::item;

use super::{
    Attrs, Item, ItemKey, StateStore, StoreError, WriteOp, apply_set_add, apply_set_remove,
    int_field,
};

pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn unavailable(err: DbErr) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn decode_attrs(key: &ItemKey, value: Value) -> Result<Attrs, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Corrupt(format!(
            "{}/{} holds non-object attributes",
            key.pk, key.sk
        ))),
    }
}

async fn fetch<C: ConnectionTrait>(conn: &C, key: &ItemKey) -> Result<Option<item::Model>, DbErr> {
    item::Entity::find_by_id((key.pk.clone(), key.sk.clone()))
        .one(conn)
        .await
}

fn row(key: &ItemKey, attrs: Attrs) -> item::ActiveModel {
    item::ActiveModel {
        pk: Set(key.pk.clone()),
        sk: Set(key.sk.clone()),
        attrs: Set(Value::Object(attrs)),
    }
}

/// Merge `fields` into an existing row. Returns `false` when the row is
/// absent; nothing is written in that case.
async fn merge_into_existing<C: ConnectionTrait>(
    conn: &C,
    key: &ItemKey,
    fields: Attrs,
) -> Result<bool, StoreError> {
    let Some(model) = fetch(conn, key).await.map_err(unavailable)? else {
        return Ok(false);
    };
    let mut attrs = decode_attrs(key, model.attrs.clone())?;
    for (name, value) in fields {
        attrs.insert(name, value);
    }
    let mut active: item::ActiveModel = model.into();
    active.attrs = Set(Value::Object(attrs));
    active.update(conn).await.map_err(unavailable)?;
    Ok(true)
}

/// Rewrite a string-set field of an existing row; absent row is a no-op.
async fn mutate_set<C: ConnectionTrait>(
    conn: &C,
    key: &ItemKey,
    field: &str,
    member: &str,
    add: bool,
) -> Result<(), StoreError> {
    let Some(model) = fetch(conn, key).await.map_err(unavailable)? else {
        return Ok(());
    };
    let mut attrs = decode_attrs(key, model.attrs.clone())?;
    if add {
        apply_set_add(&mut attrs, field, member);
    } else {
        apply_set_remove(&mut attrs, field, member);
    }
    let mut active: item::ActiveModel = model.into();
    active.attrs = Set(Value::Object(attrs));
    active.update(conn).await.map_err(unavailable)?;
    Ok(())
}

async fn apply<C: ConnectionTrait>(conn: &C, op: WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Put { key, attrs } => {
            item::Entity::insert(row(&key, attrs))
                .on_conflict(
                    OnConflict::columns([item::Column::Pk, item::Column::Sk])
                        .update_column(item::Column::Attrs)
                        .to_owned(),
                )
                .exec_without_returning(conn)
                .await
                .map_err(unavailable)?;
        }
        WriteOp::Update { key, fields } => {
            if !merge_into_existing(conn, &key, fields).await? {
                return Err(StoreError::Conflict(format!(
                    "{}/{} is gone",
                    key.pk, key.sk
                )));
            }
        }
        WriteOp::Delete { key } => {
            item::Entity::delete_by_id((key.pk, key.sk))
                .exec(conn)
                .await
                .map_err(unavailable)?;
        }
        WriteOp::SetAdd { key, field, member } => {
            mutate_set(conn, &key, &field, &member, true).await?;
        }
        WriteOp::SetRemove { key, field, member } => {
            mutate_set(conn, &key, &field, &member, false).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl StateStore for SqlStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let Some(model) = fetch(&self.db, key).await.map_err(unavailable)? else {
            return Ok(None);
        };
        Ok(Some(Item {
            key: key.clone(),
            attrs: decode_attrs(key, model.attrs)?,
        }))
    }

    async fn put(&self, key: ItemKey, attrs: Attrs) -> Result<(), StoreError> {
        apply(&self.db, WriteOp::Put { key, attrs }).await
    }

    async fn put_if_absent(&self, key: ItemKey, attrs: Attrs) -> Result<bool, StoreError> {
        let inserted = item::Entity::insert(row(&key, attrs))
            .on_conflict(
                OnConflict::columns([item::Column::Pk, item::Column::Sk])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(inserted > 0)
    }

    async fn update(&self, key: &ItemKey, fields: Attrs) -> Result<bool, StoreError> {
        let txn = self.db.begin().await.map_err(unavailable)?;
        let written = merge_into_existing(&txn, key, fields).await?;
        txn.commit().await.map_err(unavailable)?;
        Ok(written)
    }

    async fn query_partition(&self, pk: &str) -> Result<Vec<Item>, StoreError> {
        let models = item::Entity::find()
            .filter(item::Column::Pk.eq(pk))
            .order_by_asc(item::Column::Sk)
            .all(&self.db)
            .await
            .map_err(unavailable)?;

        models
            .into_iter()
            .map(|model| {
                let key = ItemKey {
                    pk: model.pk.clone(),
                    sk: model.sk.clone(),
                };
                let attrs = decode_attrs(&key, model.attrs)?;
                Ok(Item { key, attrs })
            })
            .collect()
    }

    async fn increment(&self, key: &ItemKey, field: &str, by: i64) -> Result<i64, StoreError> {
        let txn = self.db.begin().await.map_err(unavailable)?;
        let Some(model) = fetch(&txn, key).await.map_err(unavailable)? else {
            return Err(StoreError::Conflict(format!(
                "{}/{} is gone",
                key.pk, key.sk
            )));
        };
        let mut attrs = decode_attrs(key, model.attrs.clone())?;
        let next = int_field(&attrs, field).unwrap_or(0) + by;
        attrs.insert(field.to_string(), Value::from(next));
        let mut active: item::ActiveModel = model.into();
        active.attrs = Set(Value::Object(attrs));
        active.update(&txn).await.map_err(unavailable)?;
        txn.commit().await.map_err(unavailable)?;
        Ok(next)
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let txn = self.db.begin().await.map_err(unavailable)?;
        for op in ops {
            // An error drops the transaction, rolling the batch back.
            apply(&txn, op).await?;
        }
        txn.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete_partition(&self, pk: &str) -> Result<(), StoreError> {
        item::Entity::delete_many()
            .filter(item::Column::Pk.eq(pk))
            .exec(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
