use super::{
    Collection, CredentialStore, Expectation, Mutation, StoreError, StorePath, StoreResult,
    Transaction,
};
use crate::entities::ledger_entry_entity as entries;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde_json::Value;

/// Store backed by the `ledger_entries` table.
///
/// 乐观并发: 每条记录带 version, 条件写入使用
/// `UPDATE/DELETE ... WHERE path = ? AND version = ?` 或 `INSERT ... ON CONFLICT DO NOTHING`,
/// 任一语句影响 0 行则整个事务回滚并返回 Conflict。
#[derive(Clone)]
pub struct DatabaseStore {
    pool: DatabaseConnection,
}

impl DatabaseStore {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    async fn apply(&self, txn: &DatabaseTransaction, mutation: &Mutation) -> StoreResult<bool> {
        let path = mutation.path.to_string();

        let current = entries::Entity::find_by_id(path.clone()).one(txn).await?;

        if let Expectation::Equals(expected) = &mutation.expected {
            let Some(row) = &current else {
                return Ok(false);
            };
            if &decode_value(row)? != expected {
                return Ok(false);
            }
        }

        match (&mutation.expected, current, &mutation.new) {
            (Expectation::Absent, Some(_), _) => Ok(false),
            (Expectation::Absent, None, None) | (Expectation::Any, None, None) => Ok(true),
            (_, None, Some(value)) => {
                let row = entries::ActiveModel {
                    path: Set(path),
                    value: Set(value.to_string()),
                    version: Set(1),
                    updated_at: Set(Utc::now()),
                };
                let inserted = entries::Entity::insert(row)
                    .on_conflict(
                        OnConflict::column(entries::Column::Path)
                            .do_nothing()
                            .to_owned(),
                    )
                    .exec_without_returning(txn)
                    .await?;
                Ok(inserted == 1)
            }
            (_, Some(row), Some(value)) => {
                let result = entries::Entity::update_many()
                    .col_expr(entries::Column::Value, Expr::value(value.to_string()))
                    .col_expr(entries::Column::Version, Expr::value(row.version + 1))
                    .col_expr(entries::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(entries::Column::Path.eq(path))
                    .filter(entries::Column::Version.eq(row.version))
                    .exec(txn)
                    .await?;
                Ok(result.rows_affected == 1)
            }
            (_, Some(row), None) => {
                let result = entries::Entity::delete_many()
                    .filter(entries::Column::Path.eq(path))
                    .filter(entries::Column::Version.eq(row.version))
                    .exec(txn)
                    .await?;
                Ok(result.rows_affected == 1)
            }
            (Expectation::Equals(_), None, None) => Ok(false),
        }
    }
}

fn decode_value(row: &entries::Model) -> StoreResult<Value> {
    serde_json::from_str(&row.value).map_err(|e| StoreError::Corrupt {
        path: row.path.clone(),
        reason: e.to_string(),
    })
}

fn strip_collection(collection: Collection, row: &entries::Model) -> String {
    row.path
        .strip_prefix(&collection.prefix())
        .unwrap_or(&row.path)
        .to_string()
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl CredentialStore for DatabaseStore {
    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let row = entries::Entity::find_by_id(path.to_string())
            .one(&self.pool)
            .await?;
        row.as_ref().map(decode_value).transpose()
    }

    async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
        let rows = entries::Entity::find()
            .filter(entries::Column::Path.starts_with(collection.prefix()))
            .order_by_asc(entries::Column::Path)
            .all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok((strip_collection(collection, row), decode_value(row)?)))
            .collect()
    }

    async fn first(&self, collection: Collection) -> StoreResult<Option<(String, Value)>> {
        let row = entries::Entity::find()
            .filter(entries::Column::Path.starts_with(collection.prefix()))
            .order_by_asc(entries::Column::Path)
            .one(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some((strip_collection(collection, &row), decode_value(&row)?))),
            None => Ok(None),
        }
    }

    async fn commit(&self, transaction: Transaction) -> StoreResult<()> {
        if transaction.is_empty() {
            return Ok(());
        }

        let txn = self.pool.begin().await?;

        for mutation in transaction.mutations() {
            let failure = match self.apply(&txn, mutation).await {
                Ok(true) => continue,
                Ok(false) => StoreError::Conflict {
                    path: mutation.path.to_string(),
                },
                Err(e) => e,
            };
            if let Err(e) = txn.rollback().await {
                log::warn!("Rollback after failed commit on {} failed: {e}", mutation.path);
            }
            return Err(failure);
        }

        txn.commit().await?;
        Ok(())
    }
}
