use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// 层级存储条目
/// - path: `users/{id}` / `codes/{code}` / `accounts/{id}`
/// - value: JSON 文本
/// - version: 每次写入递增, 条件写入以此为乐观锁
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub path: String,
    #[sea_orm(column_type = "Text")]
    pub value: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
