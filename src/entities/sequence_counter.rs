use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-tenant, per-series counter backing the sequence allocator.
///
/// Rows are only ever advanced by compare-and-swap updates keyed on the
/// current value; see `services::sequences`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sequence_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub company_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub series: String,
    pub value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
