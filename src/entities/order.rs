use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::OrderStatus;

/// A customer order.
///
/// Derived totals (`sub_total`, `tax_amount`, `total`) are recomputed from
/// the item set inside the same transaction as every item mutation, so the
/// invariants `sub_total == Σ item.total` and `total == sub_total +
/// tax_amount + shipping_cost` hold for every committed row. `version` is
/// the optimistic-lock token; `stock_deducted` records whether the first
/// transition out of Draft already moved inventory, making cancellation
/// restores idempotent.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub company_id: i64,
    pub customer_id: Uuid,
    pub order_number: String,
    pub order_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub sub_total: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub stock_deducted: bool,
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id"
    )]
    Company,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
