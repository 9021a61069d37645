use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::InvoiceStatus;

/// An invoice, either free-standing or derived from an order.
///
/// `order_id` is optional but unique when present (one invoice per order).
/// `tax_rate` is the flat rate carried over from a source order for
/// display; tax is actually computed per line from `invoice_items`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub company_id: i64,
    pub customer_id: Uuid,
    pub order_id: Option<Uuid>,
    pub bank_detail_id: Option<Uuid>,
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub sub_total: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub status: InvoiceStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl Model {
    /// Status as observed by readers: a Sent invoice past its due date
    /// reports Overdue without requiring a persisted transition.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        match (self.status, self.due_date) {
            (InvoiceStatus::Sent, Some(due)) if due < now => InvoiceStatus::Overdue,
            (status, _) => status,
        }
    }
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
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::bank_detail::Entity",
        from = "Column::BankDetailId",
        to = "super::bank_detail::Column::Id"
    )]
    BankDetail,
    #[sea_orm(has_many = "super::invoice_item::Entity")]
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

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::bank_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BankDetail.def()
    }
}

impl Related<super::invoice_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
