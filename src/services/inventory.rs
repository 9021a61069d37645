//! Atomic stock adjustment.
//!
//! Stock moves only as a side effect of order status transitions, and only
//! on the transaction of the transition that caused it: the adjuster
//! takes the caller's connection handle and never opens its own.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::debug;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::{EntityKind, ServiceError};
use crate::store::{self, TenantContext};

/// What to do when a deduction would take a product below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeductionPolicy {
    /// Fail the whole batch with `InsufficientStock` before any write.
    #[default]
    Reject,
    /// Clamp at zero instead of failing. This mirrors the behavior the
    /// platform historically exhibited; callers opt in explicitly.
    FloorAtZero,
}

/// One requested stock movement. Negative deducts, positive restores.
#[derive(Debug, Clone, Copy)]
pub struct StockDelta {
    pub product_id: Uuid,
    pub delta: i32,
}

/// The resulting stock level for one product.
#[derive(Debug, Clone, Copy)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub previous: i32,
    pub current: i32,
}

pub struct InventoryAdjuster;

impl InventoryAdjuster {
    /// Applies a batch of stock movements, all or nothing.
    ///
    /// Every product is resolved and validated before the first write, so
    /// a rejected deduction leaves no partial application behind even if
    /// the caller forgets to roll back. Writes are guarded on the quantity
    /// that was read; a concurrent mutation surfaces as `Conflict` rather
    /// than a silent overwrite.
    pub async fn adjust<C: ConnectionTrait>(
        conn: &C,
        ctx: &TenantContext,
        deltas: &[StockDelta],
        policy: DeductionPolicy,
    ) -> Result<Vec<StockLevel>, ServiceError> {
        let mut planned: Vec<(product::Model, i32)> = Vec::with_capacity(deltas.len());

        for delta in deltas {
            let prod = store::fetch_one::<product::Entity, _>(conn, ctx, delta.product_id).await?;
            let next = prod.stock_quantity + delta.delta;
            let next = if next < 0 {
                match policy {
                    DeductionPolicy::Reject => {
                        return Err(ServiceError::InsufficientStock {
                            product_id: delta.product_id,
                        });
                    }
                    DeductionPolicy::FloorAtZero => 0,
                }
            } else {
                next
            };
            planned.push((prod, next));
        }

        let now = Utc::now();
        let mut levels = Vec::with_capacity(planned.len());

        for (prod, next) in planned {
            let guarded = product::Entity::update_many()
                .col_expr(product::Column::StockQuantity, Expr::value(next))
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(prod.id))
                .filter(product::Column::StockQuantity.eq(prod.stock_quantity))
                .exec(conn)
                .await?;
            if guarded.rows_affected == 0 {
                return Err(ServiceError::stale_version(EntityKind::Product, prod.id));
            }

            debug!(
                product_id = %prod.id,
                previous = prod.stock_quantity,
                current = next,
                "stock adjusted"
            );

            levels.push(StockLevel {
                product_id: prod.id,
                previous: prod.stock_quantity,
                current: next,
            });
        }

        Ok(levels)
    }
}
