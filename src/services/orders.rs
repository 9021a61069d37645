//! Order lifecycle manager: creation, item mutation, status transitions
//! with inventory side effects, and tenant-scoped reads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{company, customer, order, order_item, product};
use crate::errors::{EntityKind, ServiceError};
use crate::events::{Event, EventSender};
use crate::models::OrderStatus;
use crate::services::inventory::{DeductionPolicy, InventoryAdjuster, StockDelta};
use crate::services::sequences::{SequenceAllocator, Series};
use crate::services::totals::{self, OrderLine};
use crate::store::{self, TenantContext};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub items: Vec<NewOrderItem>,
    pub tax_rate: Decimal,
    pub shipping_cost: Decimal,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
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
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Returned by status updates so collaborators can react to the
/// old→new edge (revenue reporting on Completed, documents, email).
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub previous: OrderStatus,
    pub current: OrderStatus,
    pub order: OrderResponse,
}

/// Service for managing the order lifecycle.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new Draft order with its items, totals, and a freshly
    /// allocated order number, all in one transaction.
    #[instrument(skip(self, ctx, request), fields(company_id = ctx.company_id(), customer_id = %request.customer_id))]
    pub async fn create_order(
        &self,
        ctx: &TenantContext,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::validation("request", e.to_string()))?;
        validate_money("tax_rate", request.tax_rate)?;
        validate_money("shipping_cost", request.shipping_cost)?;
        for item in &request.items {
            validate_item(item)?;
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await?;

        // Resolve every reference inside the tenant before writing.
        company::Entity::find_by_id(ctx.company_id())
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found(EntityKind::Company, ctx.company_id()))?;
        store::fetch_one::<customer::Entity, _>(&txn, ctx, request.customer_id).await?;
        for item in &request.items {
            store::fetch_one::<product::Entity, _>(&txn, ctx, item.product_id).await?;
        }

        let lines: Vec<OrderLine> = request
            .items
            .iter()
            .map(|item| OrderLine {
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();
        let computed = totals::compute_order_totals(&lines, request.tax_rate, request.shipping_cost);

        let (_, order_number) =
            SequenceAllocator::next_display(&txn, ctx.company_id(), Series::Order).await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            company_id: Set(ctx.company_id()),
            customer_id: Set(request.customer_id),
            order_number: Set(order_number),
            order_date: Set(now),
            due_date: Set(request.due_date),
            sub_total: Set(computed.sub_total),
            tax_rate: Set(request.tax_rate),
            tax_amount: Set(computed.tax_amount),
            shipping_cost: Set(request.shipping_cost),
            total: Set(computed.total),
            currency: Set(request.currency),
            status: Set(OrderStatus::Draft),
            notes: Set(request.notes),
            stock_deducted: Set(false),
            version: Set(1),
            is_deleted: Set(false),
            created_at: Set(now),
            created_by: Set(ctx.user_id()),
            updated_at: Set(Some(now)),
            updated_by: Set(ctx.user_id()),
        }
        .insert(&txn)
        .await?;

        for item in &request.items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total: Set(totals::line_total(item.quantity, item.unit_price)),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_model.order_number, "order created");
        self.emit(Event::OrderCreated {
            order_id,
            company_id: ctx.company_id(),
        })
        .await;

        self.get_order(ctx, order_id).await
    }

    /// Retrieves an order with its items.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn get_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let order = store::fetch_one::<order::Entity, _>(db, ctx, order_id).await?;
        let items = load_items(db, order_id).await?;
        Ok(to_response(order, items))
    }

    /// Lists orders for the tenant, newest first. Page numbers are 1-based.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn list_orders(
        &self,
        ctx: &TenantContext,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let paginator = store::scoped_select::<order::Entity>(ctx)
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = load_items(db, order.id).await?;
            responses.push(to_response(order, items));
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Lists a customer's orders, newest first.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn list_orders_by_customer(
        &self,
        ctx: &TenantContext,
        customer_id: Uuid,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let db = &*self.db;
        let orders = store::scoped_select::<order::Entity>(ctx)
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = load_items(db, order.id).await?;
            responses.push(to_response(order, items));
        }
        Ok(responses)
    }

    /// Adds an item and recomputes totals in the same transaction.
    #[instrument(skip(self, ctx, item), fields(company_id = ctx.company_id(), product_id = %item.product_id))]
    pub async fn add_item(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        item: NewOrderItem,
    ) -> Result<OrderResponse, ServiceError> {
        validate_item(&item)?;

        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let order = store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;
        ensure_items_open(&order)?;
        store::fetch_one::<product::Entity, _>(&txn, ctx, item.product_id).await?;

        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(item.product_id),
            quantity: Set(item.quantity),
            unit_price: Set(item.unit_price),
            total: Set(totals::line_total(item.quantity, item.unit_price)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        persist_totals(&txn, ctx, &order, now).await?;
        txn.commit().await?;

        self.get_order(ctx, order_id).await
    }

    /// Removes an item and recomputes totals in the same transaction.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn remove_item(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let order = store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;
        ensure_items_open(&order)?;

        let deleted = order_item::Entity::delete_many()
            .filter(order_item::Column::Id.eq(item_id))
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::not_found(EntityKind::OrderItem, item_id));
        }

        persist_totals(&txn, ctx, &order, now).await?;
        txn.commit().await?;

        self.get_order(ctx, order_id).await
    }

    /// Changes an item's quantity and recomputes totals in the same
    /// transaction.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn update_item_quantity(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<OrderResponse, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::validation(
                "quantity",
                "Quantity must be positive",
            ));
        }

        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let order = store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;
        ensure_items_open(&order)?;

        let item = order_item::Entity::find()
            .filter(order_item::Column::Id.eq(item_id))
            .filter(order_item::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found(EntityKind::OrderItem, item_id))?;

        let mut active: order_item::ActiveModel = item.clone().into();
        active.quantity = Set(quantity);
        active.total = Set(totals::line_total(quantity, item.unit_price));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        persist_totals(&txn, ctx, &order, now).await?;
        txn.commit().await?;

        self.get_order(ctx, order_id).await
    }

    /// Validates and applies a status transition, with inventory side
    /// effects in the same transaction: the first move out of Draft
    /// deducts stock, cancellation restores exactly what was deducted.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id(), new_status = %new_status))]
    pub async fn update_order_status(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderStatusChange, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let order = store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;
        let previous = order.status;

        if !previous.can_transition_to(new_status) {
            return Err(ServiceError::invalid_transition(previous, new_status));
        }

        let items = load_items(&txn, order_id).await?;
        let mut stock_deducted = order.stock_deducted;
        let mut stock_changes = Vec::new();

        if previous == OrderStatus::Draft
            && new_status != OrderStatus::Cancelled
            && !order.stock_deducted
        {
            let deltas: Vec<StockDelta> = items
                .iter()
                .map(|item| StockDelta {
                    product_id: item.product_id,
                    delta: -item.quantity,
                })
                .collect();
            stock_changes =
                InventoryAdjuster::adjust(&txn, ctx, &deltas, DeductionPolicy::Reject).await?;
            stock_deducted = true;
        } else if new_status == OrderStatus::Cancelled && order.stock_deducted {
            // Restore exactly what was deducted. If stock never moved this
            // branch is skipped, making cancellation idempotent.
            let deltas: Vec<StockDelta> = items
                .iter()
                .map(|item| StockDelta {
                    product_id: item.product_id,
                    delta: item.quantity,
                })
                .collect();
            stock_changes =
                InventoryAdjuster::adjust(&txn, ctx, &deltas, DeductionPolicy::Reject).await?;
            stock_deducted = false;
        }

        let updated = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::StockDeducted, Expr::value(stock_deducted))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedBy, Expr::value(ctx.user_id()))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::stale_version(EntityKind::Order, order_id));
        }

        txn.commit().await?;

        info!(order_id = %order_id, %previous, current = %new_status, "order status updated");

        for level in &stock_changes {
            self.emit(Event::StockAdjusted {
                product_id: level.product_id,
                company_id: ctx.company_id(),
                previous: level.previous,
                current: level.current,
            })
            .await;
        }
        self.emit(Event::OrderStatusChanged {
            order_id,
            company_id: ctx.company_id(),
            previous,
            current: new_status,
        })
        .await;
        match new_status {
            OrderStatus::Completed => {
                self.emit(Event::OrderCompleted {
                    order_id,
                    company_id: ctx.company_id(),
                })
                .await;
            }
            OrderStatus::Cancelled => {
                self.emit(Event::OrderCancelled {
                    order_id,
                    company_id: ctx.company_id(),
                })
                .await;
            }
            _ => {}
        }

        let order = self.get_order(ctx, order_id).await?;
        Ok(OrderStatusChange {
            previous,
            current: new_status,
            order,
        })
    }

    /// Soft-deletes an order. The row (and its number) survives; default
    /// reads no longer see it.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn delete_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let order = store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;

        let updated = order::Entity::update_many()
            .col_expr(order::Column::IsDeleted, Expr::value(true))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedBy, Expr::value(ctx.user_id()))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::stale_version(EntityKind::Order, order_id));
        }

        txn.commit().await?;
        info!(order_id = %order_id, "order soft-deleted");
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(err) = sender.send(event).await {
                warn!(error = %err, "failed to send event");
            }
        }
    }
}

/// Item mutations are only legal while the order's stock is uncommitted.
/// Once the first transition out of Draft deducts inventory, cancellation
/// restores exactly those quantities, so the item set freezes with them.
fn ensure_items_open(order: &order::Model) -> Result<(), ServiceError> {
    if order.stock_deducted {
        return Err(ServiceError::Conflict(format!(
            "order {} has committed stock; its items can no longer change",
            order.id
        )));
    }
    Ok(())
}

fn validate_item(item: &NewOrderItem) -> Result<(), ServiceError> {
    if item.quantity <= 0 {
        return Err(ServiceError::validation(
            "quantity",
            "Quantity must be positive",
        ));
    }
    if item.unit_price < Decimal::ZERO {
        return Err(ServiceError::validation(
            "unit_price",
            "Unit price must not be negative",
        ));
    }
    Ok(())
}

fn validate_money(field: &str, value: Decimal) -> Result<(), ServiceError> {
    if value < Decimal::ZERO {
        return Err(ServiceError::validation(field, "must not be negative"));
    }
    Ok(())
}

async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Recomputes totals from the current item set and persists them under the
/// order's optimistic-lock version. Runs on the mutation's transaction so
/// a stale version rolls the item change back too.
async fn persist_totals<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    order: &order::Model,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let items = load_items(conn, order.id).await?;
    let lines: Vec<OrderLine> = items
        .iter()
        .map(|item| OrderLine {
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect();
    let computed = totals::compute_order_totals(&lines, order.tax_rate, order.shipping_cost);

    let updated = order::Entity::update_many()
        .col_expr(order::Column::SubTotal, Expr::value(computed.sub_total))
        .col_expr(order::Column::TaxAmount, Expr::value(computed.tax_amount))
        .col_expr(order::Column::Total, Expr::value(computed.total))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .col_expr(order::Column::UpdatedBy, Expr::value(ctx.user_id()))
        .col_expr(order::Column::Version, Expr::value(order.version + 1))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Version.eq(order.version))
        .exec(conn)
        .await?;
    if updated.rows_affected == 0 {
        return Err(ServiceError::stale_version(EntityKind::Order, order.id));
    }
    Ok(())
}

fn to_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        company_id: order.company_id,
        customer_id: order.customer_id,
        order_number: order.order_number,
        order_date: order.order_date,
        due_date: order.due_date,
        sub_total: order.sub_total,
        tax_rate: order.tax_rate,
        tax_amount: order.tax_amount,
        shipping_cost: order.shipping_cost,
        total: order.total,
        currency: order.currency,
        status: order.status,
        notes: order.notes,
        version: order.version,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total: item.total,
            })
            .collect(),
    }
}
