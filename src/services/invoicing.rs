//! Invoice lifecycle manager: creation (free-standing or derived from an
//! order), item mutation, status transitions, and bank-detail guards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{bank_detail, company, customer, invoice, invoice_item, order, order_item};
use crate::errors::{EntityKind, ServiceError};
use crate::events::{Event, EventSender};
use crate::models::InvoiceStatus;
use crate::services::sequences::{SequenceAllocator, Series};
use crate::services::totals::{self, InvoiceLine};
use crate::store::{self, TenantContext};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewInvoiceItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    pub order_id: Option<Uuid>,
    pub bank_detail_id: Option<Uuid>,
    /// Ignored: numbering is server-authoritative. Present so callers that
    /// round-trip snapshots don't have to strip the field.
    pub invoice_number: Option<String>,
    pub items: Vec<NewInvoiceItem>,
    pub shipping_cost: Decimal,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
    pub invoice_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateBankDetailRequest {
    #[validate(length(min = 1, message = "Bank name is required"))]
    pub bank_name: String,
    #[validate(length(min = 15, max = 34, message = "IBAN must be 15-34 characters"))]
    pub iban: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResponse {
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
    /// Effective status: a Sent invoice past its due date reads Overdue.
    pub status: InvoiceStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<InvoiceItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceStatusChange {
    pub previous: InvoiceStatus,
    pub current: InvoiceStatus,
    pub invoice: InvoiceResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankDetailResponse {
    pub id: Uuid,
    pub company_id: i64,
    pub bank_name: String,
    pub iban: String,
}

/// Service for managing the invoice lifecycle.
#[derive(Clone)]
pub struct InvoiceService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl InvoiceService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a Draft invoice. References are resolved in a fixed order
    /// (Company, Customer, Order, BankDetail) so the error names the first
    /// missing one; the invoice number is always freshly allocated.
    #[instrument(skip(self, ctx, request), fields(company_id = ctx.company_id(), customer_id = %request.customer_id))]
    pub async fn create_invoice(
        &self,
        ctx: &TenantContext,
        request: CreateInvoiceRequest,
    ) -> Result<InvoiceResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::validation("request", e.to_string()))?;
        validate_money("shipping_cost", request.shipping_cost)?;
        for item in &request.items {
            validate_item(item)?;
        }

        let db = &*self.db;
        let now = Utc::now();
        let invoice_id = Uuid::new_v4();

        let txn = db.begin().await?;

        company::Entity::find_by_id(ctx.company_id())
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found(EntityKind::Company, ctx.company_id()))?;
        store::fetch_one::<customer::Entity, _>(&txn, ctx, request.customer_id).await?;
        if let Some(order_id) = request.order_id {
            store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;
            ensure_order_not_invoiced(&txn, ctx, order_id).await?;
        }
        if let Some(bank_detail_id) = request.bank_detail_id {
            store::fetch_one::<bank_detail::Entity, _>(&txn, ctx, bank_detail_id).await?;
        }

        let lines: Vec<InvoiceLine> = request
            .items
            .iter()
            .map(|item| InvoiceLine {
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
            })
            .collect();
        let computed = totals::compute_invoice_totals(&lines, request.shipping_cost);

        let (_, invoice_number) =
            SequenceAllocator::next_display(&txn, ctx.company_id(), Series::Invoice).await?;

        invoice::ActiveModel {
            id: Set(invoice_id),
            company_id: Set(ctx.company_id()),
            customer_id: Set(request.customer_id),
            order_id: Set(request.order_id),
            bank_detail_id: Set(request.bank_detail_id),
            invoice_number: Set(invoice_number),
            invoice_date: Set(request.invoice_date.unwrap_or(now)),
            due_date: Set(request.due_date),
            sub_total: Set(computed.sub_total),
            tax_rate: Set(Decimal::ZERO),
            tax_amount: Set(computed.tax_amount),
            shipping_cost: Set(request.shipping_cost),
            total: Set(computed.total),
            currency: Set(request.currency),
            status: Set(InvoiceStatus::Draft),
            paid_date: Set(None),
            notes: Set(request.notes),
            version: Set(1),
            is_deleted: Set(false),
            created_at: Set(now),
            created_by: Set(ctx.user_id()),
            updated_at: Set(Some(now)),
            updated_by: Set(ctx.user_id()),
        }
        .insert(&txn)
        .await
        .map_err(|err| map_order_unique_violation(err, request.order_id))?;

        for item in &request.items {
            insert_item(&txn, invoice_id, item, now).await?;
        }

        txn.commit().await?;

        info!(invoice_id = %invoice_id, "invoice created");
        self.emit(Event::InvoiceCreated {
            invoice_id,
            company_id: ctx.company_id(),
        })
        .await;

        self.get_invoice(ctx, invoice_id).await
    }

    /// Derives a Draft invoice from an order snapshot: customer, currency,
    /// dates, shipping, and line items are copied (each line carrying the
    /// order's flat tax rate); the source order is not mutated.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn create_from_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> Result<InvoiceResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let invoice_id = Uuid::new_v4();

        let txn = db.begin().await?;

        let source = store::fetch_one::<order::Entity, _>(&txn, ctx, order_id).await?;
        ensure_order_not_invoiced(&txn, ctx, order_id).await?;

        let source_items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        let lines: Vec<InvoiceLine> = source_items
            .iter()
            .map(|item| InvoiceLine {
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: source.tax_rate,
            })
            .collect();
        let computed = totals::compute_invoice_totals(&lines, source.shipping_cost);

        let (_, invoice_number) =
            SequenceAllocator::next_display(&txn, ctx.company_id(), Series::Invoice).await?;

        invoice::ActiveModel {
            id: Set(invoice_id),
            company_id: Set(ctx.company_id()),
            customer_id: Set(source.customer_id),
            order_id: Set(Some(order_id)),
            bank_detail_id: Set(None),
            invoice_number: Set(invoice_number),
            invoice_date: Set(now),
            due_date: Set(source.due_date),
            sub_total: Set(computed.sub_total),
            tax_rate: Set(source.tax_rate),
            tax_amount: Set(computed.tax_amount),
            shipping_cost: Set(source.shipping_cost),
            total: Set(computed.total),
            currency: Set(source.currency.clone()),
            status: Set(InvoiceStatus::Draft),
            paid_date: Set(None),
            notes: Set(None),
            version: Set(1),
            is_deleted: Set(false),
            created_at: Set(now),
            created_by: Set(ctx.user_id()),
            updated_at: Set(Some(now)),
            updated_by: Set(ctx.user_id()),
        }
        .insert(&txn)
        .await
        .map_err(|err| map_order_unique_violation(err, Some(order_id)))?;

        for item in &source_items {
            invoice_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                invoice_id: Set(invoice_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                tax_rate: Set(source.tax_rate),
                total: Set(item.total),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(invoice_id = %invoice_id, order_id = %order_id, "invoice derived from order");
        self.emit(Event::InvoiceCreated {
            invoice_id,
            company_id: ctx.company_id(),
        })
        .await;

        self.get_invoice(ctx, invoice_id).await
    }

    /// Retrieves an invoice with its items.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn get_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<InvoiceResponse, ServiceError> {
        let db = &*self.db;
        let invoice = store::fetch_one::<invoice::Entity, _>(db, ctx, invoice_id).await?;
        let items = load_items(db, invoice_id).await?;
        Ok(to_response(invoice, items, Utc::now()))
    }

    /// Lists invoices for the tenant, newest first. Page numbers are
    /// 1-based.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn list_invoices(
        &self,
        ctx: &TenantContext,
        page: u64,
        per_page: u64,
    ) -> Result<InvoiceListResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let paginator = store::scoped_select::<invoice::Entity>(ctx)
            .order_by_desc(invoice::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator.num_items().await?;
        let invoices = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(invoices.len());
        for inv in invoices {
            let items = load_items(db, inv.id).await?;
            responses.push(to_response(inv, items, now));
        }

        Ok(InvoiceListResponse {
            invoices: responses,
            total,
            page,
            per_page,
        })
    }

    /// Lists a customer's invoices, newest first.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn list_invoices_by_customer(
        &self,
        ctx: &TenantContext,
        customer_id: Uuid,
    ) -> Result<Vec<InvoiceResponse>, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let invoices = store::scoped_select::<invoice::Entity>(ctx)
            .filter(invoice::Column::CustomerId.eq(customer_id))
            .order_by_desc(invoice::Column::CreatedAt)
            .all(db)
            .await?;

        let mut responses = Vec::with_capacity(invoices.len());
        for inv in invoices {
            let items = load_items(db, inv.id).await?;
            responses.push(to_response(inv, items, now));
        }
        Ok(responses)
    }

    /// The 1:1 lookup: the invoice derived from an order, if any.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn find_invoice_by_order(
        &self,
        ctx: &TenantContext,
        order_id: Uuid,
    ) -> Result<Option<InvoiceResponse>, ServiceError> {
        let db = &*self.db;
        let invoice = store::scoped_select::<invoice::Entity>(ctx)
            .filter(invoice::Column::OrderId.eq(order_id))
            .one(db)
            .await?;
        match invoice {
            Some(inv) => {
                let items = load_items(db, inv.id).await?;
                Ok(Some(to_response(inv, items, Utc::now())))
            }
            None => Ok(None),
        }
    }

    /// Adds a line and recomputes totals in the same transaction.
    #[instrument(skip(self, ctx, item), fields(company_id = ctx.company_id(), product_id = %item.product_id))]
    pub async fn add_item(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        item: NewInvoiceItem,
    ) -> Result<InvoiceResponse, ServiceError> {
        validate_item(&item)?;

        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let invoice = store::fetch_one::<invoice::Entity, _>(&txn, ctx, invoice_id).await?;
        insert_item(&txn, invoice_id, &item, now).await?;
        persist_totals(&txn, ctx, &invoice, now).await?;
        txn.commit().await?;

        self.get_invoice(ctx, invoice_id).await
    }

    /// Removes a line and recomputes totals in the same transaction.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn remove_item(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        item_id: Uuid,
    ) -> Result<InvoiceResponse, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let invoice = store::fetch_one::<invoice::Entity, _>(&txn, ctx, invoice_id).await?;

        let deleted = invoice_item::Entity::delete_many()
            .filter(invoice_item::Column::Id.eq(item_id))
            .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::not_found(EntityKind::InvoiceItem, item_id));
        }

        persist_totals(&txn, ctx, &invoice, now).await?;
        txn.commit().await?;

        self.get_invoice(ctx, invoice_id).await
    }

    /// Validates and applies a status transition. Transition into Paid
    /// stamps `paid_date`; everything else updates the status alone.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id(), new_status = %new_status))]
    pub async fn update_invoice_status(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        new_status: InvoiceStatus,
    ) -> Result<InvoiceStatusChange, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let invoice = store::fetch_one::<invoice::Entity, _>(&txn, ctx, invoice_id).await?;
        let previous = invoice.status;

        if !previous.can_transition_to(new_status) {
            return Err(ServiceError::invalid_transition(previous, new_status));
        }

        let paid_date = if new_status == InvoiceStatus::Paid {
            Some(now)
        } else {
            invoice.paid_date
        };

        let updated = invoice::Entity::update_many()
            .col_expr(invoice::Column::Status, Expr::value(new_status))
            .col_expr(invoice::Column::PaidDate, Expr::value(paid_date))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
            .col_expr(invoice::Column::UpdatedBy, Expr::value(ctx.user_id()))
            .col_expr(invoice::Column::Version, Expr::value(invoice.version + 1))
            .filter(invoice::Column::Id.eq(invoice_id))
            .filter(invoice::Column::Version.eq(invoice.version))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::stale_version(EntityKind::Invoice, invoice_id));
        }

        txn.commit().await?;

        info!(invoice_id = %invoice_id, %previous, current = %new_status, "invoice status updated");
        self.emit(Event::InvoiceStatusChanged {
            invoice_id,
            company_id: ctx.company_id(),
            previous,
            current: new_status,
        })
        .await;
        if let (InvoiceStatus::Paid, Some(paid)) = (new_status, paid_date) {
            self.emit(Event::InvoicePaid {
                invoice_id,
                company_id: ctx.company_id(),
                paid_date: paid,
            })
            .await;
        }

        let invoice = self.get_invoice(ctx, invoice_id).await?;
        Ok(InvoiceStatusChange {
            previous,
            current: new_status,
            invoice,
        })
    }

    /// Soft-deletes an invoice.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn delete_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<(), ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;
        let invoice = store::fetch_one::<invoice::Entity, _>(&txn, ctx, invoice_id).await?;

        let updated = invoice::Entity::update_many()
            .col_expr(invoice::Column::IsDeleted, Expr::value(true))
            .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
            .col_expr(invoice::Column::UpdatedBy, Expr::value(ctx.user_id()))
            .col_expr(invoice::Column::Version, Expr::value(invoice.version + 1))
            .filter(invoice::Column::Id.eq(invoice_id))
            .filter(invoice::Column::Version.eq(invoice.version))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::stale_version(EntityKind::Invoice, invoice_id));
        }

        txn.commit().await?;
        info!(invoice_id = %invoice_id, "invoice soft-deleted");
        Ok(())
    }

    /// Registers bank details for the tenant. A duplicate IBAN within the
    /// company is a conflict.
    #[instrument(skip(self, ctx, request), fields(company_id = ctx.company_id()))]
    pub async fn create_bank_detail(
        &self,
        ctx: &TenantContext,
        request: CreateBankDetailRequest,
    ) -> Result<BankDetailResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::validation("request", e.to_string()))?;

        let db = &*self.db;
        let now = Utc::now();

        let txn = db.begin().await?;

        let duplicate = store::scoped_select::<bank_detail::Entity>(ctx)
            .filter(bank_detail::Column::Iban.eq(request.iban.as_str()))
            .one(&txn)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "IBAN {} already registered for company {}",
                request.iban,
                ctx.company_id()
            )));
        }

        let model = bank_detail::ActiveModel {
            id: Set(Uuid::new_v4()),
            company_id: Set(ctx.company_id()),
            bank_name: Set(request.bank_name),
            iban: Set(request.iban),
            is_deleted: Set(false),
            created_at: Set(now),
            created_by: Set(ctx.user_id()),
            updated_at: Set(Some(now)),
            updated_by: Set(ctx.user_id()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        Ok(BankDetailResponse {
            id: model.id,
            company_id: model.company_id,
            bank_name: model.bank_name,
            iban: model.iban,
        })
    }

    /// Soft-deletes bank details, refusing while any live invoice still
    /// references them; the cross-reference validation belongs to the
    /// entity being deleted.
    #[instrument(skip(self, ctx), fields(company_id = ctx.company_id()))]
    pub async fn delete_bank_detail(
        &self,
        ctx: &TenantContext,
        bank_detail_id: Uuid,
    ) -> Result<(), ServiceError> {
        let db = &*self.db;

        let txn = db.begin().await?;

        let referencing = store::scoped_select::<invoice::Entity>(ctx)
            .filter(invoice::Column::BankDetailId.eq(bank_detail_id))
            .count(&txn)
            .await?;
        if referencing > 0 {
            return Err(ServiceError::Conflict(format!(
                "bank detail {} is referenced by {} invoice(s)",
                bank_detail_id, referencing
            )));
        }

        store::soft_delete::<bank_detail::Entity, _>(&txn, ctx, bank_detail_id).await?;
        txn.commit().await?;
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

/// One invoice per order: a live invoice already holding the order id
/// makes a second derivation a conflict. A unique index on the column
/// backstops the race between two concurrent creators.
async fn ensure_order_not_invoiced<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let existing = store::scoped_select::<invoice::Entity>(ctx)
        .filter(invoice::Column::OrderId.eq(order_id))
        .count(conn)
        .await?;
    if existing > 0 {
        return Err(ServiceError::Conflict(format!(
            "order {} already has an invoice",
            order_id
        )));
    }
    Ok(())
}

/// The unique index on `invoices.order_id` backstops the race the
/// pre-check cannot close: two creators for the same order, one of which
/// commits between the other's check and insert.
fn map_order_unique_violation(err: DbErr, order_id: Option<Uuid>) -> ServiceError {
    match (err.sql_err(), order_id) {
        (Some(SqlErr::UniqueConstraintViolation(_)), Some(order_id)) => {
            ServiceError::Conflict(format!("order {} already has an invoice", order_id))
        }
        _ => ServiceError::Database(err),
    }
}

fn validate_item(item: &NewInvoiceItem) -> Result<(), ServiceError> {
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
    if item.tax_rate < Decimal::ZERO {
        return Err(ServiceError::validation(
            "tax_rate",
            "Tax rate must not be negative",
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

async fn insert_item<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
    item: &NewInvoiceItem,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    invoice_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        invoice_id: Set(invoice_id),
        product_id: Set(item.product_id),
        quantity: Set(item.quantity),
        unit_price: Set(item.unit_price),
        tax_rate: Set(item.tax_rate),
        total: Set(totals::line_total(item.quantity, item.unit_price)),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    }
    .insert(conn)
    .await?;
    Ok(())
}

async fn load_items<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Vec<invoice_item::Model>, ServiceError> {
    Ok(invoice_item::Entity::find()
        .filter(invoice_item::Column::InvoiceId.eq(invoice_id))
        .order_by_asc(invoice_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Recomputes invoice totals from the current line set and persists them
/// under the optimistic-lock version.
async fn persist_totals<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    invoice: &invoice::Model,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let items = load_items(conn, invoice.id).await?;
    let lines: Vec<InvoiceLine> = items
        .iter()
        .map(|item| InvoiceLine {
            quantity: item.quantity,
            unit_price: item.unit_price,
            tax_rate: item.tax_rate,
        })
        .collect();
    let computed = totals::compute_invoice_totals(&lines, invoice.shipping_cost);

    let updated = invoice::Entity::update_many()
        .col_expr(invoice::Column::SubTotal, Expr::value(computed.sub_total))
        .col_expr(invoice::Column::TaxAmount, Expr::value(computed.tax_amount))
        .col_expr(invoice::Column::Total, Expr::value(computed.total))
        .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
        .col_expr(invoice::Column::UpdatedBy, Expr::value(ctx.user_id()))
        .col_expr(invoice::Column::Version, Expr::value(invoice.version + 1))
        .filter(invoice::Column::Id.eq(invoice.id))
        .filter(invoice::Column::Version.eq(invoice.version))
        .exec(conn)
        .await?;
    if updated.rows_affected == 0 {
        return Err(ServiceError::stale_version(EntityKind::Invoice, invoice.id));
    }
    Ok(())
}

fn to_response(
    invoice: invoice::Model,
    items: Vec<invoice_item::Model>,
    now: DateTime<Utc>,
) -> InvoiceResponse {
    let status = invoice.effective_status(now);
    InvoiceResponse {
        id: invoice.id,
        company_id: invoice.company_id,
        customer_id: invoice.customer_id,
        order_id: invoice.order_id,
        bank_detail_id: invoice.bank_detail_id,
        invoice_number: invoice.invoice_number,
        invoice_date: invoice.invoice_date,
        due_date: invoice.due_date,
        sub_total: invoice.sub_total,
        tax_rate: invoice.tax_rate,
        tax_amount: invoice.tax_amount,
        shipping_cost: invoice.shipping_cost,
        total: invoice.total,
        currency: invoice.currency,
        status,
        paid_date: invoice.paid_date,
        notes: invoice.notes,
        version: invoice.version,
        created_at: invoice.created_at,
        updated_at: invoice.updated_at,
        items: items
            .into_iter()
            .map(|item| InvoiceItemResponse {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
                total: item.total,
            })
            .collect(),
    }
}
