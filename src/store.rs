//! Tenant scoping for every read and write.
//!
//! The engine never filters by tenant ad hoc: a [`TenantContext`] is a
//! mandatory parameter of every service operation, and every query goes
//! through [`scoped_select`], which applies the company filter and the
//! soft-delete predicate unconditionally. A cross-tenant id is therefore
//! indistinguishable from a missing one.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Select};
use uuid::Uuid;

use crate::entities::{bank_detail, customer, invoice, order, product};
use crate::errors::{EntityKind, ServiceError};

/// The caller's tenant identity. Constructed once at the boundary (from
/// whatever authentication layer embeds this engine) and passed down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    company_id: i64,
    user_id: Option<Uuid>,
    superuser: bool,
}

impl TenantContext {
    pub fn new(company_id: i64) -> Self {
        Self {
            company_id,
            user_id: None,
            superuser: false,
        }
    }

    /// A context that bypasses the company filter. Reserved for the
    /// external authorization layer's designated superuser role.
    pub fn superuser(company_id: i64) -> Self {
        Self {
            company_id,
            user_id: None,
            superuser: true,
        }
    }

    /// Attach the acting user, recorded in `created_by`/`updated_by`.
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn company_id(&self) -> i64 {
        self.company_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn is_superuser(&self) -> bool {
        self.superuser
    }
}

/// Implemented by every business entity that lives inside a tenant and
/// supports soft deletion.
pub trait TenantScoped: EntityTrait {
    const KIND: EntityKind;

    fn id_column() -> Self::Column;
    fn company_column() -> Self::Column;
    fn deleted_column() -> Self::Column;
}

/// A select with the soft-delete predicate and (unless superuser) the
/// company filter already applied.
pub fn scoped_select<E: TenantScoped>(ctx: &TenantContext) -> Select<E> {
    let select = E::find().filter(E::deleted_column().eq(false));
    if ctx.is_superuser() {
        select
    } else {
        select.filter(E::company_column().eq(ctx.company_id()))
    }
}

/// Like [`scoped_select`] but including soft-deleted rows. Admin-scoped
/// reads only; nothing in the lifecycle paths uses this.
pub fn scoped_select_with_deleted<E: TenantScoped>(ctx: &TenantContext) -> Select<E> {
    let select = E::find();
    if ctx.is_superuser() {
        select
    } else {
        select.filter(E::company_column().eq(ctx.company_id()))
    }
}

/// Resolves an id within the tenant or fails with a typed `NotFound`.
pub async fn fetch_one<E, C>(
    conn: &C,
    ctx: &TenantContext,
    id: Uuid,
) -> Result<E::Model, ServiceError>
where
    E: TenantScoped,
    C: ConnectionTrait,
{
    scoped_select::<E>(ctx)
        .filter(E::id_column().eq(id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found(E::KIND, id))
}

/// Flips the soft-delete flag on one row within the tenant.
pub async fn soft_delete<E, C>(
    conn: &C,
    ctx: &TenantContext,
    id: Uuid,
) -> Result<(), ServiceError>
where
    E: TenantScoped,
    C: ConnectionTrait,
{
    let mut update = E::update_many()
        .col_expr(E::deleted_column(), Expr::value(true))
        .filter(E::id_column().eq(id))
        .filter(E::deleted_column().eq(false));
    if !ctx.is_superuser() {
        update = update.filter(E::company_column().eq(ctx.company_id()));
    }
    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::not_found(E::KIND, id));
    }
    Ok(())
}

impl TenantScoped for customer::Entity {
    const KIND: EntityKind = EntityKind::Customer;

    fn id_column() -> Self::Column {
        customer::Column::Id
    }
    fn company_column() -> Self::Column {
        customer::Column::CompanyId
    }
    fn deleted_column() -> Self::Column {
        customer::Column::IsDeleted
    }
}

impl TenantScoped for product::Entity {
    const KIND: EntityKind = EntityKind::Product;

    fn id_column() -> Self::Column {
        product::Column::Id
    }
    fn company_column() -> Self::Column {
        product::Column::CompanyId
    }
    fn deleted_column() -> Self::Column {
        product::Column::IsDeleted
    }
}

impl TenantScoped for bank_detail::Entity {
    const KIND: EntityKind = EntityKind::BankDetail;

    fn id_column() -> Self::Column {
        bank_detail::Column::Id
    }
    fn company_column() -> Self::Column {
        bank_detail::Column::CompanyId
    }
    fn deleted_column() -> Self::Column {
        bank_detail::Column::IsDeleted
    }
}

impl TenantScoped for order::Entity {
    const KIND: EntityKind = EntityKind::Order;

    fn id_column() -> Self::Column {
        order::Column::Id
    }
    fn company_column() -> Self::Column {
        order::Column::CompanyId
    }
    fn deleted_column() -> Self::Column {
        order::Column::IsDeleted
    }
}

impl TenantScoped for invoice::Entity {
    const KIND: EntityKind = EntityKind::Invoice;

    fn id_column() -> Self::Column {
        invoice::Column::Id
    }
    fn company_column() -> Self::Column {
        invoice::Column::CompanyId
    }
    fn deleted_column() -> Self::Column {
        invoice::Column::IsDeleted
    }
}
