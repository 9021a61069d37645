//! Shared harness: an in-memory SQLite database with the embedded
//! migrations applied, plus seed helpers for tenants, customers, and
//! products.

use std::sync::Arc;

use chrono::Utc;
use ledgerline::db::DbPool;
use ledgerline::entities::{company, customer, product};
use ledgerline::services::{InvoiceService, OrderService};
use ledgerline::{db, AppConfig, TenantContext};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

pub struct TestCtx {
    pub db: Arc<DbPool>,
    pub orders: OrderService,
    pub invoices: InvoiceService,
}

impl TestCtx {
    pub async fn new() -> Self {
        // A single pooled connection keeps the in-memory database alive
        // and serializes concurrent callers the way a row lock would.
        let mut cfg = AppConfig::new("sqlite::memory:");
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        let db = Arc::new(pool);

        Self {
            orders: OrderService::new(db.clone(), None),
            invoices: InvoiceService::new(db.clone(), None),
            db,
        }
    }

    /// Seeds a tenant and returns a context scoped to it.
    pub async fn seed_company(&self, id: i64) -> TenantContext {
        company::ActiveModel {
            id: Set(id),
            name: Set(format!("Company {id}")),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed company");
        TenantContext::new(id)
    }

    pub async fn seed_customer(&self, ctx: &TenantContext, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        customer::ActiveModel {
            id: Set(id),
            company_id: Set(ctx.company_id()),
            name: Set(name.to_string()),
            email: Set(None),
            is_deleted: Set(false),
            created_at: Set(Utc::now()),
            created_by: Set(None),
            updated_at: Set(None),
            updated_by: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed customer");
        id
    }

    pub async fn seed_product(
        &self,
        ctx: &TenantContext,
        sku: &str,
        unit_price: Decimal,
        stock: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            company_id: Set(ctx.company_id()),
            name: Set(format!("Product {sku}")),
            sku: Set(sku.to_string()),
            unit_price: Set(unit_price),
            stock_quantity: Set(stock),
            status: Set("active".to_string()),
            is_deleted: Set(false),
            created_at: Set(Utc::now()),
            created_by: Set(None),
            updated_at: Set(None),
            updated_by: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("fetch product")
            .expect("product exists")
            .stock_quantity
    }
}
