//! Invoice lifecycle tests: creation with ordered reference validation,
//! derivation from orders, per-line tax recomputation, status transitions,
//! and the bank-detail guards.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestCtx;
use ledgerline::models::InvoiceStatus;
use ledgerline::services::invoicing::{
    CreateBankDetailRequest, CreateInvoiceRequest, NewInvoiceItem,
};
use ledgerline::services::orders::{CreateOrderRequest, NewOrderItem};
use ledgerline::{EntityKind, ServiceError};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn invoice_request(customer_id: Uuid, items: Vec<NewInvoiceItem>) -> CreateInvoiceRequest {
    CreateInvoiceRequest {
        customer_id,
        order_id: None,
        bank_detail_id: None,
        invoice_number: None,
        items,
        shipping_cost: dec!(0),
        currency: "USD".to_string(),
        invoice_date: None,
        due_date: None,
        notes: None,
    }
}

#[tokio::test]
async fn create_from_order_copies_the_snapshot() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(7).await;
    let customer_id = app.seed_customer(&ctx, "Customer 42").await;
    let product_a = app.seed_product(&ctx, "INV-A", dec!(10.00), 50).await;
    let product_b = app.seed_product(&ctx, "INV-B", dec!(5.00), 50).await;

    let order = app
        .orders
        .create_order(
            &ctx,
            CreateOrderRequest {
                customer_id,
                items: vec![
                    NewOrderItem {
                        product_id: product_a,
                        quantity: 2,
                        unit_price: dec!(10.00),
                    },
                    NewOrderItem {
                        product_id: product_b,
                        quantity: 1,
                        unit_price: dec!(5.00),
                    },
                ],
                tax_rate: dec!(10),
                shipping_cost: dec!(3.00),
                currency: "USD".to_string(),
                due_date: None,
                notes: None,
            },
        )
        .await
        .expect("create order");

    let invoice = app
        .invoices
        .create_from_order(&ctx, order.id)
        .await
        .expect("derive invoice");

    assert_eq!(invoice.invoice_number, "INV-7-000001");
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.customer_id, customer_id);
    assert_eq!(invoice.order_id, Some(order.id));
    assert_eq!(invoice.currency, "USD");
    assert_eq!(invoice.sub_total, dec!(25.00));
    assert_eq!(invoice.tax_amount, dec!(2.50));
    // Shipping is included in the invoice total.
    assert_eq!(invoice.total, dec!(30.50));
    assert_eq!(invoice.items.len(), 2);
    assert!(invoice.items.iter().all(|i| i.tax_rate == dec!(10)));

    // The source order is untouched.
    let order_after = app.orders.get_order(&ctx, order.id).await.expect("get");
    assert_eq!(order_after.version, order.version);
    assert_eq!(order_after.total, dec!(30.50));

    // And the 1:1 lookup resolves it.
    let found = app
        .invoices
        .find_invoice_by_order(&ctx, order.id)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(found.id, invoice.id);
}

#[tokio::test]
async fn a_second_invoice_for_the_same_order_conflicts() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(1).await;
    let customer_id = app.seed_customer(&ctx, "Once").await;

    let order = app
        .orders
        .create_order(
            &ctx,
            CreateOrderRequest {
                customer_id,
                items: vec![],
                tax_rate: dec!(0),
                shipping_cost: dec!(0),
                currency: "EUR".to_string(),
                due_date: None,
                notes: None,
            },
        )
        .await
        .expect("create order");

    app.invoices
        .create_from_order(&ctx, order.id)
        .await
        .expect("first derivation");

    let err = app
        .invoices
        .create_from_order(&ctx, order.id)
        .await
        .expect_err("second derivation must conflict");
    assert_matches!(err, ServiceError::Conflict(_));

    // The explicit-create path hits the same guard.
    let mut request = invoice_request(customer_id, vec![]);
    request.order_id = Some(order.id);
    let err = app
        .invoices
        .create_invoice(&ctx, request)
        .await
        .expect_err("explicit create must conflict too");
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn reference_validation_names_the_first_missing_entity() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(2).await;
    let customer_id = app.seed_customer(&ctx, "Refs").await;

    // Unknown customer.
    let err = app
        .invoices
        .create_invoice(&ctx, invoice_request(Uuid::new_v4(), vec![]))
        .await
        .expect_err("unknown customer");
    assert_matches!(
        err,
        ServiceError::NotFound {
            kind: EntityKind::Customer,
            ..
        }
    );

    // Known customer, unknown order.
    let mut request = invoice_request(customer_id, vec![]);
    request.order_id = Some(Uuid::new_v4());
    let err = app
        .invoices
        .create_invoice(&ctx, request)
        .await
        .expect_err("unknown order");
    assert_matches!(
        err,
        ServiceError::NotFound {
            kind: EntityKind::Order,
            ..
        }
    );

    // Known customer, unknown bank detail.
    let mut request = invoice_request(customer_id, vec![]);
    request.bank_detail_id = Some(Uuid::new_v4());
    let err = app
        .invoices
        .create_invoice(&ctx, request)
        .await
        .expect_err("unknown bank detail");
    assert_matches!(
        err,
        ServiceError::NotFound {
            kind: EntityKind::BankDetail,
            ..
        }
    );

    // Nothing leaked through the failed attempts.
    let listing = app.invoices.list_invoices(&ctx, 1, 10).await.expect("list");
    assert_eq!(listing.total, 0);
}

#[tokio::test]
async fn client_supplied_invoice_numbers_are_overwritten() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(3).await;
    let customer_id = app.seed_customer(&ctx, "Numbered").await;

    let mut request = invoice_request(customer_id, vec![]);
    request.invoice_number = Some("INV-999-424242".to_string());

    let invoice = app
        .invoices
        .create_invoice(&ctx, request)
        .await
        .expect("create invoice");
    assert_eq!(invoice.invoice_number, "INV-3-000001");
}

#[tokio::test]
async fn per_line_tax_rates_drive_invoice_totals() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(4).await;
    let customer_id = app.seed_customer(&ctx, "Taxed").await;
    let product_a = app.seed_product(&ctx, "TAX-A", dec!(100.00), 10).await;
    let product_b = app.seed_product(&ctx, "TAX-B", dec!(50.00), 10).await;

    let invoice = app
        .invoices
        .create_invoice(
            &ctx,
            invoice_request(
                customer_id,
                vec![
                    NewInvoiceItem {
                        product_id: product_a,
                        quantity: 1,
                        unit_price: dec!(100.00),
                        tax_rate: dec!(20),
                    },
                    NewInvoiceItem {
                        product_id: product_b,
                        quantity: 2,
                        unit_price: dec!(50.00),
                        tax_rate: dec!(5),
                    },
                ],
            ),
        )
        .await
        .expect("create invoice");

    assert_eq!(invoice.sub_total, dec!(200.00));
    assert_eq!(invoice.tax_amount, dec!(25.00));
    assert_eq!(invoice.total, dec!(225.00));

    // Dropping the high-tax line recomputes both figures.
    let high_tax_item = invoice
        .items
        .iter()
        .find(|i| i.tax_rate == dec!(20))
        .expect("line present")
        .id;
    let invoice = app
        .invoices
        .remove_item(&ctx, invoice.id, high_tax_item)
        .await
        .expect("remove item");
    assert_eq!(invoice.sub_total, dec!(100.00));
    assert_eq!(invoice.tax_amount, dec!(5.00));
    assert_eq!(invoice.total, dec!(105.00));
    assert_eq!(invoice.version, 2);
}

#[tokio::test]
async fn paying_an_invoice_stamps_the_paid_date() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(5).await;
    let customer_id = app.seed_customer(&ctx, "Payer").await;

    let invoice = app
        .invoices
        .create_invoice(&ctx, invoice_request(customer_id, vec![]))
        .await
        .expect("create invoice");
    assert_eq!(invoice.paid_date, None);

    let change = app
        .invoices
        .update_invoice_status(&ctx, invoice.id, InvoiceStatus::Sent)
        .await
        .expect("send");
    assert_eq!(change.previous, InvoiceStatus::Draft);
    assert_eq!(change.invoice.paid_date, None);

    let change = app
        .invoices
        .update_invoice_status(&ctx, invoice.id, InvoiceStatus::Paid)
        .await
        .expect("pay");
    assert_eq!(change.current, InvoiceStatus::Paid);
    assert!(change.invoice.paid_date.is_some());
}

#[tokio::test]
async fn draft_cannot_jump_straight_to_paid() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(6).await;
    let customer_id = app.seed_customer(&ctx, "Jumper").await;

    let invoice = app
        .invoices
        .create_invoice(&ctx, invoice_request(customer_id, vec![]))
        .await
        .expect("create invoice");

    let err = app
        .invoices
        .update_invoice_status(&ctx, invoice.id, InvoiceStatus::Paid)
        .await
        .expect_err("draft -> paid is illegal");
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    let invoice = app
        .invoices
        .get_invoice(&ctx, invoice.id)
        .await
        .expect("get");
    assert_eq!(invoice.status, InvoiceStatus::Draft);
}

#[tokio::test]
async fn a_sent_invoice_past_due_reads_as_overdue() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(8).await;
    let customer_id = app.seed_customer(&ctx, "Late").await;

    let mut request = invoice_request(customer_id, vec![]);
    request.due_date = Some(Utc::now() - Duration::days(3));

    let invoice = app
        .invoices
        .create_invoice(&ctx, request)
        .await
        .expect("create invoice");
    // Draft is never derived overdue.
    assert_eq!(invoice.status, InvoiceStatus::Draft);

    app.invoices
        .update_invoice_status(&ctx, invoice.id, InvoiceStatus::Sent)
        .await
        .expect("send");

    let invoice = app
        .invoices
        .get_invoice(&ctx, invoice.id)
        .await
        .expect("get");
    assert_eq!(invoice.status, InvoiceStatus::Overdue);

    // An overdue invoice can still be paid.
    let change = app
        .invoices
        .update_invoice_status(&ctx, invoice.id, InvoiceStatus::Paid)
        .await
        .expect("pay overdue");
    assert_eq!(change.current, InvoiceStatus::Paid);
}

#[tokio::test]
async fn duplicate_iban_within_a_company_conflicts() {
    let app = TestCtx::new().await;
    let ctx_a = app.seed_company(9).await;
    let ctx_b = app.seed_company(10).await;

    let iban = "DE89370400440532013000".to_string();
    app.invoices
        .create_bank_detail(
            &ctx_a,
            CreateBankDetailRequest {
                bank_name: "First Bank".to_string(),
                iban: iban.clone(),
            },
        )
        .await
        .expect("first registration");

    let err = app
        .invoices
        .create_bank_detail(
            &ctx_a,
            CreateBankDetailRequest {
                bank_name: "Second Bank".to_string(),
                iban: iban.clone(),
            },
        )
        .await
        .expect_err("duplicate within the tenant");
    assert_matches!(err, ServiceError::Conflict(_));

    // The same IBAN is fine for a different tenant.
    app.invoices
        .create_bank_detail(
            &ctx_b,
            CreateBankDetailRequest {
                bank_name: "Other Bank".to_string(),
                iban,
            },
        )
        .await
        .expect("other tenant may reuse");
}

#[tokio::test]
async fn referenced_bank_details_cannot_be_deleted() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(11).await;
    let customer_id = app.seed_customer(&ctx, "Banked").await;

    let bank = app
        .invoices
        .create_bank_detail(
            &ctx,
            CreateBankDetailRequest {
                bank_name: "Main Bank".to_string(),
                iban: "GB29NWBK60161331926819".to_string(),
            },
        )
        .await
        .expect("register bank detail");

    let mut request = invoice_request(customer_id, vec![]);
    request.bank_detail_id = Some(bank.id);
    let invoice = app
        .invoices
        .create_invoice(&ctx, request)
        .await
        .expect("create invoice");

    let err = app
        .invoices
        .delete_bank_detail(&ctx, bank.id)
        .await
        .expect_err("still referenced");
    assert_matches!(err, ServiceError::Conflict(_));

    // Once the invoice is gone the deletion goes through.
    app.invoices
        .delete_invoice(&ctx, invoice.id)
        .await
        .expect("delete invoice");
    app.invoices
        .delete_bank_detail(&ctx, bank.id)
        .await
        .expect("delete bank detail");
}

#[tokio::test]
async fn soft_deleted_invoices_disappear_from_reads() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(12).await;
    let customer_id = app.seed_customer(&ctx, "Gone").await;

    let invoice = app
        .invoices
        .create_invoice(&ctx, invoice_request(customer_id, vec![]))
        .await
        .expect("create invoice");

    app.invoices
        .delete_invoice(&ctx, invoice.id)
        .await
        .expect("soft delete");

    let err = app
        .invoices
        .get_invoice(&ctx, invoice.id)
        .await
        .expect_err("hidden");
    assert_matches!(
        err,
        ServiceError::NotFound {
            kind: EntityKind::Invoice,
            ..
        }
    );
    assert!(app
        .invoices
        .list_invoices_by_customer(&ctx, customer_id)
        .await
        .expect("by customer")
        .is_empty());
}
