//! Direct tests of the inventory adjuster: batch atomicity, the two
//! deduction policies, and the deduct-restore identity.

mod common;

use assert_matches::assert_matches;
use common::TestCtx;
use ledgerline::services::{DeductionPolicy, InventoryAdjuster, StockDelta};
use ledgerline::ServiceError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn deduct_then_restore_is_identity() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(1).await;
    let product_id = app.seed_product(&ctx, "RT", dec!(1.00), 12).await;

    let deduct = [StockDelta {
        product_id,
        delta: -5,
    }];
    let levels = InventoryAdjuster::adjust(&*app.db, &ctx, &deduct, DeductionPolicy::Reject)
        .await
        .expect("deduct");
    assert_eq!(levels[0].previous, 12);
    assert_eq!(levels[0].current, 7);

    let restore = [StockDelta {
        product_id,
        delta: 5,
    }];
    let levels = InventoryAdjuster::adjust(&*app.db, &ctx, &restore, DeductionPolicy::Reject)
        .await
        .expect("restore");
    assert_eq!(levels[0].current, 12);
    assert_eq!(app.stock_of(product_id).await, 12);
}

#[tokio::test]
async fn reject_policy_applies_nothing_on_failure() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(2).await;
    let plenty = app.seed_product(&ctx, "OK", dec!(1.00), 50).await;
    let scarce = app.seed_product(&ctx, "LOW", dec!(1.00), 2).await;

    let deltas = [
        StockDelta {
            product_id: plenty,
            delta: -10,
        },
        StockDelta {
            product_id: scarce,
            delta: -3,
        },
    ];
    let err = InventoryAdjuster::adjust(&*app.db, &ctx, &deltas, DeductionPolicy::Reject)
        .await
        .expect_err("short product fails the batch");
    assert_matches!(err, ServiceError::InsufficientStock { product_id } if product_id == scarce);

    // The batch failed before any write, so the first product is intact.
    assert_eq!(app.stock_of(plenty).await, 50);
    assert_eq!(app.stock_of(scarce).await, 2);
}

#[tokio::test]
async fn floor_at_zero_clamps_instead_of_failing() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(3).await;
    let product_id = app.seed_product(&ctx, "FLOOR", dec!(1.00), 2).await;

    let deltas = [StockDelta {
        product_id,
        delta: -9,
    }];
    let levels = InventoryAdjuster::adjust(&*app.db, &ctx, &deltas, DeductionPolicy::FloorAtZero)
        .await
        .expect("floored deduction");
    assert_eq!(levels[0].previous, 2);
    assert_eq!(levels[0].current, 0);
    assert_eq!(app.stock_of(product_id).await, 0);
}

#[tokio::test]
async fn a_stale_quantity_write_is_a_conflict() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(5).await;
    let product_id = app.seed_product(&ctx, "RACE", dec!(1.00), 10).await;

    // Two deltas for one product act as two writers that both read
    // quantity 10; after the first lands, the second's guard finds the
    // row changed and refuses to overwrite it.
    let deltas = [
        StockDelta {
            product_id,
            delta: -1,
        },
        StockDelta {
            product_id,
            delta: -1,
        },
    ];
    let err = InventoryAdjuster::adjust(&*app.db, &ctx, &deltas, DeductionPolicy::Reject)
        .await
        .expect_err("second write is stale");
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn adjusting_an_unknown_product_is_not_found() {
    let app = TestCtx::new().await;
    let ctx = app.seed_company(4).await;

    let deltas = [StockDelta {
        product_id: uuid::Uuid::new_v4(),
        delta: -1,
    }];
    let err = InventoryAdjuster::adjust(&*app.db, &ctx, &deltas, DeductionPolicy::Reject)
        .await
        .expect_err("unknown product");
    assert_matches!(err, ServiceError::NotFound { .. });
}
