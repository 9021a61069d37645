//! Pure derived-total computation for orders and invoices.
//!
//! Orders carry a single flat tax rate; invoices tax each line at its own
//! rate. Both variants add shipping to the grand total, and tax amounts
//! round to two decimal places at the point of summation; line totals and
//! subtotals stay exact.

use rust_decimal::Decimal;

const PERCENT: Decimal = Decimal::ONE_HUNDRED;

/// Monetary scale for tax amounts.
const MONEY_DP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceLine {
    pub quantity: i32,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub sub_total: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// `quantity × unit_price`, the stored per-line total.
pub fn line_total(quantity: i32, unit_price: Decimal) -> Decimal {
    Decimal::from(quantity) * unit_price
}

/// Order totals: flat `tax_rate` (percentage) over the subtotal.
pub fn compute_order_totals(
    lines: &[OrderLine],
    tax_rate: Decimal,
    shipping_cost: Decimal,
) -> Totals {
    let sub_total: Decimal = lines
        .iter()
        .map(|line| line_total(line.quantity, line.unit_price))
        .sum();
    let tax_amount = (sub_total * tax_rate / PERCENT).round_dp(MONEY_DP);
    Totals {
        sub_total,
        tax_amount,
        total: sub_total + tax_amount + shipping_cost,
    }
}

/// Invoice totals: each line taxed at its own rate. Shipping is included
/// in the grand total, same as orders.
pub fn compute_invoice_totals(lines: &[InvoiceLine], shipping_cost: Decimal) -> Totals {
    let sub_total: Decimal = lines
        .iter()
        .map(|line| line_total(line.quantity, line.unit_price))
        .sum();
    let tax_amount: Decimal = lines
        .iter()
        .map(|line| line_total(line.quantity, line.unit_price) * line.tax_rate / PERCENT)
        .sum::<Decimal>()
        .round_dp(MONEY_DP);
    Totals {
        sub_total,
        tax_amount,
        total: sub_total + tax_amount + shipping_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_totals_reference_scenario() {
        // Two of product A at 10.00, one of product B at 5.00, 10% tax,
        // 3.00 shipping.
        let lines = [
            OrderLine {
                quantity: 2,
                unit_price: dec!(10.00),
            },
            OrderLine {
                quantity: 1,
                unit_price: dec!(5.00),
            },
        ];
        let totals = compute_order_totals(&lines, dec!(10), dec!(3.00));
        assert_eq!(totals.sub_total, dec!(25.00));
        assert_eq!(totals.tax_amount, dec!(2.50));
        assert_eq!(totals.total, dec!(30.50));
    }

    #[test]
    fn empty_order_keeps_shipping_in_total() {
        // Shipping persists even with zero items; this is intended.
        let totals = compute_order_totals(&[], dec!(10), dec!(3.00));
        assert_eq!(totals.sub_total, Decimal::ZERO);
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.total, dec!(3.00));
    }

    #[test]
    fn invoice_lines_tax_independently() {
        let lines = [
            InvoiceLine {
                quantity: 1,
                unit_price: dec!(100.00),
                tax_rate: dec!(20),
            },
            InvoiceLine {
                quantity: 2,
                unit_price: dec!(50.00),
                tax_rate: dec!(5),
            },
        ];
        let totals = compute_invoice_totals(&lines, Decimal::ZERO);
        assert_eq!(totals.sub_total, dec!(200.00));
        assert_eq!(totals.tax_amount, dec!(25.00));
        assert_eq!(totals.total, dec!(225.00));
    }

    #[test]
    fn invoice_total_includes_shipping() {
        let lines = [InvoiceLine {
            quantity: 1,
            unit_price: dec!(10.00),
            tax_rate: Decimal::ZERO,
        }];
        let totals = compute_invoice_totals(&lines, dec!(4.50));
        assert_eq!(totals.total, dec!(14.50));
    }

    #[test]
    fn tax_rounds_to_cents() {
        let lines = [OrderLine {
            quantity: 3,
            unit_price: dec!(0.33),
        }];
        // 0.99 * 7.25% = 0.071775 -> 0.07
        let totals = compute_order_totals(&lines, dec!(7.25), Decimal::ZERO);
        assert_eq!(totals.tax_amount, dec!(0.07));
    }

    fn money() -> impl Strategy<Value = Decimal> {
        // Cent-denominated prices up to 100.00.
        (0i64..10_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn order_lines() -> impl Strategy<Value = Vec<OrderLine>> {
        proptest::collection::vec(
            (1i32..100, money()).prop_map(|(quantity, unit_price)| OrderLine {
                quantity,
                unit_price,
            }),
            0..12,
        )
    }

    proptest! {
        #[test]
        fn subtotal_is_sum_of_line_totals(lines in order_lines(), rate in 0i64..40, shipping in money()) {
            let rate = Decimal::from(rate);
            let totals = compute_order_totals(&lines, rate, shipping);
            let expected: Decimal = lines
                .iter()
                .map(|l| line_total(l.quantity, l.unit_price))
                .sum();
            prop_assert_eq!(totals.sub_total, expected);
            prop_assert_eq!(totals.total, totals.sub_total + totals.tax_amount + shipping);
        }

        #[test]
        fn invoice_with_uniform_rate_matches_order_calculator(lines in order_lines(), rate in 0i64..40) {
            // A flat-rate invoice and an order over the same lines agree on
            // the subtotal and differ on tax only by per-line rounding.
            let rate = Decimal::from(rate);
            let invoice_lines: Vec<InvoiceLine> = lines
                .iter()
                .map(|l| InvoiceLine { quantity: l.quantity, unit_price: l.unit_price, tax_rate: rate })
                .collect();
            let order = compute_order_totals(&lines, rate, Decimal::ZERO);
            let invoice = compute_invoice_totals(&invoice_lines, Decimal::ZERO);
            prop_assert_eq!(order.sub_total, invoice.sub_total);
            prop_assert!((order.tax_amount - invoice.tax_amount).abs() <= Decimal::new(1, 2));
        }
    }
}
