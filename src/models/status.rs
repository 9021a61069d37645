//! Closed status enums for orders and invoices.
//!
//! Statuses are stored as strings in the database but internal logic only
//! ever branches on these enums; parsing and rendering happen here, at the
//! process boundary, and nowhere else.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// The progression Draft < Pending < Confirmed < Shipped < Delivered <
/// Completed is strictly forward; Cancelled is reachable from any
/// non-terminal status. Cancelled and Completed accept no further
/// transitions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl OrderStatus {
    /// Position in the forward progression. Cancelled sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Draft => Some(0),
            Self::Pending => Some(1),
            Self::Confirmed => Some(2),
            Self::Shipped => Some(3),
            Self::Delivered => Some(4),
            Self::Completed => Some(5),
            Self::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() || to == self {
            return false;
        }
        if to == Self::Cancelled {
            return true;
        }
        match (self.rank(), to.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

/// Invoice lifecycle status.
///
/// Overdue is primarily derived on read (a Sent invoice past its due date)
/// but may also be persisted explicitly; either way Paid and Cancelled are
/// the only exits from it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvoiceStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "overdue")]
    Overdue,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl InvoiceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        match self {
            Self::Draft => matches!(to, Self::Sent | Self::Cancelled),
            Self::Sent => matches!(to, Self::Paid | Self::Overdue | Self::Cancelled),
            Self::Overdue => matches!(to, Self::Paid | Self::Cancelled),
            Self::Paid | Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(OrderStatus::Draft, OrderStatus::Pending, true)]
    #[case(OrderStatus::Draft, OrderStatus::Completed, true)]
    #[case(OrderStatus::Draft, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Pending, false)]
    #[case(OrderStatus::Shipped, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Completed, true)]
    #[case(OrderStatus::Delivered, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Completed, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Draft, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Pending, false)]
    fn order_transition_matrix(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");
    }

    #[rstest]
    #[case(InvoiceStatus::Draft, InvoiceStatus::Sent, true)]
    #[case(InvoiceStatus::Draft, InvoiceStatus::Paid, false)]
    #[case(InvoiceStatus::Sent, InvoiceStatus::Paid, true)]
    #[case(InvoiceStatus::Sent, InvoiceStatus::Overdue, true)]
    #[case(InvoiceStatus::Overdue, InvoiceStatus::Paid, true)]
    #[case(InvoiceStatus::Paid, InvoiceStatus::Cancelled, false)]
    #[case(InvoiceStatus::Cancelled, InvoiceStatus::Draft, false)]
    fn invoice_transition_matrix(
        #[case] from: InvoiceStatus,
        #[case] to: InvoiceStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");
    }

    #[test]
    fn terminal_order_states_accept_nothing() {
        use strum::IntoEnumIterator;
        for terminal in [OrderStatus::Cancelled, OrderStatus::Completed] {
            for to in OrderStatus::iter() {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn statuses_round_trip_through_their_display_names() {
        assert_eq!(OrderStatus::Draft.to_string(), "draft");
        assert_eq!(OrderStatus::from_str("confirmed"), Ok(OrderStatus::Confirmed));
        assert_eq!(InvoiceStatus::Overdue.to_string(), "overdue");
        assert_eq!(InvoiceStatus::from_str("paid"), Ok(InvoiceStatus::Paid));
    }
}
