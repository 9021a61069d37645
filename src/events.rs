//! Lifecycle notifications for external collaborators.
//!
//! The engine does not push to documents, email, or reporting itself; it
//! emits events on a channel that those collaborators consume. Losing a
//! subscriber never fails the originating operation; the authoritative
//! status-change signal is the operation's return value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{InvoiceStatus, OrderStatus};

/// Events emitted after a committed state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        company_id: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        company_id: i64,
        previous: OrderStatus,
        current: OrderStatus,
    },
    /// The recognized point at which downstream revenue reporting counts
    /// the order. The engine itself touches no revenue state.
    OrderCompleted {
        order_id: Uuid,
        company_id: i64,
    },
    OrderCancelled {
        order_id: Uuid,
        company_id: i64,
    },
    InvoiceCreated {
        invoice_id: Uuid,
        company_id: i64,
    },
    InvoiceStatusChanged {
        invoice_id: Uuid,
        company_id: i64,
        previous: InvoiceStatus,
        current: InvoiceStatus,
    },
    InvoicePaid {
        invoice_id: Uuid,
        company_id: i64,
        paid_date: DateTime<Utc>,
    },
    StockAdjusted {
        product_id: Uuid,
        company_id: i64,
        previous: i32,
        current: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {}", e))
    }
}

/// Convenience constructor for an event channel pair.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}
