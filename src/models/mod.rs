pub mod status;

pub use status::{InvoiceStatus, OrderStatus};
