pub mod inventory;
pub mod invoicing;
pub mod orders;
pub mod sequences;
pub mod totals;

pub use inventory::{DeductionPolicy, InventoryAdjuster, StockDelta, StockLevel};
pub use invoicing::InvoiceService;
pub use orders::OrderService;
pub use sequences::{SequenceAllocator, Series};
