pub mod bank_detail;
pub mod company;
pub mod customer;
pub mod invoice;
pub mod invoice_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod sequence_counter;
