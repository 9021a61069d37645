//! Ledgerline: multi-tenant order & invoice lifecycle engine.
//!
//! This crate is the consistency core of a business-tracking platform:
//! orders and invoices with their status state machines, tenant-scoped
//! identifier generation, derived-total recomputation, and the inventory
//! side effects of order transitions. Transport (HTTP/CLI), document
//! rendering, delivery, and authorization live in external collaborators
//! that consume the service objects exposed here.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod models;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use errors::{EntityKind, ServiceError};
pub use store::TenantContext;
