//! Shared types and rules for the book marketplace inventory ledger
//!
//! This crate holds the pure domain model used by the backend: stock
//! arithmetic, alert reconciliation planning, the delivery-note state
//! machine and rate resolution. Nothing in here performs I/O.

pub mod alerts;
pub mod ledger;
pub mod models;
pub mod rates;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
