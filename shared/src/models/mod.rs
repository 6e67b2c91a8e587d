//! Domain models for the inventory ledger and fulfillment workflow

mod alert;
mod allocation;
mod delivery_note;
mod notification;
mod order;
mod provider_event;
mod rate;
mod stock;

pub use alert::*;
pub use allocation::*;
pub use delivery_note::*;
pub use notification::*;
pub use order::*;
pub use provider_event::*;
pub use rate::*;
pub use stock::*;

/// Error returned when a stored or submitted enum value is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
