//! Business logic services for the book inventory ledger

pub mod alerts;
pub mod allocation;
pub mod delivery_note;
pub mod notification;
pub mod rates;
pub mod settlement;
pub mod stock;

pub use alerts::AlertService;
pub use allocation::AllocationService;
pub use delivery_note::DeliveryNoteService;
pub use notification::NotificationOutbox;
pub use settlement::SettlementService;
pub use stock::StockService;
