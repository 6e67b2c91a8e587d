//! HTTP request handlers

pub mod delivery_note;
pub mod health;
pub mod partner_stock;
pub mod stock;
pub mod webhook;

pub use delivery_note::{
    create_delivery_note, create_missing_delivery_notes, get_delivery_note, list_delivery_notes,
    update_delivery_note,
};
pub use health::health_check;
pub use partner_stock::{
    allocate_partner_stock, list_partner_stock, record_partner_return, record_partner_sale,
};
pub use stock::{apply_inventory, delete_movement, get_stock, record_movement};
pub use webhook::handle_webhook;
