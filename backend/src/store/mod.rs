//! Persistence boundary
//!
//! Services never talk to the database directly. They open a [`UnitOfWork`]
//! through the [`Store`], perform read-then-write steps against rows locked
//! for the lifetime of the unit, and commit once. Dropping a unit without
//! committing rolls every write back.
//!
//! Two implementations exist: [`PgStore`] over `sqlx` and [`MemoryStore`]
//! for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    AlertType, Allocation, DeliveryNote, DeliveryNoteFilter, MovementFilter, NewDeliveryNote,
    NewMovement, NewNotification, NewPartnerRebate, NewPayment, NewRoyalty, NewStockAlert, Order,
    OrderPaymentUpdate, OrderStatus, Payment, RateRule, StockAlert, StockMovement, Withdrawal,
    WithdrawalKind, Work,
};
use shared::Pagination;
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::{MemoryState, MemoryStore};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique constraint rejected the write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A stored value could not be mapped back to the domain model
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Entry point to persisted state
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transactional unit of work
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Check connectivity
    async fn ping(&self) -> StoreResult<()>;

    async fn list_works(&self) -> StoreResult<Vec<Work>>;

    /// Most recent movements first
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        limit: i64,
    ) -> StoreResult<Vec<StockMovement>>;

    /// Total OUTBOUND quantity recorded since `since`
    async fn outbound_quantity_since(&self, since: DateTime<Utc>) -> StoreResult<i64>;

    async fn list_alerts(&self, include_resolved: bool) -> StoreResult<Vec<StockAlert>>;

    async fn list_allocations(&self, partner_id: Option<Uuid>) -> StoreResult<Vec<Allocation>>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Orders in one of `statuses` that have no delivery note, oldest first
    async fn orders_missing_delivery_note(&self, statuses: &[OrderStatus])
        -> StoreResult<Vec<Uuid>>;

    async fn get_delivery_note(&self, id: Uuid) -> StoreResult<Option<DeliveryNote>>;

    /// One page of notes, newest first, with the total matching count
    async fn list_delivery_notes(
        &self,
        filter: &DeliveryNoteFilter,
        pagination: Pagination,
    ) -> StoreResult<(Vec<DeliveryNote>, i64)>;
}

/// A transaction over the store
///
/// `lock_*` methods read a row and hold it against concurrent writers until
/// the unit commits or is dropped.
#[async_trait]
pub trait UnitOfWork: Send {
    // ------------------------------------------------------------------
    // Works and movements
    // ------------------------------------------------------------------

    async fn lock_work(&mut self, id: Uuid) -> StoreResult<Option<Work>>;

    async fn set_work_stock(&mut self, id: Uuid, stock: i32, physical_stock: i32)
        -> StoreResult<()>;

    async fn insert_movement(&mut self, movement: NewMovement) -> StoreResult<StockMovement>;

    async fn lock_movement(&mut self, id: Uuid) -> StoreResult<Option<StockMovement>>;

    async fn delete_movement(&mut self, id: Uuid) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Allocations
    // ------------------------------------------------------------------

    async fn lock_allocation(
        &mut self,
        partner_id: Uuid,
        work_id: Uuid,
    ) -> StoreResult<Option<Allocation>>;

    /// Insert or update by `(partner_id, work_id)`
    async fn save_allocation(&mut self, allocation: &Allocation) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    async fn all_works(&mut self) -> StoreResult<Vec<Work>>;

    async fn unresolved_alerts(&mut self, work_ids: &[Uuid]) -> StoreResult<Vec<StockAlert>>;

    /// Resolve unresolved alerts of one type for the given works
    async fn resolve_alerts(
        &mut self,
        alert_type: AlertType,
        work_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Insert alerts, skipping any that would duplicate an unresolved one
    async fn insert_alerts(&mut self, alerts: &[NewStockAlert]) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Orders and delivery notes
    // ------------------------------------------------------------------

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn update_order_payment(
        &mut self,
        id: Uuid,
        update: &OrderPaymentUpdate,
    ) -> StoreResult<()>;

    async fn insert_payment(&mut self, payment: NewPayment) -> StoreResult<Payment>;

    async fn delivery_note_for_order(&mut self, order_id: Uuid)
        -> StoreResult<Option<DeliveryNote>>;

    async fn count_delivery_notes_with_prefix(&mut self, prefix: &str) -> StoreResult<i64>;

    async fn insert_delivery_note(&mut self, note: NewDeliveryNote) -> StoreResult<DeliveryNote>;

    async fn lock_delivery_note(&mut self, id: Uuid) -> StoreResult<Option<DeliveryNote>>;

    async fn update_delivery_note(&mut self, note: &DeliveryNote) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Record a processed provider event; false when it was already recorded
    async fn claim_idempotency_key(&mut self, key: &str) -> StoreResult<bool>;

    async fn active_rate_rules(&mut self) -> StoreResult<Vec<RateRule>>;

    /// False when a royalty already exists for `(order_id, work_id)`
    async fn insert_royalty(&mut self, royalty: NewRoyalty) -> StoreResult<bool>;

    /// False when a rebate already exists for `(order_id, work_id)`
    async fn insert_rebate(&mut self, rebate: NewPartnerRebate) -> StoreResult<bool>;

    async fn lock_withdrawal(
        &mut self,
        kind: WithdrawalKind,
        id: Uuid,
    ) -> StoreResult<Option<Withdrawal>>;

    async fn update_withdrawal(&mut self, withdrawal: &Withdrawal) -> StoreResult<()>;

    /// Mark an author's approved, unpaid royalties as paid
    async fn mark_royalties_paid(&mut self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;

    async fn partner_for_user(&mut self, user_id: Uuid) -> StoreResult<Option<Uuid>>;

    /// Mark a partner's validated rebates as paid
    async fn mark_rebates_paid(&mut self, partner_id: Uuid, at: DateTime<Utc>)
        -> StoreResult<u64>;

    async fn insert_notification(&mut self, notification: &NewNotification) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
