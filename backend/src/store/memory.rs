//! In-memory store
//!
//! A unit of work takes the store-wide lock, edits a private copy of the
//! state and swaps it in on commit. Units are therefore serialised, which
//! gives the same isolation the Postgres row locks provide.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    AlertType, Allocation, DeliveryNote, DeliveryNoteFilter, DeliveryNoteStatus, MovementFilter,
    MovementType, NewDeliveryNote, NewMovement, NewNotification, NewPartnerRebate, NewPayment,
    NewRoyalty, NewStockAlert, Order, OrderPaymentUpdate, OrderStatus, PartnerRebate, Payment,
    RateRule, RebateStatus, Royalty, StockAlert, StockMovement, ValidationDetails, Withdrawal,
    WithdrawalKind, Work,
};
use shared::Pagination;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, UnitOfWork};

/// Everything the in-memory store holds
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub works: HashMap<Uuid, Work>,
    pub movements: Vec<StockMovement>,
    pub allocations: Vec<Allocation>,
    pub alerts: Vec<StockAlert>,
    pub orders: HashMap<Uuid, Order>,
    pub payments: Vec<Payment>,
    pub delivery_notes: Vec<DeliveryNote>,
    pub rate_rules: Vec<RateRule>,
    pub royalties: Vec<Royalty>,
    pub rebates: Vec<PartnerRebate>,
    pub withdrawals: Vec<Withdrawal>,
    /// partner id -> owning user id
    pub partners: HashMap<Uuid, Uuid>,
    pub processed_events: HashSet<String>,
    pub notifications: Vec<NewNotification>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: MemoryState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Copy of the current committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Mutate committed state directly, outside any unit of work
    pub async fn seed<F>(&self, f: F)
    where
        F: FnOnce(&mut MemoryState),
    {
        let mut state = self.state.lock().await;
        f(&mut state);
    }
}

fn movement_matches(movement: &StockMovement, filter: &MovementFilter) -> bool {
    filter.work_id.map_or(true, |id| movement.work_id == id)
        && filter
            .movement_type
            .map_or(true, |t| movement.movement_type == t)
        && filter.since.map_or(true, |since| movement.created_at >= since)
}

fn note_matches(note: &DeliveryNote, filter: &DeliveryNoteFilter) -> bool {
    let status_ok = filter.status.map_or(true, |s| note.status == s);
    let period_ok = filter
        .period
        .as_deref()
        .map_or(true, |p| note.period.as_deref() == Some(p));
    let search_ok = filter.search.as_deref().map_or(true, |needle| {
        let needle = needle.to_lowercase();
        note.reference.to_lowercase().contains(&needle)
            || note
                .notes
                .as_deref()
                .map_or(false, |n| n.to_lowercase().contains(&needle))
    });
    status_ok && period_ok && search_ok
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnit { guard, working }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn list_works(&self) -> StoreResult<Vec<Work>> {
        let state = self.state.lock().await;
        let mut works: Vec<Work> = state.works.values().cloned().collect();
        works.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(works)
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        limit: i64,
    ) -> StoreResult<Vec<StockMovement>> {
        let state = self.state.lock().await;
        let mut movements: Vec<StockMovement> = state
            .movements
            .iter()
            .filter(|m| movement_matches(m, filter))
            .cloned()
            .collect();
        movements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        movements.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(movements)
    }

    async fn outbound_quantity_since(&self, since: DateTime<Utc>) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.movement_type == MovementType::Outbound && m.created_at >= since)
            .map(|m| i64::from(m.quantity))
            .sum())
    }

    async fn list_alerts(&self, include_resolved: bool) -> StoreResult<Vec<StockAlert>> {
        let state = self.state.lock().await;
        let mut alerts: Vec<StockAlert> = state
            .alerts
            .iter()
            .filter(|a| include_resolved || !a.is_resolved)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(alerts)
    }

    async fn list_allocations(&self, partner_id: Option<Uuid>) -> StoreResult<Vec<Allocation>> {
        let state = self.state.lock().await;
        Ok(state
            .allocations
            .iter()
            .filter(|a| partner_id.map_or(true, |p| a.partner_id == p))
            .cloned()
            .collect())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn orders_missing_delivery_note(
        &self,
        statuses: &[OrderStatus],
    ) -> StoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| statuses.contains(&o.status))
            .filter(|o| !state.delivery_notes.iter().any(|n| n.order_id == o.id))
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders.into_iter().map(|o| o.id).collect())
    }

    async fn get_delivery_note(&self, id: Uuid) -> StoreResult<Option<DeliveryNote>> {
        let state = self.state.lock().await;
        Ok(state.delivery_notes.iter().find(|n| n.id == id).cloned())
    }

    async fn list_delivery_notes(
        &self,
        filter: &DeliveryNoteFilter,
        pagination: Pagination,
    ) -> StoreResult<(Vec<DeliveryNote>, i64)> {
        let state = self.state.lock().await;
        let mut notes: Vec<DeliveryNote> = state
            .delivery_notes
            .iter()
            .filter(|n| note_matches(n, filter))
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = notes.len() as i64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let page = notes
            .into_iter()
            .skip(offset)
            .take(pagination.limit as usize)
            .collect();
        Ok((page, total))
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_work(&mut self, id: Uuid) -> StoreResult<Option<Work>> {
        Ok(self.working.works.get(&id).cloned())
    }

    async fn set_work_stock(
        &mut self,
        id: Uuid,
        stock: i32,
        physical_stock: i32,
    ) -> StoreResult<()> {
        let work = self
            .working
            .works
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("work {} vanished", id)))?;
        work.stock = stock;
        work.physical_stock = physical_stock;
        work.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> StoreResult<StockMovement> {
        let stored = StockMovement {
            id: Uuid::new_v4(),
            work_id: movement.work_id,
            movement_type: movement.movement_type,
            source: movement.source,
            quantity: movement.quantity,
            applied_delta: movement.applied_delta,
            reason: movement.reason,
            reference: movement.reference,
            performed_by: movement.performed_by,
            is_correction: movement.is_correction,
            partner_id: movement.partner_id,
            unit_price: movement.unit_price,
            created_at: Utc::now(),
        };
        self.working.movements.push(stored.clone());
        Ok(stored)
    }

    async fn lock_movement(&mut self, id: Uuid) -> StoreResult<Option<StockMovement>> {
        Ok(self.working.movements.iter().find(|m| m.id == id).cloned())
    }

    async fn delete_movement(&mut self, id: Uuid) -> StoreResult<()> {
        self.working.movements.retain(|m| m.id != id);
        Ok(())
    }

    async fn lock_allocation(
        &mut self,
        partner_id: Uuid,
        work_id: Uuid,
    ) -> StoreResult<Option<Allocation>> {
        Ok(self
            .working
            .allocations
            .iter()
            .find(|a| a.partner_id == partner_id && a.work_id == work_id)
            .cloned())
    }

    async fn save_allocation(&mut self, allocation: &Allocation) -> StoreResult<()> {
        match self
            .working
            .allocations
            .iter_mut()
            .find(|a| a.partner_id == allocation.partner_id && a.work_id == allocation.work_id)
        {
            Some(existing) => {
                existing.allocated_quantity = allocation.allocated_quantity;
                existing.sold_quantity = allocation.sold_quantity;
                existing.returned_quantity = allocation.returned_quantity;
                existing.updated_at = allocation.updated_at;
            }
            None => self.working.allocations.push(allocation.clone()),
        }
        Ok(())
    }

    async fn all_works(&mut self) -> StoreResult<Vec<Work>> {
        Ok(self.working.works.values().cloned().collect())
    }

    async fn unresolved_alerts(&mut self, work_ids: &[Uuid]) -> StoreResult<Vec<StockAlert>> {
        let ids: HashSet<&Uuid> = work_ids.iter().collect();
        Ok(self
            .working
            .alerts
            .iter()
            .filter(|a| !a.is_resolved && ids.contains(&a.work_id))
            .cloned()
            .collect())
    }

    async fn resolve_alerts(
        &mut self,
        alert_type: AlertType,
        work_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let ids: HashSet<&Uuid> = work_ids.iter().collect();
        let mut resolved = 0;
        for alert in self.working.alerts.iter_mut().filter(|a| {
            !a.is_resolved && a.alert_type == alert_type && ids.contains(&a.work_id)
        }) {
            alert.is_resolved = true;
            alert.resolved_at = Some(at);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn insert_alerts(&mut self, alerts: &[NewStockAlert]) -> StoreResult<u64> {
        let mut inserted = 0;
        for alert in alerts {
            let duplicate = self.working.alerts.iter().any(|a| {
                !a.is_resolved && a.work_id == alert.work_id && a.alert_type == alert.alert_type
            });
            if duplicate {
                continue;
            }
            self.working.alerts.push(StockAlert {
                id: Uuid::new_v4(),
                work_id: alert.work_id,
                alert_type: alert.alert_type,
                severity: alert.severity,
                message: alert.message.clone(),
                is_resolved: false,
                resolved_at: None,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn update_order_payment(
        &mut self,
        id: Uuid,
        update: &OrderPaymentUpdate,
    ) -> StoreResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("order {} vanished", id)))?;
        order.status = update.status;
        order.payment_status = update.payment_status;
        if let Some(reference) = &update.payment_reference {
            order.payment_reference = Some(reference.clone());
        }
        if let Some(amount) = update.amount_paid {
            order.amount_paid = amount;
        }
        if let Some(remaining) = update.remaining_amount {
            order.remaining_amount = remaining;
        }
        if let Some(date) = update.full_payment_date {
            order.full_payment_date = Some(date);
        }
        Ok(())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> StoreResult<Payment> {
        let stored = Payment {
            id: Uuid::new_v4(),
            order_id: payment.order_id,
            amount: payment.amount,
            payment_method: payment.payment_method,
            payment_reference: payment.payment_reference,
            paid_at: Utc::now(),
            recorded_by: payment.recorded_by,
        };
        self.working.payments.push(stored.clone());
        Ok(stored)
    }

    async fn delivery_note_for_order(
        &mut self,
        order_id: Uuid,
    ) -> StoreResult<Option<DeliveryNote>> {
        Ok(self
            .working
            .delivery_notes
            .iter()
            .find(|n| n.order_id == order_id)
            .cloned())
    }

    async fn count_delivery_notes_with_prefix(&mut self, prefix: &str) -> StoreResult<i64> {
        Ok(self
            .working
            .delivery_notes
            .iter()
            .filter(|n| n.reference.starts_with(prefix))
            .count() as i64)
    }

    async fn insert_delivery_note(&mut self, note: NewDeliveryNote) -> StoreResult<DeliveryNote> {
        if self
            .working
            .delivery_notes
            .iter()
            .any(|n| n.order_id == note.order_id)
        {
            return Err(StoreError::UniqueViolation(
                "delivery_notes_order_id_key".to_string(),
            ));
        }
        if self
            .working
            .delivery_notes
            .iter()
            .any(|n| n.reference == note.reference)
        {
            return Err(StoreError::UniqueViolation(
                "delivery_notes_reference_key".to_string(),
            ));
        }

        let now = Utc::now();
        let stored = DeliveryNote {
            id: Uuid::new_v4(),
            reference: note.reference,
            order_id: note.order_id,
            status: DeliveryNoteStatus::Pending,
            period: note.period,
            notes: note.notes,
            generated_by: note.generated_by,
            validated_by: None,
            validated_at: None,
            controlled_by: None,
            controlled_at: None,
            completed_at: None,
            cancelled_at: None,
            validation: ValidationDetails::default(),
            created_at: now,
            updated_at: now,
        };
        self.working.delivery_notes.push(stored.clone());
        Ok(stored)
    }

    async fn lock_delivery_note(&mut self, id: Uuid) -> StoreResult<Option<DeliveryNote>> {
        Ok(self
            .working
            .delivery_notes
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn update_delivery_note(&mut self, note: &DeliveryNote) -> StoreResult<()> {
        let existing = self
            .working
            .delivery_notes
            .iter_mut()
            .find(|n| n.id == note.id)
            .ok_or_else(|| StoreError::Corrupt(format!("delivery note {} vanished", note.id)))?;
        *existing = note.clone();
        Ok(())
    }

    async fn claim_idempotency_key(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self.working.processed_events.insert(key.to_string()))
    }

    async fn active_rate_rules(&mut self) -> StoreResult<Vec<RateRule>> {
        Ok(self
            .working
            .rate_rules
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn insert_royalty(&mut self, royalty: NewRoyalty) -> StoreResult<bool> {
        if self
            .working
            .royalties
            .iter()
            .any(|r| r.order_id == royalty.order_id && r.work_id == royalty.work_id)
        {
            return Ok(false);
        }
        self.working.royalties.push(Royalty {
            id: Uuid::new_v4(),
            work_id: royalty.work_id,
            user_id: royalty.user_id,
            order_id: royalty.order_id,
            amount: royalty.amount,
            rate: royalty.rate,
            approved: false,
            paid: false,
            paid_at: None,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn insert_rebate(&mut self, rebate: NewPartnerRebate) -> StoreResult<bool> {
        if self
            .working
            .rebates
            .iter()
            .any(|r| r.order_id == rebate.order_id && r.work_id == rebate.work_id)
        {
            return Ok(false);
        }
        self.working.rebates.push(PartnerRebate {
            id: Uuid::new_v4(),
            partner_id: rebate.partner_id,
            order_id: rebate.order_id,
            work_id: rebate.work_id,
            amount: rebate.amount,
            rate: rebate.rate,
            status: RebateStatus::Pending,
            paid_at: None,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn lock_withdrawal(
        &mut self,
        kind: WithdrawalKind,
        id: Uuid,
    ) -> StoreResult<Option<Withdrawal>> {
        Ok(self
            .working
            .withdrawals
            .iter()
            .find(|w| w.id == id && w.kind == kind)
            .cloned())
    }

    async fn update_withdrawal(&mut self, withdrawal: &Withdrawal) -> StoreResult<()> {
        let existing = self
            .working
            .withdrawals
            .iter_mut()
            .find(|w| w.id == withdrawal.id)
            .ok_or_else(|| StoreError::Corrupt(format!("withdrawal {} vanished", withdrawal.id)))?;
        *existing = withdrawal.clone();
        Ok(())
    }

    async fn mark_royalties_paid(&mut self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut updated = 0;
        for royalty in self
            .working
            .royalties
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.approved && !r.paid)
        {
            royalty.paid = true;
            royalty.paid_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn partner_for_user(&mut self, user_id: Uuid) -> StoreResult<Option<Uuid>> {
        Ok(self
            .working
            .partners
            .iter()
            .find(|(_, owner)| **owner == user_id)
            .map(|(partner_id, _)| *partner_id))
    }

    async fn mark_rebates_paid(
        &mut self,
        partner_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut updated = 0;
        for rebate in self
            .working
            .rebates
            .iter_mut()
            .filter(|r| r.partner_id == partner_id && r.status == RebateStatus::Validated)
        {
            rebate.status = RebateStatus::Paid;
            rebate.paid_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn insert_notification(&mut self, notification: &NewNotification) -> StoreResult<()> {
        self.working.notifications.push(notification.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnit { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
