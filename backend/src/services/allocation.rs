//! Partner consignment tracking
//!
//! Allocation counters only move through this service: `allocated` grows
//! with a warehouse-to-partner transfer (an OUTBOUND movement against the
//! work), `sold` and `returned` with partner-reported sales and returns.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use shared::ledger::{
    apply_delta, check_return, check_sale, plan_movement, LedgerError, OversellPolicy,
};
use shared::models::{Allocation, AllocationView, MovementSource, MovementType, NewMovement};
use shared::validation::validate_quantity;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::Store;

#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn Store>,
}

/// Quantity moved for one (partner, work) pair
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConsignmentInput {
    pub partner_id: Uuid,
    pub work_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i32,
    #[validate(length(max = 100))]
    pub reference: Option<String>,
}

impl AllocationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Transfer books from the warehouse to a partner
    ///
    /// Fails with `InsufficientStock` when the warehouse cannot cover the
    /// transfer, whatever the configured oversell policy.
    pub async fn allocate(
        &self,
        input: ConsignmentInput,
        performed_by: Uuid,
    ) -> AppResult<AllocationView> {
        input.validate()?;

        let mut unit = self.store.begin().await?;
        let work = unit
            .lock_work(input.work_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Work".to_string()))?;

        let change = plan_movement(
            work.stock,
            MovementType::Outbound,
            input.quantity,
            OversellPolicy::Reject,
        )?;
        let physical = apply_delta(work.physical_stock, i64::from(change.applied_delta));
        unit.set_work_stock(work.id, change.new_stock, physical.new_stock)
            .await?;

        unit.insert_movement(NewMovement {
            work_id: work.id,
            movement_type: MovementType::Outbound,
            source: MovementSource::Allocation,
            quantity: input.quantity,
            applied_delta: change.applied_delta,
            reason: Some("Dépôt partenaire".to_string()),
            reference: input.reference.clone(),
            performed_by: Some(performed_by),
            is_correction: false,
            partner_id: Some(input.partner_id),
            unit_price: Some(work.price),
        })
        .await?;

        let mut allocation = unit
            .lock_allocation(input.partner_id, input.work_id)
            .await?
            .unwrap_or_else(|| Allocation::empty(input.partner_id, input.work_id));
        allocation.allocated_quantity = allocation
            .allocated_quantity
            .checked_add(input.quantity)
            .ok_or(LedgerError::InvalidQuantity("Allocated quantity overflow"))?;
        allocation.updated_at = Utc::now();
        unit.save_allocation(&allocation).await?;

        unit.commit().await?;

        tracing::info!(
            partner_id = %input.partner_id,
            work_id = %input.work_id,
            quantity = input.quantity,
            stock = change.new_stock,
            "consignment allocated"
        );

        Ok(allocation.into())
    }

    /// Record books sold by a partner out of its consignment
    pub async fn record_sale(&self, input: ConsignmentInput) -> AppResult<AllocationView> {
        self.adjust(input, |allocation, quantity| {
            check_sale(allocation.available(), quantity)?;
            allocation.sold_quantity += quantity;
            Ok(())
        })
        .await
    }

    /// Record books returned to a partner after a sale
    pub async fn record_return(&self, input: ConsignmentInput) -> AppResult<AllocationView> {
        self.adjust(input, |allocation, quantity| {
            check_return(allocation.net_sold(), quantity)?;
            allocation.returned_quantity += quantity;
            Ok(())
        })
        .await
    }

    pub async fn list(&self, partner_id: Option<Uuid>) -> AppResult<Vec<AllocationView>> {
        let allocations = self.store.list_allocations(partner_id).await?;
        Ok(allocations.into_iter().map(AllocationView::from).collect())
    }

    async fn adjust<F>(&self, input: ConsignmentInput, apply: F) -> AppResult<AllocationView>
    where
        F: FnOnce(&mut Allocation, i32) -> Result<(), LedgerError>,
    {
        input.validate()?;
        validate_quantity(input.quantity).map_err(LedgerError::InvalidQuantity)?;

        let mut unit = self.store.begin().await?;
        let mut allocation = unit
            .lock_allocation(input.partner_id, input.work_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Allocation".to_string()))?;

        apply(&mut allocation, input.quantity)?;
        allocation.updated_at = Utc::now();
        unit.save_allocation(&allocation).await?;
        unit.commit().await?;

        tracing::info!(
            partner_id = %allocation.partner_id,
            work_id = %allocation.work_id,
            sold = allocation.sold_quantity,
            returned = allocation.returned_quantity,
            available = allocation.available(),
            "consignment updated"
        );

        Ok(allocation.into())
    }
}
