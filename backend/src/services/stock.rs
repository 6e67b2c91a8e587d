//! Stock ledger service
//!
//! The only writer of `Work.stock` outside settlement and delivery-note
//! cancellation. Every movement is applied inside one unit of work with the
//! work row locked, so concurrent movements on the same work serialise.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::ledger::{
    apply_delta, check_reversible, plan_count, plan_movement, reverse, OversellPolicy, StockChange,
};
use shared::models::{
    MovementFilter, MovementSource, MovementType, NewMovement, RestockPriority,
    RestockSuggestion, StockMovement, StockStats, Work,
};
use uuid::Uuid;
use validator::Validate;

use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::store::Store;

/// Stock ledger service
#[derive(Clone)]
pub struct StockService {
    store: Arc<dyn Store>,
    oversell_policy: OversellPolicy,
    movements_limit: i64,
    rotation_window_days: i64,
}

/// Input for recording a movement
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordMovementInput {
    pub work_id: Uuid,
    pub movement_type: MovementType,
    #[validate(range(min = 1, message = "Quantity must be a positive integer"))]
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 100))]
    pub reference: Option<String>,
}

/// A physical count of one work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountedWork {
    pub work_id: Uuid,
    pub physical_stock: i32,
    pub notes: Option<String>,
}

/// A batch of physical counts applied together
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCountInput {
    #[validate(length(min = 1, message = "At least one counted work is required"))]
    pub adjustments: Vec<CountedWork>,
    #[validate(length(max = 2000))]
    pub inventory_notes: Option<String>,
}

/// Books brought in line with one count
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountAdjustment {
    pub work_id: Uuid,
    pub title: String,
    pub old_stock: i32,
    pub new_stock: i32,
    pub difference: i32,
    /// Absent when the count matched the books
    pub movement_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReport {
    pub adjustments: Vec<CountAdjustment>,
    /// Counted works that do not exist
    pub skipped: Vec<Uuid>,
}

/// Result of deleting a movement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementReversal {
    pub movement_id: Uuid,
    pub work_id: Uuid,
    pub previous_stock: i32,
    pub new_stock: i32,
}

impl StockService {
    pub fn new(store: Arc<dyn Store>, config: &StockConfig) -> Self {
        Self {
            store,
            oversell_policy: config.oversell_policy,
            movements_limit: config.movements_limit,
            rotation_window_days: config.rotation_window_days,
        }
    }

    /// Record a movement and apply it to the work's stock
    pub async fn record_movement(
        &self,
        input: RecordMovementInput,
        performed_by: Uuid,
    ) -> AppResult<StockMovement> {
        input.validate()?;

        let mut unit = self.store.begin().await?;
        let work = unit
            .lock_work(input.work_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Work".to_string()))?;

        let change = plan_movement(
            work.stock,
            input.movement_type,
            input.quantity,
            self.oversell_policy,
        )?;
        if change.clamped {
            tracing::warn!(
                work_id = %work.id,
                requested = input.quantity,
                applied = change.applied_delta,
                "movement clamped at stock bounds"
            );
        }

        let physical = apply_delta(work.physical_stock, i64::from(change.applied_delta));
        unit.set_work_stock(work.id, change.new_stock, physical.new_stock)
            .await?;

        let movement = unit
            .insert_movement(NewMovement {
                work_id: work.id,
                movement_type: input.movement_type,
                source: MovementSource::Manual,
                quantity: input.quantity,
                applied_delta: change.applied_delta,
                reason: input.reason,
                reference: input.reference,
                performed_by: Some(performed_by),
                is_correction: input.movement_type == MovementType::Correction,
                partner_id: None,
                unit_price: None,
            })
            .await?;

        unit.commit().await?;

        tracing::info!(
            movement_id = %movement.id,
            work_id = %work.id,
            movement_type = %movement.movement_type,
            stock = change.new_stock,
            "stock movement recorded"
        );

        Ok(movement)
    }

    /// Reverse a movement's applied delta and remove it
    pub async fn delete_movement(
        &self,
        movement_id: Uuid,
        performed_by: Uuid,
    ) -> AppResult<MovementReversal> {
        let mut unit = self.store.begin().await?;
        let movement = unit
            .lock_movement(movement_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock movement".to_string()))?;
        check_reversible(movement.source)?;
        let work = unit
            .lock_work(movement.work_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Work".to_string()))?;

        let change: StockChange = reverse(work.stock, movement.applied_delta);
        let physical = reverse(work.physical_stock, movement.applied_delta);
        if change.clamped {
            tracing::warn!(
                movement_id = %movement.id,
                work_id = %work.id,
                "movement reversal clamped at stock bounds"
            );
        }

        unit.set_work_stock(work.id, change.new_stock, physical.new_stock)
            .await?;
        unit.delete_movement(movement.id).await?;
        unit.commit().await?;

        tracing::info!(
            movement_id = %movement.id,
            work_id = %work.id,
            performed_by = %performed_by,
            stock = change.new_stock,
            "stock movement reversed and deleted"
        );

        Ok(MovementReversal {
            movement_id: movement.id,
            work_id: work.id,
            previous_stock: change.previous,
            new_stock: change.new_stock,
        })
    }

    /// Set stock to physically counted values
    ///
    /// Every count in the batch is applied in one unit of work. A count that
    /// differs from the books records an INVENTORY-sourced correction of the
    /// difference, so a later deletion of that movement restores the books.
    pub async fn apply_inventory(
        &self,
        input: InventoryCountInput,
        performed_by: Uuid,
    ) -> AppResult<InventoryReport> {
        input.validate()?;

        let mut unit = self.store.begin().await?;
        let mut report = InventoryReport {
            adjustments: Vec::with_capacity(input.adjustments.len()),
            skipped: Vec::new(),
        };

        for counted in input.adjustments {
            let Some(work) = unit.lock_work(counted.work_id).await? else {
                tracing::warn!(work_id = %counted.work_id, "counted work not found");
                report.skipped.push(counted.work_id);
                continue;
            };

            let change = plan_count(work.stock, counted.physical_stock)?;
            unit.set_work_stock(work.id, change.new_stock, change.new_stock)
                .await?;

            let movement_id = if change.applied_delta != 0 {
                let note = counted
                    .notes
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or("Non spécifié");
                let movement = unit
                    .insert_movement(NewMovement {
                        work_id: work.id,
                        movement_type: MovementType::Correction,
                        source: MovementSource::Inventory,
                        quantity: change.applied_delta.saturating_abs(),
                        applied_delta: change.applied_delta,
                        reason: Some(format!("Ajustement inventaire - {}", note)),
                        reference: Some(format!("INV-{}", Utc::now().format("%Y%m%d"))),
                        performed_by: Some(performed_by),
                        is_correction: true,
                        partner_id: None,
                        unit_price: None,
                    })
                    .await?;
                Some(movement.id)
            } else {
                None
            };

            report.adjustments.push(CountAdjustment {
                work_id: work.id,
                title: work.title,
                old_stock: change.previous,
                new_stock: change.new_stock,
                difference: change.applied_delta,
                movement_id,
            });
        }

        unit.commit().await?;

        tracing::info!(
            adjusted = report.adjustments.len(),
            skipped = report.skipped.len(),
            performed_by = %performed_by,
            notes = input.inventory_notes.as_deref().unwrap_or(""),
            "inventory count applied"
        );

        Ok(report)
    }

    pub async fn current_stock(&self, work_id: Uuid) -> AppResult<i32> {
        self.store
            .list_works()
            .await?
            .into_iter()
            .find(|w| w.id == work_id)
            .map(|w| w.stock)
            .ok_or_else(|| AppError::NotFound("Work".to_string()))
    }

    pub async fn works(&self) -> AppResult<Vec<Work>> {
        Ok(self.store.list_works().await?)
    }

    /// Most recent movements, capped at the configured limit
    pub async fn recent_movements(&self, filter: &MovementFilter) -> AppResult<Vec<StockMovement>> {
        Ok(self
            .store
            .list_movements(filter, self.movements_limit)
            .await?)
    }

    pub async fn stats(&self) -> AppResult<StockStats> {
        let works = self.store.list_works().await?;
        let since = Utc::now() - Duration::days(self.rotation_window_days);
        let outbound = self.store.outbound_quantity_since(since).await?;
        Ok(StockStats::compute(&works, outbound))
    }

    /// Restock suggestions, most urgent first
    pub async fn pending(&self) -> AppResult<Vec<RestockSuggestion>> {
        let works = self.store.list_works().await?;
        let mut suggestions: Vec<RestockSuggestion> =
            works.iter().filter_map(RestockSuggestion::for_work).collect();
        suggestions.sort_by_key(|s| (s.priority != RestockPriority::High, s.stock));
        Ok(suggestions)
    }
}
