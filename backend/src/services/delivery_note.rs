//! Delivery note (bon de sortie) workflow service
//!
//! Creation, listing and state transitions of goods-issue documents.
//! Cancellation returns the order's books to the warehouse in the same unit
//! of work as the status change.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::ledger::apply_delta;
use shared::models::{
    delivery_note_prefix, delivery_note_reference, DeliveryNote, DeliveryNoteAction,
    DeliveryNoteFilter, DeliveryNoteStatus, MovementSource, MovementType, NewDeliveryNote,
    NewMovement, Order, OrderStatus, ValidationDetails,
};
use shared::validation::{validate_delivery_note_reference, validate_period};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::{Store, StoreError, UnitOfWork};

/// Order statuses that should already carry a delivery note
pub const BACKFILL_STATUSES: [OrderStatus; 4] = [
    OrderStatus::Validated,
    OrderStatus::Processing,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
];

const ORDER_ID_CONSTRAINT: &str = "delivery_notes_order_id_key";

#[derive(Clone)]
pub struct DeliveryNoteService {
    store: Arc<dyn Store>,
}

/// Input for creating a delivery note
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliveryNoteInput {
    pub order_id: Option<Uuid>,
    pub period: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// A transition requested on a delivery note
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionInput {
    pub id: Option<Uuid>,
    pub action: Option<String>,
    /// Replaces the note's free text on any action
    pub notes: Option<String>,
    /// Only read by `validate`
    #[serde(flatten)]
    pub details: ValidationDetails,
}

/// Result of backfilling notes for orders that lack one
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub created: Vec<DeliveryNote>,
    pub failures: Vec<BackfillFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillFailure {
    pub order_id: Uuid,
    pub error: String,
}

/// One order line as seen from its delivery note
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryNoteLine {
    pub work_id: Uuid,
    pub unit_price: Decimal,
    pub requested_quantity: i32,
    pub delivered_quantity: i32,
}

/// A delivery note with its order lines
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryNoteDetail {
    #[serde(flatten)]
    pub note: DeliveryNote,
    pub lines: Vec<DeliveryNoteLine>,
}

impl DeliveryNoteService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create the delivery note of an order
    pub async fn create(
        &self,
        input: CreateDeliveryNoteInput,
        generated_by: Uuid,
    ) -> AppResult<DeliveryNote> {
        input.validate()?;
        let order_id = input
            .order_id
            .ok_or_else(|| AppError::missing_field("orderId"))?;
        let period = normalize(input.period);
        if let Some(period) = &period {
            validate_period(period).map_err(|msg| {
                AppError::validation("period", msg, "La période doit être au format AAAA-MM")
            })?;
        }

        let mut unit = self.store.begin().await?;
        if unit.lock_order(order_id).await?.is_none() {
            return Err(AppError::NotFound("Order".to_string()));
        }
        let note = insert_note(
            unit.as_mut(),
            NewNoteRequest {
                order_id,
                period,
                notes: normalize(input.notes),
                generated_by,
            },
        )
        .await?;
        unit.commit().await?;

        tracing::info!(
            note_id = %note.id,
            reference = %note.reference,
            order_id = %order_id,
            "delivery note created"
        );

        Ok(note)
    }

    /// Create notes for every confirmed order that has none
    ///
    /// Each order is handled in its own unit of work, so one failure does not
    /// hold back the others. Stock is left alone: a confirmed order already
    /// had its lines taken out of the warehouse at settlement. Notes for
    /// delivered orders are created COMPLETED.
    pub async fn create_missing(&self, generated_by: Uuid) -> AppResult<BackfillReport> {
        let order_ids = self
            .store
            .orders_missing_delivery_note(&BACKFILL_STATUSES)
            .await?;
        let mut report = BackfillReport::default();

        for order_id in order_ids {
            match self.backfill(order_id, generated_by).await {
                Ok(note) => report.created.push(note),
                Err(err) => {
                    tracing::warn!(order_id = %order_id, error = %err, "delivery note backfill failed");
                    report.failures.push(BackfillFailure {
                        order_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            created = report.created.len(),
            failed = report.failures.len(),
            "missing delivery notes backfilled"
        );

        Ok(report)
    }

    async fn backfill(&self, order_id: Uuid, generated_by: Uuid) -> AppResult<DeliveryNote> {
        let mut unit = self.store.begin().await?;
        let order = unit
            .lock_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let mut note = insert_note(
            unit.as_mut(),
            NewNoteRequest {
                order_id,
                period: None,
                notes: None,
                generated_by,
            },
        )
        .await?;
        if order.status == OrderStatus::Delivered {
            let now = Utc::now();
            note.status = DeliveryNoteStatus::Completed;
            note.completed_at = Some(now);
            note.updated_at = now;
            unit.update_delivery_note(&note).await?;
        }
        unit.commit().await?;

        Ok(note)
    }

    /// Apply a workflow action to a note
    pub async fn transition(&self, input: TransitionInput, actor: Uuid) -> AppResult<DeliveryNote> {
        let id = input.id.ok_or_else(|| AppError::missing_field("id"))?;
        let action: DeliveryNoteAction = input
            .action
            .as_deref()
            .ok_or_else(|| AppError::missing_field("action"))?
            .parse()?;

        let mut unit = self.store.begin().await?;
        let mut note = unit
            .lock_delivery_note(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Delivery note".to_string()))?;

        let previous = note.status;
        let next = previous.apply(action)?;
        let now = Utc::now();
        if let Some(notes) = normalize(input.notes) {
            note.notes = Some(notes);
        }

        match action {
            DeliveryNoteAction::Validate => {
                note.validated_by = Some(actor);
                note.validated_at = Some(now);
                note.validation = input.details;
            }
            DeliveryNoteAction::Control => {
                note.controlled_by = Some(actor);
                note.controlled_at = Some(now);
            }
            DeliveryNoteAction::Complete => {
                note.completed_at = Some(now);
            }
            DeliveryNoteAction::Cancel => {
                let order = unit
                    .lock_order(note.order_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Order".to_string()))?;
                restock_order(unit.as_mut(), &order, &note.reference, actor).await?;
                note.cancelled_at = Some(now);
            }
        }

        note.status = next;
        note.updated_at = now;
        unit.update_delivery_note(&note).await?;
        unit.commit().await?;

        tracing::info!(
            note_id = %note.id,
            reference = %note.reference,
            from = %previous,
            to = %next,
            actor = %actor,
            "delivery note transition applied"
        );

        Ok(note)
    }

    pub async fn list(
        &self,
        filter: DeliveryNoteFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<DeliveryNote>> {
        let (notes, total) = self.store.list_delivery_notes(&filter, pagination).await?;
        Ok(PaginatedResponse::new(notes, pagination, total))
    }

    pub async fn detail(&self, id: Uuid) -> AppResult<DeliveryNoteDetail> {
        let note = self
            .store
            .get_delivery_note(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Delivery note".to_string()))?;
        let order = self
            .store
            .get_order(note.order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let delivered = note.status == DeliveryNoteStatus::Completed;
        let lines = order
            .lines
            .iter()
            .map(|line| DeliveryNoteLine {
                work_id: line.work_id,
                unit_price: line.unit_price,
                requested_quantity: line.quantity,
                delivered_quantity: if delivered { line.quantity } else { 0 },
            })
            .collect();

        Ok(DeliveryNoteDetail { note, lines })
    }
}

/// Return every line of `order` to warehouse stock with a correction movement
async fn restock_order(
    unit: &mut dyn UnitOfWork,
    order: &Order,
    reference: &str,
    actor: Uuid,
) -> AppResult<()> {
    for line in &order.lines {
        let work = unit
            .lock_work(line.work_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Work".to_string()))?;

        let change = apply_delta(work.stock, i64::from(line.quantity));
        let physical = apply_delta(work.physical_stock, i64::from(line.quantity));
        unit.set_work_stock(work.id, change.new_stock, physical.new_stock)
            .await?;

        unit.insert_movement(NewMovement {
            work_id: work.id,
            movement_type: MovementType::Correction,
            source: MovementSource::NoteCancellation,
            quantity: line.quantity,
            applied_delta: change.applied_delta,
            reason: Some(format!("Annulation du bon de sortie {}", reference)),
            reference: Some(reference.to_string()),
            performed_by: Some(actor),
            is_correction: true,
            partner_id: None,
            unit_price: Some(line.unit_price),
        })
        .await?;

        tracing::debug!(
            work_id = %work.id,
            quantity = line.quantity,
            stock = change.new_stock,
            "stock restored for cancelled delivery note"
        );
    }
    Ok(())
}

struct NewNoteRequest {
    order_id: Uuid,
    period: Option<String>,
    notes: Option<String>,
    generated_by: Uuid,
}

/// Insert a PENDING note with the next reference of the current year
async fn insert_note(unit: &mut dyn UnitOfWork, request: NewNoteRequest) -> AppResult<DeliveryNote> {
    if unit.delivery_note_for_order(request.order_id).await?.is_some() {
        return Err(duplicate_note());
    }

    let year = Utc::now().year();
    let sequence = unit
        .count_delivery_notes_with_prefix(&delivery_note_prefix(year))
        .await?
        + 1;
    let reference = delivery_note_reference(year, sequence);
    validate_delivery_note_reference(&reference)
        .map_err(|msg| AppError::Internal(format!("{}: {}", msg, reference)))?;

    unit.insert_delivery_note(NewDeliveryNote {
        reference,
        order_id: request.order_id,
        period: request.period,
        notes: request.notes,
        generated_by: request.generated_by,
    })
    .await
    .map_err(|err| match err {
        StoreError::UniqueViolation(constraint) if constraint == ORDER_ID_CONSTRAINT => {
            duplicate_note()
        }
        StoreError::UniqueViolation(_) => AppError::Conflict("delivery note reference".to_string()),
        other => other.into(),
    })
}

fn duplicate_note() -> AppError {
    AppError::DuplicateEntry {
        resource: "orderId".to_string(),
        message: "A delivery note already exists for this order".to_string(),
        message_fr: "Un bon de sortie existe déjà pour cette commande".to_string(),
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
