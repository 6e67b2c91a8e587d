//! Payment settlement engine
//!
//! Applies provider events to orders and withdrawals. Each event runs in one
//! unit of work that first claims the event's idempotency key, so a
//! redelivered event finds the key taken and changes nothing. Notifications
//! are written through the same unit and released only after commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use shared::ledger::{apply_delta, plan_movement, OversellPolicy};
use shared::models::{
    MovementSource, MovementType, NewMovement, NewPartnerRebate, NewPayment, NewRoyalty,
    NotificationKind, Order, OrderPaymentUpdate, OrderStatus, PaymentStatus, SettlementEvent,
    WithdrawalKind, WithdrawalStatus,
};
use shared::rates::{line_amount, RateContext, RateDefaults};
use uuid::Uuid;

use super::notification::{notification, NotificationOutbox};
use super::rates::load_rate_table;
use crate::error::AppResult;
use crate::store::{Store, UnitOfWork};

/// Payment method recorded for provider-settled payments
pub const PROVIDER_PAYMENT_METHOD: &str = "Moneroo";

const SALE_REASON: &str = "sale confirmed";
const PAYOUT_FAILURE_REASON: &str = "Échec du paiement via Moneroo";

#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn Store>,
    defaults: RateDefaults,
}

/// What handling an event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Applied(SettlementSummary),
    /// The event's key was already claimed
    Duplicate,
    /// The event referenced nothing this service can settle
    Ignored { reason: String },
}

/// Effects of one applied event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    pub movements: usize,
    pub royalties: usize,
    pub rebates: usize,
    pub notifications: usize,
    /// Lines whose stock decrement was cut short at zero
    pub clamped_lines: Vec<Uuid>,
    /// Lines left unsettled, with the reason
    pub skipped_lines: Vec<SkippedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedLine {
    pub work_id: Uuid,
    pub reason: String,
}

enum Step {
    Applied(SettlementSummary),
    Ignored(String),
}

impl SettlementService {
    pub fn new(store: Arc<dyn Store>, defaults: RateDefaults) -> Self {
        Self { store, defaults }
    }

    /// Apply one provider event exactly once
    pub async fn handle(&self, event: SettlementEvent) -> AppResult<SettlementOutcome> {
        let key = event.idempotency_key();
        let mut unit = self.store.begin().await?;

        if !unit.claim_idempotency_key(&key).await? {
            tracing::info!(key = %key, "provider event already settled");
            return Ok(SettlementOutcome::Duplicate);
        }

        let mut outbox = NotificationOutbox::new();
        let now = Utc::now();
        let step = match &event {
            SettlementEvent::PaymentSucceeded {
                transaction_id,
                order_id,
                amount,
            } => {
                self.payment_succeeded(
                    unit.as_mut(),
                    &mut outbox,
                    transaction_id,
                    *order_id,
                    *amount,
                    now,
                )
                .await?
            }
            SettlementEvent::PaymentFailed {
                transaction_id,
                order_id,
            } => {
                payment_closed(
                    unit.as_mut(),
                    &mut outbox,
                    transaction_id,
                    *order_id,
                    PaymentClosure::Failed,
                )
                .await?
            }
            SettlementEvent::PaymentCancelled {
                transaction_id,
                order_id,
            } => {
                payment_closed(
                    unit.as_mut(),
                    &mut outbox,
                    transaction_id,
                    *order_id,
                    PaymentClosure::Cancelled,
                )
                .await?
            }
            SettlementEvent::PayoutSucceeded {
                payout_id,
                withdrawal_id,
                kind,
            } => {
                payout_succeeded(unit.as_mut(), &mut outbox, payout_id, *withdrawal_id, *kind, now)
                    .await?
            }
            SettlementEvent::PayoutFailed {
                payout_id,
                withdrawal_id,
                kind,
            } => payout_failed(unit.as_mut(), &mut outbox, payout_id, *withdrawal_id, *kind).await?,
        };

        match step {
            Step::Ignored(reason) => {
                // dropping the unit releases the key for a later, valid delivery
                tracing::warn!(key = %key, reason = %reason, "provider event ignored");
                Ok(SettlementOutcome::Ignored { reason })
            }
            Step::Applied(mut summary) => {
                unit.commit().await?;
                summary.notifications = outbox.release().len();
                tracing::info!(
                    key = %key,
                    movements = summary.movements,
                    royalties = summary.royalties,
                    rebates = summary.rebates,
                    skipped = summary.skipped_lines.len(),
                    "provider event settled"
                );
                Ok(SettlementOutcome::Applied(summary))
            }
        }
    }

    async fn payment_succeeded(
        &self,
        unit: &mut dyn UnitOfWork,
        outbox: &mut NotificationOutbox,
        transaction_id: &str,
        order_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<Step> {
        let Some(order) = unit.lock_order(order_id).await? else {
            return Ok(Step::Ignored(format!("unknown order {}", order_id)));
        };
        if order.payment_status == PaymentStatus::Paid {
            return Ok(Step::Ignored(format!("order {} is already paid", order_id)));
        }

        unit.update_order_payment(
            order.id,
            &OrderPaymentUpdate {
                status: order.status.after_payment(),
                payment_status: PaymentStatus::Paid,
                payment_reference: Some(transaction_id.to_string()),
                amount_paid: Some(amount),
                remaining_amount: Some(Decimal::ZERO),
                full_payment_date: Some(now),
            },
        )
        .await?;

        unit.insert_payment(NewPayment {
            order_id: order.id,
            amount,
            payment_method: PROVIDER_PAYMENT_METHOD.to_string(),
            payment_reference: transaction_id.to_string(),
            recorded_by: order.user_id,
        })
        .await?;

        let summary = self.settle_lines(unit, &order, now).await?;

        outbox
            .enqueue(
                unit,
                notification(
                    order.user_id,
                    NotificationKind::Payment,
                    "Paiement confirmé",
                    format!(
                        "Votre paiement de {} F CFA pour la commande {} a été confirmé.",
                        amount,
                        short_id(order.id)
                    ),
                    json!({
                        "orderId": order.id,
                        "transactionId": transaction_id,
                        "amount": amount,
                    }),
                ),
            )
            .await?;

        Ok(Step::Applied(summary))
    }

    /// Decrement stock and record royalties and rebates for every line
    ///
    /// A line whose work cannot be found is reported and skipped; the
    /// remaining lines are still settled.
    async fn settle_lines(
        &self,
        unit: &mut dyn UnitOfWork,
        order: &Order,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementSummary> {
        let rates = load_rate_table(unit, now, self.defaults).await?;
        let mut summary = SettlementSummary::default();

        for line in &order.lines {
            let Some(work) = unit.lock_work(line.work_id).await? else {
                tracing::warn!(
                    order_id = %order.id,
                    work_id = %line.work_id,
                    "order line references unknown work"
                );
                summary.skipped_lines.push(SkippedLine {
                    work_id: line.work_id,
                    reason: "unknown work".to_string(),
                });
                continue;
            };

            // payment is captured, so the sale is recorded even when stock runs short
            let change = match plan_movement(
                work.stock,
                MovementType::Outbound,
                line.quantity,
                OversellPolicy::Clamp,
            ) {
                Ok(change) => change,
                Err(err) => {
                    tracing::warn!(
                        order_id = %order.id,
                        work_id = %work.id,
                        error = %err,
                        "order line not settled"
                    );
                    summary.skipped_lines.push(SkippedLine {
                        work_id: work.id,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if change.clamped {
                tracing::warn!(
                    order_id = %order.id,
                    work_id = %work.id,
                    requested = line.quantity,
                    available = work.stock,
                    "sale exceeds warehouse stock, stock floored at zero"
                );
                summary.clamped_lines.push(work.id);
            }

            let physical = apply_delta(work.physical_stock, i64::from(change.applied_delta));
            unit.set_work_stock(work.id, change.new_stock, physical.new_stock)
                .await?;
            unit.insert_movement(NewMovement {
                work_id: work.id,
                movement_type: MovementType::Outbound,
                source: MovementSource::Sale,
                quantity: line.quantity,
                applied_delta: change.applied_delta,
                reason: Some(SALE_REASON.to_string()),
                reference: Some(order.id.to_string()),
                performed_by: Some(order.user_id),
                is_correction: false,
                partner_id: None,
                unit_price: Some(line.unit_price),
            })
            .await?;
            summary.movements += 1;

            let ctx = RateContext {
                work_id: line.work_id,
                author_id: line.author_id,
                partner_id: order.partner_id,
            };

            if let Some(author_id) = line.author_id {
                let resolved = rates.resolve_royalty(&ctx);
                let created = unit
                    .insert_royalty(NewRoyalty {
                        work_id: line.work_id,
                        user_id: author_id,
                        order_id: order.id,
                        amount: line_amount(line.unit_price, line.quantity, resolved.rate),
                        rate: resolved.rate,
                    })
                    .await?;
                if created {
                    summary.royalties += 1;
                }
            }

            if let Some(partner_id) = order.partner_id {
                let resolved = rates.resolve_rebate(&ctx);
                let created = unit
                    .insert_rebate(NewPartnerRebate {
                        partner_id,
                        order_id: order.id,
                        work_id: line.work_id,
                        amount: line_amount(line.unit_price, line.quantity, resolved.rate),
                        rate: resolved.rate,
                    })
                    .await?;
                if created {
                    summary.rebates += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[derive(Clone, Copy)]
enum PaymentClosure {
    Failed,
    Cancelled,
}

async fn payment_closed(
    unit: &mut dyn UnitOfWork,
    outbox: &mut NotificationOutbox,
    transaction_id: &str,
    order_id: Uuid,
    closure: PaymentClosure,
) -> AppResult<Step> {
    let Some(order) = unit.lock_order(order_id).await? else {
        return Ok(Step::Ignored(format!("unknown order {}", order_id)));
    };
    if order.payment_status == PaymentStatus::Paid {
        return Ok(Step::Ignored(format!("order {} is already paid", order_id)));
    }

    let (status, payment_status, title, verb) = match closure {
        PaymentClosure::Failed => (order.status, PaymentStatus::Unpaid, "Paiement échoué", "a échoué"),
        PaymentClosure::Cancelled => (
            OrderStatus::Cancelled,
            PaymentStatus::Cancelled,
            "Paiement annulé",
            "a été annulé",
        ),
    };

    unit.update_order_payment(
        order.id,
        &OrderPaymentUpdate {
            status,
            payment_status,
            payment_reference: None,
            amount_paid: None,
            remaining_amount: None,
            full_payment_date: None,
        },
    )
    .await?;

    outbox
        .enqueue(
            unit,
            notification(
                order.user_id,
                NotificationKind::Payment,
                title,
                format!(
                    "Le paiement de la commande {} {}.",
                    short_id(order.id),
                    verb
                ),
                json!({ "orderId": order.id, "transactionId": transaction_id }),
            ),
        )
        .await?;

    Ok(Step::Applied(SettlementSummary::default()))
}

async fn payout_succeeded(
    unit: &mut dyn UnitOfWork,
    outbox: &mut NotificationOutbox,
    payout_id: &str,
    withdrawal_id: Uuid,
    kind: WithdrawalKind,
    now: DateTime<Utc>,
) -> AppResult<Step> {
    let Some(mut withdrawal) = unit.lock_withdrawal(kind, withdrawal_id).await? else {
        return Ok(Step::Ignored(format!("unknown {} withdrawal {}", kind, withdrawal_id)));
    };
    if withdrawal.status == WithdrawalStatus::Paid {
        return Ok(Step::Ignored(format!("withdrawal {} is already paid", withdrawal_id)));
    }

    withdrawal.status = WithdrawalStatus::Paid;
    withdrawal.paid_at = Some(now);
    withdrawal.payout_reference = Some(payout_id.to_string());
    unit.update_withdrawal(&withdrawal).await?;

    match kind {
        WithdrawalKind::Author => {
            let paid = unit.mark_royalties_paid(withdrawal.user_id, now).await?;
            tracing::info!(user_id = %withdrawal.user_id, royalties = paid, "royalties marked paid");
        }
        WithdrawalKind::Partner => match unit.partner_for_user(withdrawal.user_id).await? {
            Some(partner_id) => {
                let paid = unit.mark_rebates_paid(partner_id, now).await?;
                tracing::info!(partner_id = %partner_id, rebates = paid, "partner rebates marked paid");
            }
            None => {
                tracing::warn!(user_id = %withdrawal.user_id, "no partner linked to withdrawal owner");
            }
        },
        WithdrawalKind::Representative => {}
    }

    outbox
        .enqueue(
            unit,
            notification(
                withdrawal.user_id,
                NotificationKind::Withdrawal,
                "Retrait effectué",
                format!(
                    "Votre retrait de {} F CFA a été payé.",
                    withdrawal.amount
                ),
                json!({
                    "withdrawalId": withdrawal.id,
                    "payoutId": payout_id,
                    "type": kind.as_str(),
                }),
            ),
        )
        .await?;

    Ok(Step::Applied(SettlementSummary::default()))
}

async fn payout_failed(
    unit: &mut dyn UnitOfWork,
    outbox: &mut NotificationOutbox,
    payout_id: &str,
    withdrawal_id: Uuid,
    kind: WithdrawalKind,
) -> AppResult<Step> {
    let Some(mut withdrawal) = unit.lock_withdrawal(kind, withdrawal_id).await? else {
        return Ok(Step::Ignored(format!("unknown {} withdrawal {}", kind, withdrawal_id)));
    };
    if withdrawal.status == WithdrawalStatus::Paid {
        return Ok(Step::Ignored(format!("withdrawal {} is already paid", withdrawal_id)));
    }

    withdrawal.status = WithdrawalStatus::Rejected;
    withdrawal.rejection_reason = Some(PAYOUT_FAILURE_REASON.to_string());
    unit.update_withdrawal(&withdrawal).await?;

    outbox
        .enqueue(
            unit,
            notification(
                withdrawal.user_id,
                NotificationKind::Withdrawal,
                "Retrait échoué",
                format!(
                    "Le paiement de votre retrait de {} F CFA a échoué.",
                    withdrawal.amount
                ),
                json!({
                    "withdrawalId": withdrawal.id,
                    "payoutId": payout_id,
                    "type": kind.as_str(),
                }),
            ),
        )
        .await?;

    Ok(Step::Applied(SettlementSummary::default()))
}

/// First block of a uuid, as shown to customers
fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_uppercase()
}
