//! Payment settlement tests
//!
//! Provider events applied through the settlement engine:
//! - a confirmed payment settles the order, stock, royalties and rebates
//! - every event applies at most once, however often it is delivered
//! - payouts settle withdrawals and the balances behind them

mod common;

use std::sync::Arc;

use book_ledger_backend::config::Config;
use book_ledger_backend::services::settlement::{SettlementOutcome, PROVIDER_PAYMENT_METHOD};
use book_ledger_backend::services::SettlementService;
use book_ledger_backend::store::MemoryStore;
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::models::{
    MovementType, Order, OrderStatus, PartnerRebate, PaymentStatus, RateKind, RateRule, RateScope,
    RebateStatus, Royalty, SettlementEvent, Withdrawal, WithdrawalKind, WithdrawalStatus, Work,
};
use uuid::Uuid;

use common::{line, order, work};

fn service(store: &MemoryStore) -> SettlementService {
    SettlementService::new(
        Arc::new(store.clone()),
        Config::for_memory_store().settlement.rate_defaults(),
    )
}

async fn seeded(works: &[Work], orders: &[Order]) -> MemoryStore {
    let store = MemoryStore::new();
    let (works, orders) = (works.to_vec(), orders.to_vec());
    store
        .seed(move |s| {
            for w in works {
                s.works.insert(w.id, w);
            }
            for o in orders {
                s.orders.insert(o.id, o);
            }
        })
        .await;
    store
}

fn authored(title: &str, stock: i32) -> Work {
    Work {
        author_id: Some(Uuid::new_v4()),
        ..work(title, stock, 2)
    }
}

fn paid(order: &Order, transaction_id: &str) -> SettlementEvent {
    SettlementEvent::PaymentSucceeded {
        transaction_id: transaction_id.to_string(),
        order_id: order.id,
        amount: order.total,
    }
}

fn rule(kind: RateKind, scope: RateScope, scope_id: Option<Uuid>, rate: i64) -> RateRule {
    RateRule {
        id: Uuid::new_v4(),
        kind,
        scope,
        scope_id,
        rate: Decimal::from(rate),
        is_active: true,
        valid_from: None,
        valid_until: None,
        created_at: Utc::now(),
    }
}

fn applied(outcome: SettlementOutcome) -> book_ledger_backend::services::settlement::SettlementSummary {
    match outcome {
        SettlementOutcome::Applied(summary) => summary,
        other => panic!("expected applied outcome, got {:?}", other),
    }
}

// ============================================================================
// Payments
// ============================================================================

#[cfg(test)]
mod payment_tests {
    use super::*;

    #[tokio::test]
    async fn test_payment_success_settles_order_end_to_end() {
        let w = authored("L'Étrange Destin de Wangrin", 10);
        let o = order(vec![line(&w, 5)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;

        let summary = applied(service(&store).handle(paid(&o, "T1")).await.unwrap());

        assert_eq!(summary.movements, 1);
        assert_eq!(summary.royalties, 1);
        assert_eq!(summary.rebates, 0);
        assert_eq!(summary.notifications, 1);
        assert!(summary.clamped_lines.is_empty());

        let state = store.snapshot().await;
        let settled = &state.orders[&o.id];
        assert_eq!(settled.payment_status, PaymentStatus::Paid);
        assert_eq!(settled.status, OrderStatus::Validated);
        assert_eq!(settled.amount_paid, Decimal::from(5000));
        assert_eq!(settled.remaining_amount, Decimal::ZERO);
        assert_eq!(settled.payment_reference.as_deref(), Some("T1"));
        assert!(settled.full_payment_date.is_some());

        assert_eq!(state.payments.len(), 1);
        assert_eq!(state.payments[0].payment_method, PROVIDER_PAYMENT_METHOD);

        assert_eq!(state.works[&w.id].stock, 5);
        let outbound: Vec<_> = state
            .movements
            .iter()
            .filter(|m| m.movement_type == MovementType::Outbound)
            .collect();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].quantity, 5);
        assert_eq!(outbound[0].reference, Some(o.id.to_string()));

        // default royalty rate is 10%
        assert_eq!(state.royalties.len(), 1);
        assert_eq!(state.royalties[0].amount, Decimal::from(500));
        assert_eq!(state.royalties[0].user_id, w.author_id.unwrap());
        assert!(state.rebates.is_empty());
        assert_eq!(state.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_payment_is_duplicate() {
        let w = authored("Les Frasques d'Ebinto", 10);
        let o = order(vec![line(&w, 2)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;
        let svc = service(&store);

        applied(svc.handle(paid(&o, "T1")).await.unwrap());
        let again = svc.handle(paid(&o, "T1")).await.unwrap();

        assert_eq!(again, SettlementOutcome::Duplicate);
        let state = store.snapshot().await;
        assert_eq!(state.works[&w.id].stock, 8);
        assert_eq!(state.movements.len(), 1);
        assert_eq!(state.royalties.len(), 1);
        assert_eq!(state.payments.len(), 1);
        assert_eq!(state.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_second_transaction_on_paid_order_is_ignored() {
        let w = work("Kocoumbo", 10, 2);
        let o = order(vec![line(&w, 1)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;
        let svc = service(&store);

        applied(svc.handle(paid(&o, "T1")).await.unwrap());
        let outcome = svc.handle(paid(&o, "T2")).await.unwrap();

        assert!(matches!(outcome, SettlementOutcome::Ignored { .. }));
        let state = store.snapshot().await;
        assert_eq!(state.works[&w.id].stock, 9);
        assert!(!state.processed_events.contains("payment:T2"));
    }

    #[tokio::test]
    async fn test_unknown_order_is_ignored_and_key_released() {
        let store = MemoryStore::new();
        let event = SettlementEvent::PaymentSucceeded {
            transaction_id: "T9".to_string(),
            order_id: Uuid::new_v4(),
            amount: Decimal::from(100),
        };

        let outcome = service(&store).handle(event).await.unwrap();

        assert!(matches!(outcome, SettlementOutcome::Ignored { .. }));
        assert!(store.snapshot().await.processed_events.is_empty());
    }

    #[tokio::test]
    async fn test_short_stock_is_clamped_and_reported() {
        let w = work("Le Cercle des tropiques", 2, 1);
        let o = order(vec![line(&w, 5)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;

        let summary = applied(service(&store).handle(paid(&o, "T1")).await.unwrap());

        assert_eq!(summary.clamped_lines, vec![w.id]);
        let state = store.snapshot().await;
        assert_eq!(state.works[&w.id].stock, 0);
        assert_eq!(state.movements[0].applied_delta, -2);
    }

    #[tokio::test]
    async fn test_unknown_work_line_is_skipped() {
        let known = work("Known", 10, 1);
        let ghost = work("Ghost", 10, 1);
        let o = order(vec![line(&ghost, 1), line(&known, 3)]);
        let store = seeded(&[known.clone()], &[o.clone()]).await;

        let summary = applied(service(&store).handle(paid(&o, "T1")).await.unwrap());

        assert_eq!(summary.movements, 1);
        assert_eq!(summary.skipped_lines.len(), 1);
        assert_eq!(summary.skipped_lines[0].work_id, ghost.id);
        assert_eq!(store.snapshot().await.works[&known.id].stock, 7);
    }

    #[tokio::test]
    async fn test_work_rule_overrides_default_royalty() {
        let w = authored("Un piège sans fin", 10);
        let o = order(vec![line(&w, 5)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;
        let (work_id, author_id) = (w.id, w.author_id);
        store
            .seed(move |s| {
                s.rate_rules
                    .push(rule(RateKind::Royalty, RateScope::Author, author_id, 15));
                s.rate_rules
                    .push(rule(RateKind::Royalty, RateScope::Work, Some(work_id), 20));
            })
            .await;

        applied(service(&store).handle(paid(&o, "T1")).await.unwrap());

        let state = store.snapshot().await;
        assert_eq!(state.royalties[0].rate, Decimal::from(20));
        assert_eq!(state.royalties[0].amount, Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_partner_order_records_rebate() {
        let w = work("Les Crapauds-brousse", 10, 1);
        let partner = Uuid::new_v4();
        let o = Order {
            partner_id: Some(partner),
            ..order(vec![line(&w, 4)])
        };
        let store = seeded(&[w.clone()], &[o.clone()]).await;
        store
            .seed(move |s| {
                s.rate_rules
                    .push(rule(RateKind::Rebate, RateScope::Partner, Some(partner), 8));
            })
            .await;

        let summary = applied(service(&store).handle(paid(&o, "T1")).await.unwrap());

        assert_eq!(summary.rebates, 1);
        assert_eq!(summary.royalties, 0);
        let state = store.snapshot().await;
        assert_eq!(state.rebates[0].partner_id, partner);
        assert_eq!(state.rebates[0].amount, Decimal::from(320));
    }

    #[tokio::test]
    async fn test_payment_failed_marks_unpaid() {
        let w = work("Failed", 10, 1);
        let o = order(vec![line(&w, 1)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;

        let outcome = service(&store)
            .handle(SettlementEvent::PaymentFailed {
                transaction_id: "T1".to_string(),
                order_id: o.id,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, SettlementOutcome::Applied(_)));
        let state = store.snapshot().await;
        assert_eq!(state.orders[&o.id].payment_status, PaymentStatus::Unpaid);
        assert_eq!(state.orders[&o.id].status, OrderStatus::Pending);
        assert_eq!(state.works[&w.id].stock, 10);
        assert_eq!(state.notifications[0].title, "Paiement échoué");
    }

    #[tokio::test]
    async fn test_success_after_settled_failure_is_duplicate() {
        let w = work("Climbié", 10, 1);
        let o = order(vec![line(&w, 2)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;
        let svc = service(&store);

        applied(
            svc.handle(SettlementEvent::PaymentFailed {
                transaction_id: "T1".to_string(),
                order_id: o.id,
            })
            .await
            .unwrap(),
        );
        let outcome = svc.handle(paid(&o, "T1")).await.unwrap();

        assert_eq!(outcome, SettlementOutcome::Duplicate);
        let state = store.snapshot().await;
        assert_eq!(state.orders[&o.id].payment_status, PaymentStatus::Unpaid);
        assert_eq!(state.works[&w.id].stock, 10);
        assert!(state.payments.is_empty());
        assert!(state.processed_events.contains("payment:T1"));
    }

    #[tokio::test]
    async fn test_payment_cancelled_cancels_order() {
        let w = work("Cancelled", 10, 1);
        let o = order(vec![line(&w, 1)]);
        let store = seeded(&[w.clone()], &[o.clone()]).await;

        service(&store)
            .handle(SettlementEvent::PaymentCancelled {
                transaction_id: "T1".to_string(),
                order_id: o.id,
            })
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.orders[&o.id].status, OrderStatus::Cancelled);
        assert_eq!(state.orders[&o.id].payment_status, PaymentStatus::Cancelled);
    }
}

// ============================================================================
// Payouts
// ============================================================================

#[cfg(test)]
mod payout_tests {
    use super::*;

    fn withdrawal(kind: WithdrawalKind, user_id: Uuid) -> Withdrawal {
        Withdrawal {
            id: Uuid::new_v4(),
            kind,
            user_id,
            amount: Decimal::from(25000),
            status: WithdrawalStatus::Approved,
            rejection_reason: None,
            paid_at: None,
            payout_reference: None,
        }
    }

    #[tokio::test]
    async fn test_author_payout_marks_royalties_paid() {
        let author = Uuid::new_v4();
        let w = withdrawal(WithdrawalKind::Author, author);
        let store = MemoryStore::new();
        let seeded_withdrawal = w.clone();
        store
            .seed(move |s| {
                s.withdrawals.push(seeded_withdrawal);
                s.royalties.push(Royalty {
                    id: Uuid::new_v4(),
                    work_id: Uuid::new_v4(),
                    user_id: author,
                    order_id: Uuid::new_v4(),
                    amount: Decimal::from(500),
                    rate: Decimal::from(10),
                    approved: true,
                    paid: false,
                    paid_at: None,
                    created_at: Utc::now(),
                });
            })
            .await;
        let event = SettlementEvent::PayoutSucceeded {
            payout_id: "P1".to_string(),
            withdrawal_id: w.id,
            kind: WithdrawalKind::Author,
        };

        applied(service(&store).handle(event.clone()).await.unwrap());
        let again = service(&store).handle(event).await.unwrap();

        assert_eq!(again, SettlementOutcome::Duplicate);
        let state = store.snapshot().await;
        assert_eq!(state.withdrawals[0].status, WithdrawalStatus::Paid);
        assert_eq!(state.withdrawals[0].payout_reference.as_deref(), Some("P1"));
        assert!(state.royalties[0].paid);
        assert_eq!(state.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_partner_payout_marks_validated_rebates_paid() {
        let owner = Uuid::new_v4();
        let partner = Uuid::new_v4();
        let w = withdrawal(WithdrawalKind::Partner, owner);
        let store = MemoryStore::new();
        let seeded_withdrawal = w.clone();
        store
            .seed(move |s| {
                s.withdrawals.push(seeded_withdrawal);
                s.partners.insert(partner, owner);
                for status in [RebateStatus::Validated, RebateStatus::Pending] {
                    s.rebates.push(PartnerRebate {
                        id: Uuid::new_v4(),
                        partner_id: partner,
                        order_id: Uuid::new_v4(),
                        work_id: Uuid::new_v4(),
                        amount: Decimal::from(100),
                        rate: Decimal::from(5),
                        status,
                        paid_at: None,
                        created_at: Utc::now(),
                    });
                }
            })
            .await;

        applied(
            service(&store)
                .handle(SettlementEvent::PayoutSucceeded {
                    payout_id: "P2".to_string(),
                    withdrawal_id: w.id,
                    kind: WithdrawalKind::Partner,
                })
                .await
                .unwrap(),
        );

        let state = store.snapshot().await;
        assert_eq!(state.rebates[0].status, RebateStatus::Paid);
        assert!(state.rebates[0].paid_at.is_some());
        assert_eq!(state.rebates[1].status, RebateStatus::Pending);
    }

    #[tokio::test]
    async fn test_payout_failed_rejects_withdrawal() {
        let w = withdrawal(WithdrawalKind::Representative, Uuid::new_v4());
        let store = MemoryStore::new();
        let seeded_withdrawal = w.clone();
        store.seed(move |s| s.withdrawals.push(seeded_withdrawal)).await;

        applied(
            service(&store)
                .handle(SettlementEvent::PayoutFailed {
                    payout_id: "P3".to_string(),
                    withdrawal_id: w.id,
                    kind: WithdrawalKind::Representative,
                })
                .await
                .unwrap(),
        );

        let state = store.snapshot().await;
        assert_eq!(state.withdrawals[0].status, WithdrawalStatus::Rejected);
        assert!(state.withdrawals[0].rejection_reason.is_some());
        assert_eq!(state.notifications[0].title, "Retrait échoué");
    }

    async fn author_with_approved_royalty(author: Uuid, w: &Withdrawal) -> MemoryStore {
        let store = MemoryStore::new();
        let seeded_withdrawal = w.clone();
        store
            .seed(move |s| {
                s.withdrawals.push(seeded_withdrawal);
                s.royalties.push(Royalty {
                    id: Uuid::new_v4(),
                    work_id: Uuid::new_v4(),
                    user_id: author,
                    order_id: Uuid::new_v4(),
                    amount: Decimal::from(500),
                    rate: Decimal::from(10),
                    approved: true,
                    paid: false,
                    paid_at: None,
                    created_at: Utc::now(),
                });
            })
            .await;
        store
    }

    #[tokio::test]
    async fn test_failure_after_settled_payout_is_duplicate() {
        let author = Uuid::new_v4();
        let w = withdrawal(WithdrawalKind::Author, author);
        let store = author_with_approved_royalty(author, &w).await;
        let svc = service(&store);

        applied(
            svc.handle(SettlementEvent::PayoutSucceeded {
                payout_id: "P1".to_string(),
                withdrawal_id: w.id,
                kind: WithdrawalKind::Author,
            })
            .await
            .unwrap(),
        );
        let outcome = svc
            .handle(SettlementEvent::PayoutFailed {
                payout_id: "P1".to_string(),
                withdrawal_id: w.id,
                kind: WithdrawalKind::Author,
            })
            .await
            .unwrap();

        assert_eq!(outcome, SettlementOutcome::Duplicate);
        let state = store.snapshot().await;
        assert_eq!(state.withdrawals[0].status, WithdrawalStatus::Paid);
        assert!(state.withdrawals[0].rejection_reason.is_none());
        assert!(state.royalties[0].paid);
        assert_eq!(state.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_payout_never_rejects_a_paid_withdrawal() {
        let author = Uuid::new_v4();
        let w = withdrawal(WithdrawalKind::Author, author);
        let store = author_with_approved_royalty(author, &w).await;
        let svc = service(&store);

        applied(
            svc.handle(SettlementEvent::PayoutSucceeded {
                payout_id: "P1".to_string(),
                withdrawal_id: w.id,
                kind: WithdrawalKind::Author,
            })
            .await
            .unwrap(),
        );
        // a different payout id passes the key check and reaches the status guard
        let outcome = svc
            .handle(SettlementEvent::PayoutFailed {
                payout_id: "P2".to_string(),
                withdrawal_id: w.id,
                kind: WithdrawalKind::Author,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, SettlementOutcome::Ignored { .. }));
        let state = store.snapshot().await;
        assert_eq!(state.withdrawals[0].status, WithdrawalStatus::Paid);
        assert_eq!(state.notifications.len(), 1);
        assert!(!state.processed_events.contains("payout:P2"));
    }

    #[tokio::test]
    async fn test_payout_kind_mismatch_is_ignored() {
        let w = withdrawal(WithdrawalKind::Author, Uuid::new_v4());
        let store = MemoryStore::new();
        let seeded_withdrawal = w.clone();
        store.seed(move |s| s.withdrawals.push(seeded_withdrawal)).await;

        let outcome = service(&store)
            .handle(SettlementEvent::PayoutSucceeded {
                payout_id: "P4".to_string(),
                withdrawal_id: w.id,
                kind: WithdrawalKind::Partner,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, SettlementOutcome::Ignored { .. }));
        assert_eq!(
            store.snapshot().await.withdrawals[0].status,
            WithdrawalStatus::Approved
        );
    }
}

// ============================================================================
// Concurrent Deliveries
// ============================================================================

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_redelivery_applies_once() {
        let a = authored("Sous l'orage", 10);
        let b = authored("Le Pagne noir", 6);
        let o = order(vec![line(&a, 3), line(&b, 2)]);
        let store = seeded(&[a.clone(), b.clone()], &[o.clone()]).await;
        let (first, second) = (service(&store), service(&store));

        let (left, right) = tokio::join!(
            first.handle(paid(&o, "T1")),
            second.handle(paid(&o, "T1")),
        );
        let outcomes = [left.unwrap(), right.unwrap()];

        let applied_count = outcomes
            .iter()
            .filter(|o| matches!(o, SettlementOutcome::Applied(_)))
            .count();
        assert_eq!(applied_count, 1);
        assert!(outcomes.contains(&SettlementOutcome::Duplicate));

        let state = store.snapshot().await;
        assert_eq!(state.payments.len(), 1);
        assert_eq!(state.movements.len(), 2);
        assert_eq!(state.royalties.len(), 2);
        assert_eq!(state.works[&a.id].stock, 7);
        assert_eq!(state.works[&b.id].stock, 4);
        assert_eq!(state.notifications.len(), 1);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// However many times a payment is delivered, stock drops once and
        /// never below zero
        #[test]
        fn prop_payment_applies_once(
            stock in 0i32..30,
            quantity in 1i32..20,
            deliveries in 1usize..5,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (final_stock, movements) = rt.block_on(async {
                let w = authored("Prop", stock);
                let o = order(vec![line(&w, quantity)]);
                let store = seeded(&[w.clone()], &[o.clone()]).await;
                let svc = service(&store);
                for _ in 0..deliveries {
                    svc.handle(paid(&o, "T-prop")).await.unwrap();
                }
                let state = store.snapshot().await;
                (state.works[&w.id].stock, state.movements.len())
            });

            prop_assert_eq!(final_stock, (stock - quantity).max(0));
            prop_assert_eq!(movements, 1);
        }
    }
}
