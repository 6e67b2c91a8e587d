//! Tiered royalty and rebate rate resolution
//!
//! Rules are loaded once per settlement and resolved in memory.
//!
//! | kind    | precedence                 | fallback |
//! |---------|----------------------------|----------|
//! | royalty | WORK > AUTHOR > GLOBAL     | 10%      |
//! | rebate  | PARTNER > WORK > GLOBAL    | 5%       |
//!
//! Within one scope level the most recently created rule wins; equal
//! creation instants fall back to the lowest rule id.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{RateKind, RateRule, RateScope};
use crate::validation::validate_rate;

/// Rates used when no rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDefaults {
    pub royalty: Decimal,
    pub rebate: Decimal,
}

impl Default for RateDefaults {
    fn default() -> Self {
        Self {
            royalty: Decimal::from(10),
            rebate: Decimal::from(5),
        }
    }
}

/// Identifiers a rate can be scoped to for one order line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateContext {
    pub work_id: Uuid,
    pub author_id: Option<Uuid>,
    pub partner_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRate {
    pub rate: Decimal,
    /// Scope of the winning rule; `None` when the default applied
    pub scope: Option<RateScope>,
    pub rule_id: Option<Uuid>,
}

/// Rules in force at one instant
#[derive(Debug, Clone)]
pub struct RateTable {
    rules: Vec<RateRule>,
    defaults: RateDefaults,
}

impl RateTable {
    /// Keep only rules that apply at `at` and carry a valid percentage
    pub fn new(rules: Vec<RateRule>, at: DateTime<Utc>, defaults: RateDefaults) -> Self {
        let rules = rules
            .into_iter()
            .filter(|r| r.applies_at(at) && validate_rate(r.rate).is_ok())
            .collect();
        Self { rules, defaults }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn resolve_royalty(&self, ctx: &RateContext) -> ResolvedRate {
        let chain = [
            (RateScope::Work, Some(ctx.work_id)),
            (RateScope::Author, ctx.author_id),
            (RateScope::Global, None),
        ];
        self.resolve(RateKind::Royalty, &chain, self.defaults.royalty)
    }

    pub fn resolve_rebate(&self, ctx: &RateContext) -> ResolvedRate {
        let chain = [
            (RateScope::Partner, ctx.partner_id),
            (RateScope::Work, Some(ctx.work_id)),
            (RateScope::Global, None),
        ];
        self.resolve(RateKind::Rebate, &chain, self.defaults.rebate)
    }

    fn resolve(
        &self,
        kind: RateKind,
        chain: &[(RateScope, Option<Uuid>)],
        fallback: Decimal,
    ) -> ResolvedRate {
        for &(scope, scope_id) in chain {
            // a scoped level with no id to match is skipped
            if scope != RateScope::Global && scope_id.is_none() {
                continue;
            }
            if let Some(rule) = self.best_rule(kind, scope, scope_id) {
                return ResolvedRate {
                    rate: rule.rate,
                    scope: Some(scope),
                    rule_id: Some(rule.id),
                };
            }
        }

        ResolvedRate {
            rate: fallback,
            scope: None,
            rule_id: None,
        }
    }

    fn best_rule(
        &self,
        kind: RateKind,
        scope: RateScope,
        scope_id: Option<Uuid>,
    ) -> Option<&RateRule> {
        self.rules
            .iter()
            .filter(|r| r.kind == kind && r.scope == scope)
            .filter(|r| scope == RateScope::Global || r.scope_id == scope_id)
            .max_by_key(|r| (r.created_at, Reverse(r.id)))
    }
}

/// `unit_price * quantity * rate / 100`, rounded to two decimals
pub fn line_amount(unit_price: Decimal, quantity: i32, rate: Decimal) -> Decimal {
    (unit_price * Decimal::from(quantity) * rate / Decimal::ONE_HUNDRED).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

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
            created_at: Utc::now() - Duration::days(1),
        }
    }

    fn ctx() -> RateContext {
        RateContext {
            work_id: Uuid::new_v4(),
            author_id: Some(Uuid::new_v4()),
            partner_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_work_rule_beats_global() {
        let c = ctx();
        let rules = vec![
            rule(RateKind::Royalty, RateScope::Global, None, 10),
            rule(RateKind::Royalty, RateScope::Work, Some(c.work_id), 20),
        ];
        let table = RateTable::new(rules, Utc::now(), RateDefaults::default());
        let resolved = table.resolve_royalty(&c);
        assert_eq!(resolved.rate, Decimal::from(20));
        assert_eq!(resolved.scope, Some(RateScope::Work));
    }

    #[test]
    fn test_defaults_when_no_rule() {
        let table = RateTable::new(vec![], Utc::now(), RateDefaults::default());
        let c = ctx();
        assert_eq!(table.resolve_royalty(&c).rate, Decimal::from(10));
        assert_eq!(table.resolve_rebate(&c).rate, Decimal::from(5));
        assert_eq!(table.resolve_royalty(&c).scope, None);
    }

    #[test]
    fn test_rebate_partner_beats_work() {
        let c = ctx();
        let rules = vec![
            rule(RateKind::Rebate, RateScope::Work, Some(c.work_id), 7),
            rule(RateKind::Rebate, RateScope::Partner, c.partner_id, 12),
        ];
        let table = RateTable::new(rules, Utc::now(), RateDefaults::default());
        assert_eq!(table.resolve_rebate(&c).rate, Decimal::from(12));
    }

    #[test]
    fn test_kinds_do_not_mix() {
        let c = ctx();
        let rules = vec![rule(RateKind::Rebate, RateScope::Work, Some(c.work_id), 30)];
        let table = RateTable::new(rules, Utc::now(), RateDefaults::default());
        assert_eq!(table.resolve_royalty(&c).rate, Decimal::from(10));
    }

    #[test]
    fn test_inactive_and_expired_rules_ignored() {
        let c = ctx();
        let mut inactive = rule(RateKind::Royalty, RateScope::Work, Some(c.work_id), 40);
        inactive.is_active = false;
        let mut expired = rule(RateKind::Royalty, RateScope::Author, c.author_id, 30);
        expired.valid_until = Some(Utc::now() - Duration::hours(1));
        let mut future = rule(RateKind::Royalty, RateScope::Global, None, 25);
        future.valid_from = Some(Utc::now() + Duration::days(3));

        let table = RateTable::new(vec![inactive, expired, future], Utc::now(), RateDefaults::default());
        assert!(table.is_empty());
        assert_eq!(table.resolve_royalty(&c).rate, Decimal::from(10));
    }

    #[test]
    fn test_newest_rule_wins_within_scope() {
        let c = ctx();
        let older = rule(RateKind::Royalty, RateScope::Global, None, 8);
        let mut newer = rule(RateKind::Royalty, RateScope::Global, None, 12);
        newer.created_at = older.created_at + Duration::minutes(5);

        let table = RateTable::new(vec![older, newer.clone()], Utc::now(), RateDefaults::default());
        assert_eq!(table.resolve_royalty(&c).rule_id, Some(newer.id));
    }

    #[test]
    fn test_tie_breaks_on_lowest_id() {
        let c = ctx();
        let a = rule(RateKind::Royalty, RateScope::Global, None, 8);
        let mut b = rule(RateKind::Royalty, RateScope::Global, None, 12);
        b.created_at = a.created_at;
        let lowest = a.id.min(b.id);

        let table = RateTable::new(vec![a, b], Utc::now(), RateDefaults::default());
        assert_eq!(table.resolve_royalty(&c).rule_id, Some(lowest));
    }

    #[test]
    fn test_line_amount() {
        assert_eq!(
            line_amount(Decimal::from(1000), 5, Decimal::from(10)),
            Decimal::from(500)
        );
        assert_eq!(
            line_amount(Decimal::new(1999, 2), 3, Decimal::new(75, 1)),
            Decimal::new(450, 2)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_work_rule_always_wins_royalty(
            work_rate in 0..=100i64,
            author_rate in 0..=100i64,
            global_rate in 0..=100i64
        ) {
            let c = ctx();
            let rules = vec![
                rule(RateKind::Royalty, RateScope::Global, None, global_rate),
                rule(RateKind::Royalty, RateScope::Author, c.author_id, author_rate),
                rule(RateKind::Royalty, RateScope::Work, Some(c.work_id), work_rate),
            ];
            let table = RateTable::new(rules, Utc::now(), RateDefaults::default());
            prop_assert_eq!(table.resolve_royalty(&c).rate, Decimal::from(work_rate));
        }

        #[test]
        fn prop_rules_for_other_works_never_match(rate in 0..=100i64) {
            let c = ctx();
            let rules = vec![rule(RateKind::Royalty, RateScope::Work, Some(Uuid::new_v4()), rate)];
            let table = RateTable::new(rules, Utc::now(), RateDefaults::default());
            prop_assert_eq!(table.resolve_royalty(&c).scope, None);
        }
    }
}
