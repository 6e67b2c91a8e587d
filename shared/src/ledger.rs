//! Stock ledger arithmetic
//!
//! Pure rules for applying movements to a work's warehouse counter and for
//! consignment bookkeeping. The backend services load rows, call into this
//! module, and persist the result inside one transaction.
//!
//! Stock is kept in `[0, i32::MAX]`. A movement records the delta actually
//! applied after clamping (`applied_delta`), so deleting it reverses exactly
//! what it did.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{MovementSource, MovementType, UnknownVariant};
use crate::validation::validate_quantity;

/// What to do when an outbound movement exceeds current stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversellPolicy {
    /// Apply the movement and floor stock at zero
    #[default]
    Clamp,
    /// Refuse the movement with [`LedgerError::InsufficientStock`]
    Reject,
}

impl FromStr for OversellPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clamp" => Ok(OversellPolicy::Clamp),
            "reject" => Ok(OversellPolicy::Reject),
            _ => Err(UnknownVariant::new("oversell policy", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0}")]
    InvalidQuantity(&'static str),

    #[error("insufficient stock: {available} available, {requested} requested")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("sale exceeds consignment: {available} available, {requested} requested")]
    ExceedsAvailable { available: i32, requested: i32 },

    #[error("return exceeds net sold: {net_sold} sold, {requested} returned")]
    ExceedsNetSold { net_sold: i32, requested: i32 },

    #[error("invalid stock count: {0}")]
    InvalidCount(i32),

    #[error("{0} movements are part of a paired effect and cannot be deleted")]
    NotReversible(MovementSource),
}

/// Outcome of applying a delta to a stock counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub previous: i32,
    pub new_stock: i32,
    /// `new_stock - previous`
    pub applied_delta: i32,
    /// True when the requested delta was cut short by a bound
    pub clamped: bool,
}

/// Signed delta for a movement type
///
/// INBOUND and CORRECTION add, OUTBOUND subtracts.
pub fn signed_delta(movement_type: MovementType, quantity: i32) -> i64 {
    let quantity = i64::from(quantity);
    match movement_type {
        MovementType::Inbound | MovementType::Correction => quantity,
        MovementType::Outbound => -quantity,
    }
}

/// Apply a signed delta, keeping the result in `[0, i32::MAX]`
pub fn apply_delta(current: i32, delta: i64) -> StockChange {
    let requested = i64::from(current) + delta;
    let bounded = requested.clamp(0, i64::from(i32::MAX));
    // bounded fits in i32 after the clamp
    let new_stock = i32::try_from(bounded).unwrap_or(i32::MAX);

    StockChange {
        previous: current,
        new_stock,
        applied_delta: new_stock - current,
        clamped: bounded != requested,
    }
}

/// Validate and plan a movement against the current stock
pub fn plan_movement(
    current: i32,
    movement_type: MovementType,
    quantity: i32,
    policy: OversellPolicy,
) -> Result<StockChange, LedgerError> {
    validate_quantity(quantity).map_err(LedgerError::InvalidQuantity)?;

    if movement_type == MovementType::Outbound
        && policy == OversellPolicy::Reject
        && quantity > current
    {
        return Err(LedgerError::InsufficientStock {
            available: current,
            requested: quantity,
        });
    }

    Ok(apply_delta(current, signed_delta(movement_type, quantity)))
}

/// Plan the compensating change for deleting a movement
pub fn reverse(current: i32, applied_delta: i32) -> StockChange {
    apply_delta(current, -i64::from(applied_delta))
}

/// Refuse to delete a movement whose counterpart lives elsewhere
pub fn check_reversible(source: MovementSource) -> Result<(), LedgerError> {
    if source.is_reversible() {
        Ok(())
    } else {
        Err(LedgerError::NotReversible(source))
    }
}

/// Plan setting a counter to a physically counted value
///
/// The applied delta is the discrepancy between the count and the books,
/// which may be zero or negative.
pub fn plan_count(current: i32, counted: i32) -> Result<StockChange, LedgerError> {
    if counted < 0 {
        return Err(LedgerError::InvalidCount(counted));
    }
    Ok(StockChange {
        previous: current,
        new_stock: counted,
        applied_delta: counted - current,
        clamped: false,
    })
}

// ============================================================================
// Consignment
// ============================================================================

/// Consignment stock a partner may still sell
///
/// `max(0, allocated - sold + returned)`
pub fn available_quantity(allocated: i32, sold: i32, returned: i32) -> i32 {
    let available = i64::from(allocated) - i64::from(sold) + i64::from(returned);
    i32::try_from(available.clamp(0, i64::from(i32::MAX))).unwrap_or(i32::MAX)
}

/// Check a partner sale against available consignment
pub fn check_sale(available: i32, quantity: i32) -> Result<(), LedgerError> {
    validate_quantity(quantity).map_err(LedgerError::InvalidQuantity)?;
    if quantity > available {
        return Err(LedgerError::ExceedsAvailable {
            available,
            requested: quantity,
        });
    }
    Ok(())
}

/// Check a partner return against what was sold and not yet returned
pub fn check_return(net_sold: i32, quantity: i32) -> Result<(), LedgerError> {
    validate_quantity(quantity).map_err(LedgerError::InvalidQuantity)?;
    if quantity > net_sold {
        return Err(LedgerError::ExceedsNetSold {
            net_sold,
            requested: quantity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signed_delta() {
        assert_eq!(signed_delta(MovementType::Inbound, 5), 5);
        assert_eq!(signed_delta(MovementType::Correction, 5), 5);
        assert_eq!(signed_delta(MovementType::Outbound, 5), -5);
    }

    #[test]
    fn test_outbound_floors_at_zero() {
        let change = plan_movement(3, MovementType::Outbound, 5, OversellPolicy::Clamp).unwrap();
        assert_eq!(change.new_stock, 0);
        assert_eq!(change.applied_delta, -3);
        assert!(change.clamped);
    }

    #[test]
    fn test_reject_policy() {
        let err = plan_movement(3, MovementType::Outbound, 5, OversellPolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                available: 3,
                requested: 5
            }
        );
        assert!(plan_movement(5, MovementType::Outbound, 5, OversellPolicy::Reject).is_ok());
    }

    #[test]
    fn test_invalid_quantity() {
        assert!(matches!(
            plan_movement(10, MovementType::Inbound, 0, OversellPolicy::Clamp),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_inbound_ceiling() {
        let change = apply_delta(i32::MAX - 1, 10);
        assert_eq!(change.new_stock, i32::MAX);
        assert_eq!(change.applied_delta, 1);
        assert!(change.clamped);
    }

    #[test]
    fn test_reverse_clamped_outbound() {
        let out = plan_movement(3, MovementType::Outbound, 5, OversellPolicy::Clamp).unwrap();
        let back = reverse(out.new_stock, out.applied_delta);
        assert_eq!(back.new_stock, 3);
    }

    #[test]
    fn test_plan_count() {
        let down = plan_count(12, 9).unwrap();
        assert_eq!(down.new_stock, 9);
        assert_eq!(down.applied_delta, -3);
        assert!(!down.clamped);

        assert_eq!(plan_count(4, 4).unwrap().applied_delta, 0);
        assert_eq!(plan_count(4, -1), Err(LedgerError::InvalidCount(-1)));
    }

    #[test]
    fn test_only_standalone_movements_reverse() {
        assert!(check_reversible(MovementSource::Manual).is_ok());
        assert!(check_reversible(MovementSource::Inventory).is_ok());
        for source in [
            MovementSource::Allocation,
            MovementSource::Sale,
            MovementSource::NoteCancellation,
        ] {
            assert_eq!(check_reversible(source), Err(LedgerError::NotReversible(source)));
        }
    }

    #[test]
    fn test_available_quantity() {
        assert_eq!(available_quantity(10, 4, 1), 7);
        assert_eq!(available_quantity(10, 12, 0), 0);
        assert_eq!(available_quantity(0, 0, 0), 0);
    }

    #[test]
    fn test_sale_and_return_checks() {
        assert!(check_sale(5, 5).is_ok());
        assert!(matches!(check_sale(5, 6), Err(LedgerError::ExceedsAvailable { .. })));
        assert!(check_return(3, 3).is_ok());
        assert!(matches!(check_return(3, 4), Err(LedgerError::ExceedsNetSold { .. })));
    }

    fn movement_strategy() -> impl Strategy<Value = (MovementType, i32)> {
        (
            prop_oneof![
                Just(MovementType::Inbound),
                Just(MovementType::Outbound),
                Just(MovementType::Correction),
            ],
            1..500i32,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_stock_never_negative(
            start in 0..1000i32,
            moves in prop::collection::vec(movement_strategy(), 0..50)
        ) {
            let mut stock = start;
            for (kind, qty) in moves {
                stock = plan_movement(stock, kind, qty, OversellPolicy::Clamp).unwrap().new_stock;
                prop_assert!(stock >= 0);
            }
        }

        #[test]
        fn prop_stock_equals_sum_of_applied_deltas(
            moves in prop::collection::vec(movement_strategy(), 0..50)
        ) {
            let mut stock = 0;
            let mut sum: i64 = 0;
            for (kind, qty) in moves {
                let change = plan_movement(stock, kind, qty, OversellPolicy::Clamp).unwrap();
                stock = change.new_stock;
                sum += i64::from(change.applied_delta);
            }
            prop_assert_eq!(i64::from(stock), sum);
        }

        #[test]
        fn prop_reverse_last_movement_restores_stock(
            start in 0..1000i32,
            (kind, qty) in movement_strategy()
        ) {
            let change = plan_movement(start, kind, qty, OversellPolicy::Clamp).unwrap();
            prop_assert_eq!(reverse(change.new_stock, change.applied_delta).new_stock, start);
        }

        #[test]
        fn prop_reverse_count_restores_stock(start in 0..1000i32, counted in 0..1000i32) {
            let change = plan_count(start, counted).unwrap();
            prop_assert_eq!(reverse(change.new_stock, change.applied_delta).new_stock, start);
        }

        #[test]
        fn prop_available_is_never_negative(
            allocated in 0..10_000i32,
            sold in 0..10_000i32,
            returned in 0..10_000i32
        ) {
            let available = available_quantity(allocated, sold, returned);
            prop_assert!(available >= 0);
            prop_assert_eq!(
                i64::from(available),
                (i64::from(allocated) - i64::from(sold) + i64::from(returned)).max(0)
            );
        }
    }
}
