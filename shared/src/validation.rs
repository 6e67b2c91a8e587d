//! Validation utilities for the book ledger
//!
//! Small input checks shared by the HTTP layer and the services. Each returns
//! a static English message; the backend attaches the field name and French
//! translation.

use rust_decimal::Decimal;

// ============================================================================
// Stock Validations
// ============================================================================

/// Largest quantity accepted on a single movement
pub const MAX_MOVEMENT_QUANTITY: i32 = 1_000_000;

/// Validate a movement, sale or return quantity
pub fn validate_quantity(quantity: i32) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be a positive integer");
    }
    if quantity > MAX_MOVEMENT_QUANTITY {
        return Err("Quantity exceeds the maximum allowed per movement");
    }
    Ok(())
}

// ============================================================================
// Settlement Validations
// ============================================================================

/// Validate a percentage rate (0-100)
pub fn validate_rate(rate: Decimal) -> Result<(), &'static str> {
    if rate < Decimal::ZERO {
        return Err("Rate cannot be negative");
    }
    if rate > Decimal::ONE_HUNDRED {
        return Err("Rate cannot exceed 100%");
    }
    Ok(())
}

// ============================================================================
// Delivery Note Validations
// ============================================================================

/// Validate a reporting period in `YYYY-MM` format
pub fn validate_period(period: &str) -> Result<(), &'static str> {
    let parts: Vec<&str> = period.split('-').collect();

    if parts.len() != 2 {
        return Err("Period must be in format YYYY-MM");
    }

    if parts[0].len() != 4 || !parts[0].chars().all(|c| c.is_ascii_digit()) {
        return Err("Invalid year in period");
    }

    match parts[1].parse::<u32>() {
        Ok(month) if parts[1].len() == 2 && (1..=12).contains(&month) => Ok(()),
        _ => Err("Invalid month in period"),
    }
}

/// Validate a delivery-note reference
/// Format: BS-YYYY-NNNN (sequence at least four digits)
pub fn validate_delivery_note_reference(reference: &str) -> Result<(), &'static str> {
    let parts: Vec<&str> = reference.split('-').collect();

    if parts.len() != 3 {
        return Err("Delivery note reference must be in format BS-YYYY-NNNN");
    }

    if parts[0] != crate::models::DELIVERY_NOTE_PREFIX {
        return Err("Delivery note reference must start with 'BS'");
    }

    if parts[1].len() != 4 || !parts[1].chars().all(|c| c.is_ascii_digit()) {
        return Err("Invalid year in delivery note reference");
    }

    if parts[2].len() < 4 || !parts[2].chars().all(|c| c.is_ascii_digit()) {
        return Err("Invalid sequence number in delivery note reference");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Stock Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_MOVEMENT_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
        assert!(validate_quantity(MAX_MOVEMENT_QUANTITY + 1).is_err());
    }

    // ========================================================================
    // Settlement Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_rate() {
        assert!(validate_rate(Decimal::ZERO).is_ok());
        assert!(validate_rate(Decimal::new(125, 1)).is_ok());
        assert!(validate_rate(Decimal::ONE_HUNDRED).is_ok());
        assert!(validate_rate(Decimal::from(-1)).is_err());
        assert!(validate_rate(Decimal::from(101)).is_err());
    }

    // ========================================================================
    // Delivery Note Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_period() {
        assert!(validate_period("2026-01").is_ok());
        assert!(validate_period("2026-12").is_ok());
        assert!(validate_period("2026-13").is_err());
        assert!(validate_period("2026-1").is_err());
        assert!(validate_period("26-01").is_err());
        assert!(validate_period("january").is_err());
    }

    #[test]
    fn test_validate_delivery_note_reference() {
        assert!(validate_delivery_note_reference("BS-2026-0001").is_ok());
        assert!(validate_delivery_note_reference("BS-2026-12345").is_ok());
        assert!(validate_delivery_note_reference("BS-2026-001").is_err());
        assert!(validate_delivery_note_reference("BL-2026-0001").is_err());
        assert!(validate_delivery_note_reference("BS-26-0001").is_err());
    }

    #[test]
    fn test_generated_reference_is_valid() {
        let reference = crate::models::delivery_note_reference(2026, 7);
        assert!(validate_delivery_note_reference(&reference).is_ok());
    }
}
