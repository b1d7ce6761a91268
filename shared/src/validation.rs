//! Boundary validation for ingress payloads
//!
//! Everything here is pure and rejects before any mutation happens. The
//! service layer maps these messages into its structured validation errors.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::models::Movement;

/// Oldest transaction date accepted relative to "today"
pub const MAX_TRANSACTION_AGE_DAYS: i64 = 365;

/// Longest accepted batch/lot identifier
pub const MAX_BATCH_LOT_LEN: usize = 64;

// ============================================================================
// Inventory Transaction Validations
// ============================================================================

/// Validate a batch/lot identifier (non-empty, printable key characters only)
pub fn validate_batch_lot(batch_lot: &str) -> Result<(), &'static str> {
    let trimmed = batch_lot.trim();
    if trimmed.is_empty() {
        return Err("Batch lot must not be empty");
    }
    if trimmed.len() > MAX_BATCH_LOT_LEN {
        return Err("Batch lot is too long");
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err("Batch lot may only contain letters, digits, '-', '_' and '.'");
    }
    Ok(())
}

/// Validate a transaction date against the accepted window
pub fn validate_transaction_date(date: NaiveDate, today: NaiveDate) -> Result<(), &'static str> {
    if date > today {
        return Err("Transaction date cannot be in the future");
    }
    if date < today - Duration::days(MAX_TRANSACTION_AGE_DAYS) {
        return Err("Transaction date is more than one year old");
    }
    Ok(())
}

/// Validate a carton quantity
pub fn validate_cartons(cartons: i32) -> Result<(), &'static str> {
    if cartons < 0 {
        return Err("Carton quantity cannot be negative");
    }
    Ok(())
}

/// Validate a pallet quantity
pub fn validate_pallets(pallets: i32) -> Result<(), &'static str> {
    if pallets < 0 {
        return Err("Pallet quantity cannot be negative");
    }
    Ok(())
}

/// Validate a cartons-per-pallet override (must reduce to whole pallets)
pub fn validate_cartons_per_pallet(cartons_per_pallet: i32) -> Result<(), &'static str> {
    if cartons_per_pallet <= 0 {
        return Err("Cartons per pallet must be positive");
    }
    Ok(())
}

/// Validate the movement detail of a transaction payload
pub fn validate_movement(movement: &Movement) -> Result<(), &'static str> {
    match movement {
        Movement::Receive {
            cartons_in,
            storage_pallets_in,
            storage_cartons_per_pallet,
            shipping_cartons_per_pallet,
        } => {
            validate_cartons(*cartons_in)?;
            validate_pallets(*storage_pallets_in)?;
            if let Some(cpp) = storage_cartons_per_pallet {
                validate_cartons_per_pallet(*cpp)?;
            }
            if let Some(cpp) = shipping_cartons_per_pallet {
                validate_cartons_per_pallet(*cpp)?;
            }
            Ok(())
        }
        Movement::Ship {
            cartons_out,
            shipping_pallets_out,
            shipping_cartons_per_pallet,
        } => {
            validate_cartons(*cartons_out)?;
            validate_pallets(*shipping_pallets_out)?;
            if let Some(cpp) = shipping_cartons_per_pallet {
                validate_cartons_per_pallet(*cpp)?;
            }
            Ok(())
        }
        Movement::Transfer { cartons_out } | Movement::AdjustOut { cartons_out } => {
            validate_cartons(*cartons_out)
        }
        Movement::AdjustIn { cartons_in } => validate_cartons(*cartons_in),
    }
}

// ============================================================================
// Rate Validations
// ============================================================================

/// Validate a rate name (distinguishes e.g. inbound vs outbound carton rates)
pub fn validate_rate_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Rate name must not be empty");
    }
    Ok(())
}

/// Validate a rate value
pub fn validate_rate_value(value: Decimal) -> Result<(), &'static str> {
    if value < Decimal::ZERO {
        return Err("Rate value cannot be negative");
    }
    Ok(())
}

/// Validate a rate's effective window ordering
pub fn validate_rate_window(
    effective_from: NaiveDate,
    effective_to: Option<NaiveDate>,
) -> Result<(), &'static str> {
    if let Some(to) = effective_to {
        if to < effective_from {
            return Err("Rate effective_to cannot precede effective_from");
        }
    }
    Ok(())
}

// ============================================================================
// Invoice Validations
// ============================================================================

/// Validate one invoice line item; the line amount is derived as
/// quantity times unit rate, so validating the factors covers it
pub fn validate_line_item(
    cost_name: &str,
    quantity: Decimal,
    unit_rate: Decimal,
) -> Result<(), &'static str> {
    if cost_name.trim().is_empty() {
        return Err("Line item cost name must not be empty");
    }
    if quantity < Decimal::ZERO {
        return Err("Line item quantity cannot be negative");
    }
    if unit_rate < Decimal::ZERO {
        return Err("Line item unit rate cannot be negative");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ========================================================================
    // Inventory Transaction Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_batch_lot_valid() {
        assert!(validate_batch_lot("LOT-2024-001").is_ok());
        assert!(validate_batch_lot("B1").is_ok());
        assert!(validate_batch_lot("batch_7.3").is_ok());
    }

    #[test]
    fn test_validate_batch_lot_invalid() {
        assert!(validate_batch_lot("").is_err());
        assert!(validate_batch_lot("   ").is_err());
        assert!(validate_batch_lot("LOT 001").is_err()); // Space
        assert!(validate_batch_lot("LOT/001").is_err()); // Slash
        assert!(validate_batch_lot(&"X".repeat(65)).is_err()); // Too long
    }

    #[test]
    fn test_validate_transaction_date_valid() {
        let today = date(2024, 7, 1);
        assert!(validate_transaction_date(today, today).is_ok());
        assert!(validate_transaction_date(date(2024, 6, 1), today).is_ok());
        assert!(validate_transaction_date(date(2023, 7, 2), today).is_ok());
    }

    #[test]
    fn test_validate_transaction_date_invalid() {
        let today = date(2024, 7, 1);
        // Future
        assert!(validate_transaction_date(date(2024, 7, 2), today).is_err());
        // Older than one year
        assert!(validate_transaction_date(date(2023, 6, 30), today).is_err());
    }

    #[test]
    fn test_validate_quantities() {
        assert!(validate_cartons(0).is_ok());
        assert!(validate_cartons(100).is_ok());
        assert!(validate_cartons(-1).is_err());
        assert!(validate_pallets(0).is_ok());
        assert!(validate_pallets(-2).is_err());
        assert!(validate_cartons_per_pallet(1).is_ok());
        assert!(validate_cartons_per_pallet(0).is_err());
        assert!(validate_cartons_per_pallet(-50).is_err());
    }

    #[test]
    fn test_validate_movement_receive() {
        let valid = Movement::Receive {
            cartons_in: 100,
            storage_pallets_in: 2,
            storage_cartons_per_pallet: Some(50),
            shipping_cartons_per_pallet: None,
        };
        assert!(validate_movement(&valid).is_ok());

        let bad_override = Movement::Receive {
            cartons_in: 100,
            storage_pallets_in: 2,
            storage_cartons_per_pallet: Some(0),
            shipping_cartons_per_pallet: None,
        };
        assert!(validate_movement(&bad_override).is_err());
    }

    #[test]
    fn test_validate_movement_ship() {
        let valid = Movement::Ship {
            cartons_out: 40,
            shipping_pallets_out: 1,
            shipping_cartons_per_pallet: None,
        };
        assert!(validate_movement(&valid).is_ok());

        let negative = Movement::Ship {
            cartons_out: -1,
            shipping_pallets_out: 0,
            shipping_cartons_per_pallet: None,
        };
        assert!(validate_movement(&negative).is_err());
    }

    #[test]
    fn test_validate_movement_adjustments() {
        assert!(validate_movement(&Movement::AdjustIn { cartons_in: 5 }).is_ok());
        assert!(validate_movement(&Movement::AdjustOut { cartons_out: 5 }).is_ok());
        assert!(validate_movement(&Movement::Transfer { cartons_out: -3 }).is_err());
    }

    // ========================================================================
    // Rate Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_rate_name() {
        assert!(validate_rate_name("Weekly Storage").is_ok());
        assert!(validate_rate_name("").is_err());
        assert!(validate_rate_name("  ").is_err());
    }

    #[test]
    fn test_validate_rate_value() {
        assert!(validate_rate_value(Decimal::ZERO).is_ok());
        assert!(validate_rate_value(Decimal::new(1250, 2)).is_ok());
        assert!(validate_rate_value(Decimal::new(-1, 2)).is_err());
    }

    #[test]
    fn test_validate_rate_window() {
        let from = date(2024, 1, 1);
        assert!(validate_rate_window(from, None).is_ok());
        assert!(validate_rate_window(from, Some(date(2024, 1, 1))).is_ok());
        assert!(validate_rate_window(from, Some(date(2023, 12, 31))).is_err());
    }

    // ========================================================================
    // Invoice Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_line_item_valid() {
        assert!(validate_line_item("Weekly Storage", Decimal::from(12), Decimal::new(30000, 2)).is_ok());
        assert!(validate_line_item("Inbound Handling", Decimal::ZERO, Decimal::ZERO).is_ok());
    }

    #[test]
    fn test_validate_line_item_invalid() {
        assert!(validate_line_item("", Decimal::ONE, Decimal::ONE).is_err());
        assert!(validate_line_item("Storage", Decimal::from(-1), Decimal::ONE).is_err());
        assert!(validate_line_item("Storage", Decimal::ONE, Decimal::from(-1)).is_err());
    }
}
