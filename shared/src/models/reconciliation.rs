//! Reconciliation classification rules
//!
//! Differences are always `invoiced - expected`. Classification, the matching
//! tolerance and the storage bucket's weighted average rate are pure Decimal
//! math; float summation is not allowed anywhere near money.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::billing::round_money;
use crate::types::{CostCategory, ReconciliationStatus};

/// Differences at or below this magnitude (in currency units) are a match
pub fn matching_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Classifies a signed `invoiced - expected` difference
pub fn classify_difference(difference: Decimal) -> ReconciliationStatus {
    let tolerance = matching_tolerance();
    if difference.abs() <= tolerance {
        ReconciliationStatus::Match
    } else if difference > tolerance {
        ReconciliationStatus::Overbilled
    } else {
        ReconciliationStatus::Underbilled
    }
}

/// One expected-charge bucket: calculated costs grouped by (category, name)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectedCost {
    pub category: CostCategory,
    pub cost_name: String,
    pub quantity: Decimal,
    pub unit_rate: Option<Decimal>,
    pub amount: Decimal,
}

/// Weighted average unit rate for an aggregated bucket, rounded half-up to
/// two decimal places. None when the quantity is zero.
pub fn weighted_average_rate(total_cost: Decimal, total_quantity: Decimal) -> Option<Decimal> {
    if total_quantity.is_zero() {
        None
    } else {
        Some(round_money(total_cost / total_quantity))
    }
}

/// Per-run tallies reported alongside the reconciliation records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationSummary {
    pub total_records: usize,
    pub matched: usize,
    pub overbilled: usize,
    pub underbilled: usize,
    pub total_expected: Decimal,
    pub total_invoiced: Decimal,
    /// Sum of absolute line differences
    pub total_variance: Decimal,
}

impl ReconciliationSummary {
    pub fn add(&mut self, status: ReconciliationStatus, expected: Decimal, invoiced: Decimal) {
        self.total_records += 1;
        match status {
            ReconciliationStatus::Match => self.matched += 1,
            ReconciliationStatus::Overbilled => self.overbilled += 1,
            ReconciliationStatus::Underbilled => self.underbilled += 1,
        }
        self.total_expected += expected;
        self.total_invoiced += invoiced;
        self.total_variance += (invoiced - expected).abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(
            classify_difference(Decimal::ZERO),
            ReconciliationStatus::Match
        );
    }

    #[test]
    fn test_tolerance_boundary_is_a_match() {
        assert_eq!(
            classify_difference(dec("0.01")),
            ReconciliationStatus::Match
        );
        assert_eq!(
            classify_difference(dec("-0.01")),
            ReconciliationStatus::Match
        );
    }

    #[test]
    fn test_positive_difference_is_overbilled() {
        assert_eq!(
            classify_difference(dec("0.011")),
            ReconciliationStatus::Overbilled
        );
        assert_eq!(
            classify_difference(dec("5.00")),
            ReconciliationStatus::Overbilled
        );
    }

    #[test]
    fn test_negative_difference_is_underbilled() {
        assert_eq!(
            classify_difference(dec("-0.02")),
            ReconciliationStatus::Underbilled
        );
        assert_eq!(
            classify_difference(dec("-5.00")),
            ReconciliationStatus::Underbilled
        );
    }

    #[test]
    fn test_weighted_average_rounds_half_up() {
        assert_eq!(
            weighted_average_rate(dec("100"), dec("3")),
            Some(dec("33.33"))
        );
        assert_eq!(
            weighted_average_rate(dec("10"), dec("4")),
            Some(dec("2.50"))
        );
        assert_eq!(
            weighted_average_rate(dec("0.125"), dec("1")),
            Some(dec("0.13"))
        );
    }

    #[test]
    fn test_weighted_average_with_zero_quantity() {
        assert_eq!(weighted_average_rate(dec("100"), Decimal::ZERO), None);
    }

    #[test]
    fn test_summary_accumulates() {
        let mut summary = ReconciliationSummary::default();
        summary.add(ReconciliationStatus::Match, dec("100"), dec("100"));
        summary.add(ReconciliationStatus::Overbilled, dec("100"), dec("105"));
        summary.add(ReconciliationStatus::Underbilled, dec("100"), dec("95"));
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.overbilled, 1);
        assert_eq!(summary.underbilled, 1);
        assert_eq!(summary.total_expected, dec("300"));
        assert_eq!(summary.total_invoiced, dec("300"));
        assert_eq!(summary.total_variance, dec("10"));
    }
}
