//! Reconciliation classification tests
//!
//! Differences are always invoiced minus expected: a warehouse billing more
//! than the cost engine computed is overbilled, less is underbilled, and
//! anything within a cent matches. Covers classification, the storage
//! bucket's weighted average rate, and the run summary arithmetic.

use proptest::prelude::*;
use rust_decimal::Decimal;

use shared::models::{
    classify_difference, matching_tolerance, weighted_average_rate, ReconciliationSummary,
};
use shared::types::{CostCategory, ReconciliationStatus};
use warebill_core::services::reconciliation::STORAGE_COST_NAME;

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// The warehouse billed 105 against 100 expected: five over.
    #[test]
    fn test_overbilled_line() {
        let difference = dec("105.00") - dec("100.00");
        assert_eq!(difference, dec("5.00"));
        assert_eq!(
            classify_difference(difference),
            ReconciliationStatus::Overbilled
        );
    }

    #[test]
    fn test_underbilled_line() {
        let difference = dec("95.00") - dec("100.00");
        assert_eq!(
            classify_difference(difference),
            ReconciliationStatus::Underbilled
        );
    }

    /// A single cent either way still matches; beyond that it does not.
    #[test]
    fn test_penny_tolerance_boundary() {
        assert_eq!(matching_tolerance(), dec("0.01"));
        assert_eq!(
            classify_difference(dec("100.01") - dec("100.00")),
            ReconciliationStatus::Match
        );
        assert_eq!(
            classify_difference(dec("100.02") - dec("100.00")),
            ReconciliationStatus::Overbilled
        );
    }

    /// A storage bucket built from two weeks of snapshots: 10 pallets at
    /// 25.00 and 14 pallets at 35.00 average out to 2.50 per pallet.
    #[test]
    fn test_storage_bucket_weighted_average() {
        let total_cost = dec("25.00") + dec("35.00");
        let total_pallets = dec("10") + dec("14");
        assert_eq!(
            weighted_average_rate(total_cost, total_pallets),
            Some(dec("2.50"))
        );
    }

    #[test]
    fn test_weighted_average_absent_for_an_empty_bucket() {
        assert_eq!(weighted_average_rate(dec("60.00"), Decimal::ZERO), None);
    }

    /// The storage bucket is labelled with the weekly cost name under the
    /// Storage category, matching how the ledger rows are written.
    #[test]
    fn test_storage_bucket_label() {
        assert_eq!(STORAGE_COST_NAME, "Weekly Storage");
        assert_eq!(CostCategory::Storage.as_str(), "Storage");
    }

    #[test]
    fn test_summary_counts_and_totals() {
        let mut summary = ReconciliationSummary::default();
        summary.add(ReconciliationStatus::Overbilled, dec("200.00"), dec("207.25"));
        summary.add(ReconciliationStatus::Match, dec("60.00"), dec("60.00"));
        summary.add(ReconciliationStatus::Underbilled, dec("30.00"), dec("25.50"));

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.overbilled, 1);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.underbilled, 1);
        assert_eq!(summary.total_expected, dec("290.00"));
        assert_eq!(summary.total_invoiced, dec("292.75"));
        assert_eq!(summary.total_variance, dec("11.75"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Classification is total and driven solely by the tolerance.
        #[test]
        fn classification_follows_the_tolerance(cents in -1_000_000i64..=1_000_000) {
            let difference = Decimal::new(cents, 2);
            let tolerance = matching_tolerance();
            match classify_difference(difference) {
                ReconciliationStatus::Match => prop_assert!(difference.abs() <= tolerance),
                ReconciliationStatus::Overbilled => prop_assert!(difference > tolerance),
                ReconciliationStatus::Underbilled => prop_assert!(difference < -tolerance),
            }
        }

        /// Negating a difference swaps overbilled and underbilled and leaves
        /// matches alone.
        #[test]
        fn negation_mirrors_the_classification(cents in -1_000_000i64..=1_000_000) {
            let difference = Decimal::new(cents, 2);
            let mirrored = classify_difference(-difference);
            let expected = match classify_difference(difference) {
                ReconciliationStatus::Match => ReconciliationStatus::Match,
                ReconciliationStatus::Overbilled => ReconciliationStatus::Underbilled,
                ReconciliationStatus::Underbilled => ReconciliationStatus::Overbilled,
            };
            prop_assert_eq!(mirrored, expected);
        }

        /// Summary tallies balance: counts partition the records and the
        /// variance is the sum of absolute line differences, which bounds the
        /// net difference of the totals.
        #[test]
        fn summary_tallies_balance(
            lines in prop::collection::vec((0i64..=1_000_000, 0i64..=1_000_000), 0..20)
        ) {
            let mut summary = ReconciliationSummary::default();
            let mut expected_sum = Decimal::ZERO;
            let mut invoiced_sum = Decimal::ZERO;
            let mut variance_sum = Decimal::ZERO;
            for (expected_cents, invoiced_cents) in &lines {
                let expected = Decimal::new(*expected_cents, 2);
                let invoiced = Decimal::new(*invoiced_cents, 2);
                summary.add(classify_difference(invoiced - expected), expected, invoiced);
                expected_sum += expected;
                invoiced_sum += invoiced;
                variance_sum += (invoiced - expected).abs();
            }

            prop_assert_eq!(summary.total_records, lines.len());
            prop_assert_eq!(
                summary.matched + summary.overbilled + summary.underbilled,
                summary.total_records
            );
            prop_assert_eq!(summary.total_expected, expected_sum);
            prop_assert_eq!(summary.total_invoiced, invoiced_sum);
            prop_assert_eq!(summary.total_variance, variance_sum);
            prop_assert!(
                summary.total_variance >= (invoiced_sum - expected_sum).abs()
            );
        }

        /// A bucket billed at one uniform rate averages back to that rate.
        #[test]
        fn uniform_buckets_recover_their_rate(
            rate_cents in 1i64..=100_000,
            quantity in 1i64..=1_000,
        ) {
            let rate = Decimal::new(rate_cents, 2);
            let quantity = Decimal::from(quantity);
            prop_assert_eq!(weighted_average_rate(rate * quantity, quantity), Some(rate));
        }

        /// A mixed bucket's average sits between its cheapest and dearest
        /// rates, give or take the final rounding step.
        #[test]
        fn mixed_bucket_average_stays_in_the_rate_span(
            q1 in 1i64..=500,
            q2 in 1i64..=500,
            r1_cents in 1i64..=10_000,
            r2_cents in 1i64..=10_000,
        ) {
            let (q1, q2) = (Decimal::from(q1), Decimal::from(q2));
            let (r1, r2) = (Decimal::new(r1_cents, 2), Decimal::new(r2_cents, 2));
            let average = weighted_average_rate(q1 * r1 + q2 * r2, q1 + q2).unwrap();
            let slop = Decimal::new(5, 3);
            prop_assert!(average >= r1.min(r2) - slop);
            prop_assert!(average <= r1.max(r2) + slop);
        }
    }
}
