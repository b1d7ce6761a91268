//! Storage snapshot calendar and key tests
//!
//! Weekly storage entries are keyed by natural codes, so recomputing a week
//! replaces its rows instead of appending duplicates. Covers the Monday
//! calendar that drives snapshots, the ledger and cost-row keys, and the
//! pallet charge arithmetic.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use proptest::prelude::*;
use rust_decimal::Decimal;

use shared::billing::{monday_on_or_after, monday_on_or_before, round_money, snapshot_mondays};
use warebill_core::services::storage::{ledger_entry_code, storage_cost_code};

/// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Natural Keys
// ============================================================================

#[cfg(test)]
mod natural_keys {
    use super::*;

    #[test]
    fn test_ledger_entry_code_format() {
        let code = ledger_entry_code(date(2024, 6, 10), "BKK01", "SKU100", "LOT-A");
        assert_eq!(code, "SL-2024-06-10-BKK01-SKU100-LOT-A");
    }

    /// The calculated-cost row reuses the ledger key under its own prefix, so
    /// the two stay paired across recomputations.
    #[test]
    fn test_cost_row_key_mirrors_ledger_key() {
        let week = date(2024, 6, 10);
        let ledger = ledger_entry_code(week, "BKK01", "SKU100", "LOT-A");
        let cost = storage_cost_code(week, "BKK01", "SKU100", "LOT-A");
        assert_eq!(cost, "CC-STORAGE-2024-06-10-BKK01-SKU100-LOT-A");
        assert_eq!(cost.strip_prefix("CC-STORAGE-"), ledger.strip_prefix("SL-"));
    }

    #[test]
    fn test_codes_distinguish_every_component() {
        let base = ledger_entry_code(date(2024, 6, 10), "BKK01", "SKU100", "LOT-A");
        assert_ne!(
            base,
            ledger_entry_code(date(2024, 6, 17), "BKK01", "SKU100", "LOT-A")
        );
        assert_ne!(
            base,
            ledger_entry_code(date(2024, 6, 10), "BKK02", "SKU100", "LOT-A")
        );
        assert_ne!(
            base,
            ledger_entry_code(date(2024, 6, 10), "BKK01", "SKU200", "LOT-A")
        );
        assert_ne!(
            base,
            ledger_entry_code(date(2024, 6, 10), "BKK01", "SKU100", "LOT-B")
        );
    }
}

// ============================================================================
// Snapshot Calendar
// ============================================================================

#[cfg(test)]
mod snapshot_calendar {
    use super::*;

    /// A quarter of Mondays from the first activity in June through late
    /// August.
    #[test]
    fn test_quarter_of_snapshot_mondays() {
        let mondays = snapshot_mondays(date(2024, 6, 5), date(2024, 8, 20));
        assert_eq!(mondays.len(), 11);
        assert_eq!(mondays[0], date(2024, 6, 10));
        assert_eq!(mondays[10], date(2024, 8, 19));
    }

    /// Weeks that were never written show up as the set difference between
    /// the calendar and the ledger; this is what catch-up recomputes.
    #[test]
    fn test_missed_weeks_are_the_calendar_minus_the_ledger() {
        let calendar = snapshot_mondays(date(2024, 6, 5), date(2024, 6, 25));
        let written = vec![date(2024, 6, 10), date(2024, 6, 24)];
        let missing: Vec<NaiveDate> = calendar
            .into_iter()
            .filter(|monday| !written.contains(monday))
            .collect();
        assert_eq!(missing, vec![date(2024, 6, 17)]);
    }
}

// ============================================================================
// Charge Arithmetic
// ============================================================================

#[cfg(test)]
mod charge_arithmetic {
    use super::*;

    #[test]
    fn test_weekly_charge_is_pallets_times_rate() {
        let cost = round_money(Decimal::from(3i64) * dec("2.50"));
        assert_eq!(cost, dec("7.50"));
    }

    /// Rounding happens once on the week's total, not per pallet.
    #[test]
    fn test_fractional_rate_rounds_at_the_total() {
        let total_then_round = round_money(Decimal::from(3i64) * dec("0.3333"));
        assert_eq!(total_then_round, dec("1.00"));

        let round_then_total = round_money(dec("0.3333")) * Decimal::from(3i64);
        assert_eq!(round_then_total, dec("0.99"));
        assert_ne!(total_then_round, round_then_total);
    }

    #[test]
    fn test_empty_unit_charges_nothing() {
        assert_eq!(round_money(Decimal::from(0i64) * dec("2.50")), dec("0"));
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

        /// Snapshot Mondays are actual Mondays, strictly weekly, and bounded
        /// by the activity window.
        #[test]
        fn snapshot_mondays_are_weekly_and_bounded(
            (year, ordinal) in (2020i32..=2030, 1u32..=365),
            span in 0i64..=180,
        ) {
            let first = NaiveDate::from_yo_opt(year, ordinal).unwrap();
            let today = first + Duration::days(span);
            let mondays = snapshot_mondays(first, today);

            prop_assert_eq!(mondays.is_empty(), monday_on_or_after(first) > today);
            for monday in &mondays {
                prop_assert_eq!(monday.weekday(), Weekday::Mon);
                prop_assert!(*monday >= first);
                prop_assert!(*monday <= today);
            }
            for pair in mondays.windows(2) {
                prop_assert_eq!(pair[1] - pair[0], Duration::days(7));
            }
            if let Some(head) = mondays.first() {
                prop_assert_eq!(*head, monday_on_or_after(first));
            }
        }

        /// The two Monday helpers bracket any date by less than a week.
        #[test]
        fn monday_helpers_bracket_their_date(
            (year, ordinal) in (2020i32..=2030, 1u32..=365),
        ) {
            let d = NaiveDate::from_yo_opt(year, ordinal).unwrap();
            let after = monday_on_or_after(d);
            let before = monday_on_or_before(d);
            prop_assert_eq!(after.weekday(), Weekday::Mon);
            prop_assert_eq!(before.weekday(), Weekday::Mon);
            prop_assert!(before <= d && d <= after);
            prop_assert!(after == before || after == before + Duration::days(7));
        }

        /// Ledger and cost codes carry the same tail under their own prefixes.
        #[test]
        fn codes_share_their_tail(
            week_offset in 0i64..=200,
            warehouse in "[A-Z]{2,4}[0-9]{0,2}",
            sku in "[A-Z0-9]{3,8}",
            lot in "[A-Z0-9]{2,10}",
        ) {
            let week = monday_on_or_after(date(2024, 1, 1) + Duration::days(week_offset));
            let ledger = ledger_entry_code(week, &warehouse, &sku, &lot);
            let cost = storage_cost_code(week, &warehouse, &sku, &lot);

            prop_assert!(ledger.starts_with("SL-"));
            prop_assert!(cost.starts_with("CC-STORAGE-"));
            prop_assert_eq!(ledger.strip_prefix("SL-"), cost.strip_prefix("CC-STORAGE-"));
            prop_assert!(ledger.contains(&week.to_string()));
            prop_assert!(ledger.ends_with(&lot));
        }

        /// Whole-cent rates never need rounding, whatever the pallet count.
        #[test]
        fn whole_cent_rates_are_exact(
            pallets in 0i64..=5_000,
            rate_cents in 0i64..=100_000,
        ) {
            let rate = Decimal::new(rate_cents, 2);
            let total = Decimal::from(pallets) * rate;
            prop_assert_eq!(round_money(total), total);
        }

        /// Doubling the pallets exactly doubles a whole-cent charge.
        #[test]
        fn charge_is_linear_in_pallets(
            pallets in 1i64..=2_000,
            rate_cents in 1i64..=100_000,
        ) {
            let rate = Decimal::new(rate_cents, 2);
            let single = Decimal::from(pallets) * rate;
            let double = Decimal::from(pallets * 2) * rate;
            prop_assert_eq!(double, single * Decimal::from(2i64));
        }
    }
}
