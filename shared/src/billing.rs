//! Billing calendar and quantity math
//!
//! Billing periods run from the 16th of one month through the 15th of the
//! next, independent of calendar months. Storage snapshots are taken every
//! Monday; a transaction counts toward the first Monday on or after its
//! transaction date.

use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// One 16th-to-15th billing cycle, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Map a calendar date to its enclosing billing period.
///
/// Days 1-15 belong to the period that started on the 16th of the previous
/// month; days 16 and later open the current month's period. The period ends
/// on the 15th of the month after its start.
pub fn billing_period_for(date: NaiveDate) -> BillingPeriod {
    let (start_year, start_month) = if date.day() >= 16 {
        (date.year(), date.month())
    } else if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };

    let (end_year, end_month) = if start_month == 12 {
        (start_year + 1, 1)
    } else {
        (start_year, start_month + 1)
    };

    // The 16th and 15th exist in every month, so construction cannot fail.
    BillingPeriod {
        start: NaiveDate::from_ymd_opt(start_year, start_month, 16).unwrap_or(date),
        end: NaiveDate::from_ymd_opt(end_year, end_month, 15).unwrap_or(date),
    }
}

/// First Monday on or after the given date (the date itself if it is one)
pub fn monday_on_or_after(date: NaiveDate) -> NaiveDate {
    let since_monday = date.weekday().num_days_from_monday() as i64;
    if since_monday == 0 {
        date
    } else {
        date + Duration::days(7 - since_monday)
    }
}

/// Most recent Monday on or before the given date
pub fn monday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Every snapshot Monday from the first activity through `today`, ascending.
///
/// Enumeration starts at the first Monday on or after `first_activity`;
/// Mondays after `today` are never snapshotted.
pub fn snapshot_mondays(first_activity: NaiveDate, today: NaiveDate) -> Vec<NaiveDate> {
    let mut mondays = Vec::new();
    let mut monday = monday_on_or_after(first_activity);
    while monday <= today {
        mondays.push(monday);
        monday += Duration::days(7);
    }
    mondays
}

/// Round cartons up to billable pallets. A cartons-per-pallet of 1 means no
/// pallet reduction; non-positive carton counts charge nothing.
pub fn pallets_for_cartons(cartons: i32, cartons_per_pallet: i32) -> i32 {
    if cartons <= 0 {
        return 0;
    }
    let per_pallet = cartons_per_pallet.max(1);
    (cartons + per_pallet - 1) / per_pallet
}

/// Round a monetary amount to 2 decimal places, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ========================================================================
    // Billing Period Tests
    // ========================================================================

    #[test]
    fn test_period_for_day_sixteen_starts_current_month() {
        let period = billing_period_for(date(2024, 3, 16));
        assert_eq!(period.start, date(2024, 3, 16));
        assert_eq!(period.end, date(2024, 4, 15));
    }

    #[test]
    fn test_period_for_day_fifteen_starts_previous_month() {
        let period = billing_period_for(date(2024, 3, 15));
        assert_eq!(period.start, date(2024, 2, 16));
        assert_eq!(period.end, date(2024, 3, 15));
    }

    #[test]
    fn test_adjacent_periods_across_the_fifteen_sixteen_split() {
        let before = billing_period_for(date(2024, 7, 15));
        let after = billing_period_for(date(2024, 7, 16));
        assert_ne!(before, after);
        assert_eq!(before.end + Duration::days(1), after.start);
    }

    #[test]
    fn test_december_period_crosses_year_boundary() {
        let period = billing_period_for(date(2024, 12, 20));
        assert_eq!(period.start, date(2024, 12, 16));
        assert_eq!(period.end, date(2025, 1, 15));
    }

    #[test]
    fn test_early_january_belongs_to_december_period() {
        let period = billing_period_for(date(2025, 1, 10));
        assert_eq!(period.start, date(2024, 12, 16));
        assert_eq!(period.end, date(2025, 1, 15));
    }

    #[test]
    fn test_leap_year_february() {
        let period = billing_period_for(date(2024, 2, 29));
        assert_eq!(period.start, date(2024, 2, 16));
        assert_eq!(period.end, date(2024, 3, 15));

        let early = billing_period_for(date(2024, 2, 10));
        assert_eq!(early.start, date(2024, 1, 16));
        assert_eq!(early.end, date(2024, 2, 15));
    }

    #[test]
    fn test_period_contains_its_own_date() {
        for day in [1, 15, 16, 28] {
            let d = date(2024, 5, day);
            assert!(billing_period_for(d).contains(d));
        }
    }

    // ========================================================================
    // Monday Helpers
    // ========================================================================

    #[test]
    fn test_monday_on_or_after_is_identity_for_monday() {
        // 2024-06-03 is a Monday
        assert_eq!(monday_on_or_after(date(2024, 6, 3)), date(2024, 6, 3));
    }

    #[test]
    fn test_monday_on_or_after_rolls_forward() {
        // 2024-06-04 (Tuesday) through 2024-06-09 (Sunday) all map to 06-10
        for day in 4..=9 {
            assert_eq!(monday_on_or_after(date(2024, 6, day)), date(2024, 6, 10));
        }
    }

    #[test]
    fn test_monday_on_or_before_rolls_back() {
        assert_eq!(monday_on_or_before(date(2024, 6, 9)), date(2024, 6, 3));
        assert_eq!(monday_on_or_before(date(2024, 6, 3)), date(2024, 6, 3));
    }

    #[test]
    fn test_snapshot_mondays_enumeration() {
        // First activity Wednesday 2024-06-05, today Tuesday 2024-06-25
        let mondays = snapshot_mondays(date(2024, 6, 5), date(2024, 6, 25));
        assert_eq!(
            mondays,
            vec![date(2024, 6, 10), date(2024, 6, 17), date(2024, 6, 24)]
        );
    }

    #[test]
    fn test_snapshot_mondays_empty_when_first_monday_is_future() {
        let mondays = snapshot_mondays(date(2024, 6, 5), date(2024, 6, 7));
        assert!(mondays.is_empty());
    }

    // ========================================================================
    // Pallet Rounding
    // ========================================================================

    #[test]
    fn test_pallets_round_up() {
        assert_eq!(pallets_for_cartons(101, 50), 3);
        assert_eq!(pallets_for_cartons(100, 50), 2);
        assert_eq!(pallets_for_cartons(1, 50), 1);
    }

    #[test]
    fn test_pallets_with_unit_conversion() {
        assert_eq!(pallets_for_cartons(37, 1), 37);
    }

    #[test]
    fn test_pallets_zero_cartons() {
        assert_eq!(pallets_for_cartons(0, 50), 0);
        assert_eq!(pallets_for_cartons(-5, 50), 0);
    }

    // ========================================================================
    // Money Rounding
    // ========================================================================

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money("2.345".parse().unwrap()), "2.35".parse().unwrap());
        assert_eq!(round_money("2.344".parse().unwrap()), "2.34".parse().unwrap());
        assert_eq!(round_money("-2.345".parse().unwrap()), "-2.35".parse().unwrap());
    }
}
