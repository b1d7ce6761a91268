//! Balance projection tests
//!
//! A stock balance is a fold over its transaction history, and a history is
//! valid only when every prefix stays non-negative. Backdated writes and
//! amendments replay the full history, so the fold must name the first
//! movement a change would overdraw.

use proptest::prelude::*;

use shared::models::{check_running_balance, net_cartons, LedgerDelta, TransactionTotals};
use shared::types::TransactionType;

fn receive(cartons: i32) -> LedgerDelta {
    LedgerDelta {
        transaction_type: TransactionType::Receive,
        cartons_in: cartons,
        cartons_out: 0,
        reference: None,
    }
}

fn ship(cartons: i32, reference: &str) -> LedgerDelta {
    LedgerDelta {
        transaction_type: TransactionType::Ship,
        cartons_in: 0,
        cartons_out: cartons,
        reference: Some(reference.to_string()),
    }
}

fn adjust_in(cartons: i32) -> LedgerDelta {
    LedgerDelta {
        transaction_type: TransactionType::AdjustIn,
        cartons_in: cartons,
        cartons_out: 0,
        reference: None,
    }
}

fn adjust_out(cartons: i32) -> LedgerDelta {
    LedgerDelta {
        transaction_type: TransactionType::AdjustOut,
        cartons_in: 0,
        cartons_out: cartons,
        reference: None,
    }
}

fn transfer(cartons: i32) -> LedgerDelta {
    LedgerDelta {
        transaction_type: TransactionType::Transfer,
        cartons_in: 0,
        cartons_out: cartons,
        reference: None,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_history_may_touch_zero_repeatedly() {
        let history = vec![
            receive(10),
            ship(10, "SHIP-1"),
            receive(5),
            ship(5, "SHIP-2"),
        ];
        assert_eq!(check_running_balance(0, &history), Ok(0));
    }

    /// The same movements in a different order change the verdict: the net
    /// total is not what gets checked.
    #[test]
    fn test_order_matters_not_just_the_net() {
        let forward = vec![receive(100), ship(10, "SHIP-1")];
        let backward = vec![ship(10, "SHIP-1"), receive(100)];
        assert_eq!(check_running_balance(0, &forward), Ok(90));
        let violation = check_running_balance(0, &backward).unwrap_err();
        assert_eq!(violation.index, 0);
        assert_eq!(violation.shortfall, 10);
    }

    /// A backdated ship is rejected by replaying the history with the new
    /// movement in date order; the violation names the later ship it breaks.
    #[test]
    fn test_backdated_ship_names_the_movement_it_breaks() {
        let replayed = vec![
            receive(100),
            ship(80, "SHIP-NEW"),
            ship(30, "SHIP-A"),
            receive(10),
        ];
        let violation = check_running_balance(0, &replayed).unwrap_err();
        assert_eq!(violation.index, 2);
        assert_eq!(violation.reference.as_deref(), Some("SHIP-A"));
        assert_eq!(violation.balance_before, 20);
        assert_eq!(violation.shortfall, 10);
    }

    /// Amending a receipt downward is floored by the later ships that
    /// consumed it.
    #[test]
    fn test_amendment_reduction_floor() {
        let amended = vec![receive(59), ship(60, "SHIP-B")];
        let violation = check_running_balance(0, &amended).unwrap_err();
        assert_eq!(violation.index, 1);
        assert_eq!(violation.shortfall, 1);
    }

    #[test]
    fn test_adjustments_and_transfers_count_like_movements() {
        let history = vec![receive(10), adjust_out(4), transfer(3), adjust_in(1)];
        assert_eq!(check_running_balance(0, &history), Ok(4));
        assert_eq!(net_cartons(0, &history), 4);
    }

    /// The per-type totals and the running fold agree on the final balance.
    #[test]
    fn test_totals_formula_matches_the_fold() {
        let history = vec![
            receive(100),
            adjust_in(5),
            ship(40, "SHIP-1"),
            adjust_out(3),
            transfer(10),
        ];
        let mut totals = TransactionTotals::default();
        for delta in &history {
            totals.add(delta.transaction_type, delta.cartons_in, delta.cartons_out);
        }
        assert_eq!(totals.current(), 52);
        assert_eq!(check_running_balance(0, &history), Ok(52));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn delta_strategy() -> impl Strategy<Value = LedgerDelta> {
        prop_oneof![
            (1i32..=200).prop_map(receive),
            (1i32..=200).prop_map(|n| ship(n, "SHIP")),
            (1i32..=60).prop_map(adjust_in),
            (1i32..=60).prop_map(adjust_out),
            (1i32..=60).prop_map(transfer),
        ]
    }

    fn history_strategy() -> impl Strategy<Value = Vec<LedgerDelta>> {
        prop::collection::vec(delta_strategy(), 0..32)
    }

    /// Builds a history that never overdraws by clamping every outbound
    /// movement to the stock on hand at that point.
    fn clamped_history(seed: Vec<(bool, i32)>) -> Vec<LedgerDelta> {
        let mut running = 0i32;
        let mut history = Vec::with_capacity(seed.len());
        for (inbound, amount) in seed {
            if inbound || running == 0 {
                running += amount;
                history.push(receive(amount));
            } else {
                let out = amount.min(running);
                running -= out;
                history.push(ship(out, "SHIP"));
            }
        }
        history
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Whatever the verdict, it is consistent with an independent prefix
        /// replay: Ok means every prefix held, Err names the first that did
        /// not, with the exact shortfall and reference.
        #[test]
        fn verdict_matches_prefix_replay(
            history in history_strategy(),
            opening in 0i64..=500,
        ) {
            match check_running_balance(opening, &history) {
                Ok(total) => {
                    prop_assert_eq!(total, net_cartons(opening, &history));
                    let mut running = opening;
                    for delta in &history {
                        running += delta.signed();
                        prop_assert!(running >= 0);
                    }
                }
                Err(violation) => {
                    let mut running = opening;
                    for delta in &history[..violation.index] {
                        running += delta.signed();
                        prop_assert!(running >= 0);
                    }
                    let offending = &history[violation.index];
                    prop_assert_eq!(running, violation.balance_before);
                    prop_assert_eq!(violation.shortfall, -(running + offending.signed()));
                    prop_assert!(violation.shortfall > 0);
                    prop_assert_eq!(
                        violation.reference.as_deref(),
                        offending.reference.as_deref()
                    );
                }
            }
        }

        /// Histories whose outbound movements never exceed stock on hand
        /// always pass, and the final balance is the signed sum.
        #[test]
        fn clamped_histories_always_pass(
            seed in prop::collection::vec((any::<bool>(), 1i32..=300), 0..32)
        ) {
            let history = clamped_history(seed);
            let expected = net_cartons(0, &history);
            prop_assert_eq!(check_running_balance(0, &history), Ok(expected));
        }

        /// Raising the opening balance can never break a history that passed.
        #[test]
        fn larger_opening_never_creates_a_violation(
            history in history_strategy(),
            opening in 0i64..=200,
            extra in 0i64..=200,
        ) {
            if let Ok(total) = check_running_balance(opening, &history) {
                prop_assert_eq!(
                    check_running_balance(opening + extra, &history),
                    Ok(total + extra)
                );
            }
        }

        /// Covering the reported shortfall clears that violation; any
        /// remaining violation sits strictly later in the history.
        #[test]
        fn shortfall_is_exactly_what_is_missing(
            history in history_strategy(),
            opening in 0i64..=100,
        ) {
            if let Err(first) = check_running_balance(opening, &history) {
                match check_running_balance(opening + first.shortfall, &history) {
                    Ok(_) => {}
                    Err(second) => prop_assert!(second.index > first.index),
                }
            }
        }

        /// Appending movements never repairs an earlier violation.
        #[test]
        fn appending_cannot_fix_a_broken_prefix(
            history in history_strategy(),
            tail in history_strategy(),
        ) {
            if let Err(first) = check_running_balance(0, &history) {
                let mut extended = history.clone();
                extended.extend(tail);
                prop_assert_eq!(check_running_balance(0, &extended), Err(first));
            }
        }
    }
}
