//! Balance projection rules
//!
//! A stock balance is a pure fold over the transaction history of one
//! (warehouse, SKU, batch) key in (transaction_date, created_at) order. The
//! fold lives here, free of I/O, so the overdraft edge cases stay
//! table-testable; the persistence layer replays it inside a store
//! transaction.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::TransactionType;

/// Identity of one balance aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BalanceKey {
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
}

impl std::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.warehouse_id, self.sku_id, self.batch_lot)
    }
}

/// One ledger movement reduced to its carton effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDelta {
    pub transaction_type: TransactionType,
    pub cartons_in: i32,
    pub cartons_out: i32,
    /// Natural key or id of the source transaction, for error reporting
    pub reference: Option<String>,
}

impl LedgerDelta {
    pub fn signed(&self) -> i64 {
        self.cartons_in as i64 - self.cartons_out as i64
    }
}

/// Net carton count after folding `deltas` over an opening balance
pub fn net_cartons(opening: i64, deltas: &[LedgerDelta]) -> i64 {
    opening + deltas.iter().map(LedgerDelta::signed).sum::<i64>()
}

/// First point in a history where the running balance would go negative
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("movement {index} would overdraw the balance by {shortfall} cartons")]
pub struct OverdraftViolation {
    /// Position of the offending delta within the replayed history
    pub index: usize,
    /// Balance immediately before the offending movement
    pub balance_before: i64,
    /// Cartons the balance falls short by
    pub shortfall: i64,
    pub reference: Option<String>,
}

/// Replays a per-key history and confirms the running balance never dips
/// below zero at any prefix. Returns the final balance on success.
///
/// Backdated writes and amendments must pass the full history through here;
/// a violation names the first transaction that would overdraw, which is also
/// the floor on how far an earlier receipt can be reduced.
pub fn check_running_balance(
    opening: i64,
    deltas: &[LedgerDelta],
) -> Result<i64, OverdraftViolation> {
    let mut running = opening;
    for (index, delta) in deltas.iter().enumerate() {
        let next = running + delta.signed();
        if next < 0 {
            return Err(OverdraftViolation {
                index,
                balance_before: running,
                shortfall: -next,
                reference: delta.reference.clone(),
            });
        }
        running = next;
    }
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_net_cartons_sums_signed_deltas() {
        let history = vec![receive(100), ship(40, "SHIP-1"), receive(10)];
        assert_eq!(net_cartons(0, &history), 70);
        assert_eq!(net_cartons(5, &history), 75);
    }

    #[test]
    fn test_running_balance_accepts_valid_history() {
        let history = vec![receive(100), ship(100, "SHIP-1"), receive(20)];
        assert_eq!(check_running_balance(0, &history), Ok(20));
    }

    #[test]
    fn test_running_balance_rejects_overdraft_at_prefix() {
        // Net total is positive but the middle prefix dips below zero.
        let history = vec![receive(10), ship(25, "SHIP-9"), receive(100)];
        let violation = check_running_balance(0, &history).unwrap_err();
        assert_eq!(violation.index, 1);
        assert_eq!(violation.balance_before, 10);
        assert_eq!(violation.shortfall, 15);
        assert_eq!(violation.reference.as_deref(), Some("SHIP-9"));
    }

    #[test]
    fn test_running_balance_reports_first_violation_only() {
        let history = vec![ship(5, "SHIP-1"), ship(5, "SHIP-2")];
        let violation = check_running_balance(0, &history).unwrap_err();
        assert_eq!(violation.index, 0);
        assert_eq!(violation.reference.as_deref(), Some("SHIP-1"));
    }

    #[test]
    fn test_running_balance_allows_exact_zero() {
        let history = vec![receive(50), ship(50, "SHIP-1")];
        assert_eq!(check_running_balance(0, &history), Ok(0));
    }

    #[test]
    fn test_backdated_reduction_floor() {
        // Reducing the opening receipt below 40 would break the later ship.
        let history = vec![receive(39), ship(40, "SHIP-1")];
        let violation = check_running_balance(0, &history).unwrap_err();
        assert_eq!(violation.shortfall, 1);
    }
}
