//! Inventory transaction payloads
//!
//! Ingress payloads are a closed tagged enum: one variant per movement type,
//! validated before they reach the balance projector. The flat storage row is
//! derived from the variant, never from untyped maps.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TransactionType;

/// A validated request to append one movement to the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub transaction_date: NaiveDate,
    /// External document reference (PO, shipment id)
    pub reference_id: Option<String>,
    #[serde(flatten)]
    pub movement: Movement,
}

/// Movement detail per transaction type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Movement {
    Receive {
        cartons_in: i32,
        storage_pallets_in: i32,
        storage_cartons_per_pallet: Option<i32>,
        shipping_cartons_per_pallet: Option<i32>,
    },
    Ship {
        cartons_out: i32,
        shipping_pallets_out: i32,
        shipping_cartons_per_pallet: Option<i32>,
    },
    Transfer {
        cartons_out: i32,
    },
    AdjustIn {
        cartons_in: i32,
    },
    AdjustOut {
        cartons_out: i32,
    },
}

impl Movement {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Movement::Receive { .. } => TransactionType::Receive,
            Movement::Ship { .. } => TransactionType::Ship,
            Movement::Transfer { .. } => TransactionType::Transfer,
            Movement::AdjustIn { .. } => TransactionType::AdjustIn,
            Movement::AdjustOut { .. } => TransactionType::AdjustOut,
        }
    }

    pub fn cartons_in(&self) -> i32 {
        match self {
            Movement::Receive { cartons_in, .. } | Movement::AdjustIn { cartons_in } => *cartons_in,
            _ => 0,
        }
    }

    pub fn cartons_out(&self) -> i32 {
        match self {
            Movement::Ship { cartons_out, .. }
            | Movement::Transfer { cartons_out }
            | Movement::AdjustOut { cartons_out } => *cartons_out,
            _ => 0,
        }
    }

    pub fn storage_pallets_in(&self) -> i32 {
        match self {
            Movement::Receive {
                storage_pallets_in, ..
            } => *storage_pallets_in,
            _ => 0,
        }
    }

    pub fn shipping_pallets_out(&self) -> i32 {
        match self {
            Movement::Ship {
                shipping_pallets_out,
                ..
            } => *shipping_pallets_out,
            _ => 0,
        }
    }

    pub fn storage_cpp_override(&self) -> Option<i32> {
        match self {
            Movement::Receive {
                storage_cartons_per_pallet,
                ..
            } => *storage_cartons_per_pallet,
            _ => None,
        }
    }

    pub fn shipping_cpp_override(&self) -> Option<i32> {
        match self {
            Movement::Receive {
                shipping_cartons_per_pallet,
                ..
            }
            | Movement::Ship {
                shipping_cartons_per_pallet,
                ..
            } => *shipping_cartons_per_pallet,
            _ => None,
        }
    }

    /// Net carton effect on the balance: positive inbound, negative outbound
    pub fn signed_delta(&self) -> i64 {
        self.cartons_in() as i64 - self.cartons_out() as i64
    }
}

impl TransactionPayload {
    pub fn transaction_type(&self) -> TransactionType {
        self.movement.transaction_type()
    }
}

/// Per-type carton sums for one (warehouse, SKU, batch) key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionTotals {
    pub received: i64,
    pub adjusted_in: i64,
    pub shipped: i64,
    pub adjusted_out: i64,
    pub transferred_out: i64,
}

impl TransactionTotals {
    pub fn add(&mut self, transaction_type: TransactionType, cartons_in: i32, cartons_out: i32) {
        match transaction_type {
            TransactionType::Receive => self.received += cartons_in as i64,
            TransactionType::AdjustIn => self.adjusted_in += cartons_in as i64,
            TransactionType::Ship => self.shipped += cartons_out as i64,
            TransactionType::AdjustOut => self.adjusted_out += cartons_out as i64,
            TransactionType::Transfer => self.transferred_out += cartons_out as i64,
        }
    }

    /// The balance invariant: current cartons equal the signed sum of all
    /// movements for the key
    pub fn current(&self) -> i64 {
        self.received + self.adjusted_in - self.shipped - self.adjusted_out - self.transferred_out
    }
}
