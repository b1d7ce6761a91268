//! Common enums used across the platform

use serde::{Deserialize, Serialize};

/// Inventory movement types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Receive,
    Ship,
    Transfer,
    AdjustIn,
    AdjustOut,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receive => "RECEIVE",
            TransactionType::Ship => "SHIP",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::AdjustIn => "ADJUST_IN",
            TransactionType::AdjustOut => "ADJUST_OUT",
        }
    }

    /// True for movements that add cartons to a balance
    pub fn is_inbound(&self) -> bool {
        matches!(self, TransactionType::Receive | TransactionType::AdjustIn)
    }
}

impl std::str::FromStr for TransactionType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVE" => Ok(TransactionType::Receive),
            "SHIP" => Ok(TransactionType::Ship),
            "TRANSFER" => Ok(TransactionType::Transfer),
            "ADJUST_IN" => Ok(TransactionType::AdjustIn),
            "ADJUST_OUT" => Ok(TransactionType::AdjustOut),
            _ => Err("unknown transaction type"),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost rate categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CostCategory {
    Storage,
    Container,
    Carton,
    Pallet,
    Unit,
    Shipment,
    Accessorial,
}

impl CostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Storage => "Storage",
            CostCategory::Container => "Container",
            CostCategory::Carton => "Carton",
            CostCategory::Pallet => "Pallet",
            CostCategory::Unit => "Unit",
            CostCategory::Shipment => "Shipment",
            CostCategory::Accessorial => "Accessorial",
        }
    }
}

impl std::str::FromStr for CostCategory {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Storage" => Ok(CostCategory::Storage),
            "Container" => Ok(CostCategory::Container),
            "Carton" => Ok(CostCategory::Carton),
            "Pallet" => Ok(CostCategory::Pallet),
            "Unit" => Ok(CostCategory::Unit),
            "Shipment" => Ok(CostCategory::Shipment),
            "Accessorial" => Ok(CostCategory::Accessorial),
            _ => Err("unknown cost category"),
        }
    }
}

impl std::fmt::Display for CostCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice lifecycle states
///
/// draft -> sent -> {paid | disputed}; a disputed invoice may move back to
/// sent (and then paid) once its records are resolved. Paid is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Disputed,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Disputed => "disputed",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "disputed" => Ok(InvoiceStatus::Disputed),
            "paid" => Ok(InvoiceStatus::Paid),
            _ => Err("unknown invoice status"),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line-level reconciliation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    Match,
    Overbilled,
    Underbilled,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Match => "match",
            ReconciliationStatus::Overbilled => "overbilled",
            ReconciliationStatus::Underbilled => "underbilled",
        }
    }
}

impl std::str::FromStr for ReconciliationStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match" => Ok(ReconciliationStatus::Match),
            "overbilled" => Ok(ReconciliationStatus::Overbilled),
            "underbilled" => Ok(ReconciliationStatus::Underbilled),
            _ => Err("unknown reconciliation status"),
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer supplied a cartons-per-pallet value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalletConfigSource {
    Transaction,
    Balance,
    WarehouseConfig,
    Default,
}

impl PalletConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PalletConfigSource::Transaction => "transaction",
            PalletConfigSource::Balance => "balance",
            PalletConfigSource::WarehouseConfig => "warehouse_config",
            PalletConfigSource::Default => "default",
        }
    }
}
