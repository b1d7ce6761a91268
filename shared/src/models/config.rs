//! Cartons-per-pallet resolution
//!
//! The conversion factor comes from four layers, first match wins:
//! a per-transaction override, the balance's stored configuration, the
//! warehouse-SKU config effective on the date, then a fallback of 1 (no
//! pallet reduction). The result always names the winning layer so callers
//! can audit where a charge's pallet count came from.

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::PalletConfigSource;

/// One warehouse-SKU configuration row's effective window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigWindow {
    pub storage_cartons_per_pallet: i32,
    pub shipping_cartons_per_pallet: i32,
    pub effective_from: NaiveDate,
    /// None means open-ended
    pub end_date: Option<NaiveDate>,
}

impl ConfigWindow {
    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.end_date.map_or(true, |end| end >= date)
    }
}

/// Which conversion the caller is pricing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalletPurpose {
    Storage,
    Shipping,
}

/// A resolved cartons-per-pallet value and the layer that supplied it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CppResolution {
    pub cartons_per_pallet: i32,
    pub source: PalletConfigSource,
}

/// Resolves cartons-per-pallet through the layered precedence.
///
/// `windows` may arrive in any order; among active windows the most recent
/// effective_from wins. Non-positive values at any layer are treated as
/// absent.
pub fn resolve_cartons_per_pallet(
    transaction_override: Option<i32>,
    balance_config: Option<i32>,
    windows: &[ConfigWindow],
    purpose: PalletPurpose,
    as_of: NaiveDate,
) -> CppResolution {
    if let Some(value) = transaction_override.filter(|v| *v > 0) {
        return CppResolution {
            cartons_per_pallet: value,
            source: PalletConfigSource::Transaction,
        };
    }
    if let Some(value) = balance_config.filter(|v| *v > 0) {
        return CppResolution {
            cartons_per_pallet: value,
            source: PalletConfigSource::Balance,
        };
    }
    let from_config = windows
        .iter()
        .filter(|w| w.active_on(as_of))
        .max_by_key(|w| w.effective_from)
        .map(|w| match purpose {
            PalletPurpose::Storage => w.storage_cartons_per_pallet,
            PalletPurpose::Shipping => w.shipping_cartons_per_pallet,
        })
        .filter(|v| *v > 0);
    if let Some(value) = from_config {
        return CppResolution {
            cartons_per_pallet: value,
            source: PalletConfigSource::WarehouseConfig,
        };
    }
    CppResolution {
        cartons_per_pallet: 1,
        source: PalletConfigSource::Default,
    }
}
