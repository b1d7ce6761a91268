//! Cost rate window selection
//!
//! Rates are time-versioned per (warehouse, category, rate name). Selection
//! must be deterministic: exactly one window may cover the as-of date.
//! Anything else is a configuration error the caller surfaces, never a
//! silent pick.

use chrono::NaiveDate;
use thiserror::Error;

/// Effective window of one rate record, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub effective_from: NaiveDate,
    /// None means open-ended
    pub effective_to: Option<NaiveDate>,
}

impl RateWindow {
    pub fn contains(&self, as_of: NaiveDate) -> bool {
        self.effective_from <= as_of && self.effective_to.map_or(true, |to| to >= as_of)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateSelectionError {
    #[error("no rate window covers the date")]
    NotFound,
    /// More than one window covers the date; carries the match count
    #[error("{0} rate windows cover the date")]
    Ambiguous(usize),
}

/// Index of the single window containing `as_of`
pub fn select_rate_index(
    windows: &[RateWindow],
    as_of: NaiveDate,
) -> Result<usize, RateSelectionError> {
    let mut matches = windows
        .iter()
        .enumerate()
        .filter(|(_, w)| w.contains(as_of));
    match (matches.next(), matches.next()) {
        (None, _) => Err(RateSelectionError::NotFound),
        (Some((index, _)), None) => Ok(index),
        (Some(_), Some(_)) => {
            let count = 2 + matches.count();
            Err(RateSelectionError::Ambiguous(count))
        }
    }
}

/// True when two inclusive windows share at least one day
pub fn windows_overlap(a: &RateWindow, b: &RateWindow) -> bool {
    let a_to = a.effective_to.unwrap_or(NaiveDate::MAX);
    let b_to = b.effective_to.unwrap_or(NaiveDate::MAX);
    a.effective_from <= b_to && b.effective_from <= a_to
}
