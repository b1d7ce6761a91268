//! Invoice lifecycle rules
//!
//! Status transitions, per-warehouse invoice numbering and the optimistic
//! concurrency tolerance shared by every invoice mutation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::types::InvoiceStatus;

/// Allowed clock skew between the caller's last-known updated_at and the
/// stored row before a mutation is treated as a conflicting concurrent edit
pub const UPDATED_AT_TOLERANCE_MS: i64 = 1_000;

/// Days until payment is due when the caller does not supply a due date
pub const DEFAULT_PAYMENT_TERMS_DAYS: i64 = 30;

/// Valid invoice status transitions.
///
/// draft -> sent -> {paid | disputed}; disputed -> {sent | paid}. Paid is
/// terminal. Self-transitions are not valid; payment idempotency is handled
/// above this check by comparing payment references.
pub fn can_transition(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    matches!(
        (from, to),
        (InvoiceStatus::Draft, InvoiceStatus::Sent)
            | (InvoiceStatus::Sent, InvoiceStatus::Paid)
            | (InvoiceStatus::Sent, InvoiceStatus::Disputed)
            | (InvoiceStatus::Disputed, InvoiceStatus::Sent)
            | (InvoiceStatus::Disputed, InvoiceStatus::Paid)
    )
}

/// Formats `{WAREHOUSE_CODE}-{yyyyMM}-{NNNN}` for the invoice date's month
pub fn format_invoice_number(warehouse_code: &str, invoice_date: NaiveDate, sequence: u32) -> String {
    format!(
        "{}-{}{:02}-{:04}",
        warehouse_code,
        invoice_date.year(),
        invoice_date.month(),
        sequence
    )
}

/// Next sequence number given the invoice numbers already issued for a
/// warehouse and month. Numbers whose trailing segment does not parse are
/// ignored rather than resetting the sequence.
pub fn next_sequence(existing_numbers: &[String]) -> u32 {
    existing_numbers
        .iter()
        .filter_map(|number| number.rsplit('-').next())
        .filter_map(|tail| tail.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

/// Default due date: invoice date plus the standard payment terms
pub fn default_due_date(invoice_date: NaiveDate) -> NaiveDate {
    invoice_date + Duration::days(DEFAULT_PAYMENT_TERMS_DAYS)
}

/// True when the caller's last-known updated_at matches the stored value
/// within the allowed tolerance
pub fn within_updated_at_tolerance(expected: DateTime<Utc>, stored: DateTime<Utc>) -> bool {
    (stored - expected).num_milliseconds().abs() <= UPDATED_AT_TOLERANCE_MS
}
