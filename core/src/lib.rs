//! WareBill billing core
//!
//! Library contract for the ledger-to-cost pipeline: inventory transactions
//! are appended to a non-negative stock ledger, projected into balances,
//! snapshotted every Monday into pallet-based storage charges, and reconciled
//! against warehouse invoices. No network surface lives here; an HTTP/RPC
//! layer owned elsewhere composes these services, and the shipped binary is
//! an operational worker that drains the cost trigger queue and keeps the
//! weekly snapshots caught up.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod services;

pub use audit::{AuditAction, AuditEntry, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult};
