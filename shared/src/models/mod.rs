//! Domain models for the WareBill storage billing platform

mod balance;
mod config;
mod invoice;
mod rate;
mod reconciliation;
mod transaction;

pub use balance::*;
pub use config::*;
pub use invoice::*;
pub use rate::*;
pub use reconciliation::*;
pub use transaction::*;
