//! Shared domain types and rules for the WareBill storage billing platform
//!
//! This crate holds the pure domain model shared between the billing core and
//! any embedding application: movement and cost enums, transaction payloads,
//! the billing-calendar math, balance projection rules, rate-window selection
//! and input validation. It performs no I/O.

pub mod billing;
pub mod models;
pub mod types;
pub mod validation;

pub use billing::*;
pub use models::*;
pub use types::*;
pub use validation::*;
