//! Error handling for the WareBill billing core
//!
//! Business errors carry enough detail for callers to self-correct: inventory
//! rejections name the exact shortfall, rate lookups name the warehouse,
//! category and date that failed to resolve.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use shared::CostCategory;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Inventory errors
    #[error("Insufficient inventory: short {shortfall} cartons")]
    InsufficientInventory {
        shortfall: i64,
        /// Later transaction that would be overdrawn by a backdated write or
        /// amendment, when known
        blocking_reference: Option<String>,
    },

    // Rate configuration errors
    #[error("No {category} rate found for warehouse {warehouse_id} effective {as_of}")]
    RateNotFound {
        warehouse_id: Uuid,
        category: CostCategory,
        as_of: NaiveDate,
    },

    #[error("{matches} {category} rates overlap for warehouse {warehouse_id} effective {as_of}")]
    RateAmbiguous {
        warehouse_id: Uuid,
        category: CostCategory,
        as_of: NaiveDate,
        matches: usize,
    },

    // Concurrency errors
    #[error("Record was modified by another request")]
    VersionConflict,

    // Business logic errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for validation failures raised by shared validators
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// True for rate-configuration errors that batch runs skip and collect
    /// instead of aborting on
    pub fn is_rate_configuration(&self) -> bool {
        matches!(
            self,
            AppError::RateNotFound { .. } | AppError::RateAmbiguous { .. }
        )
    }
}

/// Result type alias for service methods
pub type AppResult<T> = Result<T, AppError>;
