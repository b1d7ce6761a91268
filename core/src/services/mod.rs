//! Business logic services for the WareBill billing core

pub mod costs;
pub mod inventory;
pub mod invoices;
pub mod rates;
pub mod reconciliation;
pub mod storage;
pub mod trigger;

pub use costs::{CostCalculationService, TransactionCostHandler};
pub use inventory::InventoryService;
pub use invoices::InvoiceService;
pub use rates::RateService;
pub use reconciliation::ReconciliationService;
pub use storage::StorageCostService;
pub use trigger::{cost_trigger_queue, CostTriggerQueue, TriggerWorker};
