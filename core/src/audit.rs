//! Audit event sink
//!
//! Every state-changing operation emits a structured audit entry. Recording
//! is fire-and-forget: a sink failure is the sink's problem and never
//! propagates into the operation that emitted the event.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Audit actions recorded across the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    TransactionCreated,
    TransactionAmended,
    // Trigger queue lifecycle
    Trigger,
    Complete,
    Retry,
    Failed,
    // Cost computation
    StorageComputed,
    CostsCalculated,
    // Rates
    RateCreated,
    RateEnded,
    // Invoices
    InvoiceCreated,
    InvoiceSent,
    InvoiceReconciled,
    InvoiceDisputed,
    DisputeResolved,
    InvoicePaid,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TransactionCreated => "TRANSACTION_CREATED",
            AuditAction::TransactionAmended => "TRANSACTION_AMENDED",
            AuditAction::Trigger => "TRIGGER",
            AuditAction::Complete => "COMPLETE",
            AuditAction::Retry => "RETRY",
            AuditAction::Failed => "FAILED",
            AuditAction::StorageComputed => "STORAGE_COMPUTED",
            AuditAction::CostsCalculated => "COSTS_CALCULATED",
            AuditAction::RateCreated => "RATE_CREATED",
            AuditAction::RateEnded => "RATE_ENDED",
            AuditAction::InvoiceCreated => "INVOICE_CREATED",
            AuditAction::InvoiceSent => "INVOICE_SENT",
            AuditAction::InvoiceReconciled => "INVOICE_RECONCILED",
            AuditAction::InvoiceDisputed => "INVOICE_DISPUTED",
            AuditAction::DisputeResolved => "DISPUTE_RESOLVED",
            AuditAction::InvoicePaid => "INVOICE_PAID",
        }
    }
}

/// One audit event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub user_id: String,
    pub detail: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity_type: &'static str,
        entity_id: impl Into<String>,
        user_id: &str,
    ) -> Self {
        Self {
            action,
            entity_type,
            entity_id: entity_id.into(),
            user_id: user_id.to_string(),
            detail: Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Fire-and-forget audit sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Sink that writes audit events to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "warebill_core::audit",
            action = entry.action.as_str(),
            entity_type = entry.entity_type,
            entity_id = %entry.entity_id,
            user_id = %entry.user_id,
            detail = %entry.detail,
            "audit event"
        );
    }
}

/// In-memory sink for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn count_action(&self, action: AuditAction) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.action == action)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.clear();
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.push(entry);
        }
    }
}
