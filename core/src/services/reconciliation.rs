//! Invoice reconciliation
//!
//! Compares what a warehouse billed against what the cost engine computed
//! for the same warehouse and billing period. The expected side is
//! transaction-sourced calculated costs grouped by (category, cost name),
//! plus one storage bucket folded out of the weekly ledger under the
//! canonical "Weekly Storage" name. Every run replaces the invoice's
//! reconciliation records wholesale, so rerunning after a cost recomputation
//! converges instead of accumulating stale rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    classify_difference, weighted_average_rate, ExpectedCost, ReconciliationSummary,
};
use shared::{CostCategory, InvoiceStatus, ReconciliationStatus};

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::error::{AppError, AppResult};
use crate::services::invoices::{fetch_invoice, Invoice};

/// Line name the weekly storage ledger is folded under; invoices are
/// expected to bill storage as a single line with this name.
pub const STORAGE_COST_NAME: &str = "Weekly Storage";

#[derive(Clone)]
pub struct ReconciliationService {
    db: PgPool,
    audit: Arc<dyn AuditSink>,
}

/// One persisted expected-vs-invoiced comparison line
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub category: String,
    pub cost_name: String,
    pub expected_amount: Decimal,
    pub invoiced_amount: Decimal,
    /// Always invoiced minus expected
    pub difference: Decimal,
    pub expected_quantity: Decimal,
    pub invoiced_quantity: Decimal,
    pub unit_rate: Option<Decimal>,
    pub status: String,
    pub suggested_amount: Option<Decimal>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub invoice_id: Uuid,
    pub records: Vec<ReconciliationRecord>,
    pub summary: ReconciliationSummary,
}

#[derive(Debug, FromRow)]
struct ExpectedCostRow {
    category: String,
    cost_name: String,
    quantity: Decimal,
    amount: Decimal,
}

#[derive(Debug, FromRow)]
struct StorageTotalsRow {
    pallets: Decimal,
    cost: Decimal,
}

#[derive(Debug, FromRow)]
struct BilledLineRow {
    category: String,
    cost_name: String,
    quantity: Decimal,
    unit_rate: Decimal,
    amount: Decimal,
}

/// Invoice lines aggregated by (category, cost name); duplicate lines under
/// one key are compared as a single bucket
struct BilledBucket {
    quantity: Decimal,
    amount: Decimal,
    unit_rate: Option<Decimal>,
}

/// A record before it has an id; everything derived, nothing resolved yet
struct RecordDraft {
    category: String,
    cost_name: String,
    expected_amount: Decimal,
    invoiced_amount: Decimal,
    difference: Decimal,
    expected_quantity: Decimal,
    invoiced_quantity: Decimal,
    unit_rate: Option<Decimal>,
    status: ReconciliationStatus,
}

impl ReconciliationService {
    pub fn new(db: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, audit }
    }

    /// Reconcile one invoice against the expected costs of its warehouse and
    /// billing period.
    ///
    /// Invoice lines with no expected counterpart get an expected amount of
    /// zero; expected buckets the invoice never billed get an invoiced amount
    /// of zero. Paid invoices are settled and cannot be reconciled again.
    pub async fn reconcile_invoice(
        &self,
        invoice_id: Uuid,
        user_id: &str,
    ) -> AppResult<ReconciliationResult> {
        let invoice = fetch_invoice(&self.db, invoice_id).await?;
        if invoice.status_enum()? == InvoiceStatus::Paid {
            return Err(AppError::InvalidState(
                "cannot reconcile a paid invoice".to_string(),
            ));
        }

        let mut expected = self.expected_costs(&invoice).await?;
        let billed = self.billed_buckets(invoice_id).await?;

        let mut summary = ReconciliationSummary::default();
        let mut drafts = Vec::with_capacity(billed.len() + expected.len());

        for ((category, cost_name), bucket) in billed {
            let expectation = expected.remove(&(category.clone(), cost_name.clone()));
            let (expected_amount, expected_quantity, expected_rate) = match &expectation {
                Some(cost) => (cost.amount, cost.quantity, cost.unit_rate),
                None => (Decimal::ZERO, Decimal::ZERO, None),
            };
            let difference = bucket.amount - expected_amount;
            let status = classify_difference(difference);
            summary.add(status, expected_amount, bucket.amount);
            drafts.push(RecordDraft {
                category,
                cost_name,
                expected_amount,
                invoiced_amount: bucket.amount,
                difference,
                expected_quantity,
                invoiced_quantity: bucket.quantity,
                unit_rate: bucket
                    .unit_rate
                    .or_else(|| weighted_average_rate(bucket.amount, bucket.quantity))
                    .or(expected_rate),
                status,
            });
        }

        // Charges the engine expected but the invoice never billed
        for ((category, cost_name), cost) in expected {
            let difference = -cost.amount;
            let status = classify_difference(difference);
            summary.add(status, cost.amount, Decimal::ZERO);
            drafts.push(RecordDraft {
                category,
                cost_name,
                expected_amount: cost.amount,
                invoiced_amount: Decimal::ZERO,
                difference,
                expected_quantity: cost.quantity,
                invoiced_quantity: Decimal::ZERO,
                unit_rate: cost.unit_rate,
                status,
            });
        }

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM reconciliation_records WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        let mut records = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let record = sqlx::query_as::<_, ReconciliationRecord>(
                r#"
                INSERT INTO reconciliation_records (
                    invoice_id, category, cost_name, expected_amount,
                    invoiced_amount, difference, expected_quantity,
                    invoiced_quantity, unit_rate, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id, invoice_id, category, cost_name, expected_amount,
                          invoiced_amount, difference, expected_quantity,
                          invoiced_quantity, unit_rate, status, suggested_amount,
                          resolution_notes, resolved_by, resolved_at, created_at
                "#,
            )
            .bind(invoice_id)
            .bind(&draft.category)
            .bind(&draft.cost_name)
            .bind(draft.expected_amount)
            .bind(draft.invoiced_amount)
            .bind(draft.difference)
            .bind(draft.expected_quantity)
            .bind(draft.invoiced_quantity)
            .bind(draft.unit_rate)
            .bind(draft.status.as_str())
            .fetch_one(&mut *tx)
            .await?;
            records.push(record);
        }

        tx.commit().await?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::InvoiceReconciled,
                    "Invoice",
                    invoice_id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "invoice_number": invoice.invoice_number,
                    "records": summary.total_records,
                    "matched": summary.matched,
                    "overbilled": summary.overbilled,
                    "underbilled": summary.underbilled,
                    "total_expected": summary.total_expected,
                    "total_invoiced": summary.total_invoiced,
                    "total_variance": summary.total_variance,
                })),
            )
            .await;

        Ok(ReconciliationResult {
            invoice_id,
            records,
            summary,
        })
    }

    pub async fn records_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> AppResult<Vec<ReconciliationRecord>> {
        let records = sqlx::query_as::<_, ReconciliationRecord>(
            r#"
            SELECT id, invoice_id, category, cost_name, expected_amount,
                   invoiced_amount, difference, expected_quantity,
                   invoiced_quantity, unit_rate, status, suggested_amount,
                   resolution_notes, resolved_by, resolved_at, created_at
            FROM reconciliation_records
            WHERE invoice_id = $1
            ORDER BY category, cost_name
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    /// Expected-charge buckets for the invoice's warehouse and period
    async fn expected_costs(
        &self,
        invoice: &Invoice,
    ) -> AppResult<BTreeMap<(String, String), ExpectedCost>> {
        let rows = sqlx::query_as::<_, ExpectedCostRow>(
            r#"
            SELECT category, cost_name,
                   SUM(quantity)::numeric AS quantity,
                   SUM(final_expected_cost) AS amount
            FROM calculated_costs
            WHERE warehouse_id = $1
              AND source_type = 'TRANSACTION'
              AND billing_period_start = $2
              AND billing_period_end = $3
            GROUP BY category, cost_name
            "#,
        )
        .bind(invoice.warehouse_id)
        .bind(invoice.billing_period_start)
        .bind(invoice.billing_period_end)
        .fetch_all(&self.db)
        .await?;

        let mut expected = BTreeMap::new();
        for row in rows {
            let category: CostCategory = row.category.parse().map_err(|_| {
                AppError::Internal(anyhow::anyhow!(
                    "unknown cost category in calculated costs: {}",
                    row.category
                ))
            })?;
            expected.insert(
                (row.category, row.cost_name.clone()),
                ExpectedCost {
                    category,
                    cost_name: row.cost_name,
                    quantity: row.quantity,
                    unit_rate: weighted_average_rate(row.amount, row.quantity),
                    amount: row.amount,
                },
            );
        }

        // Storage is the one charge accrued weekly rather than per movement;
        // the ledger folds into a single bucket priced at the pallet-weighted
        // average of its weeks.
        let storage = sqlx::query_as::<_, StorageTotalsRow>(
            r#"
            SELECT COALESCE(SUM(pallets), 0)::numeric AS pallets,
                   COALESCE(SUM(weekly_cost), 0) AS cost
            FROM storage_ledger
            WHERE warehouse_id = $1
              AND billing_period_start = $2
              AND billing_period_end = $3
            "#,
        )
        .bind(invoice.warehouse_id)
        .bind(invoice.billing_period_start)
        .bind(invoice.billing_period_end)
        .fetch_one(&self.db)
        .await?;

        if storage.pallets > Decimal::ZERO {
            expected.insert(
                (
                    CostCategory::Storage.as_str().to_string(),
                    STORAGE_COST_NAME.to_string(),
                ),
                ExpectedCost {
                    category: CostCategory::Storage,
                    cost_name: STORAGE_COST_NAME.to_string(),
                    quantity: storage.pallets,
                    unit_rate: weighted_average_rate(storage.cost, storage.pallets),
                    amount: storage.cost,
                },
            );
        }

        Ok(expected)
    }

    async fn billed_buckets(
        &self,
        invoice_id: Uuid,
    ) -> AppResult<BTreeMap<(String, String), BilledBucket>> {
        let lines = sqlx::query_as::<_, BilledLineRow>(
            r#"
            SELECT category, cost_name, quantity, unit_rate, amount
            FROM invoice_line_items
            WHERE invoice_id = $1
            ORDER BY category, cost_name
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.db)
        .await?;

        let mut billed: BTreeMap<(String, String), BilledBucket> = BTreeMap::new();
        for line in lines {
            let key = (line.category, line.cost_name);
            match billed.get_mut(&key) {
                Some(bucket) => {
                    bucket.quantity += line.quantity;
                    bucket.amount += line.amount;
                    // Mixed rates under one key have no single stated rate;
                    // the caller falls back to the weighted average.
                    if bucket.unit_rate != Some(line.unit_rate) {
                        bucket.unit_rate = None;
                    }
                }
                None => {
                    billed.insert(
                        key,
                        BilledBucket {
                            quantity: line.quantity,
                            amount: line.amount,
                            unit_rate: Some(line.unit_rate),
                        },
                    );
                }
            }
        }
        Ok(billed)
    }
}
