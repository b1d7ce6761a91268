//! Invoice intake and lifecycle
//!
//! Invoices arrive from warehouse operators as line items; the system prices
//! nothing here, it records what was billed so reconciliation can compare it
//! against expected costs. Numbers are per warehouse and month, sequence
//! suffix 0001 upward. Mutations carry the caller's last-known `updated_at`
//! and lose to a newer write.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::billing::{billing_period_for, round_money};
use shared::models::{
    can_transition, classify_difference, default_due_date, format_invoice_number, next_sequence,
    within_updated_at_tolerance,
};
use shared::validation;
use shared::{CostCategory, InvoiceStatus};

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::error::{AppError, AppResult};
use crate::services::reconciliation::ReconciliationRecord;

#[derive(Clone)]
pub struct InvoiceService {
    db: PgPool,
    audit: Arc<dyn AuditSink>,
}

/// Invoice header
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub warehouse_id: Uuid,
    pub status: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub payment_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn status_enum(&self) -> AppResult<InvoiceStatus> {
        self.status.parse().map_err(|_| {
            AppError::Internal(anyhow::anyhow!("unknown invoice status: {}", self.status))
        })
    }
}

/// One billed line as the warehouse stated it
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub category: String,
    pub cost_name: String,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithLines {
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemInput {
    pub category: CostCategory,
    pub cost_name: String,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceInput {
    pub warehouse_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub tax_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub line_items: Vec<LineItemInput>,
}

/// One disputed reconciliation record with the payer's objection
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemDispute {
    pub record_id: Uuid,
    pub reason: String,
    /// What the payer believes the line should cost
    pub suggested_amount: Option<Decimal>,
}

/// Either specific records or a blanket objection; line items win when both
/// are present
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisputeInvoiceInput {
    #[serde(default)]
    pub line_items: Vec<LineItemDispute>,
    pub general_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeResult {
    pub invoice: Invoice,
    pub records: Vec<ReconciliationRecord>,
    /// Sum of absolute differences across the marked records
    pub total_disputed_amount: Decimal,
}

enum DisputeScope {
    Lines(Vec<LineItemDispute>),
    General(String),
}

impl InvoiceService {
    pub fn new(db: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, audit }
    }

    /// Record a warehouse invoice as a draft.
    ///
    /// Line amounts are derived from quantity and unit rate; the billing
    /// period is the 16th-to-15th cycle containing the invoice date.
    pub async fn create_invoice(
        &self,
        input: CreateInvoiceInput,
        user_id: &str,
    ) -> AppResult<InvoiceWithLines> {
        if input.line_items.is_empty() {
            return Err(AppError::validation(
                "line_items",
                "an invoice needs at least one line item",
            ));
        }
        for line in &input.line_items {
            validation::validate_line_item(&line.cost_name, line.quantity, line.unit_rate)
                .map_err(|msg| AppError::validation("line_items", msg))?;
        }

        let warehouse_code =
            sqlx::query_scalar::<_, String>("SELECT code FROM warehouses WHERE id = $1")
                .bind(input.warehouse_id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| AppError::NotFound("Warehouse".to_string()))?;

        let period = billing_period_for(input.invoice_date);
        let due_date = input
            .due_date
            .unwrap_or_else(|| default_due_date(input.invoice_date));

        let lines: Vec<(&LineItemInput, Decimal)> = input
            .line_items
            .iter()
            .map(|line| (line, round_money(line.quantity * line.unit_rate)))
            .collect();
        let subtotal: Decimal = lines.iter().map(|(_, amount)| *amount).sum();
        let tax_amount = input.tax_amount.unwrap_or(Decimal::ZERO);
        let total_amount = round_money(subtotal + tax_amount);

        let mut tx = self.db.begin().await?;

        // Sequence scan is confined to this warehouse and month; malformed
        // suffixes in old data are skipped rather than trusted.
        let prefix = format!(
            "{}-{}{:02}-%",
            warehouse_code,
            input.invoice_date.year(),
            input.invoice_date.month()
        );
        let existing = sqlx::query_scalar::<_, String>(
            "SELECT invoice_number FROM invoices WHERE warehouse_id = $1 AND invoice_number LIKE $2",
        )
        .bind(input.warehouse_id)
        .bind(&prefix)
        .fetch_all(&mut *tx)
        .await?;
        let invoice_number = format_invoice_number(
            &warehouse_code,
            input.invoice_date,
            next_sequence(&existing),
        );

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_number, warehouse_id, status, invoice_date, due_date,
                billing_period_start, billing_period_end, subtotal, tax_amount,
                total_amount, notes, created_by
            )
            VALUES ($1, $2, 'draft', $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, invoice_number, warehouse_id, status, invoice_date, due_date,
                      billing_period_start, billing_period_end, subtotal, tax_amount,
                      total_amount, payment_reference, paid_at, notes, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(&invoice_number)
        .bind(input.warehouse_id)
        .bind(input.invoice_date)
        .bind(due_date)
        .bind(period.start)
        .bind(period.end)
        .bind(subtotal)
        .bind(tax_amount)
        .bind(total_amount)
        .bind(&input.notes)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut line_items = Vec::with_capacity(lines.len());
        for (line, amount) in lines {
            let item = sqlx::query_as::<_, InvoiceLineItem>(
                r#"
                INSERT INTO invoice_line_items (
                    invoice_id, category, cost_name, description, quantity,
                    unit_rate, amount
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, invoice_id, category, cost_name, description, quantity,
                          unit_rate, amount
                "#,
            )
            .bind(invoice.id)
            .bind(line.category.as_str())
            .bind(line.cost_name.trim())
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_rate)
            .bind(amount)
            .fetch_one(&mut *tx)
            .await?;
            line_items.push(item);
        }

        tx.commit().await?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::InvoiceCreated,
                    "Invoice",
                    invoice.id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "invoice_number": invoice.invoice_number,
                    "line_items": line_items.len(),
                    "total_amount": invoice.total_amount,
                })),
            )
            .await;

        Ok(InvoiceWithLines {
            invoice,
            line_items,
        })
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> AppResult<InvoiceWithLines> {
        let invoice = fetch_invoice(&self.db, invoice_id).await?;
        let line_items = sqlx::query_as::<_, InvoiceLineItem>(
            r#"
            SELECT id, invoice_id, category, cost_name, description, quantity,
                   unit_rate, amount
            FROM invoice_line_items
            WHERE invoice_id = $1
            ORDER BY category, cost_name
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.db)
        .await?;

        Ok(InvoiceWithLines {
            invoice,
            line_items,
        })
    }

    /// Move a draft to sent, opening it to dispute and payment
    pub async fn send_invoice(
        &self,
        invoice_id: Uuid,
        expected_updated_at: DateTime<Utc>,
        user_id: &str,
    ) -> AppResult<Invoice> {
        let invoice = fetch_invoice(&self.db, invoice_id).await?;
        let status = invoice.status_enum()?;

        if !within_updated_at_tolerance(expected_updated_at, invoice.updated_at) {
            return Err(AppError::VersionConflict);
        }
        if !can_transition(status, InvoiceStatus::Sent) {
            return Err(AppError::InvalidState(format!(
                "cannot send an invoice in status {status}"
            )));
        }

        let sent = self
            .update_status(invoice_id, InvoiceStatus::Sent)
            .await?;

        self.audit
            .record(AuditEntry::new(
                AuditAction::InvoiceSent,
                "Invoice",
                invoice_id.to_string(),
                user_id,
            ))
            .await;

        Ok(sent)
    }

    /// Accept an invoice and record payment.
    ///
    /// Re-accepting an already-paid invoice with the same payment reference
    /// is a no-op; a different reference is rejected. Any reconciliation
    /// records still open when the payer accepts are closed as matches.
    pub async fn record_payment(
        &self,
        invoice_id: Uuid,
        payment_reference: &str,
        expected_updated_at: DateTime<Utc>,
        user_id: &str,
    ) -> AppResult<Invoice> {
        let reference = payment_reference.trim();
        if reference.is_empty() {
            return Err(AppError::validation(
                "payment_reference",
                "payment reference must not be empty",
            ));
        }

        let invoice = fetch_invoice(&self.db, invoice_id).await?;
        let status = invoice.status_enum()?;

        if status == InvoiceStatus::Paid {
            if invoice.payment_reference.as_deref() == Some(reference) {
                return Ok(invoice);
            }
            return Err(AppError::InvalidState(
                "invoice is already paid under a different payment reference".to_string(),
            ));
        }

        if !within_updated_at_tolerance(expected_updated_at, invoice.updated_at) {
            return Err(AppError::VersionConflict);
        }
        if !can_transition(status, InvoiceStatus::Paid) {
            return Err(AppError::InvalidState(format!(
                "cannot pay an invoice in status {status}"
            )));
        }

        let mut tx = self.db.begin().await?;

        let paid = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'paid', payment_reference = $2, paid_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING id, invoice_number, warehouse_id, status, invoice_date, due_date,
                      billing_period_start, billing_period_end, subtotal, tax_amount,
                      total_amount, payment_reference, paid_at, notes, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .bind(reference)
        .fetch_one(&mut *tx)
        .await?;

        let closed = sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET status = 'match', resolved_at = NOW(), resolved_by = $2,
                resolution_notes = COALESCE(resolution_notes, 'accepted at payment')
            WHERE invoice_id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(invoice_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::InvoicePaid,
                    "Invoice",
                    invoice_id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "payment_reference": reference,
                    "records_closed": closed,
                    "paid_at": paid.paid_at,
                })),
            )
            .await;

        Ok(paid)
    }

    /// Dispute a sent invoice.
    ///
    /// Either specific reconciliation records are contested, each with a
    /// reason and an optional suggested corrected amount, or a general reason
    /// marks every record. Marked records are re-classified by the sign of
    /// their difference and stamped with the disputer. Paid invoices are
    /// settled; disputing one always fails and touches nothing.
    pub async fn dispute_invoice(
        &self,
        invoice_id: Uuid,
        input: DisputeInvoiceInput,
        expected_updated_at: DateTime<Utc>,
        user_id: &str,
    ) -> AppResult<DisputeResult> {
        let general_reason = input
            .general_reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty());
        let scope = if !input.line_items.is_empty() {
            for item in &input.line_items {
                if item.reason.trim().is_empty() {
                    return Err(AppError::validation(
                        "line_items",
                        "each disputed record needs a reason",
                    ));
                }
                if matches!(item.suggested_amount, Some(amount) if amount < Decimal::ZERO) {
                    return Err(AppError::validation(
                        "line_items",
                        "suggested amount cannot be negative",
                    ));
                }
            }
            DisputeScope::Lines(input.line_items)
        } else if let Some(reason) = general_reason {
            DisputeScope::General(reason.to_string())
        } else {
            return Err(AppError::validation(
                "dispute",
                "a dispute needs disputed line items or a general reason",
            ));
        };

        let invoice = fetch_invoice(&self.db, invoice_id).await?;
        let status = invoice.status_enum()?;

        if status == InvoiceStatus::Paid {
            return Err(AppError::InvalidState(
                "cannot dispute a paid invoice".to_string(),
            ));
        }
        if !within_updated_at_tolerance(expected_updated_at, invoice.updated_at) {
            return Err(AppError::VersionConflict);
        }
        if !can_transition(status, InvoiceStatus::Disputed) {
            return Err(AppError::InvalidState(format!(
                "cannot dispute an invoice in status {status}"
            )));
        }

        let mut tx = self.db.begin().await?;

        let marked = match &scope {
            DisputeScope::Lines(items) => {
                let mut marked = Vec::with_capacity(items.len());
                for item in items {
                    let record = self
                        .mark_record(
                            &mut tx,
                            invoice_id,
                            Some(item.record_id),
                            &item.reason,
                            item.suggested_amount,
                            user_id,
                        )
                        .await?;
                    marked.extend(record);
                }
                marked
            }
            DisputeScope::General(reason) => {
                self.mark_record(&mut tx, invoice_id, None, reason, None, user_id)
                    .await?
            }
        };

        let disputed = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices SET status = 'disputed', updated_at = NOW()
            WHERE id = $1
            RETURNING id, invoice_number, warehouse_id, status, invoice_date, due_date,
                      billing_period_start, billing_period_end, subtotal, tax_amount,
                      total_amount, payment_reference, paid_at, notes, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let total_disputed_amount: Decimal =
            marked.iter().map(|record| record.difference.abs()).sum();

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::InvoiceDisputed,
                    "Invoice",
                    invoice_id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "invoice_number": disputed.invoice_number,
                    "previous_status": status.as_str(),
                    "new_status": disputed.status,
                    "records_disputed": marked.len(),
                    "total_disputed_amount": total_disputed_amount,
                    "general": matches!(scope, DisputeScope::General(_)),
                })),
            )
            .await;

        Ok(DisputeResult {
            invoice: disputed,
            records: marked,
            total_disputed_amount,
        })
    }

    /// Close a dispute and return the invoice to sent.
    ///
    /// Records the dispute left untouched are stamped with the resolution;
    /// records the disputer already marked keep their objection.
    pub async fn resolve_dispute(
        &self,
        invoice_id: Uuid,
        resolution_notes: &str,
        expected_updated_at: DateTime<Utc>,
        user_id: &str,
    ) -> AppResult<Invoice> {
        let notes = resolution_notes.trim();
        if notes.is_empty() {
            return Err(AppError::validation(
                "resolution_notes",
                "resolution notes must not be empty",
            ));
        }

        let invoice = fetch_invoice(&self.db, invoice_id).await?;
        let status = invoice.status_enum()?;

        if !within_updated_at_tolerance(expected_updated_at, invoice.updated_at) {
            return Err(AppError::VersionConflict);
        }
        if status != InvoiceStatus::Disputed {
            return Err(AppError::InvalidState(format!(
                "cannot resolve an invoice in status {status}, only disputed"
            )));
        }

        let mut tx = self.db.begin().await?;

        let closed = sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET resolution_notes = $2, resolved_by = $3, resolved_at = NOW()
            WHERE invoice_id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(invoice_id)
        .bind(notes)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let resolved = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices SET status = 'sent', updated_at = NOW()
            WHERE id = $1
            RETURNING id, invoice_number, warehouse_id, status, invoice_date, due_date,
                      billing_period_start, billing_period_end, subtotal, tax_amount,
                      total_amount, payment_reference, paid_at, notes, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::DisputeResolved,
                    "Invoice",
                    invoice_id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "invoice_number": resolved.invoice_number,
                    "records_closed": closed,
                    "resolution": notes,
                })),
            )
            .await;

        Ok(resolved)
    }

    /// Mark one record (or, with no id, every record of the invoice) as
    /// disputed. The stored status is re-pinned from the sign of the
    /// difference rather than trusted from the earlier run.
    async fn mark_record(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        invoice_id: Uuid,
        record_id: Option<Uuid>,
        reason: &str,
        suggested_amount: Option<Decimal>,
        user_id: &str,
    ) -> AppResult<Vec<ReconciliationRecord>> {
        let existing = sqlx::query_as::<_, ReconciliationRecord>(
            r#"
            SELECT id, invoice_id, category, cost_name, expected_amount,
                   invoiced_amount, difference, expected_quantity,
                   invoiced_quantity, unit_rate, status, suggested_amount,
                   resolution_notes, resolved_by, resolved_at, created_at
            FROM reconciliation_records
            WHERE invoice_id = $1 AND ($2::uuid IS NULL OR id = $2)
            ORDER BY category, cost_name
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(record_id)
        .fetch_all(&mut **tx)
        .await?;

        if record_id.is_some() && existing.is_empty() {
            return Err(AppError::NotFound("Reconciliation record".to_string()));
        }

        let mut marked = Vec::with_capacity(existing.len());
        for record in existing {
            let status = classify_difference(record.difference);
            let updated = sqlx::query_as::<_, ReconciliationRecord>(
                r#"
                UPDATE reconciliation_records
                SET status = $2, resolution_notes = $3, suggested_amount = $4,
                    resolved_by = $5, resolved_at = NOW()
                WHERE id = $1
                RETURNING id, invoice_id, category, cost_name, expected_amount,
                          invoiced_amount, difference, expected_quantity,
                          invoiced_quantity, unit_rate, status, suggested_amount,
                          resolution_notes, resolved_by, resolved_at, created_at
                "#,
            )
            .bind(record.id)
            .bind(status.as_str())
            .bind(reason.trim())
            .bind(suggested_amount)
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;
            marked.push(updated);
        }
        Ok(marked)
    }

    async fn update_status(&self, invoice_id: Uuid, status: InvoiceStatus) -> AppResult<Invoice> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, invoice_number, warehouse_id, status, invoice_date, due_date,
                      billing_period_start, billing_period_end, subtotal, tax_amount,
                      total_amount, payment_reference, paid_at, notes, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .bind(status.as_str())
        .fetch_one(&self.db)
        .await?;
        Ok(invoice)
    }
}

/// Shared header lookup; reconciliation reads invoices through this too
pub(crate) async fn fetch_invoice(db: &PgPool, invoice_id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT id, invoice_number, warehouse_id, status, invoice_date, due_date,
               billing_period_start, billing_period_end, subtotal, tax_amount,
               total_amount, payment_reference, paid_at, notes, created_by,
               created_at, updated_at
        FROM invoices
        WHERE id = $1
        "#,
    )
    .bind(invoice_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound("Invoice".to_string()))
}
