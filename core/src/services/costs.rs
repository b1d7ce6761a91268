//! Per-transaction handling charges
//!
//! Receipts and shipments are charged per carton against the named handling
//! rate effective on the transaction date; transfers are charged only when a
//! transfer rate exists, and adjustments are never charged. Each charge is a
//! calculated-cost row keyed by `CC-{transaction id}-{category}` so
//! recalculation after an amendment replaces rather than duplicates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::billing::{billing_period_for, monday_on_or_after, round_money};
use shared::models::BalanceKey;
use shared::{CostCategory, TransactionType};

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::error::{AppError, AppResult};
use crate::services::rates::{CostRate, RateService};
use crate::services::storage::StorageCostService;
use crate::services::trigger::{CostJob, CostJobHandler, CostJobOutcome};

/// Natural key of a transaction-sourced calculated cost
pub fn transaction_cost_code(transaction_id: Uuid, category: CostCategory) -> String {
    format!("CC-{transaction_id}-{category}")
}

#[derive(Clone)]
pub struct CostCalculationService {
    db: PgPool,
    rates: RateService,
    audit: Arc<dyn AuditSink>,
}

/// One expected-cost row, from either a transaction or a storage snapshot
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CalculatedCost {
    pub id: Uuid,
    pub cost_code: String,
    pub transaction_id: Option<Uuid>,
    /// Transaction id or storage ledger entry code, depending on source
    pub source_reference: String,
    pub rate_id: Uuid,
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub category: String,
    pub cost_name: String,
    pub source_type: String,
    pub quantity: i32,
    pub unit: String,
    pub applicable_rate: Decimal,
    pub calculated_cost: Decimal,
    pub final_expected_cost: Decimal,
    pub transaction_date: NaiveDate,
    pub billing_week: NaiveDate,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Output of one costing pass over a transaction
#[derive(Debug, Clone, Serialize)]
pub struct CostCalcResult {
    pub transaction_id: Uuid,
    pub items: Vec<CalculatedCost>,
    pub total_amount: Decimal,
}

/// Transaction fields the costing pass needs, codes included
#[derive(Debug, FromRow)]
struct CostableTransaction {
    id: Uuid,
    warehouse_id: Uuid,
    sku_id: Uuid,
    batch_lot: String,
    transaction_type: String,
    cartons_in: i32,
    cartons_out: i32,
    transaction_date: NaiveDate,
}

impl CostCalculationService {
    pub fn new(db: PgPool, rates: RateService, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, rates, audit }
    }

    /// Price one transaction's handling and write the calculated-cost rows.
    ///
    /// A missing inbound or outbound rate is an error; a missing transfer
    /// rate simply produces no charge.
    pub async fn calculate_transaction_costs(
        &self,
        transaction_id: Uuid,
        user_id: &str,
    ) -> AppResult<CostCalcResult> {
        let transaction = sqlx::query_as::<_, CostableTransaction>(
            r#"
            SELECT id, warehouse_id, sku_id, batch_lot, transaction_type,
                   cartons_in, cartons_out, transaction_date
            FROM stock_transactions
            WHERE id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?;

        let transaction_type: TransactionType =
            transaction.transaction_type.parse().map_err(|_| {
                AppError::Internal(anyhow::anyhow!(
                    "unknown transaction type in ledger: {}",
                    transaction.transaction_type
                ))
            })?;

        let charge = match transaction_type {
            TransactionType::Receive => Some((
                self.rates
                    .resolve_named(
                        transaction.warehouse_id,
                        CostCategory::Carton,
                        "Inbound",
                        transaction.transaction_date,
                    )
                    .await?,
                transaction.cartons_in,
            )),
            TransactionType::Ship => Some((
                self.rates
                    .resolve_named(
                        transaction.warehouse_id,
                        CostCategory::Carton,
                        "Outbound",
                        transaction.transaction_date,
                    )
                    .await?,
                transaction.cartons_out,
            )),
            TransactionType::Transfer => {
                // Transfers are only charged where the warehouse prices them.
                let quantity = transaction.cartons_in.max(transaction.cartons_out);
                match self
                    .rates
                    .resolve_named(
                        transaction.warehouse_id,
                        CostCategory::Carton,
                        "Transfer",
                        transaction.transaction_date,
                    )
                    .await
                {
                    Ok(rate) => Some((rate, quantity)),
                    Err(AppError::RateNotFound { .. }) => None,
                    Err(err) => return Err(err),
                }
            }
            TransactionType::AdjustIn | TransactionType::AdjustOut => None,
        };

        let mut items = Vec::new();
        if let Some((rate, quantity)) = charge {
            if quantity > 0 {
                let item = self
                    .write_cost(&transaction, &rate, quantity, user_id)
                    .await?;
                items.push(item);
            }
        }

        let total_amount: Decimal = items.iter().map(|item| item.final_expected_cost).sum();

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::CostsCalculated,
                    "StockTransaction",
                    transaction_id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "items": items.len(),
                    "total_amount": total_amount,
                })),
            )
            .await;

        Ok(CostCalcResult {
            transaction_id,
            items,
            total_amount,
        })
    }

    /// Drop and re-derive every transaction-sourced cost row for a
    /// transaction. Used after amendments, where the charge may disappear
    /// entirely.
    pub async fn recalculate_transaction_costs(
        &self,
        transaction_id: Uuid,
        user_id: &str,
    ) -> AppResult<CostCalcResult> {
        sqlx::query(
            "DELETE FROM calculated_costs WHERE transaction_id = $1 AND source_type = 'TRANSACTION'",
        )
        .bind(transaction_id)
        .execute(&self.db)
        .await?;

        self.calculate_transaction_costs(transaction_id, user_id)
            .await
    }

    async fn write_cost(
        &self,
        transaction: &CostableTransaction,
        rate: &CostRate,
        quantity: i32,
        user_id: &str,
    ) -> AppResult<CalculatedCost> {
        let category: CostCategory = rate.category.parse().map_err(|_| {
            AppError::Internal(anyhow::anyhow!("unknown rate category: {}", rate.category))
        })?;
        let cost_code = transaction_cost_code(transaction.id, category);
        let amount = round_money(Decimal::from(quantity) * rate.rate_value);
        let billing_week = monday_on_or_after(transaction.transaction_date);
        let period = billing_period_for(transaction.transaction_date);

        let item = sqlx::query_as::<_, CalculatedCost>(
            r#"
            INSERT INTO calculated_costs (
                cost_code, transaction_id, source_reference, rate_id, warehouse_id,
                sku_id, batch_lot, category, cost_name, source_type, quantity, unit,
                applicable_rate, calculated_cost, final_expected_cost,
                transaction_date, billing_week, billing_period_start,
                billing_period_end, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'TRANSACTION', $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (cost_code) DO UPDATE SET
                rate_id = EXCLUDED.rate_id,
                cost_name = EXCLUDED.cost_name,
                quantity = EXCLUDED.quantity,
                applicable_rate = EXCLUDED.applicable_rate,
                calculated_cost = EXCLUDED.calculated_cost,
                final_expected_cost = EXCLUDED.final_expected_cost,
                transaction_date = EXCLUDED.transaction_date,
                billing_week = EXCLUDED.billing_week,
                billing_period_start = EXCLUDED.billing_period_start,
                billing_period_end = EXCLUDED.billing_period_end,
                updated_at = NOW()
            RETURNING id, cost_code, transaction_id, source_reference, rate_id,
                      warehouse_id, sku_id, batch_lot, category, cost_name, source_type,
                      quantity, unit, applicable_rate, calculated_cost,
                      final_expected_cost, transaction_date, billing_week,
                      billing_period_start, billing_period_end, created_by, created_at
            "#,
        )
        .bind(&cost_code)
        .bind(transaction.id)
        .bind(transaction.id.to_string())
        .bind(rate.id)
        .bind(transaction.warehouse_id)
        .bind(transaction.sku_id)
        .bind(&transaction.batch_lot)
        .bind(&rate.category)
        .bind(&rate.cost_name)
        .bind(quantity)
        .bind(&rate.unit)
        .bind(rate.rate_value)
        .bind(amount)
        .bind(amount)
        .bind(transaction.transaction_date)
        .bind(billing_week)
        .bind(period.start)
        .bind(period.end)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(item)
    }
}

/// Queue handler wiring a ledger write to its downstream recomputation:
/// handling charges for the transaction itself, then the storage snapshots
/// its date may have invalidated.
pub struct TransactionCostHandler {
    costs: CostCalculationService,
    storage: StorageCostService,
}

impl TransactionCostHandler {
    pub fn new(costs: CostCalculationService, storage: StorageCostService) -> Self {
        Self { costs, storage }
    }
}

#[async_trait]
impl CostJobHandler for TransactionCostHandler {
    async fn handle(&self, job: &CostJob) -> AppResult<CostJobOutcome> {
        let result = self
            .costs
            .recalculate_transaction_costs(job.transaction_id, &job.user_id)
            .await?;

        let key = BalanceKey {
            warehouse_id: job.warehouse_id,
            sku_id: job.sku_id,
            batch_lot: job.batch_lot.clone(),
        };
        self.storage
            .recompute_batch_weeks(&key, job.transaction_date, &job.user_id)
            .await?;

        Ok(CostJobOutcome {
            items: result.items.len(),
            total_amount: result.total_amount,
        })
    }
}
