//! Inventory transaction service
//!
//! Appends movements to the stock ledger and maintains the derived balance
//! per (warehouse, SKU, batch). Writes for the same key are serialized with a
//! per-key advisory transaction lock plus a row lock on the balance, so the
//! non-negative invariant is checked against a stable view. Backdated writes
//! and amendments replay the full per-key history before anything is written.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    check_running_balance, resolve_cartons_per_pallet, BalanceKey, LedgerDelta,
    OverdraftViolation, PalletPurpose, TransactionPayload,
};
use shared::validation;
use shared::TransactionType;

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::services::trigger::{CostJob, CostTriggerQueue};

/// Inventory service owning the transaction write path
#[derive(Clone)]
pub struct InventoryService {
    db: PgPool,
    queue: CostTriggerQueue,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

/// Stock transaction record
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockTransaction {
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub transaction_type: String,
    pub cartons_in: i32,
    pub cartons_out: i32,
    pub storage_pallets_in: i32,
    pub shipping_pallets_out: i32,
    pub storage_cartons_per_pallet: Option<i32>,
    pub shipping_cartons_per_pallet: Option<i32>,
    pub transaction_date: NaiveDate,
    pub reference_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub amended_at: Option<DateTime<Utc>>,
    pub amended_by: Option<String>,
}

/// Derived balance for one (warehouse, SKU, batch) key
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockBalance {
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub current_cartons: i32,
    pub current_pallets: i32,
    pub current_units: i32,
    pub storage_cartons_per_pallet: Option<i32>,
    pub shipping_cartons_per_pallet: Option<i32>,
    pub last_transaction_date: Option<NaiveDate>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

/// Result of a single transaction write
#[derive(Debug, Clone, Serialize)]
pub struct CreatedTransaction {
    pub transaction: StockTransaction,
    pub balance: StockBalance,
}

/// Per-item error from a batch write
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch write; one bad payload never aborts the rest
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub errors: Vec<BatchError>,
}

/// In-place quantity correction for one transaction
#[derive(Debug, Clone, Deserialize)]
pub struct AmendTransactionInput {
    pub cartons_in: Option<i32>,
    pub cartons_out: Option<i32>,
}

/// Ledger fold at a past date
#[derive(Debug, Clone, Serialize)]
pub struct PointInTimeBalance {
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub as_of: NaiveDate,
    pub cartons: i64,
}

/// Row for history replay
#[derive(Debug, FromRow)]
struct HistoryRow {
    id: Uuid,
    transaction_type: String,
    cartons_in: i32,
    cartons_out: i32,
    reference_id: Option<String>,
    transaction_date: NaiveDate,
    created_at: DateTime<Utc>,
}

/// One historic movement, ready for replay
struct HistoryEntry {
    id: Uuid,
    transaction_date: NaiveDate,
    created_at: DateTime<Utc>,
    delta: LedgerDelta,
}

/// Row for point-in-time totals
#[derive(Debug, FromRow)]
struct TotalsRow {
    total_in: i64,
    total_out: i64,
}

/// Stable 64-bit key for `pg_advisory_xact_lock`, one per balance key
fn advisory_lock_key(key: &BalanceKey) -> i64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as i64
}

fn overdraft_error(violation: OverdraftViolation) -> AppError {
    AppError::InsufficientInventory {
        shortfall: violation.shortfall,
        blocking_reference: violation.reference,
    }
}

fn parse_transaction_type(raw: &str) -> AppResult<TransactionType> {
    raw.parse().map_err(|_| {
        AppError::Internal(anyhow::anyhow!("unknown transaction type in ledger: {raw}"))
    })
}

impl InventoryService {
    pub fn new(
        db: PgPool,
        queue: CostTriggerQueue,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            queue,
            audit,
            clock,
        }
    }

    /// Append one movement to the ledger and update the balance atomically.
    ///
    /// After commit the cost trigger queue is notified; enqueueing never
    /// fails the write.
    pub async fn create_transaction(
        &self,
        payload: TransactionPayload,
        user_id: &str,
    ) -> AppResult<CreatedTransaction> {
        self.validate_payload(&payload)?;

        let key = BalanceKey {
            warehouse_id: payload.warehouse_id,
            sku_id: payload.sku_id,
            batch_lot: payload.batch_lot.trim().to_string(),
        };

        let warehouse_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM warehouses WHERE id = $1 AND is_active = true)",
        )
        .bind(key.warehouse_id)
        .fetch_one(&self.db)
        .await?;
        if !warehouse_exists {
            return Err(AppError::NotFound("Warehouse".to_string()));
        }

        let units_per_carton = sqlx::query_scalar::<_, i32>(
            "SELECT units_per_carton FROM skus WHERE id = $1 AND is_active = true",
        )
        .bind(key.sku_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("SKU".to_string()))?;

        let mut tx = self.db.begin().await?;

        // Serialize same-key writers; different keys proceed in parallel.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(&key))
            .execute(&mut *tx)
            .await?;

        let balance = sqlx::query_as::<_, StockBalance>(
            r#"
            SELECT id, warehouse_id, sku_id, batch_lot, current_cartons, current_pallets,
                   current_units, storage_cartons_per_pallet, shipping_cartons_per_pallet,
                   last_transaction_date, version, updated_at
            FROM stock_balances
            WHERE warehouse_id = $1 AND sku_id = $2 AND batch_lot = $3
            FOR UPDATE
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.sku_id)
        .bind(&key.batch_lot)
        .fetch_optional(&mut *tx)
        .await?;

        let current_cartons = balance.as_ref().map_or(0, |b| i64::from(b.current_cartons));
        let signed = payload.movement.signed_delta();
        let new_cartons = current_cartons + signed;

        let backdated = balance
            .as_ref()
            .and_then(|b| b.last_transaction_date)
            .map_or(false, |last| payload.transaction_date < last);

        if backdated {
            // A backdated movement can overdraw a later prefix even when the
            // final total stays positive; replay the whole history.
            let history = self.load_history(&mut tx, &key).await?;
            let mut timeline: Vec<(NaiveDate, DateTime<Utc>, LedgerDelta)> = history
                .into_iter()
                .map(|entry| (entry.transaction_date, entry.created_at, entry.delta))
                .collect();
            timeline.push((
                payload.transaction_date,
                self.clock.now(),
                LedgerDelta {
                    transaction_type: payload.transaction_type(),
                    cartons_in: payload.movement.cartons_in(),
                    cartons_out: payload.movement.cartons_out(),
                    reference: payload.reference_id.clone(),
                },
            ));
            timeline.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            let deltas: Vec<LedgerDelta> = timeline.into_iter().map(|(_, _, d)| d).collect();
            check_running_balance(0, &deltas).map_err(overdraft_error)?;
        } else if new_cartons < 0 {
            return Err(AppError::InsufficientInventory {
                shortfall: -new_cartons,
                blocking_reference: None,
            });
        }

        let transaction = sqlx::query_as::<_, StockTransaction>(
            r#"
            INSERT INTO stock_transactions (
                warehouse_id, sku_id, batch_lot, transaction_type, cartons_in, cartons_out,
                storage_pallets_in, shipping_pallets_out, storage_cartons_per_pallet,
                shipping_cartons_per_pallet, transaction_date, reference_id, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, warehouse_id, sku_id, batch_lot, transaction_type, cartons_in,
                      cartons_out, storage_pallets_in, shipping_pallets_out,
                      storage_cartons_per_pallet, shipping_cartons_per_pallet,
                      transaction_date, reference_id, created_by, created_at,
                      amended_at, amended_by
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.sku_id)
        .bind(&key.batch_lot)
        .bind(payload.transaction_type().as_str())
        .bind(payload.movement.cartons_in())
        .bind(payload.movement.cartons_out())
        .bind(payload.movement.storage_pallets_in())
        .bind(payload.movement.shipping_pallets_out())
        .bind(payload.movement.storage_cpp_override())
        .bind(payload.movement.shipping_cpp_override())
        .bind(payload.transaction_date)
        .bind(&payload.reference_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let stored_storage_cpp = balance.as_ref().and_then(|b| b.storage_cartons_per_pallet);
        let resolved = resolve_cartons_per_pallet(
            payload.movement.storage_cpp_override(),
            stored_storage_cpp,
            &[],
            PalletPurpose::Storage,
            payload.transaction_date,
        );
        let new_pallets =
            shared::billing::pallets_for_cartons(new_cartons as i32, resolved.cartons_per_pallet);
        let new_units = new_cartons as i32 * units_per_carton;

        let balance = sqlx::query_as::<_, StockBalance>(
            r#"
            INSERT INTO stock_balances (
                warehouse_id, sku_id, batch_lot, current_cartons, current_pallets,
                current_units, storage_cartons_per_pallet, shipping_cartons_per_pallet,
                last_transaction_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (warehouse_id, sku_id, batch_lot) DO UPDATE SET
                current_cartons = EXCLUDED.current_cartons,
                current_pallets = EXCLUDED.current_pallets,
                current_units = EXCLUDED.current_units,
                storage_cartons_per_pallet =
                    COALESCE(EXCLUDED.storage_cartons_per_pallet, stock_balances.storage_cartons_per_pallet),
                shipping_cartons_per_pallet =
                    COALESCE(EXCLUDED.shipping_cartons_per_pallet, stock_balances.shipping_cartons_per_pallet),
                last_transaction_date =
                    GREATEST(EXCLUDED.last_transaction_date, stock_balances.last_transaction_date),
                version = stock_balances.version + 1,
                updated_at = NOW()
            RETURNING id, warehouse_id, sku_id, batch_lot, current_cartons, current_pallets,
                      current_units, storage_cartons_per_pallet, shipping_cartons_per_pallet,
                      last_transaction_date, version, updated_at
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.sku_id)
        .bind(&key.batch_lot)
        .bind(new_cartons as i32)
        .bind(new_pallets)
        .bind(new_units)
        .bind(payload.movement.storage_cpp_override())
        .bind(payload.movement.shipping_cpp_override())
        .bind(payload.transaction_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        self.queue
            .enqueue(CostJob {
                transaction_id: transaction.id,
                warehouse_id: key.warehouse_id,
                sku_id: key.sku_id,
                batch_lot: key.batch_lot.clone(),
                transaction_date: payload.transaction_date,
                user_id: user_id.to_string(),
            })
            .await;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::TransactionCreated,
                    "StockTransaction",
                    transaction.id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "transaction_type": transaction.transaction_type,
                    "cartons_in": transaction.cartons_in,
                    "cartons_out": transaction.cartons_out,
                    "balance_cartons": balance.current_cartons,
                    "balance_version": balance.version,
                })),
            )
            .await;

        Ok(CreatedTransaction {
            transaction,
            balance,
        })
    }

    /// Write a batch of movements with per-item isolation
    pub async fn create_transactions(
        &self,
        payloads: Vec<TransactionPayload>,
        user_id: &str,
    ) -> BatchResult {
        let mut processed = 0;
        let mut errors = Vec::new();
        for (index, payload) in payloads.into_iter().enumerate() {
            match self.create_transaction(payload, user_id).await {
                Ok(_) => processed += 1,
                Err(err) => errors.push(BatchError {
                    index,
                    message: err.to_string(),
                }),
            }
        }
        BatchResult { processed, errors }
    }

    /// Correct the quantities of an existing transaction in place.
    ///
    /// The full per-key history is replayed with the amended values; the
    /// correction is rejected if any later prefix would be overdrawn. The
    /// violation names the blocking transaction, which is the floor on how
    /// far a receipt can be reduced.
    pub async fn amend_transaction(
        &self,
        transaction_id: Uuid,
        input: AmendTransactionInput,
        user_id: &str,
    ) -> AppResult<CreatedTransaction> {
        if let Some(cartons) = input.cartons_in {
            validation::validate_cartons(cartons)
                .map_err(|msg| AppError::validation("cartons_in", msg))?;
        }
        if let Some(cartons) = input.cartons_out {
            validation::validate_cartons(cartons)
                .map_err(|msg| AppError::validation("cartons_out", msg))?;
        }

        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, StockTransaction>(
            r#"
            SELECT id, warehouse_id, sku_id, batch_lot, transaction_type, cartons_in,
                   cartons_out, storage_pallets_in, shipping_pallets_out,
                   storage_cartons_per_pallet, shipping_cartons_per_pallet,
                   transaction_date, reference_id, created_by, created_at,
                   amended_at, amended_by
            FROM stock_transactions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?;

        let key = BalanceKey {
            warehouse_id: existing.warehouse_id,
            sku_id: existing.sku_id,
            batch_lot: existing.batch_lot.clone(),
        };

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(&key))
            .execute(&mut *tx)
            .await?;

        let new_in = input.cartons_in.unwrap_or(existing.cartons_in);
        let new_out = input.cartons_out.unwrap_or(existing.cartons_out);

        let history = self.load_history(&mut tx, &key).await?;
        let deltas: Vec<LedgerDelta> = history
            .into_iter()
            .map(|entry| {
                let mut delta = entry.delta;
                if entry.id == transaction_id {
                    delta.cartons_in = new_in;
                    delta.cartons_out = new_out;
                }
                delta
            })
            .collect();
        let final_cartons = check_running_balance(0, &deltas).map_err(overdraft_error)?;

        let amended = sqlx::query_as::<_, StockTransaction>(
            r#"
            UPDATE stock_transactions
            SET cartons_in = $2, cartons_out = $3, amended_at = NOW(), amended_by = $4
            WHERE id = $1
            RETURNING id, warehouse_id, sku_id, batch_lot, transaction_type, cartons_in,
                      cartons_out, storage_pallets_in, shipping_pallets_out,
                      storage_cartons_per_pallet, shipping_cartons_per_pallet,
                      transaction_date, reference_id, created_by, created_at,
                      amended_at, amended_by
            "#,
        )
        .bind(transaction_id)
        .bind(new_in)
        .bind(new_out)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let units_per_carton =
            sqlx::query_scalar::<_, i32>("SELECT units_per_carton FROM skus WHERE id = $1")
                .bind(key.sku_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound("SKU".to_string()))?;

        let balance = sqlx::query_as::<_, StockBalance>(
            r#"
            UPDATE stock_balances
            SET current_cartons = $4,
                current_pallets = CEIL($4::numeric / GREATEST(COALESCE(storage_cartons_per_pallet, 1), 1))::int,
                current_units = $4 * $5,
                version = version + 1,
                updated_at = NOW()
            WHERE warehouse_id = $1 AND sku_id = $2 AND batch_lot = $3
            RETURNING id, warehouse_id, sku_id, batch_lot, current_cartons, current_pallets,
                      current_units, storage_cartons_per_pallet, shipping_cartons_per_pallet,
                      last_transaction_date, version, updated_at
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.sku_id)
        .bind(&key.batch_lot)
        .bind(final_cartons as i32)
        .bind(units_per_carton)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Balance".to_string()))?;

        tx.commit().await?;

        self.queue
            .enqueue(CostJob {
                transaction_id,
                warehouse_id: key.warehouse_id,
                sku_id: key.sku_id,
                batch_lot: key.batch_lot.clone(),
                transaction_date: amended.transaction_date,
                user_id: user_id.to_string(),
            })
            .await;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::TransactionAmended,
                    "StockTransaction",
                    transaction_id.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "before": { "cartons_in": existing.cartons_in, "cartons_out": existing.cartons_out },
                    "after": { "cartons_in": amended.cartons_in, "cartons_out": amended.cartons_out },
                    "balance_cartons": balance.current_cartons,
                })),
            )
            .await;

        Ok(CreatedTransaction {
            transaction: amended,
            balance,
        })
    }

    /// Fold of all movements for a key dated on or before `as_of`
    pub async fn point_in_time_balance(
        &self,
        key: &BalanceKey,
        as_of: NaiveDate,
    ) -> AppResult<PointInTimeBalance> {
        let totals = sqlx::query_as::<_, TotalsRow>(
            r#"
            SELECT COALESCE(SUM(cartons_in), 0) AS total_in,
                   COALESCE(SUM(cartons_out), 0) AS total_out
            FROM stock_transactions
            WHERE warehouse_id = $1 AND sku_id = $2 AND batch_lot = $3
              AND transaction_date <= $4
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.sku_id)
        .bind(&key.batch_lot)
        .bind(as_of)
        .fetch_one(&self.db)
        .await?;

        Ok(PointInTimeBalance {
            warehouse_id: key.warehouse_id,
            sku_id: key.sku_id,
            batch_lot: key.batch_lot.clone(),
            as_of,
            cartons: totals.total_in - totals.total_out,
        })
    }

    fn validate_payload(&self, payload: &TransactionPayload) -> AppResult<()> {
        validation::validate_batch_lot(&payload.batch_lot)
            .map_err(|msg| AppError::validation("batch_lot", msg))?;
        validation::validate_transaction_date(payload.transaction_date, self.clock.today())
            .map_err(|msg| AppError::validation("transaction_date", msg))?;
        validation::validate_movement(&payload.movement)
            .map_err(|msg| AppError::validation("movement", msg))?;
        Ok(())
    }

    /// Per-key history in replay order
    async fn load_history(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        key: &BalanceKey,
    ) -> AppResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, transaction_type, cartons_in, cartons_out, reference_id,
                   transaction_date, created_at
            FROM stock_transactions
            WHERE warehouse_id = $1 AND sku_id = $2 AND batch_lot = $3
            ORDER BY transaction_date, created_at
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.sku_id)
        .bind(&key.batch_lot)
        .fetch_all(&mut **tx)
        .await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let transaction_type = parse_transaction_type(&row.transaction_type)?;
            let reference = row.reference_id.clone().or_else(|| Some(row.id.to_string()));
            history.push(HistoryEntry {
                id: row.id,
                transaction_date: row.transaction_date,
                created_at: row.created_at,
                delta: LedgerDelta {
                    transaction_type,
                    cartons_in: row.cartons_in,
                    cartons_out: row.cartons_out,
                    reference,
                },
            });
        }
        Ok(history)
    }
}
