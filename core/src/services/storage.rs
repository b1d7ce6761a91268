//! Weekly storage snapshot computation
//!
//! Every Monday each (warehouse, SKU, batch) unit holding stock gets a
//! storage ledger entry priced at that Monday's storage rate, plus a matching
//! calculated-cost row feeding reconciliation. Entries are keyed by a natural
//! code so recomputation is idempotent: rerunning a week replaces its rows,
//! and a unit whose balance falls to zero loses the week's entry entirely.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::billing::{
    billing_period_for, monday_on_or_after, monday_on_or_before, pallets_for_cartons, round_money,
    snapshot_mondays, BillingPeriod,
};
use shared::models::{BalanceKey, CppResolution, PalletPurpose};
use shared::CostCategory;

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::services::rates::{CostRate, RateService};

/// Natural key of a storage ledger entry
pub fn ledger_entry_code(
    week_ending: NaiveDate,
    warehouse_code: &str,
    sku_code: &str,
    batch_lot: &str,
) -> String {
    format!("SL-{week_ending}-{warehouse_code}-{sku_code}-{batch_lot}")
}

/// Natural key of the calculated-cost row mirroring a storage ledger entry
pub fn storage_cost_code(
    week_ending: NaiveDate,
    warehouse_code: &str,
    sku_code: &str,
    batch_lot: &str,
) -> String {
    format!("CC-STORAGE-{week_ending}-{warehouse_code}-{sku_code}-{batch_lot}")
}

#[derive(Clone)]
pub struct StorageCostService {
    db: PgPool,
    rates: RateService,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

/// Totals for one weekly run
#[derive(Debug, Clone, Serialize)]
pub struct StorageRunResult {
    pub week_ending: NaiveDate,
    pub entries_written: usize,
    pub units_empty: usize,
    pub total_pallets: i64,
    pub total_cost: Decimal,
    pub warehouse_totals: Vec<WarehouseTotals>,
    pub errors: Vec<StorageRunError>,
}

/// Per-warehouse rollup of one weekly run
#[derive(Debug, Clone, Serialize)]
pub struct WarehouseTotals {
    pub warehouse_id: Uuid,
    pub warehouse_code: String,
    pub pallets: i64,
    pub cost: Decimal,
}

impl StorageRunResult {
    fn new(week_ending: NaiveDate) -> Self {
        Self {
            week_ending,
            entries_written: 0,
            units_empty: 0,
            total_pallets: 0,
            total_cost: Decimal::ZERO,
            warehouse_totals: Vec::new(),
            errors: Vec::new(),
        }
    }

    // Units arrive ordered by warehouse code, so the last rollup is always
    // the one being extended.
    fn add_entry(&mut self, unit: &SnapshotUnit, priced: &PricedSnapshot) {
        self.entries_written += 1;
        self.total_pallets += i64::from(priced.pallets);
        self.total_cost += priced.weekly_cost;
        match self.warehouse_totals.last_mut() {
            Some(totals) if totals.warehouse_id == unit.warehouse_id => {
                totals.pallets += i64::from(priced.pallets);
                totals.cost += priced.weekly_cost;
            }
            _ => self.warehouse_totals.push(WarehouseTotals {
                warehouse_id: unit.warehouse_id,
                warehouse_code: unit.warehouse_code.clone(),
                pallets: i64::from(priced.pallets),
                cost: priced.weekly_cost,
            }),
        }
    }
}

/// A unit the weekly run could not price; the run continues past it
#[derive(Debug, Clone, Serialize)]
pub struct StorageRunError {
    pub warehouse_id: Uuid,
    pub sku_id: Uuid,
    pub batch_lot: String,
    pub message: String,
}

/// One stock-holding unit as of a snapshot Monday
#[derive(Debug, FromRow)]
struct SnapshotUnit {
    warehouse_id: Uuid,
    sku_id: Uuid,
    batch_lot: String,
    warehouse_code: String,
    sku_code: String,
    net_cartons: i64,
}

struct PricedSnapshot {
    cpp: CppResolution,
    pallets: i32,
    rate: CostRate,
    weekly_cost: Decimal,
}

impl StorageCostService {
    pub fn new(
        db: PgPool,
        rates: RateService,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            rates,
            audit,
            clock,
        }
    }

    /// Snapshot every stock-holding unit for one Monday, optionally confined
    /// to a single warehouse.
    ///
    /// Units without a resolvable storage rate are reported in the result
    /// and left uncharged; the run never aborts on a pricing gap.
    pub async fn compute_weekly_storage_costs(
        &self,
        week_ending: NaiveDate,
        warehouse: Option<Uuid>,
        user_id: &str,
    ) -> AppResult<StorageRunResult> {
        if week_ending.weekday() != Weekday::Mon {
            return Err(AppError::validation(
                "week_ending",
                "storage snapshots are taken on Mondays",
            ));
        }
        if week_ending > self.clock.today() {
            return Err(AppError::validation(
                "week_ending",
                "cannot snapshot a future week",
            ));
        }

        let period = billing_period_for(week_ending);
        let current_monday = monday_on_or_before(self.clock.today());

        let units = sqlx::query_as::<_, SnapshotUnit>(
            r#"
            SELECT t.warehouse_id, t.sku_id, t.batch_lot,
                   w.code AS warehouse_code, s.code AS sku_code,
                   (COALESCE(SUM(t.cartons_in), 0) - COALESCE(SUM(t.cartons_out), 0)) AS net_cartons
            FROM stock_transactions t
            JOIN warehouses w ON w.id = t.warehouse_id
            JOIN skus s ON s.id = t.sku_id
            WHERE t.transaction_date <= $1
              AND ($2::uuid IS NULL OR t.warehouse_id = $2)
            GROUP BY t.warehouse_id, t.sku_id, t.batch_lot, w.code, s.code
            ORDER BY w.code, s.code, t.batch_lot
            "#,
        )
        .bind(week_ending)
        .bind(warehouse)
        .fetch_all(&self.db)
        .await?;

        let mut result = StorageRunResult::new(week_ending);

        for unit in units {
            if unit.net_cartons <= 0 {
                self.delete_snapshot(&unit, week_ending).await?;
                result.units_empty += 1;
                continue;
            }

            let priced = match self.price_unit(&unit, week_ending).await {
                Ok(priced) => priced,
                Err(err) if err.is_rate_configuration() => {
                    result.errors.push(StorageRunError {
                        warehouse_id: unit.warehouse_id,
                        sku_id: unit.sku_id,
                        batch_lot: unit.batch_lot.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };

            if week_ending == current_monday {
                self.cross_check_live_balance(&unit).await?;
            }

            self.write_snapshot(&unit, week_ending, period, &priced, user_id)
                .await?;

            result.add_entry(&unit, &priced);
        }

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::StorageComputed,
                    "StorageLedger",
                    week_ending.to_string(),
                    user_id,
                )
                .with_detail(json!({
                    "entries_written": result.entries_written,
                    "units_empty": result.units_empty,
                    "total_pallets": result.total_pallets,
                    "total_cost": result.total_cost,
                    "warehouse_totals": result.warehouse_totals,
                    "warehouse_filter": warehouse,
                    "errors": result.errors.len(),
                })),
            )
            .await;

        Ok(result)
    }

    /// Recompute the snapshots of one unit from `from_date` through the most
    /// recent Monday. Backdated writes and amendments land here via the cost
    /// trigger; weeks whose balance drops to zero lose their entries.
    pub async fn recompute_batch_weeks(
        &self,
        key: &BalanceKey,
        from_date: NaiveDate,
        user_id: &str,
    ) -> AppResult<usize> {
        let warehouse_code =
            sqlx::query_scalar::<_, String>("SELECT code FROM warehouses WHERE id = $1")
                .bind(key.warehouse_id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| AppError::NotFound("Warehouse".to_string()))?;
        let sku_code = sqlx::query_scalar::<_, String>("SELECT code FROM skus WHERE id = $1")
            .bind(key.sku_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("SKU".to_string()))?;

        let last_monday = monday_on_or_before(self.clock.today());
        let mut monday = monday_on_or_after(from_date);
        let mut weeks = 0;

        while monday <= last_monday {
            let net = self.net_cartons_as_of(key, monday).await?;
            let unit = SnapshotUnit {
                warehouse_id: key.warehouse_id,
                sku_id: key.sku_id,
                batch_lot: key.batch_lot.clone(),
                warehouse_code: warehouse_code.clone(),
                sku_code: sku_code.clone(),
                net_cartons: net,
            };

            if net <= 0 {
                self.delete_snapshot(&unit, monday).await?;
            } else {
                let priced = self.price_unit(&unit, monday).await?;
                let period = billing_period_for(monday);
                self.write_snapshot(&unit, monday, period, &priced, user_id)
                    .await?;
            }

            weeks += 1;
            monday += Duration::days(7);
        }

        Ok(weeks)
    }

    /// Run any Mondays missing from the ledger, then refresh the trailing
    /// weeks. The worker calls this on an interval so a stopped scheduler
    /// never leaves silent gaps.
    pub async fn catch_up(
        &self,
        trailing_weeks: u32,
        user_id: &str,
    ) -> AppResult<Vec<StorageRunResult>> {
        let first_activity = sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MIN(transaction_date) FROM stock_transactions",
        )
        .fetch_one(&self.db)
        .await?;

        let Some(first_activity) = first_activity else {
            return Ok(Vec::new());
        };

        let today = self.clock.today();
        let existing = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT week_ending FROM storage_ledger",
        )
        .fetch_all(&self.db)
        .await?;

        let trailing_cutoff =
            monday_on_or_before(today) - Duration::days(7 * i64::from(trailing_weeks.max(1)) - 7);

        let mut results = Vec::new();
        for monday in snapshot_mondays(first_activity, today) {
            let missing = !existing.contains(&monday);
            let trailing = monday >= trailing_cutoff;
            if missing || trailing {
                results.push(
                    self.compute_weekly_storage_costs(monday, None, user_id)
                        .await?,
                );
            }
        }
        Ok(results)
    }

    /// Signed carton total for one unit over all movements dated on or
    /// before the snapshot Monday
    async fn net_cartons_as_of(&self, key: &BalanceKey, as_of: NaiveDate) -> AppResult<i64> {
        let net = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT (COALESCE(SUM(cartons_in), 0) - COALESCE(SUM(cartons_out), 0))
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
        Ok(net)
    }

    async fn price_unit(
        &self,
        unit: &SnapshotUnit,
        week_ending: NaiveDate,
    ) -> AppResult<PricedSnapshot> {
        let balance_cpp = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT storage_cartons_per_pallet
            FROM stock_balances
            WHERE warehouse_id = $1 AND sku_id = $2 AND batch_lot = $3
            "#,
        )
        .bind(unit.warehouse_id)
        .bind(unit.sku_id)
        .bind(&unit.batch_lot)
        .fetch_optional(&self.db)
        .await?
        .flatten();

        // Snapshots never see a per-transaction override; those only apply
        // to the movement that carried them.
        let cpp = self
            .rates
            .resolve_cartons_per_pallet(
                unit.warehouse_id,
                unit.sku_id,
                None,
                balance_cpp,
                PalletPurpose::Storage,
                week_ending,
            )
            .await?;

        let pallets = pallets_for_cartons(unit.net_cartons as i32, cpp.cartons_per_pallet);

        let rate = self
            .rates
            .resolve(unit.warehouse_id, CostCategory::Storage, week_ending)
            .await?;

        let weekly_cost = round_money(Decimal::from(pallets) * rate.rate_value);

        Ok(PricedSnapshot {
            cpp,
            pallets,
            rate,
            weekly_cost,
        })
    }

    /// The latest snapshot should agree with the live balance; a divergence
    /// means a write bypassed the ledger and deserves a loud warning.
    async fn cross_check_live_balance(&self, unit: &SnapshotUnit) -> AppResult<()> {
        let live = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT current_cartons
            FROM stock_balances
            WHERE warehouse_id = $1 AND sku_id = $2 AND batch_lot = $3
            "#,
        )
        .bind(unit.warehouse_id)
        .bind(unit.sku_id)
        .bind(&unit.batch_lot)
        .fetch_optional(&self.db)
        .await?;

        if let Some(live) = live {
            if i64::from(live) != unit.net_cartons {
                tracing::warn!(
                    warehouse = %unit.warehouse_code,
                    sku = %unit.sku_code,
                    batch_lot = %unit.batch_lot,
                    snapshot_cartons = unit.net_cartons,
                    live_cartons = live,
                    "weekly snapshot diverges from live balance"
                );
            }
        }
        Ok(())
    }

    async fn write_snapshot(
        &self,
        unit: &SnapshotUnit,
        week_ending: NaiveDate,
        period: BillingPeriod,
        priced: &PricedSnapshot,
        user_id: &str,
    ) -> AppResult<()> {
        let entry_code = ledger_entry_code(
            week_ending,
            &unit.warehouse_code,
            &unit.sku_code,
            &unit.batch_lot,
        );
        let cost_code = storage_cost_code(
            week_ending,
            &unit.warehouse_code,
            &unit.sku_code,
            &unit.batch_lot,
        );

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO storage_ledger (
                entry_code, warehouse_id, sku_id, batch_lot, week_ending,
                billing_period_start, billing_period_end, cartons, pallets,
                cartons_per_pallet, pallet_config_source, applicable_rate,
                weekly_cost, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (entry_code) DO UPDATE SET
                billing_period_start = EXCLUDED.billing_period_start,
                billing_period_end = EXCLUDED.billing_period_end,
                cartons = EXCLUDED.cartons,
                pallets = EXCLUDED.pallets,
                cartons_per_pallet = EXCLUDED.cartons_per_pallet,
                pallet_config_source = EXCLUDED.pallet_config_source,
                applicable_rate = EXCLUDED.applicable_rate,
                weekly_cost = EXCLUDED.weekly_cost,
                updated_at = NOW()
            "#,
        )
        .bind(&entry_code)
        .bind(unit.warehouse_id)
        .bind(unit.sku_id)
        .bind(&unit.batch_lot)
        .bind(week_ending)
        .bind(period.start)
        .bind(period.end)
        .bind(unit.net_cartons as i32)
        .bind(priced.pallets)
        .bind(priced.cpp.cartons_per_pallet)
        .bind(priced.cpp.source.as_str())
        .bind(priced.rate.rate_value)
        .bind(priced.weekly_cost)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO calculated_costs (
                cost_code, transaction_id, source_reference, rate_id, warehouse_id,
                sku_id, batch_lot, category, cost_name, source_type, quantity, unit,
                applicable_rate, calculated_cost, final_expected_cost,
                transaction_date, billing_week, billing_period_start,
                billing_period_end, created_by
            )
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7, $8, 'STORAGE', $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (cost_code) DO UPDATE SET
                rate_id = EXCLUDED.rate_id,
                cost_name = EXCLUDED.cost_name,
                quantity = EXCLUDED.quantity,
                applicable_rate = EXCLUDED.applicable_rate,
                calculated_cost = EXCLUDED.calculated_cost,
                final_expected_cost = EXCLUDED.final_expected_cost,
                billing_period_start = EXCLUDED.billing_period_start,
                billing_period_end = EXCLUDED.billing_period_end,
                updated_at = NOW()
            "#,
        )
        .bind(&cost_code)
        .bind(&entry_code)
        .bind(priced.rate.id)
        .bind(unit.warehouse_id)
        .bind(unit.sku_id)
        .bind(&unit.batch_lot)
        .bind(CostCategory::Storage.as_str())
        .bind(&priced.rate.cost_name)
        .bind(priced.pallets)
        .bind(&priced.rate.unit)
        .bind(priced.rate.rate_value)
        .bind(priced.weekly_cost)
        .bind(priced.weekly_cost)
        .bind(week_ending)
        .bind(week_ending)
        .bind(period.start)
        .bind(period.end)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_snapshot(&self, unit: &SnapshotUnit, week_ending: NaiveDate) -> AppResult<()> {
        let entry_code = ledger_entry_code(
            week_ending,
            &unit.warehouse_code,
            &unit.sku_code,
            &unit.batch_lot,
        );
        let cost_code = storage_cost_code(
            week_ending,
            &unit.warehouse_code,
            &unit.sku_code,
            &unit.batch_lot,
        );

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM storage_ledger WHERE entry_code = $1")
            .bind(&entry_code)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM calculated_costs WHERE cost_code = $1")
            .bind(&cost_code)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
