//! Cost rate management and resolution
//!
//! Rates are versioned by effective window per (warehouse, category, name);
//! overlap inside that tuple is rejected at creation so resolution stays
//! deterministic. Once written, a rate's value is immutable. Price changes
//! are an end-date on the old window plus a new row.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    resolve_cartons_per_pallet, select_rate_index, windows_overlap, ConfigWindow, CppResolution,
    PalletPurpose, RateSelectionError, RateWindow,
};
use shared::validation;
use shared::CostCategory;

use crate::audit::{AuditAction, AuditEntry, AuditSink};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RateService {
    db: PgPool,
    audit: Arc<dyn AuditSink>,
}

/// One versioned rate row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CostRate {
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub category: String,
    pub cost_name: String,
    pub rate_value: Decimal,
    pub unit: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl CostRate {
    fn window(&self) -> RateWindow {
        RateWindow {
            effective_from: self.effective_from,
            effective_to: self.effective_to,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRateInput {
    pub warehouse_id: Uuid,
    pub category: CostCategory,
    pub cost_name: String,
    pub rate_value: Decimal,
    /// Charge basis, e.g. "pallet/week" or "carton"
    pub unit: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

/// Window row from warehouse_sku_configs
#[derive(Debug, FromRow)]
struct ConfigRow {
    storage_cartons_per_pallet: i32,
    shipping_cartons_per_pallet: i32,
    effective_from: NaiveDate,
    end_date: Option<NaiveDate>,
}

impl RateService {
    pub fn new(db: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, audit }
    }

    /// Create a new rate window, rejecting any overlap with existing windows
    /// for the same (warehouse, category, name) tuple.
    pub async fn create_rate(&self, input: CreateRateInput, user_id: &str) -> AppResult<CostRate> {
        validation::validate_rate_name(&input.cost_name)
            .map_err(|msg| AppError::validation("cost_name", msg))?;
        validation::validate_rate_value(input.rate_value)
            .map_err(|msg| AppError::validation("rate_value", msg))?;
        validation::validate_rate_window(input.effective_from, input.effective_to)
            .map_err(|msg| AppError::validation("effective_to", msg))?;

        let new_window = RateWindow {
            effective_from: input.effective_from,
            effective_to: input.effective_to,
        };

        let existing = sqlx::query_as::<_, CostRate>(
            r#"
            SELECT id, warehouse_id, category, cost_name, rate_value, unit,
                   effective_from, effective_to, created_by, created_at
            FROM cost_rates
            WHERE warehouse_id = $1 AND category = $2 AND cost_name = $3
            "#,
        )
        .bind(input.warehouse_id)
        .bind(input.category.as_str())
        .bind(input.cost_name.trim())
        .fetch_all(&self.db)
        .await?;

        if let Some(conflict) = existing
            .iter()
            .find(|rate| windows_overlap(&rate.window(), &new_window))
        {
            return Err(AppError::InvalidState(format!(
                "rate window overlaps existing {}/{} rate effective {}",
                conflict.category, conflict.cost_name, conflict.effective_from,
            )));
        }

        let rate = sqlx::query_as::<_, CostRate>(
            r#"
            INSERT INTO cost_rates (
                warehouse_id, category, cost_name, rate_value, unit,
                effective_from, effective_to, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, warehouse_id, category, cost_name, rate_value, unit,
                      effective_from, effective_to, created_by, created_at
            "#,
        )
        .bind(input.warehouse_id)
        .bind(input.category.as_str())
        .bind(input.cost_name.trim())
        .bind(input.rate_value)
        .bind(input.unit.trim())
        .bind(input.effective_from)
        .bind(input.effective_to)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::RateCreated, "CostRate", rate.id.to_string(), user_id)
                    .with_detail(json!({
                        "category": rate.category,
                        "cost_name": rate.cost_name,
                        "rate_value": rate.rate_value,
                        "effective_from": rate.effective_from,
                    })),
            )
            .await;

        Ok(rate)
    }

    /// Close a rate window. The value itself never changes; this is the only
    /// mutation a rate supports.
    pub async fn end_rate(
        &self,
        rate_id: Uuid,
        effective_to: NaiveDate,
        user_id: &str,
    ) -> AppResult<CostRate> {
        let rate = sqlx::query_as::<_, CostRate>(
            r#"
            SELECT id, warehouse_id, category, cost_name, rate_value, unit,
                   effective_from, effective_to, created_by, created_at
            FROM cost_rates
            WHERE id = $1
            "#,
        )
        .bind(rate_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Rate".to_string()))?;

        if rate.effective_to.is_some() {
            return Err(AppError::InvalidState(
                "rate is already end-dated".to_string(),
            ));
        }
        if effective_to < rate.effective_from {
            return Err(AppError::validation(
                "effective_to",
                "end date must be on or after effective_from",
            ));
        }

        let ended = sqlx::query_as::<_, CostRate>(
            r#"
            UPDATE cost_rates SET effective_to = $2
            WHERE id = $1
            RETURNING id, warehouse_id, category, cost_name, rate_value, unit,
                      effective_from, effective_to, created_by, created_at
            "#,
        )
        .bind(rate_id)
        .bind(effective_to)
        .fetch_one(&self.db)
        .await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::RateEnded, "CostRate", rate_id.to_string(), user_id)
                    .with_detail(json!({
                        "category": ended.category,
                        "cost_name": ended.cost_name,
                        "effective_to": ended.effective_to,
                    })),
            )
            .await;

        Ok(ended)
    }

    /// The single rate for a category effective on `as_of`.
    ///
    /// Zero covering windows is `RateNotFound`; more than one is
    /// `RateAmbiguous` with the match count. Neither is ever guessed around.
    pub async fn resolve(
        &self,
        warehouse_id: Uuid,
        category: CostCategory,
        as_of: NaiveDate,
    ) -> AppResult<CostRate> {
        let rows = sqlx::query_as::<_, CostRate>(
            r#"
            SELECT id, warehouse_id, category, cost_name, rate_value, unit,
                   effective_from, effective_to, created_by, created_at
            FROM cost_rates
            WHERE warehouse_id = $1 AND category = $2
            "#,
        )
        .bind(warehouse_id)
        .bind(category.as_str())
        .fetch_all(&self.db)
        .await?;

        pick_rate(rows, warehouse_id, category, as_of)
    }

    /// Like [`resolve`](Self::resolve), restricted to rates whose name
    /// contains `name_contains` (case-insensitive). Handling charges are
    /// filed under the Carton category and distinguished by name, e.g.
    /// "Inbound Handling" vs "Outbound Handling".
    pub async fn resolve_named(
        &self,
        warehouse_id: Uuid,
        category: CostCategory,
        name_contains: &str,
        as_of: NaiveDate,
    ) -> AppResult<CostRate> {
        let rows = sqlx::query_as::<_, CostRate>(
            r#"
            SELECT id, warehouse_id, category, cost_name, rate_value, unit,
                   effective_from, effective_to, created_by, created_at
            FROM cost_rates
            WHERE warehouse_id = $1 AND category = $2
              AND cost_name ILIKE '%' || $3 || '%'
            "#,
        )
        .bind(warehouse_id)
        .bind(category.as_str())
        .bind(name_contains)
        .fetch_all(&self.db)
        .await?;

        pick_rate(rows, warehouse_id, category, as_of)
    }

    /// Layered cartons-per-pallet for a (warehouse, SKU) pair on a date.
    /// Callers supply the stored layers they already hold; this fetches the
    /// warehouse-SKU config windows.
    pub async fn resolve_cartons_per_pallet(
        &self,
        warehouse_id: Uuid,
        sku_id: Uuid,
        transaction_override: Option<i32>,
        balance_config: Option<i32>,
        purpose: PalletPurpose,
        as_of: NaiveDate,
    ) -> AppResult<CppResolution> {
        let rows = sqlx::query_as::<_, ConfigRow>(
            r#"
            SELECT storage_cartons_per_pallet, shipping_cartons_per_pallet,
                   effective_from, end_date
            FROM warehouse_sku_configs
            WHERE warehouse_id = $1 AND sku_id = $2 AND is_active = true
            "#,
        )
        .bind(warehouse_id)
        .bind(sku_id)
        .fetch_all(&self.db)
        .await?;

        let windows: Vec<ConfigWindow> = rows
            .into_iter()
            .map(|row| ConfigWindow {
                storage_cartons_per_pallet: row.storage_cartons_per_pallet,
                shipping_cartons_per_pallet: row.shipping_cartons_per_pallet,
                effective_from: row.effective_from,
                end_date: row.end_date,
            })
            .collect();

        Ok(resolve_cartons_per_pallet(
            transaction_override,
            balance_config,
            &windows,
            purpose,
            as_of,
        ))
    }
}

fn pick_rate(
    rows: Vec<CostRate>,
    warehouse_id: Uuid,
    category: CostCategory,
    as_of: NaiveDate,
) -> AppResult<CostRate> {
    let windows: Vec<RateWindow> = rows.iter().map(CostRate::window).collect();
    match select_rate_index(&windows, as_of) {
        Ok(index) => {
            let mut rows = rows;
            Ok(rows.swap_remove(index))
        }
        Err(RateSelectionError::NotFound) => Err(AppError::RateNotFound {
            warehouse_id,
            category,
            as_of,
        }),
        Err(RateSelectionError::Ambiguous(matches)) => Err(AppError::RateAmbiguous {
            warehouse_id,
            category,
            as_of,
            matches,
        }),
    }
}
