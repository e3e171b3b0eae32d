//! Stock ledger service
//!
//! One persisted row per (farm, raw material) holds every derived warehouse
//! quantity. The row is always recomputed from the source records through
//! [`shared::ledger`], which makes recalculation idempotent and safe to
//! re-run; only the manual correction path needs a write-race guard, a
//! compare-and-swap on the row's version column.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::ledger::{self, LedgerDerivation, PreviousQuantities, PriceEvent};
use shared::validation;

use crate::error::{AppError, AppResult};
use crate::services::alert::StockAlertService;

/// Stock ledger service
#[derive(Clone)]
pub struct StockLedgerService {
    db: PgPool,
    alerts: StockAlertService,
}

/// One persisted ledger row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockLedgerEntry {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub raw_material_id: Uuid,
    pub accumulated_quantity: Decimal,
    pub system_quantity: Decimal,
    pub real_quantity: Decimal,
    pub shrinkage: Decimal,
    pub warehouse_price: Decimal,
    pub stock_value: Decimal,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl StockLedgerService {
    /// Create a new StockLedgerService instance
    pub fn new(db: PgPool) -> Self {
        let alerts = StockAlertService::new(db.clone());
        Self { db, alerts }
    }

    /// Active purchase-line price events of a raw material, oldest first
    async fn purchase_events(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<Vec<PriceEvent>> {
        let rows = sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            SELECT pl.quantity, pl.unit_price
            FROM purchase_lines pl
            JOIN purchases p ON p.id = pl.purchase_id
            WHERE p.farm_id = $1 AND pl.raw_material_id = $2 AND p.is_active = TRUE
            ORDER BY p.purchase_date, pl.created_at
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(quantity, unit_price)| PriceEvent::new(quantity, unit_price))
            .collect())
    }

    /// Baseline seed as a pseudo purchase event, if one was recorded
    async fn baseline_event(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<Option<PriceEvent>> {
        let row = sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            SELECT initial_quantity, initial_price
            FROM stock_baselines
            WHERE farm_id = $1 AND raw_material_id = $2
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(quantity, unit_price)| PriceEvent::new(quantity, unit_price)))
    }

    /// Total quantity consumed by active production runs
    async fn consumed_quantity(&self, farm_id: Uuid, raw_material_id: Uuid) -> AppResult<Decimal> {
        let consumed = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(pl.quantity), 0)
            FROM production_lines pl
            JOIN production_runs pr ON pr.id = pl.run_id
            WHERE pr.farm_id = $1 AND pl.raw_material_id = $2 AND pr.is_active = TRUE
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .fetch_one(&self.db)
        .await?;

        Ok(consumed)
    }

    async fn find_entry(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<Option<StockLedgerEntry>> {
        let entry = sqlx::query_as::<_, StockLedgerEntry>(
            r#"
            SELECT id, farm_id, raw_material_id, accumulated_quantity, system_quantity,
                   real_quantity, shrinkage, warehouse_price, stock_value, version, updated_at
            FROM stock_ledger
            WHERE farm_id = $1 AND raw_material_id = $2
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(entry)
    }

    async fn derivation_inputs(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<(Option<PriceEvent>, Vec<PriceEvent>, Decimal)> {
        let baseline = self.baseline_event(farm_id, raw_material_id).await?;
        let purchases = self.purchase_events(farm_id, raw_material_id).await?;
        let consumed = self.consumed_quantity(farm_id, raw_material_id).await?;
        Ok((baseline, purchases, consumed))
    }

    /// Re-derive and persist the ledger row of a raw material from the
    /// current set of active source records. The manual delta held by the
    /// existing row survives; the version column is not touched. A row that
    /// does not exist yet is created.
    pub async fn recalculate(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<StockLedgerEntry> {
        let (baseline, purchases, consumed) =
            self.derivation_inputs(farm_id, raw_material_id).await?;
        let previous = self
            .find_entry(farm_id, raw_material_id)
            .await?
            .map(|e| PreviousQuantities {
                system_quantity: e.system_quantity,
                real_quantity: e.real_quantity,
            });

        let derived = ledger::derive(baseline, &purchases, consumed, previous);
        let entry = self.upsert(farm_id, raw_material_id, &derived).await?;
        self.sync_alert(&entry).await;

        Ok(entry)
    }

    async fn upsert(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        derived: &LedgerDerivation,
    ) -> AppResult<StockLedgerEntry> {
        let entry = sqlx::query_as::<_, StockLedgerEntry>(
            r#"
            INSERT INTO stock_ledger (farm_id, raw_material_id, accumulated_quantity,
                                      system_quantity, real_quantity, shrinkage,
                                      warehouse_price, stock_value)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (farm_id, raw_material_id) DO UPDATE
            SET accumulated_quantity = EXCLUDED.accumulated_quantity,
                system_quantity = EXCLUDED.system_quantity,
                real_quantity = EXCLUDED.real_quantity,
                shrinkage = EXCLUDED.shrinkage,
                warehouse_price = EXCLUDED.warehouse_price,
                stock_value = EXCLUDED.stock_value,
                updated_at = now()
            RETURNING id, farm_id, raw_material_id, accumulated_quantity, system_quantity,
                      real_quantity, shrinkage, warehouse_price, stock_value, version, updated_at
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .bind(derived.accumulated_quantity)
        .bind(derived.system_quantity)
        .bind(derived.real_quantity)
        .bind(derived.shrinkage)
        .bind(derived.warehouse_price)
        .bind(derived.stock_value)
        .fetch_one(&self.db)
        .await?;

        Ok(entry)
    }

    /// Manual physical-count correction, guarded against lost updates.
    ///
    /// The non-raced quantities are re-derived fresh; the write itself is a
    /// conditional update predicated on the version the row held when read.
    /// A concurrent writer makes the predicate match zero rows, in which
    /// case nothing is written and the caller must reload and retry.
    pub async fn set_real_quantity(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        new_real_quantity: Decimal,
    ) -> AppResult<StockLedgerEntry> {
        if let Err(msg) = validation::validate_non_negative_quantity(new_real_quantity) {
            return Err(AppError::Validation {
                field: "real_quantity".to_string(),
                message: msg.to_string(),
                message_es: "La cantidad real no puede ser negativa".to_string(),
            });
        }

        let (baseline, purchases, consumed) =
            self.derivation_inputs(farm_id, raw_material_id).await?;
        let derived = ledger::derive_manual(baseline, &purchases, consumed, new_real_quantity);

        let entry = match self.find_entry(farm_id, raw_material_id).await? {
            None => {
                // First write for this pair; no concurrent row to race with.
                sqlx::query_as::<_, StockLedgerEntry>(
                    r#"
                    INSERT INTO stock_ledger (farm_id, raw_material_id, accumulated_quantity,
                                              system_quantity, real_quantity, shrinkage,
                                              warehouse_price, stock_value, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
                    RETURNING id, farm_id, raw_material_id, accumulated_quantity, system_quantity,
                              real_quantity, shrinkage, warehouse_price, stock_value, version,
                              updated_at
                    "#,
                )
                .bind(farm_id)
                .bind(raw_material_id)
                .bind(derived.accumulated_quantity)
                .bind(derived.system_quantity)
                .bind(derived.real_quantity)
                .bind(derived.shrinkage)
                .bind(derived.warehouse_price)
                .bind(derived.stock_value)
                .fetch_one(&self.db)
                .await?
            }
            Some(existing) => {
                let result = sqlx::query(
                    r#"
                    UPDATE stock_ledger
                    SET accumulated_quantity = $1, system_quantity = $2, real_quantity = $3,
                        shrinkage = $4, warehouse_price = $5, stock_value = $6,
                        version = version + 1, updated_at = now()
                    WHERE farm_id = $7 AND raw_material_id = $8 AND version = $9
                    "#,
                )
                .bind(derived.accumulated_quantity)
                .bind(derived.system_quantity)
                .bind(derived.real_quantity)
                .bind(derived.shrinkage)
                .bind(derived.warehouse_price)
                .bind(derived.stock_value)
                .bind(farm_id)
                .bind(raw_material_id)
                .bind(existing.version)
                .execute(&self.db)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(AppError::ConcurrencyConflict {
                        resource: "stock ledger entry".to_string(),
                    });
                }

                self.get_entry(farm_id, raw_material_id).await?
            }
        };

        self.sync_alert(&entry).await;

        Ok(entry)
    }

    /// Seed (or replace) the pre-system baseline of a raw material and bring
    /// the ledger row up to date with it.
    pub async fn set_baseline(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        initial_quantity: Decimal,
        initial_price: Decimal,
    ) -> AppResult<StockLedgerEntry> {
        if let Err(msg) = validation::validate_non_negative_quantity(initial_quantity) {
            return Err(AppError::Validation {
                field: "initial_quantity".to_string(),
                message: msg.to_string(),
                message_es: "La cantidad inicial no puede ser negativa".to_string(),
            });
        }
        if let Err(msg) = validation::validate_non_negative_price(initial_price) {
            return Err(AppError::Validation {
                field: "initial_price".to_string(),
                message: msg.to_string(),
                message_es: "El precio inicial no puede ser negativo".to_string(),
            });
        }

        let material_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM raw_materials WHERE id = $1 AND farm_id = $2)",
        )
        .bind(raw_material_id)
        .bind(farm_id)
        .fetch_one(&self.db)
        .await?;

        if !material_exists {
            return Err(AppError::NotFound("Raw material".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO stock_baselines (farm_id, raw_material_id, initial_quantity, initial_price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (farm_id, raw_material_id) DO UPDATE
            SET initial_quantity = EXCLUDED.initial_quantity,
                initial_price = EXCLUDED.initial_price
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .bind(initial_quantity)
        .bind(initial_price)
        .execute(&self.db)
        .await?;

        self.recalculate(farm_id, raw_material_id).await
    }

    /// Get the ledger row of one raw material
    pub async fn get_entry(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<StockLedgerEntry> {
        self.find_entry(farm_id, raw_material_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock ledger entry".to_string()))
    }

    /// Full warehouse ledger of a farm, ordered by material code
    pub async fn get_farm_ledger(&self, farm_id: Uuid) -> AppResult<Vec<StockLedgerEntry>> {
        let entries = sqlx::query_as::<_, StockLedgerEntry>(
            r#"
            SELECT sl.id, sl.farm_id, sl.raw_material_id, sl.accumulated_quantity,
                   sl.system_quantity, sl.real_quantity, sl.shrinkage, sl.warehouse_price,
                   sl.stock_value, sl.version, sl.updated_at
            FROM stock_ledger sl
            JOIN raw_materials rm ON rm.id = sl.raw_material_id
            WHERE sl.farm_id = $1
            ORDER BY rm.code
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// Depletion alerts are best-effort: a failure must never roll back the
    /// ledger mutation that triggered it.
    async fn sync_alert(&self, entry: &StockLedgerEntry) {
        if let Err(e) = self
            .alerts
            .sync(entry.farm_id, entry.raw_material_id, entry.real_quantity)
            .await
        {
            tracing::warn!(
                "Failed to sync stock alert for raw material {}: {}",
                entry.raw_material_id,
                e
            );
        }
    }
}
