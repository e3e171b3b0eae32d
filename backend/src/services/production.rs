//! Production orchestration service
//!
//! A production run executes a recipe at a given scale: one batch produces
//! the recipe's base weight, so each recipe line's consumption is its weight
//! times the batch count, costed at the material's price at run time. Runs
//! never block on missing stock; a shortfall only sets the informational
//! under-stock flag. Every mutation re-enters the ledger recalculation for
//! the materials it touched.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::ledger;
use shared::types::{DateRange, Pagination};
use shared::validation;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditAction, AuditService};
use crate::services::stock::StockLedgerService;

/// Production orchestration service
#[derive(Clone)]
pub struct ProductionService {
    db: PgPool,
    stock: StockLedgerService,
    audit: AuditService,
}

/// One execution of a recipe
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductionRun {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub recipe_id: Uuid,
    pub batches: Decimal,
    pub produced_weight_kg: Decimal,
    pub total_cost: Decimal,
    pub cost_per_kg: Decimal,
    pub under_stock: bool,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub run_date: NaiveDate,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One consumed material of a run
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductionLine {
    pub id: Uuid,
    pub run_id: Uuid,
    pub raw_material_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub cost: Decimal,
}

/// A production run with its lines
#[derive(Debug, Clone, Serialize)]
pub struct ProductionRunWithLines {
    #[serde(flatten)]
    pub run: ProductionRun,
    pub lines: Vec<ProductionLine>,
}

/// Input for recording a production run
#[derive(Debug, Deserialize)]
pub struct RecordProductionInput {
    pub recipe_id: Uuid,
    pub batches: Decimal,
    pub run_date: Option<NaiveDate>,
}

/// Input for editing a production run
#[derive(Debug, Deserialize)]
pub struct EditProductionInput {
    pub batches: Option<Decimal>,
    pub run_date: Option<NaiveDate>,
}

/// One recipe line priced and scaled for a run
struct ConsumptionPlan {
    raw_material_id: Uuid,
    quantity: Decimal,
    unit_price: Decimal,
    cost: Decimal,
}

struct RunComputation {
    produced_weight: Decimal,
    total_cost: Decimal,
    cost_per_kg: Decimal,
    under_stock: bool,
    lines: Vec<ConsumptionPlan>,
}

impl ProductionService {
    /// Create a new ProductionService instance
    pub fn new(db: PgPool) -> Self {
        Self {
            stock: StockLedgerService::new(db.clone()),
            audit: AuditService::new(db.clone()),
            db,
        }
    }

    /// Record a production run of a recipe at current material prices.
    pub async fn record_production(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        input: RecordProductionInput,
    ) -> AppResult<ProductionRunWithLines> {
        if let Err(msg) = validation::validate_positive_quantity(input.batches) {
            return Err(AppError::Validation {
                field: "batches".to_string(),
                message: msg.to_string(),
                message_es: "La cantidad de lotes debe ser positiva".to_string(),
            });
        }

        let computed = self.compute_run(farm_id, input.recipe_id, input.batches).await?;
        let run_date = input.run_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;

        let run_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO production_runs (farm_id, recipe_id, batches, produced_weight_kg,
                                         total_cost, cost_per_kg, under_stock, run_date,
                                         created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(farm_id)
        .bind(input.recipe_id)
        .bind(input.batches)
        .bind(computed.produced_weight)
        .bind(computed.total_cost)
        .bind(computed.cost_per_kg)
        .bind(computed.under_stock)
        .bind(run_date)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        for line in &computed.lines {
            sqlx::query(
                r#"
                INSERT INTO production_lines (run_id, raw_material_id, quantity, unit_price, cost)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(run_id)
            .bind(line.raw_material_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.cost)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        for line in &computed.lines {
            self.stock.recalculate(farm_id, line.raw_material_id).await?;
        }

        self.get_run(farm_id, run_id).await
    }

    /// Re-run the computation from scratch against the recipe's current
    /// definition and current prices, replacing the run's lines. The ledger
    /// is recalculated for the union of previously- and newly-consumed
    /// materials so a material dropped from the recipe is restored.
    pub async fn edit_production(
        &self,
        farm_id: Uuid,
        run_id: Uuid,
        input: EditProductionInput,
    ) -> AppResult<ProductionRunWithLines> {
        let existing = self.get_active_run(farm_id, run_id).await?;

        let batches = input.batches.unwrap_or(existing.batches);
        if let Err(msg) = validation::validate_positive_quantity(batches) {
            return Err(AppError::Validation {
                field: "batches".to_string(),
                message: msg.to_string(),
                message_es: "La cantidad de lotes debe ser positiva".to_string(),
            });
        }
        let run_date = input.run_date.unwrap_or(existing.run_date);

        let previous_materials = self.run_materials(run_id).await?;
        let computed = self.compute_run(farm_id, existing.recipe_id, batches).await?;

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE production_runs
            SET batches = $1, produced_weight_kg = $2, total_cost = $3, cost_per_kg = $4,
                under_stock = $5, run_date = $6, updated_at = now()
            WHERE id = $7
            "#,
        )
        .bind(batches)
        .bind(computed.produced_weight)
        .bind(computed.total_cost)
        .bind(computed.cost_per_kg)
        .bind(computed.under_stock)
        .bind(run_date)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM production_lines WHERE run_id = $1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        for line in &computed.lines {
            sqlx::query(
                r#"
                INSERT INTO production_lines (run_id, raw_material_id, quantity, unit_price, cost)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(run_id)
            .bind(line.raw_material_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.cost)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut touched = previous_materials;
        for line in &computed.lines {
            if !touched.contains(&line.raw_material_id) {
                touched.push(line.raw_material_id);
            }
        }
        for material in &touched {
            self.stock.recalculate(farm_id, *material).await?;
        }

        self.get_run(farm_id, run_id).await
    }

    /// Soft-delete a run; recalculation restores the consumed quantities
    /// because only active runs count against the ledger.
    pub async fn delete_production(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        run_id: Uuid,
    ) -> AppResult<ProductionRun> {
        let (before, deleted) = self.soft_delete_run(farm_id, actor_id, run_id).await?;

        self.audit
            .record(
                farm_id,
                actor_id,
                AuditAction::Deleted,
                "production_run",
                Some(run_id),
                Some(before),
                Some(Self::snapshot(&deleted)?),
            )
            .await?;

        self.recalculate_run_materials(farm_id, run_id).await?;

        Ok(deleted)
    }

    /// Restore a soft-deleted run; its consumption counts against the
    /// ledger again.
    pub async fn restore_production(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        run_id: Uuid,
    ) -> AppResult<ProductionRunWithLines> {
        let run = self.find_run(farm_id, run_id).await?;
        if run.is_active {
            return Err(AppError::Validation {
                field: "production_run".to_string(),
                message: "Production run is not deleted".to_string(),
                message_es: "La producción no está eliminada".to_string(),
            });
        }

        let before = Self::snapshot(&run)?;
        let restored = sqlx::query_as::<_, ProductionRun>(
            r#"
            UPDATE production_runs
            SET is_active = TRUE, deleted_at = NULL, deleted_by = NULL, updated_at = now()
            WHERE id = $1
            RETURNING id, farm_id, recipe_id, batches, produced_weight_kg, total_cost,
                      cost_per_kg, under_stock, is_active, deleted_at, deleted_by, run_date,
                      created_by, created_at, updated_at
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.db)
        .await?;

        self.audit
            .record(
                farm_id,
                actor_id,
                AuditAction::Restored,
                "production_run",
                Some(run_id),
                Some(before),
                Some(Self::snapshot(&restored)?),
            )
            .await?;

        self.recalculate_run_materials(farm_id, run_id).await?;

        self.get_run(farm_id, run_id).await
    }

    /// Soft-delete several runs; writes one bulk audit entry for the batch.
    pub async fn bulk_delete_runs(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        run_ids: &[Uuid],
    ) -> AppResult<usize> {
        let mut snapshots = Vec::with_capacity(run_ids.len());
        for run_id in run_ids {
            let (before, _) = self.soft_delete_run(farm_id, actor_id, *run_id).await?;
            snapshots.push(before);
        }

        self.audit
            .record(
                farm_id,
                actor_id,
                AuditAction::BulkDeleted,
                "production_run",
                None,
                Some(serde_json::Value::Array(snapshots)),
                None,
            )
            .await?;

        for run_id in run_ids {
            self.recalculate_run_materials(farm_id, *run_id).await?;
        }

        Ok(run_ids.len())
    }

    /// Get a production run with its lines
    pub async fn get_run(&self, farm_id: Uuid, run_id: Uuid) -> AppResult<ProductionRunWithLines> {
        let run = self.find_run(farm_id, run_id).await?;

        let lines = sqlx::query_as::<_, ProductionLine>(
            r#"
            SELECT id, run_id, raw_material_id, quantity, unit_price, cost
            FROM production_lines
            WHERE run_id = $1
            ORDER BY quantity DESC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.db)
        .await?;

        Ok(ProductionRunWithLines { run, lines })
    }

    /// List active production runs of a farm, newest first
    pub async fn list_runs(
        &self,
        farm_id: Uuid,
        range: Option<DateRange>,
        page: Pagination,
    ) -> AppResult<Vec<ProductionRun>> {
        let runs = sqlx::query_as::<_, ProductionRun>(
            r#"
            SELECT id, farm_id, recipe_id, batches, produced_weight_kg, total_cost,
                   cost_per_kg, under_stock, is_active, deleted_at, deleted_by, run_date,
                   created_by, created_at, updated_at
            FROM production_runs
            WHERE farm_id = $1 AND is_active = TRUE
              AND ($2::date IS NULL OR run_date >= $2)
              AND ($3::date IS NULL OR run_date <= $3)
            ORDER BY run_date DESC, created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(farm_id)
        .bind(range.map(|r| r.start))
        .bind(range.map(|r| r.end))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(runs)
    }

    /// Scale and price the recipe for the requested batch count, flagging a
    /// shortfall against the physically available quantities.
    async fn compute_run(
        &self,
        farm_id: Uuid,
        recipe_id: Uuid,
        batches: Decimal,
    ) -> AppResult<RunComputation> {
        let base_weight = sqlx::query_scalar::<_, Decimal>(
            "SELECT base_weight_kg FROM recipes WHERE id = $1 AND farm_id = $2",
        )
        .bind(recipe_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Recipe".to_string()))?;

        let recipe_lines = sqlx::query_as::<_, (Uuid, Decimal, Decimal)>(
            r#"
            SELECT rl.raw_material_id, rl.quantity_kg, rm.current_price
            FROM recipe_lines rl
            JOIN raw_materials rm ON rm.id = rl.raw_material_id
            WHERE rl.recipe_id = $1
            "#,
        )
        .bind(recipe_id)
        .fetch_all(&self.db)
        .await?;

        if recipe_lines.is_empty() {
            return Err(AppError::Validation {
                field: "recipe_id".to_string(),
                message: "Recipe has no lines".to_string(),
                message_es: "La ración no tiene líneas".to_string(),
            });
        }

        let produced_weight = ledger::produced_weight(batches, base_weight);
        let mut total_cost = Decimal::ZERO;
        let mut under_stock = false;
        let mut lines = Vec::with_capacity(recipe_lines.len());

        for (raw_material_id, quantity_kg, current_price) in recipe_lines {
            let consumed = ledger::consumed_quantity(quantity_kg, batches);
            let cost = consumed * current_price;
            total_cost += cost;

            let available = sqlx::query_scalar::<_, Decimal>(
                "SELECT real_quantity FROM stock_ledger WHERE farm_id = $1 AND raw_material_id = $2",
            )
            .bind(farm_id)
            .bind(raw_material_id)
            .fetch_optional(&self.db)
            .await?
            .unwrap_or(Decimal::ZERO);

            if consumed > available {
                under_stock = true;
            }

            lines.push(ConsumptionPlan {
                raw_material_id,
                quantity: consumed,
                unit_price: current_price,
                cost,
            });
        }

        Ok(RunComputation {
            produced_weight,
            total_cost,
            cost_per_kg: ledger::cost_per_kg(total_cost, produced_weight),
            under_stock,
            lines,
        })
    }

    async fn soft_delete_run(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        run_id: Uuid,
    ) -> AppResult<(serde_json::Value, ProductionRun)> {
        let run = self.get_active_run(farm_id, run_id).await?;
        let before = Self::snapshot(&run)?;

        let deleted = sqlx::query_as::<_, ProductionRun>(
            r#"
            UPDATE production_runs
            SET is_active = FALSE, deleted_at = now(), deleted_by = $1, updated_at = now()
            WHERE id = $2
            RETURNING id, farm_id, recipe_id, batches, produced_weight_kg, total_cost,
                      cost_per_kg, under_stock, is_active, deleted_at, deleted_by, run_date,
                      created_by, created_at, updated_at
            "#,
        )
        .bind(actor_id)
        .bind(run_id)
        .fetch_one(&self.db)
        .await?;

        Ok((before, deleted))
    }

    async fn find_run(&self, farm_id: Uuid, run_id: Uuid) -> AppResult<ProductionRun> {
        sqlx::query_as::<_, ProductionRun>(
            r#"
            SELECT id, farm_id, recipe_id, batches, produced_weight_kg, total_cost,
                   cost_per_kg, under_stock, is_active, deleted_at, deleted_by, run_date,
                   created_by, created_at, updated_at
            FROM production_runs
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(run_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Production run".to_string()))
    }

    async fn get_active_run(&self, farm_id: Uuid, run_id: Uuid) -> AppResult<ProductionRun> {
        let run = self.find_run(farm_id, run_id).await?;
        if !run.is_active {
            return Err(AppError::NotFound("Production run".to_string()));
        }
        Ok(run)
    }

    async fn run_materials(&self, run_id: Uuid) -> AppResult<Vec<Uuid>> {
        let materials = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT raw_material_id FROM production_lines WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_all(&self.db)
        .await?;

        Ok(materials)
    }

    async fn recalculate_run_materials(&self, farm_id: Uuid, run_id: Uuid) -> AppResult<()> {
        for material in self.run_materials(run_id).await? {
            self.stock.recalculate(farm_id, material).await?;
        }
        Ok(())
    }

    fn snapshot<T: Serialize>(value: &T) -> AppResult<serde_json::Value> {
        serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))
    }
}
