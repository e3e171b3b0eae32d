//! Reconciliation sweep
//!
//! The purchase and production cascades are sequences of independent writes;
//! a crash between them leaves a committed source record with a stale ledger
//! or recipe cost. Because every recalculation derives from the source
//! records alone, simply re-invoking it for every material and recipe of a
//! farm repairs any such gap. The sweep is safe to run at any time and is
//! what the `ffm-reconcile` binary executes.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::recipe::RecipeService;
use crate::services::stock::StockLedgerService;

/// Reconciliation service
#[derive(Clone)]
pub struct ReconciliationService {
    db: PgPool,
    stock: StockLedgerService,
    recipes: RecipeService,
}

/// Counters of one sweep
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileSummary {
    pub farms: usize,
    pub materials: usize,
    pub recipes: usize,
}

impl ReconciliationService {
    /// Create a new ReconciliationService instance
    pub fn new(db: PgPool) -> Self {
        Self {
            stock: StockLedgerService::new(db.clone()),
            recipes: RecipeService::new(db.clone()),
            db,
        }
    }

    /// Re-derive every ledger row and recipe cost of one farm
    pub async fn reconcile_farm(&self, farm_id: Uuid) -> AppResult<ReconcileSummary> {
        let materials = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM raw_materials WHERE farm_id = $1 ORDER BY code",
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        for material in &materials {
            self.stock.recalculate(farm_id, *material).await?;
        }

        let recipe_ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM recipes WHERE farm_id = $1 ORDER BY code",
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        for recipe_id in &recipe_ids {
            self.recipes.recalculate_recipe(*recipe_id).await?;
        }

        let summary = ReconcileSummary {
            farms: 1,
            materials: materials.len(),
            recipes: recipe_ids.len(),
        };

        tracing::info!(
            "Reconciled farm {}: {} materials, {} recipes",
            farm_id,
            summary.materials,
            summary.recipes
        );

        Ok(summary)
    }

    /// Sweep every farm
    pub async fn reconcile_all(&self) -> AppResult<ReconcileSummary> {
        let farms = sqlx::query_scalar::<_, Uuid>("SELECT id FROM farms ORDER BY code")
            .fetch_all(&self.db)
            .await?;

        let mut summary = ReconcileSummary::default();
        for farm_id in farms {
            let farm_summary = self.reconcile_farm(farm_id).await?;
            summary.farms += 1;
            summary.materials += farm_summary.materials;
            summary.recipes += farm_summary.recipes;
        }

        Ok(summary)
    }
}
