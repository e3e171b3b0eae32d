//! Purchase orchestration service
//!
//! Recording a purchase mutates several pieces of shared state in sequence:
//! the header and its lines, the raw materials' current prices (last write
//! wins across the lines), the price history, the warehouse ledger row of
//! every touched material and finally the stored cost of every recipe using
//! one of those materials. Header/lines/prices commit atomically; the ledger
//! recalculation and the recipe cost cascade are independent follow-up
//! writes, each idempotent so an interrupted cascade is recovered by the
//! reconciliation sweep.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::types::{DateRange, Pagination};
use shared::validation;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditAction, AuditService};
use crate::services::raw_material::RawMaterialService;
use crate::services::recipe::RecipeService;
use crate::services::stock::StockLedgerService;

/// Purchase orchestration service
#[derive(Clone)]
pub struct PurchaseService {
    db: PgPool,
    stock: StockLedgerService,
    recipes: RecipeService,
    materials: RawMaterialService,
    audit: AuditService,
}

/// A purchase header
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub supplier_id: Uuid,
    pub invoice_number: String,
    pub purchase_date: NaiveDate,
    pub total: Decimal,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of a purchase
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PurchaseLine {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub raw_material_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    /// The material's price immediately before this line was applied
    pub previous_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A purchase with its lines
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseWithLines {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub lines: Vec<PurchaseLine>,
}

/// Input for one purchase line
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseLineInput {
    pub raw_material_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Input for recording a purchase
#[derive(Debug, Deserialize)]
pub struct RecordPurchaseInput {
    pub supplier_id: Uuid,
    pub invoice_number: String,
    pub purchase_date: NaiveDate,
    /// Provisional total, only honored when the purchase has no lines yet
    pub declared_total: Option<Decimal>,
    pub lines: Vec<PurchaseLineInput>,
}

/// Input for editing a purchase line
#[derive(Debug, Deserialize)]
pub struct EditPurchaseLineInput {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl PurchaseService {
    /// Create a new PurchaseService instance
    pub fn new(db: PgPool) -> Self {
        Self {
            stock: StockLedgerService::new(db.clone()),
            recipes: RecipeService::new(db.clone()),
            materials: RawMaterialService::new(db.clone()),
            audit: AuditService::new(db.clone()),
            db,
        }
    }

    /// Record a purchase: header, lines, price transitions, then the ledger
    /// recalculation and recipe cost cascade per touched material.
    pub async fn record_purchase(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        input: RecordPurchaseInput,
    ) -> AppResult<PurchaseWithLines> {
        if let Err(msg) = validation::validate_invoice_number(&input.invoice_number) {
            return Err(AppError::Validation {
                field: "invoice_number".to_string(),
                message: msg.to_string(),
                message_es: "El número de factura no es válido".to_string(),
            });
        }
        for line in &input.lines {
            Self::validate_line(line)?;
        }

        let total: Decimal = if input.lines.is_empty() {
            input.declared_total.unwrap_or(Decimal::ZERO)
        } else {
            input.lines.iter().map(|l| l.subtotal).sum()
        };

        let mut tx = self.db.begin().await?;

        let purchase_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO purchases (farm_id, supplier_id, invoice_number, purchase_date,
                                   total, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(farm_id)
        .bind(input.supplier_id)
        .bind(input.invoice_number.trim())
        .bind(input.purchase_date)
        .bind(total)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        // Lines are applied in order; for a material appearing twice the
        // second line sees the first line's price as its previous price and
        // the last processed line wins the current price.
        for line in &input.lines {
            let previous_price = sqlx::query_scalar::<_, Decimal>(
                "SELECT current_price FROM raw_materials WHERE id = $1 AND farm_id = $2",
            )
            .bind(line.raw_material_id)
            .bind(farm_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::Validation {
                field: "lines".to_string(),
                message: format!("Unknown raw material {}", line.raw_material_id),
                message_es: format!("Materia prima desconocida {}", line.raw_material_id),
            })?;

            sqlx::query(
                r#"
                INSERT INTO purchase_lines (purchase_id, raw_material_id, quantity,
                                            unit_price, subtotal, previous_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(purchase_id)
            .bind(line.raw_material_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.subtotal)
            .bind(previous_price)
            .execute(&mut *tx)
            .await?;

            if previous_price != line.unit_price {
                sqlx::query(
                    "UPDATE raw_materials SET current_price = $1, updated_at = now() WHERE id = $2",
                )
                .bind(line.unit_price)
                .bind(line.raw_material_id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO price_history (farm_id, raw_material_id, previous_price,
                                               new_price, change_percent, reason)
                    VALUES ($1, $2, $3, $4, $5, 'purchase')
                    "#,
                )
                .bind(farm_id)
                .bind(line.raw_material_id)
                .bind(previous_price)
                .bind(line.unit_price)
                .bind(shared::ledger::price_change_percent(
                    previous_price,
                    line.unit_price,
                ))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        let touched = Self::distinct_materials(input.lines.iter().map(|l| l.raw_material_id));
        self.recalculate_and_cascade(farm_id, &touched).await?;

        self.get_purchase(farm_id, purchase_id).await
    }

    /// Add a line to an existing purchase
    pub async fn add_line(
        &self,
        farm_id: Uuid,
        purchase_id: Uuid,
        input: PurchaseLineInput,
    ) -> AppResult<PurchaseLine> {
        Self::validate_line(&input)?;
        let purchase = self.get_active_header(farm_id, purchase_id).await?;

        let previous_price = self
            .materials
            .current_price(farm_id, input.raw_material_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::Validation {
                    field: "raw_material_id".to_string(),
                    message: format!("Unknown raw material {}", input.raw_material_id),
                    message_es: format!("Materia prima desconocida {}", input.raw_material_id),
                },
                other => other,
            })?;

        let line = sqlx::query_as::<_, PurchaseLine>(
            r#"
            INSERT INTO purchase_lines (purchase_id, raw_material_id, quantity,
                                        unit_price, subtotal, previous_price)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, purchase_id, raw_material_id, quantity, unit_price, subtotal,
                      previous_price, created_at
            "#,
        )
        .bind(purchase.id)
        .bind(input.raw_material_id)
        .bind(input.quantity)
        .bind(input.unit_price)
        .bind(input.subtotal)
        .bind(previous_price)
        .fetch_one(&self.db)
        .await?;

        self.materials
            .apply_price_change(farm_id, input.raw_material_id, input.unit_price, "purchase")
            .await?;
        self.refresh_header_total(purchase.id).await?;
        self.recalculate_and_cascade(farm_id, &[input.raw_material_id])
            .await?;

        Ok(line)
    }

    /// Edit a purchase line; re-runs the price transition and the cascade
    /// for the affected material.
    pub async fn edit_line(
        &self,
        farm_id: Uuid,
        line_id: Uuid,
        input: EditPurchaseLineInput,
    ) -> AppResult<PurchaseLine> {
        Self::validate_line_amounts(input.quantity, input.unit_price, input.subtotal)?;

        let existing = self.get_active_line(farm_id, line_id).await?;
        let previous_price = self
            .materials
            .current_price(farm_id, existing.raw_material_id)
            .await?;

        let line = sqlx::query_as::<_, PurchaseLine>(
            r#"
            UPDATE purchase_lines
            SET quantity = $1, unit_price = $2, subtotal = $3, previous_price = $4
            WHERE id = $5
            RETURNING id, purchase_id, raw_material_id, quantity, unit_price, subtotal,
                      previous_price, created_at
            "#,
        )
        .bind(input.quantity)
        .bind(input.unit_price)
        .bind(input.subtotal)
        .bind(previous_price)
        .bind(line_id)
        .fetch_one(&self.db)
        .await?;

        self.materials
            .apply_price_change(
                farm_id,
                existing.raw_material_id,
                input.unit_price,
                "purchase line edit",
            )
            .await?;
        self.refresh_header_total(existing.purchase_id).await?;
        self.recalculate_and_cascade(farm_id, &[existing.raw_material_id])
            .await?;

        Ok(line)
    }

    /// Delete a purchase line. Refused while an active production run
    /// consumes the material. Removing the material's newest line falls its
    /// current price back to the most recent remaining purchase price, or to
    /// the baseline price when none remain.
    pub async fn delete_line(&self, farm_id: Uuid, line_id: Uuid) -> AppResult<()> {
        let line = self.get_active_line(farm_id, line_id).await?;

        let consumed = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM production_lines pl
                JOIN production_runs pr ON pr.id = pl.run_id
                WHERE pr.farm_id = $1 AND pl.raw_material_id = $2 AND pr.is_active = TRUE
            )
            "#,
        )
        .bind(farm_id)
        .bind(line.raw_material_id)
        .fetch_one(&self.db)
        .await?;

        if consumed {
            return Err(AppError::DependencyBlocked {
                resource: "production runs".to_string(),
                message: "Raw material is consumed by an active production run".to_string(),
                message_es: "La materia prima está consumida por una producción activa".to_string(),
            });
        }

        sqlx::query("DELETE FROM purchase_lines WHERE id = $1")
            .bind(line_id)
            .execute(&self.db)
            .await?;

        self.refresh_header_total(line.purchase_id).await?;
        self.fall_back_price(farm_id, line.raw_material_id).await?;
        self.recalculate_and_cascade(farm_id, &[line.raw_material_id])
            .await?;

        Ok(())
    }

    /// Soft-delete a purchase header. Only an empty header on a farm with no
    /// active production runs may go.
    pub async fn delete_header(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<Purchase> {
        let (before, deleted) = self.soft_delete_header(farm_id, actor_id, purchase_id).await?;

        self.audit
            .record(
                farm_id,
                actor_id,
                AuditAction::Deleted,
                "purchase",
                Some(purchase_id),
                Some(before),
                Some(Self::snapshot(&deleted)?),
            )
            .await?;

        Ok(deleted)
    }

    /// Deactivate one header after the dependency checks; auditing is left
    /// to the caller so bulk deletion logs a single entry.
    async fn soft_delete_header(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<(serde_json::Value, Purchase)> {
        let purchase = self.get_active_header(farm_id, purchase_id).await?;

        let line_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM purchase_lines WHERE purchase_id = $1",
        )
        .bind(purchase_id)
        .fetch_one(&self.db)
        .await?;

        if line_count > 0 {
            return Err(AppError::DependencyBlocked {
                resource: "purchase lines".to_string(),
                message: format!("Cannot delete a purchase with {} lines", line_count),
                message_es: format!("No se puede eliminar una compra con {} líneas", line_count),
            });
        }

        let active_runs = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM production_runs WHERE farm_id = $1 AND is_active = TRUE",
        )
        .bind(farm_id)
        .fetch_one(&self.db)
        .await?;

        if active_runs > 0 {
            return Err(AppError::DependencyBlocked {
                resource: "production runs".to_string(),
                message: format!("Farm has {} active production runs", active_runs),
                message_es: format!("La granja tiene {} producciones activas", active_runs),
            });
        }

        let before = Self::snapshot(&purchase)?;
        let deleted = sqlx::query_as::<_, Purchase>(
            r#"
            UPDATE purchases
            SET is_active = FALSE, deleted_at = now(), deleted_by = $1, updated_at = now()
            WHERE id = $2
            RETURNING id, farm_id, supplier_id, invoice_number, purchase_date, total,
                      is_active, deleted_at, deleted_by, created_by, created_at, updated_at
            "#,
        )
        .bind(actor_id)
        .bind(purchase_id)
        .fetch_one(&self.db)
        .await?;

        Ok((before, deleted))
    }

    /// Restore a soft-deleted purchase header and bring the ledger of every
    /// material that ever appeared on its lines back up to date.
    pub async fn restore_header(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<PurchaseWithLines> {
        let purchase = self.find_header(farm_id, purchase_id).await?;
        if purchase.is_active {
            return Err(AppError::Validation {
                field: "purchase".to_string(),
                message: "Purchase is not deleted".to_string(),
                message_es: "La compra no está eliminada".to_string(),
            });
        }

        let before = Self::snapshot(&purchase)?;
        let restored = sqlx::query_as::<_, Purchase>(
            r#"
            UPDATE purchases
            SET is_active = TRUE, deleted_at = NULL, deleted_by = NULL, updated_at = now()
            WHERE id = $1
            RETURNING id, farm_id, supplier_id, invoice_number, purchase_date, total,
                      is_active, deleted_at, deleted_by, created_by, created_at, updated_at
            "#,
        )
        .bind(purchase_id)
        .fetch_one(&self.db)
        .await?;

        self.audit
            .record(
                farm_id,
                actor_id,
                AuditAction::Restored,
                "purchase",
                Some(purchase_id),
                Some(before),
                Some(Self::snapshot(&restored)?),
            )
            .await?;

        let materials = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT raw_material_id FROM purchase_lines WHERE purchase_id = $1",
        )
        .bind(purchase_id)
        .fetch_all(&self.db)
        .await?;

        for material in &materials {
            self.stock.recalculate(farm_id, *material).await?;
        }

        self.get_purchase(farm_id, purchase_id).await
    }

    /// Soft-delete several headers under the same rules as a single delete;
    /// writes one bulk audit entry for the whole batch.
    pub async fn bulk_delete_headers(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        purchase_ids: &[Uuid],
    ) -> AppResult<usize> {
        let mut snapshots = Vec::with_capacity(purchase_ids.len());
        for purchase_id in purchase_ids {
            let (before, _) = self.soft_delete_header(farm_id, actor_id, *purchase_id).await?;
            snapshots.push(before);
        }

        self.audit
            .record(
                farm_id,
                actor_id,
                AuditAction::BulkDeleted,
                "purchase",
                None,
                Some(serde_json::Value::Array(snapshots)),
                None,
            )
            .await?;

        Ok(purchase_ids.len())
    }

    /// Get a purchase with its lines
    pub async fn get_purchase(
        &self,
        farm_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<PurchaseWithLines> {
        let purchase = self.find_header(farm_id, purchase_id).await?;

        let lines = sqlx::query_as::<_, PurchaseLine>(
            r#"
            SELECT id, purchase_id, raw_material_id, quantity, unit_price, subtotal,
                   previous_price, created_at
            FROM purchase_lines
            WHERE purchase_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&self.db)
        .await?;

        Ok(PurchaseWithLines { purchase, lines })
    }

    /// List active purchases of a farm, newest first
    pub async fn list_purchases(
        &self,
        farm_id: Uuid,
        range: Option<DateRange>,
        page: Pagination,
    ) -> AppResult<Vec<Purchase>> {
        let purchases = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT id, farm_id, supplier_id, invoice_number, purchase_date, total,
                   is_active, deleted_at, deleted_by, created_by, created_at, updated_at
            FROM purchases
            WHERE farm_id = $1 AND is_active = TRUE
              AND ($2::date IS NULL OR purchase_date >= $2)
              AND ($3::date IS NULL OR purchase_date <= $3)
            ORDER BY purchase_date DESC, created_at DESC
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

        Ok(purchases)
    }

    fn validate_line(line: &PurchaseLineInput) -> AppResult<()> {
        Self::validate_line_amounts(line.quantity, line.unit_price, line.subtotal)
    }

    fn validate_line_amounts(
        quantity: Decimal,
        unit_price: Decimal,
        subtotal: Decimal,
    ) -> AppResult<()> {
        if let Err(msg) = validation::validate_positive_quantity(quantity) {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: msg.to_string(),
                message_es: "La cantidad debe ser positiva".to_string(),
            });
        }
        if let Err(msg) = validation::validate_non_negative_price(unit_price) {
            return Err(AppError::Validation {
                field: "unit_price".to_string(),
                message: msg.to_string(),
                message_es: "El precio no puede ser negativo".to_string(),
            });
        }
        if let Err(msg) = validation::validate_line_subtotal(quantity, unit_price, subtotal) {
            return Err(AppError::Validation {
                field: "subtotal".to_string(),
                message: format!("{} ({} x {} != {})", msg, quantity, unit_price, subtotal),
                message_es: format!(
                    "El subtotal no coincide con cantidad por precio ({} x {} != {})",
                    quantity, unit_price, subtotal
                ),
            });
        }
        Ok(())
    }

    async fn find_header(&self, farm_id: Uuid, purchase_id: Uuid) -> AppResult<Purchase> {
        sqlx::query_as::<_, Purchase>(
            r#"
            SELECT id, farm_id, supplier_id, invoice_number, purchase_date, total,
                   is_active, deleted_at, deleted_by, created_by, created_at, updated_at
            FROM purchases
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(purchase_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase".to_string()))
    }

    async fn get_active_header(&self, farm_id: Uuid, purchase_id: Uuid) -> AppResult<Purchase> {
        let purchase = self.find_header(farm_id, purchase_id).await?;
        if !purchase.is_active {
            return Err(AppError::NotFound("Purchase".to_string()));
        }
        Ok(purchase)
    }

    async fn get_active_line(&self, farm_id: Uuid, line_id: Uuid) -> AppResult<PurchaseLine> {
        sqlx::query_as::<_, PurchaseLine>(
            r#"
            SELECT pl.id, pl.purchase_id, pl.raw_material_id, pl.quantity, pl.unit_price,
                   pl.subtotal, pl.previous_price, pl.created_at
            FROM purchase_lines pl
            JOIN purchases p ON p.id = pl.purchase_id
            WHERE pl.id = $1 AND p.farm_id = $2 AND p.is_active = TRUE
            "#,
        )
        .bind(line_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase line".to_string()))
    }

    /// Header total always mirrors the sum of its line subtotals
    async fn refresh_header_total(&self, purchase_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE purchases
            SET total = (SELECT COALESCE(SUM(subtotal), 0)
                         FROM purchase_lines WHERE purchase_id = $1),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(purchase_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// After a line removal the material's current price tracks the most
    /// recent remaining active purchase line, then the baseline, and is left
    /// alone when neither exists.
    async fn fall_back_price(&self, farm_id: Uuid, raw_material_id: Uuid) -> AppResult<()> {
        let latest = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT pl.unit_price
            FROM purchase_lines pl
            JOIN purchases p ON p.id = pl.purchase_id
            WHERE p.farm_id = $1 AND pl.raw_material_id = $2 AND p.is_active = TRUE
            ORDER BY p.purchase_date DESC, pl.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .fetch_optional(&self.db)
        .await?;

        let fallback = match latest {
            Some(price) => Some(price),
            None => {
                sqlx::query_scalar::<_, Decimal>(
                    r#"
                    SELECT initial_price FROM stock_baselines
                    WHERE farm_id = $1 AND raw_material_id = $2
                    "#,
                )
                .bind(farm_id)
                .bind(raw_material_id)
                .fetch_optional(&self.db)
                .await?
            }
        };

        if let Some(price) = fallback {
            self.materials
                .apply_price_change(
                    farm_id,
                    raw_material_id,
                    price,
                    "price fallback after purchase line removal",
                )
                .await?;
        }

        Ok(())
    }

    async fn recalculate_and_cascade(&self, farm_id: Uuid, materials: &[Uuid]) -> AppResult<()> {
        for material in materials {
            self.stock.recalculate(farm_id, *material).await?;
        }
        for material in materials {
            self.recipes
                .recalculate_recipes_using(farm_id, *material)
                .await?;
        }
        Ok(())
    }

    fn distinct_materials(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
        let mut distinct = Vec::new();
        for id in ids {
            if !distinct.contains(&id) {
                distinct.push(id);
            }
        }
        distinct
    }

    fn snapshot<T: Serialize>(value: &T) -> AppResult<serde_json::Value> {
        serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))
    }
}
