//! Raw material service
//!
//! Feed ingredients tracked per farm with a current warehouse entry price.
//! All price transitions go through [`RawMaterialService::apply_price_change`],
//! which appends the price history record the purchase audit relies on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::ledger;
use shared::types::Pagination;
use shared::validation;

use crate::error::{AppError, AppResult};

/// Raw material service
#[derive(Clone)]
pub struct RawMaterialService {
    db: PgPool,
}

/// A feed ingredient
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RawMaterial {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub code: String,
    pub name: String,
    pub current_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one price transition
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PriceChangeRecord {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub raw_material_id: Uuid,
    pub previous_price: Decimal,
    pub new_price: Decimal,
    pub change_percent: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a raw material
#[derive(Debug, Deserialize)]
pub struct CreateRawMaterialInput {
    pub code: String,
    pub name: String,
    pub initial_price: Option<Decimal>,
}

/// Input for updating a raw material
#[derive(Debug, Deserialize)]
pub struct UpdateRawMaterialInput {
    pub name: Option<String>,
}

impl RawMaterialService {
    /// Create a new RawMaterialService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Register a raw material; the code must be unique within the farm.
    pub async fn create(
        &self,
        farm_id: Uuid,
        input: CreateRawMaterialInput,
    ) -> AppResult<RawMaterial> {
        if let Err(msg) = validation::validate_code(&input.code) {
            return Err(AppError::Validation {
                field: "code".to_string(),
                message: msg.to_string(),
                message_es: "El código debe tener de 3 a 10 caracteres alfanuméricos en mayúsculas"
                    .to_string(),
            });
        }
        if input.name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "name".to_string(),
                message: "Raw material name cannot be empty".to_string(),
                message_es: "El nombre de la materia prima no puede estar vacío".to_string(),
            });
        }
        let initial_price = input.initial_price.unwrap_or(Decimal::ZERO);
        if let Err(msg) = validation::validate_non_negative_price(initial_price) {
            return Err(AppError::Validation {
                field: "initial_price".to_string(),
                message: msg.to_string(),
                message_es: "El precio no puede ser negativo".to_string(),
            });
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM raw_materials WHERE farm_id = $1 AND code = $2)",
        )
        .bind(farm_id)
        .bind(&input.code)
        .fetch_one(&self.db)
        .await?;

        if exists {
            return Err(AppError::DuplicateEntry("raw material code".to_string()));
        }

        let material = sqlx::query_as::<_, RawMaterial>(
            r#"
            INSERT INTO raw_materials (farm_id, code, name, current_price)
            VALUES ($1, $2, $3, $4)
            RETURNING id, farm_id, code, name, current_price, created_at, updated_at
            "#,
        )
        .bind(farm_id)
        .bind(&input.code)
        .bind(input.name.trim())
        .bind(initial_price)
        .fetch_one(&self.db)
        .await?;

        Ok(material)
    }

    /// Update a raw material's descriptive fields
    pub async fn update(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        input: UpdateRawMaterialInput,
    ) -> AppResult<RawMaterial> {
        let existing = self.get(farm_id, raw_material_id).await?;
        let name = input.name.unwrap_or(existing.name);
        if name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "name".to_string(),
                message: "Raw material name cannot be empty".to_string(),
                message_es: "El nombre de la materia prima no puede estar vacío".to_string(),
            });
        }

        let material = sqlx::query_as::<_, RawMaterial>(
            r#"
            UPDATE raw_materials
            SET name = $1, updated_at = now()
            WHERE id = $2 AND farm_id = $3
            RETURNING id, farm_id, code, name, current_price, created_at, updated_at
            "#,
        )
        .bind(name.trim())
        .bind(raw_material_id)
        .bind(farm_id)
        .fetch_one(&self.db)
        .await?;

        Ok(material)
    }

    /// Get a raw material by id
    pub async fn get(&self, farm_id: Uuid, raw_material_id: Uuid) -> AppResult<RawMaterial> {
        sqlx::query_as::<_, RawMaterial>(
            r#"
            SELECT id, farm_id, code, name, current_price, created_at, updated_at
            FROM raw_materials
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(raw_material_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Raw material".to_string()))
    }

    /// List all raw materials of a farm
    pub async fn list(&self, farm_id: Uuid) -> AppResult<Vec<RawMaterial>> {
        let materials = sqlx::query_as::<_, RawMaterial>(
            r#"
            SELECT id, farm_id, code, name, current_price, created_at, updated_at
            FROM raw_materials
            WHERE farm_id = $1
            ORDER BY code
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(materials)
    }

    /// Current entry price of a raw material
    pub async fn current_price(&self, farm_id: Uuid, raw_material_id: Uuid) -> AppResult<Decimal> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT current_price FROM raw_materials WHERE id = $1 AND farm_id = $2",
        )
        .bind(raw_material_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Raw material".to_string()))
    }

    /// Last-write-wins price update. Appends a price history record and
    /// returns true when the price actually moved.
    pub async fn apply_price_change(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        new_price: Decimal,
        reason: &str,
    ) -> AppResult<bool> {
        if let Err(msg) = validation::validate_non_negative_price(new_price) {
            return Err(AppError::Validation {
                field: "new_price".to_string(),
                message: msg.to_string(),
                message_es: "El precio no puede ser negativo".to_string(),
            });
        }

        let previous = self.current_price(farm_id, raw_material_id).await?;
        if previous == new_price {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE raw_materials SET current_price = $1, updated_at = now() WHERE id = $2 AND farm_id = $3",
        )
        .bind(new_price)
        .bind(raw_material_id)
        .bind(farm_id)
        .execute(&self.db)
        .await?;

        let change_percent = ledger::price_change_percent(previous, new_price);
        sqlx::query(
            r#"
            INSERT INTO price_history (farm_id, raw_material_id, previous_price,
                                       new_price, change_percent, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .bind(previous)
        .bind(new_price)
        .bind(change_percent)
        .bind(reason)
        .execute(&self.db)
        .await?;

        Ok(true)
    }

    /// Price transition history of a raw material, newest first
    pub async fn price_history(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        page: Pagination,
    ) -> AppResult<Vec<PriceChangeRecord>> {
        let records = sqlx::query_as::<_, PriceChangeRecord>(
            r#"
            SELECT id, farm_id, raw_material_id, previous_price, new_price,
                   change_percent, reason, created_at
            FROM price_history
            WHERE farm_id = $1 AND raw_material_id = $2
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }
}
