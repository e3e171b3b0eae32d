//! Recipe (feed formula) service
//!
//! A recipe is a fixed-weight mixture of raw materials targeted at an animal
//! category; one production batch yields the recipe's base weight. The
//! stored line and total costs are re-derived from current material prices
//! whenever any constituent price changes (the cost cascade).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::ledger;
use shared::validation;

use crate::error::{AppError, AppResult};

/// Recipe service
#[derive(Clone)]
pub struct RecipeService {
    db: PgPool,
}

/// Animal category a recipe is formulated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimalCategory {
    Starter,
    Grower,
    Finisher,
    Breeder,
}

impl AnimalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimalCategory::Starter => "starter",
            AnimalCategory::Grower => "grower",
            AnimalCategory::Finisher => "finisher",
            AnimalCategory::Breeder => "breeder",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "starter" => Some(AnimalCategory::Starter),
            "grower" => Some(AnimalCategory::Grower),
            "finisher" => Some(AnimalCategory::Finisher),
            "breeder" => Some(AnimalCategory::Breeder),
            _ => None,
        }
    }
}

/// A feed formula
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Recipe {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub code: String,
    pub name: String,
    pub animal_category: String,
    pub base_weight_kg: Decimal,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One material line of a recipe
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RecipeLine {
    pub id: Uuid,
    pub recipe_id: Uuid,
    pub raw_material_id: Uuid,
    pub quantity_kg: Decimal,
    pub percentage: Decimal,
    pub unit_price: Decimal,
    pub cost: Decimal,
}

/// A recipe with its lines
#[derive(Debug, Clone, Serialize)]
pub struct RecipeWithLines {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub lines: Vec<RecipeLine>,
}

/// Input for one recipe line
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeLineInput {
    pub raw_material_id: Uuid,
    pub quantity_kg: Decimal,
}

/// Input for creating a recipe
#[derive(Debug, Deserialize)]
pub struct CreateRecipeInput {
    pub code: String,
    pub name: String,
    pub animal_category: String,
    pub base_weight_kg: Option<Decimal>,
    pub lines: Vec<RecipeLineInput>,
}

/// Input for updating a recipe
#[derive(Debug, Deserialize)]
pub struct UpdateRecipeInput {
    pub name: Option<String>,
    pub animal_category: Option<String>,
    pub lines: Option<Vec<RecipeLineInput>>,
}

/// Default batch weight in kg
const DEFAULT_BASE_WEIGHT: u32 = 1000;

struct PricedLine {
    raw_material_id: Uuid,
    quantity_kg: Decimal,
    percentage: Decimal,
    unit_price: Decimal,
    cost: Decimal,
}

impl RecipeService {
    /// Create a new RecipeService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a recipe; line weights must sum exactly to the base weight.
    pub async fn create_recipe(
        &self,
        farm_id: Uuid,
        input: CreateRecipeInput,
    ) -> AppResult<RecipeWithLines> {
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
                message: "Recipe name cannot be empty".to_string(),
                message_es: "El nombre de la ración no puede estar vacío".to_string(),
            });
        }
        let category = Self::parse_category(&input.animal_category)?;
        let base_weight = input
            .base_weight_kg
            .unwrap_or_else(|| Decimal::from(DEFAULT_BASE_WEIGHT));
        Self::validate_composition(&input.lines, base_weight)?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM recipes WHERE farm_id = $1 AND code = $2)",
        )
        .bind(farm_id)
        .bind(&input.code)
        .fetch_one(&self.db)
        .await?;

        if exists {
            return Err(AppError::DuplicateEntry("recipe code".to_string()));
        }

        let priced = self.price_lines(farm_id, &input.lines, base_weight).await?;
        let total_cost: Decimal = priced.iter().map(|l| l.cost).sum();

        let mut tx = self.db.begin().await?;

        let recipe_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO recipes (farm_id, code, name, animal_category, base_weight_kg, total_cost)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(farm_id)
        .bind(&input.code)
        .bind(input.name.trim())
        .bind(category.as_str())
        .bind(base_weight)
        .bind(total_cost)
        .fetch_one(&mut *tx)
        .await?;

        for line in &priced {
            sqlx::query(
                r#"
                INSERT INTO recipe_lines (recipe_id, raw_material_id, quantity_kg,
                                          percentage, unit_price, cost)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(recipe_id)
            .bind(line.raw_material_id)
            .bind(line.quantity_kg)
            .bind(line.percentage)
            .bind(line.unit_price)
            .bind(line.cost)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_recipe(farm_id, recipe_id).await
    }

    /// Update a recipe; when new lines are supplied the composition is
    /// re-validated and the lines are replaced wholesale.
    pub async fn update_recipe(
        &self,
        farm_id: Uuid,
        recipe_id: Uuid,
        input: UpdateRecipeInput,
    ) -> AppResult<RecipeWithLines> {
        let existing = self.get_recipe(farm_id, recipe_id).await?;

        let name = input.name.unwrap_or(existing.recipe.name);
        if name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "name".to_string(),
                message: "Recipe name cannot be empty".to_string(),
                message_es: "El nombre de la ración no puede estar vacío".to_string(),
            });
        }
        let category = match input.animal_category {
            Some(ref c) => Self::parse_category(c)?,
            None => Self::parse_category(&existing.recipe.animal_category)?,
        };

        let mut tx = self.db.begin().await?;

        if let Some(lines) = input.lines {
            Self::validate_composition(&lines, existing.recipe.base_weight_kg)?;
            let priced = self
                .price_lines(farm_id, &lines, existing.recipe.base_weight_kg)
                .await?;
            let total_cost: Decimal = priced.iter().map(|l| l.cost).sum();

            sqlx::query("DELETE FROM recipe_lines WHERE recipe_id = $1")
                .bind(recipe_id)
                .execute(&mut *tx)
                .await?;

            for line in &priced {
                sqlx::query(
                    r#"
                    INSERT INTO recipe_lines (recipe_id, raw_material_id, quantity_kg,
                                              percentage, unit_price, cost)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(recipe_id)
                .bind(line.raw_material_id)
                .bind(line.quantity_kg)
                .bind(line.percentage)
                .bind(line.unit_price)
                .bind(line.cost)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r#"
                UPDATE recipes
                SET name = $1, animal_category = $2, total_cost = $3, updated_at = now()
                WHERE id = $4
                "#,
            )
            .bind(name.trim())
            .bind(category.as_str())
            .bind(total_cost)
            .bind(recipe_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE recipes
                SET name = $1, animal_category = $2, updated_at = now()
                WHERE id = $3
                "#,
            )
            .bind(name.trim())
            .bind(category.as_str())
            .bind(recipe_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_recipe(farm_id, recipe_id).await
    }

    /// Re-price every line of a recipe at the current material prices and
    /// refresh the stored total cost.
    pub async fn recalculate_recipe(&self, recipe_id: Uuid) -> AppResult<Recipe> {
        let recipe = sqlx::query_as::<_, Recipe>(
            r#"
            SELECT id, farm_id, code, name, animal_category, base_weight_kg, total_cost,
                   created_at, updated_at
            FROM recipes
            WHERE id = $1
            "#,
        )
        .bind(recipe_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Recipe".to_string()))?;

        let lines = sqlx::query_as::<_, (Uuid, Decimal, Decimal)>(
            r#"
            SELECT rl.id, rl.quantity_kg, rm.current_price
            FROM recipe_lines rl
            JOIN raw_materials rm ON rm.id = rl.raw_material_id
            WHERE rl.recipe_id = $1
            "#,
        )
        .bind(recipe_id)
        .fetch_all(&self.db)
        .await?;

        let mut tx = self.db.begin().await?;
        let mut total_cost = Decimal::ZERO;

        for (line_id, quantity_kg, current_price) in &lines {
            let cost = *quantity_kg * *current_price;
            total_cost += cost;

            sqlx::query("UPDATE recipe_lines SET unit_price = $1, cost = $2 WHERE id = $3")
                .bind(current_price)
                .bind(cost)
                .bind(line_id)
                .execute(&mut *tx)
                .await?;
        }

        let updated = sqlx::query_as::<_, Recipe>(
            r#"
            UPDATE recipes SET total_cost = $1, updated_at = now()
            WHERE id = $2
            RETURNING id, farm_id, code, name, animal_category, base_weight_kg, total_cost,
                      created_at, updated_at
            "#,
        )
        .bind(total_cost)
        .bind(recipe.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(updated)
    }

    /// Cost cascade: recompute every recipe of the farm that references the
    /// given raw material. Returns the number of recipes touched.
    pub async fn recalculate_recipes_using(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
    ) -> AppResult<usize> {
        let recipe_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT r.id
            FROM recipes r
            JOIN recipe_lines rl ON rl.recipe_id = r.id
            WHERE r.farm_id = $1 AND rl.raw_material_id = $2
            "#,
        )
        .bind(farm_id)
        .bind(raw_material_id)
        .fetch_all(&self.db)
        .await?;

        for id in &recipe_ids {
            self.recalculate_recipe(*id).await?;
        }

        Ok(recipe_ids.len())
    }

    /// Get a recipe with its lines
    pub async fn get_recipe(&self, farm_id: Uuid, recipe_id: Uuid) -> AppResult<RecipeWithLines> {
        let recipe = sqlx::query_as::<_, Recipe>(
            r#"
            SELECT id, farm_id, code, name, animal_category, base_weight_kg, total_cost,
                   created_at, updated_at
            FROM recipes
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(recipe_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Recipe".to_string()))?;

        let lines = sqlx::query_as::<_, RecipeLine>(
            r#"
            SELECT id, recipe_id, raw_material_id, quantity_kg, percentage, unit_price, cost
            FROM recipe_lines
            WHERE recipe_id = $1
            ORDER BY quantity_kg DESC
            "#,
        )
        .bind(recipe_id)
        .fetch_all(&self.db)
        .await?;

        Ok(RecipeWithLines { recipe, lines })
    }

    /// List all recipes of a farm
    pub async fn list_recipes(&self, farm_id: Uuid) -> AppResult<Vec<Recipe>> {
        let recipes = sqlx::query_as::<_, Recipe>(
            r#"
            SELECT id, farm_id, code, name, animal_category, base_weight_kg, total_cost,
                   created_at, updated_at
            FROM recipes
            WHERE farm_id = $1
            ORDER BY code
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(recipes)
    }

    fn parse_category(s: &str) -> AppResult<AnimalCategory> {
        AnimalCategory::from_str(s).ok_or_else(|| AppError::Validation {
            field: "animal_category".to_string(),
            message: format!("Unknown animal category '{}'", s),
            message_es: format!("Categoría de animal desconocida '{}'", s),
        })
    }

    fn validate_composition(lines: &[RecipeLineInput], base_weight: Decimal) -> AppResult<()> {
        let weights: Vec<Decimal> = lines.iter().map(|l| l.quantity_kg).collect();
        if let Err(msg) = validation::validate_recipe_composition(&weights, base_weight) {
            let total: Decimal = weights.iter().sum();
            return Err(AppError::Validation {
                field: "lines".to_string(),
                message: format!("{} (expected {} kg, got {} kg)", msg, base_weight, total),
                message_es: format!(
                    "Los pesos de las líneas deben sumar {} kg, suman {} kg",
                    base_weight, total
                ),
            });
        }
        Ok(())
    }

    /// Price the input lines at current material prices. An unknown raw
    /// material reference is a validation error.
    async fn price_lines(
        &self,
        farm_id: Uuid,
        lines: &[RecipeLineInput],
        base_weight: Decimal,
    ) -> AppResult<Vec<PricedLine>> {
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let current_price = sqlx::query_scalar::<_, Decimal>(
                "SELECT current_price FROM raw_materials WHERE id = $1 AND farm_id = $2",
            )
            .bind(line.raw_material_id)
            .bind(farm_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::Validation {
                field: "lines".to_string(),
                message: format!("Unknown raw material {}", line.raw_material_id),
                message_es: format!("Materia prima desconocida {}", line.raw_material_id),
            })?;

            priced.push(PricedLine {
                raw_material_id: line.raw_material_id,
                quantity_kg: line.quantity_kg,
                percentage: ledger::line_percentage(line.quantity_kg, base_weight),
                unit_price: current_price,
                cost: line.quantity_kg * current_price,
            });
        }
        Ok(priced)
    }
}
