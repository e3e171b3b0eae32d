//! Stock alert service for recording depletion alerts
//!
//! The ledger engine reports every recalculated physical quantity here; a
//! quantity at or below zero opens an alert for the raw material and a
//! recovery clears it. Delivery of the alert (chat, email) is handled by an
//! external collaborator reading the open alerts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppResult;

/// Stock alert service
#[derive(Clone)]
pub struct StockAlertService {
    db: PgPool,
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Cleared,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Cleared => "cleared",
        }
    }
}

/// A recorded depletion alert
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockAlert {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub raw_material_id: Uuid,
    pub quantity: Decimal,
    pub status: String,
    pub triggered_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

impl StockAlertService {
    /// Create a new StockAlertService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Reconcile the alert state of a raw material with its freshly
    /// recalculated physical quantity: at or below zero opens (or refreshes)
    /// the alert, above zero clears it.
    pub async fn sync(
        &self,
        farm_id: Uuid,
        raw_material_id: Uuid,
        real_quantity: Decimal,
    ) -> AppResult<()> {
        if real_quantity <= Decimal::ZERO {
            let refreshed = sqlx::query(
                r#"
                UPDATE stock_alerts
                SET quantity = $3, triggered_at = now()
                WHERE farm_id = $1 AND raw_material_id = $2 AND status = $4
                "#,
            )
            .bind(farm_id)
            .bind(raw_material_id)
            .bind(real_quantity)
            .bind(AlertStatus::Open.as_str())
            .execute(&self.db)
            .await?;

            if refreshed.rows_affected() == 0 {
                sqlx::query(
                    r#"
                    INSERT INTO stock_alerts (farm_id, raw_material_id, quantity, status)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(farm_id)
                .bind(raw_material_id)
                .bind(real_quantity)
                .bind(AlertStatus::Open.as_str())
                .execute(&self.db)
                .await?;

                tracing::info!(
                    "Stock depleted for raw material {} on farm {} ({})",
                    raw_material_id,
                    farm_id,
                    real_quantity
                );
            }
        } else {
            sqlx::query(
                r#"
                UPDATE stock_alerts
                SET status = $3, cleared_at = now()
                WHERE farm_id = $1 AND raw_material_id = $2 AND status = $4
                "#,
            )
            .bind(farm_id)
            .bind(raw_material_id)
            .bind(AlertStatus::Cleared.as_str())
            .bind(AlertStatus::Open.as_str())
            .execute(&self.db)
            .await?;
        }

        Ok(())
    }

    /// List open alerts for a farm
    pub async fn open_alerts(&self, farm_id: Uuid) -> AppResult<Vec<StockAlert>> {
        let alerts = sqlx::query_as::<_, StockAlert>(
            r#"
            SELECT id, farm_id, raw_material_id, quantity, status, triggered_at, cleared_at
            FROM stock_alerts
            WHERE farm_id = $1 AND status = $2
            ORDER BY triggered_at DESC
            "#,
        )
        .bind(farm_id)
        .bind(AlertStatus::Open.as_str())
        .fetch_all(&self.db)
        .await?;

        Ok(alerts)
    }
}
