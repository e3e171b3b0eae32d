//! Audit trail service
//!
//! Append-only record of create/delete/restore/bulk-delete actions on
//! purchases and production runs, with before/after snapshots of the
//! mutated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppResult;

/// Audit service for recording mutations
#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

/// Audited action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Deleted,
    Restored,
    BulkDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Deleted => "deleted",
            AuditAction::Restored => "restored",
            AuditAction::BulkDeleted => "bulk_deleted",
        }
    }
}

/// One audit trail entry
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub before_snapshot: Option<serde_json::Value>,
    pub after_snapshot: Option<serde_json::Value>,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl AuditService {
    /// Create a new AuditService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Append one audit entry
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        farm_id: Uuid,
        actor_id: Uuid,
        action: AuditAction,
        entity_type: &str,
        entity_id: Option<Uuid>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> AppResult<AuditEntry> {
        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_log (farm_id, action, entity_type, entity_id,
                                   before_snapshot, after_snapshot, actor_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, farm_id, action, entity_type, entity_id,
                      before_snapshot, after_snapshot, actor_id, created_at
            "#,
        )
        .bind(farm_id)
        .bind(action.as_str())
        .bind(entity_type)
        .bind(entity_id)
        .bind(before)
        .bind(after)
        .bind(actor_id)
        .fetch_one(&self.db)
        .await?;

        Ok(entry)
    }

    /// Audit history of one record, newest first
    pub async fn list_for_entity(
        &self,
        farm_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
    ) -> AppResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, farm_id, action, entity_type, entity_id,
                   before_snapshot, after_snapshot, actor_id, created_at
            FROM audit_log
            WHERE farm_id = $1 AND entity_type = $2 AND entity_id = $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(farm_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }
}
