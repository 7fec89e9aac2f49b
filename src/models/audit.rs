//! Append-only audit log.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub entity_kind: String,
    pub entity_id: i64,
    pub action: String,
    pub old_value: String,
    pub new_value: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub async fn append(
        pool: &PgPool,
        entity_kind: &str,
        entity_id: i64,
        action: &str,
        old_value: &str,
        new_value: &str,
        actor: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (entity_kind, entity_id, action, old_value, new_value, actor) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entity_kind)
        .bind(entity_id)
        .bind(action)
        .bind(old_value)
        .bind(new_value)
        .bind(actor)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, entity_kind, entity_id, action, old_value, new_value, actor, created_at \
             FROM audit_log ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(entries)
    }
}
