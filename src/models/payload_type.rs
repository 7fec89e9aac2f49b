//! PayloadType: a category of transportable thing, keyed by human code.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayloadType {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub unit: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayloadType {
    pub code: String,
    pub description: String,
    pub unit: String,
}

impl PayloadType {
    pub async fn create(pool: &PgPool, new_type: NewPayloadType) -> Result<PayloadType> {
        let payload_type = sqlx::query_as::<_, PayloadType>(
            "INSERT INTO payload_types (code, description, unit) VALUES ($1, $2, $3) \
             RETURNING id, code, description, unit, created_at",
        )
        .bind(&new_type.code)
        .bind(&new_type.description)
        .bind(&new_type.unit)
        .fetch_one(pool)
        .await?;
        Ok(payload_type)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<PayloadType>> {
        let payload_type = sqlx::query_as::<_, PayloadType>(
            "SELECT id, code, description, unit, created_at FROM payload_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(payload_type)
    }

    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<PayloadType>> {
        let payload_type = sqlx::query_as::<_, PayloadType>(
            "SELECT id, code, description, unit, created_at FROM payload_types WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;
        Ok(payload_type)
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<PayloadType>> {
        let types = sqlx::query_as::<_, PayloadType>(
            "SELECT id, code, description, unit, created_at FROM payload_types ORDER BY code",
        )
        .fetch_all(pool)
        .await?;
        Ok(types)
    }

    pub async fn update(pool: &PgPool, id: i64, changes: NewPayloadType) -> Result<PayloadType> {
        let payload_type = sqlx::query_as::<_, PayloadType>(
            "UPDATE payload_types SET code = $2, description = $3, unit = $4 WHERE id = $1 \
             RETURNING id, code, description, unit, created_at",
        )
        .bind(id)
        .bind(&changes.code)
        .bind(&changes.description)
        .bind(&changes.unit)
        .fetch_one(pool)
        .await?;
        Ok(payload_type)
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM payload_types WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
