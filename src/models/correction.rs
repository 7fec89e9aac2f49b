//! Corrections: administrative inventory adjustments.
//!
//! Each correction is recorded as a row and applied to payload state through
//! the node-state manager so the cache stays coherent.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Correction {
    pub id: i64,
    /// One of add | remove | move | adjust.
    pub correction_type: String,
    pub node_id: i64,
    pub payload_type_id: Option<i64>,
    pub payload_id: Option<i64>,
    pub quantity: f64,
    pub reason: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCorrection {
    pub correction_type: String,
    pub node_id: i64,
    pub payload_type_id: Option<i64>,
    pub payload_id: Option<i64>,
    pub quantity: f64,
    pub reason: String,
    pub actor: String,
}

impl Correction {
    pub async fn create(pool: &PgPool, new_correction: NewCorrection) -> Result<Correction> {
        let correction = sqlx::query_as::<_, Correction>(
            "INSERT INTO corrections \
             (correction_type, node_id, payload_type_id, payload_id, quantity, reason, actor) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, correction_type, node_id, payload_type_id, payload_id, quantity, \
                       reason, actor, created_at",
        )
        .bind(&new_correction.correction_type)
        .bind(new_correction.node_id)
        .bind(new_correction.payload_type_id)
        .bind(new_correction.payload_id)
        .bind(new_correction.quantity)
        .bind(&new_correction.reason)
        .bind(&new_correction.actor)
        .fetch_one(pool)
        .await?;
        Ok(correction)
    }

    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<Correction>> {
        let corrections = sqlx::query_as::<_, Correction>(
            "SELECT id, correction_type, node_id, payload_type_id, payload_id, quantity, \
                    reason, actor, created_at \
             FROM corrections ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(corrections)
    }
}
