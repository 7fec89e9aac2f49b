//! Payload: a physical item currently located at some node.
//!
//! The claim column implements exclusive reservation by an order. A claim
//! never moves a payload; `node_id` changes only on confirmed physical
//! receipt.

use crate::error::{Result, WarpathError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payload {
    pub id: i64,
    pub payload_type_id: i64,
    /// NULL while physically in transit.
    pub node_id: Option<i64>,
    pub is_partial: bool,
    pub delivered_at: DateTime<Utc>,
    pub claimed_by: Option<i64>,
    pub notes: String,
}

/// Payload row joined with its type code, for node listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayloadWithType {
    pub id: i64,
    pub payload_type_id: i64,
    pub payload_type_code: String,
    pub node_id: Option<i64>,
    pub is_partial: bool,
    pub delivered_at: DateTime<Utc>,
    pub claimed_by: Option<i64>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayload {
    pub payload_type_id: i64,
    pub node_id: Option<i64>,
    pub is_partial: bool,
    pub notes: String,
}

const PAYLOAD_COLUMNS: &str =
    "id, payload_type_id, node_id, is_partial, delivered_at, claimed_by, notes";

impl Payload {
    pub async fn create(pool: &PgPool, new_payload: NewPayload) -> Result<Payload> {
        let payload = sqlx::query_as::<_, Payload>(&format!(
            "INSERT INTO payloads (payload_type_id, node_id, is_partial, notes) \
             VALUES ($1, $2, $3, $4) RETURNING {PAYLOAD_COLUMNS}"
        ))
        .bind(new_payload.payload_type_id)
        .bind(new_payload.node_id)
        .bind(new_payload.is_partial)
        .bind(&new_payload.notes)
        .fetch_one(pool)
        .await?;
        Ok(payload)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Payload>> {
        let payload = sqlx::query_as::<_, Payload>(&format!(
            "SELECT {PAYLOAD_COLUMNS} FROM payloads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(payload)
    }

    pub async fn list_by_node(pool: &PgPool, node_id: i64) -> Result<Vec<PayloadWithType>> {
        let payloads = sqlx::query_as::<_, PayloadWithType>(
            "SELECT p.id, p.payload_type_id, pt.code AS payload_type_code, p.node_id, \
                    p.is_partial, p.delivered_at, p.claimed_by, p.notes \
             FROM payloads p \
             JOIN payload_types pt ON pt.id = p.payload_type_id \
             WHERE p.node_id = $1 \
             ORDER BY p.delivered_at, p.id",
        )
        .bind(node_id)
        .fetch_all(pool)
        .await?;
        Ok(payloads)
    }

    /// Ids of payloads currently claimed by an order. Collected as a list so
    /// the caller can apply unclaims row-by-row without an open cursor.
    pub async fn ids_claimed_by(pool: &PgPool, order_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM payloads WHERE claimed_by = $1")
            .bind(order_id)
            .fetch_all(pool)
            .await?;
        Ok(ids)
    }

    pub async fn list_claimed_by(pool: &PgPool, order_id: i64) -> Result<Vec<Payload>> {
        let payloads = sqlx::query_as::<_, Payload>(&format!(
            "SELECT {PAYLOAD_COLUMNS} FROM payloads WHERE claimed_by = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(pool)
        .await?;
        Ok(payloads)
    }

    /// Compare-and-set claim: succeeds only when the payload is unclaimed.
    pub async fn claim(pool: &PgPool, id: i64, order_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE payloads SET claimed_by = $2 WHERE id = $1 AND claimed_by IS NULL",
        )
        .bind(id)
        .bind(order_id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WarpathError::AlreadyClaimed);
        }
        Ok(())
    }

    /// Unconditionally release a claim.
    pub async fn unclaim(pool: &PgPool, id: i64) -> Result<()> {
        sqlx::query("UPDATE payloads SET claimed_by = NULL WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Unclaimed payload of the given type with the earliest `delivered_at`
    /// (ties break on smallest id), at an enabled node. The row is not
    /// modified; the caller follows up with `claim`.
    pub async fn find_source_fifo(
        pool: &PgPool,
        payload_type_code: &str,
    ) -> Result<Option<Payload>> {
        let payload = sqlx::query_as::<_, Payload>(
            "SELECT p.id, p.payload_type_id, p.node_id, p.is_partial, p.delivered_at, \
                    p.claimed_by, p.notes \
             FROM payloads p \
             JOIN payload_types pt ON pt.id = p.payload_type_id \
             JOIN nodes n ON n.id = p.node_id \
             WHERE pt.code = $1 AND p.claimed_by IS NULL AND n.enabled \
             ORDER BY p.delivered_at ASC, p.id ASC \
             LIMIT 1",
        )
        .bind(payload_type_code)
        .fetch_optional(pool)
        .await?;
        Ok(payload)
    }

    /// Relocate a payload on confirmed physical receipt: sets the node,
    /// releases any claim, and restamps `delivered_at`.
    pub async fn move_to(pool: &PgPool, id: i64, node_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE payloads SET node_id = $2, claimed_by = NULL, delivered_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(node_id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WarpathError::NotFound(format!("payload {id}")));
        }
        Ok(())
    }

    /// Flag a payload as a partial container after an administrative count.
    pub async fn mark_partial(pool: &PgPool, id: i64, notes: &str) -> Result<()> {
        let result = sqlx::query("UPDATE payloads SET is_partial = TRUE, notes = $2 WHERE id = $1")
            .bind(id)
            .bind(notes)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WarpathError::NotFound(format!("payload {id}")));
        }
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM payloads WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
