//! Outbox: durable queue of outbound envelopes decoupling commit from
//! publish.
//!
//! Entries are drained in increasing id order per client; duplicates are
//! permitted (downstream dedup by envelope kind + uuid). Entries that exhaust
//! `max_attempts` are stamped `dead_at` and never retried.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OutboxEntry {
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub kind: String,
    pub client_id: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub dead_at: Option<DateTime<Utc>>,
}

const OUTBOX_COLUMNS: &str =
    "id, topic, payload, kind, client_id, attempts, created_at, sent_at, dead_at";

impl OutboxEntry {
    /// Append an envelope; returns its id.
    pub async fn enqueue(
        pool: &PgPool,
        topic: &str,
        payload: &[u8],
        kind: &str,
        client_id: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO outbox (topic, payload, kind, client_id) VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(topic)
        .bind(payload)
        .bind(kind)
        .bind(client_id)
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    /// Pending entries in increasing id order, which is what preserves
    /// per-client FIFO at the drainer.
    pub async fn list_pending(pool: &PgPool, limit: i64) -> Result<Vec<OutboxEntry>> {
        let entries = sqlx::query_as::<_, OutboxEntry>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox \
             WHERE sent_at IS NULL AND dead_at IS NULL \
             ORDER BY id ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(entries)
    }

    pub async fn mark_sent(pool: &PgPool, id: i64) -> Result<()> {
        sqlx::query("UPDATE outbox SET sent_at = NOW(), attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a failed publish attempt; dead-letters the entry once it has
    /// reached `max_attempts`.
    pub async fn record_failure(pool: &PgPool, id: i64, max_attempts: i32) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, \
             dead_at = CASE WHEN attempts + 1 >= $2 THEN NOW() ELSE dead_at END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(max_attempts)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn pending_count(pool: &PgPool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox WHERE sent_at IS NULL AND dead_at IS NULL",
        )
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}
