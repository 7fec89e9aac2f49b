//! Node: a named location on the factory floor with a 1:1 RDS location.

use crate::error::{Result, WarpathError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub rds_location: String,
    pub node_type: String,
    pub zone: String,
    /// 0 means unbounded.
    pub capacity: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub rds_location: String,
    pub node_type: String,
    pub zone: String,
    pub capacity: i64,
    pub enabled: bool,
}

const NODE_COLUMNS: &str =
    "id, name, rds_location, node_type, zone, capacity, enabled, created_at, updated_at";

impl Node {
    pub async fn create(pool: &PgPool, new_node: NewNode) -> Result<Node> {
        let node = sqlx::query_as::<_, Node>(&format!(
            "INSERT INTO nodes (name, rds_location, node_type, zone, capacity, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {NODE_COLUMNS}"
        ))
        .bind(&new_node.name)
        .bind(&new_node.rds_location)
        .bind(&new_node.node_type)
        .bind(&new_node.zone)
        .bind(new_node.capacity)
        .bind(new_node.enabled)
        .fetch_one(pool)
        .await?;
        Ok(node)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Node>> {
        let node =
            sqlx::query_as::<_, Node>(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1"))
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(node)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Node>> {
        let node =
            sqlx::query_as::<_, Node>(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE name = $1"))
                .bind(name)
                .fetch_optional(pool)
                .await?;
        Ok(node)
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<Node>> {
        let nodes =
            sqlx::query_as::<_, Node>(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY name"))
                .fetch_all(pool)
                .await?;
        Ok(nodes)
    }

    pub async fn update(pool: &PgPool, id: i64, changes: NewNode) -> Result<Node> {
        let node = sqlx::query_as::<_, Node>(&format!(
            "UPDATE nodes SET name = $2, rds_location = $3, node_type = $4, zone = $5, \
             capacity = $6, enabled = $7, updated_at = NOW() WHERE id = $1 \
             RETURNING {NODE_COLUMNS}"
        ))
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.rds_location)
        .bind(&changes.node_type)
        .bind(&changes.zone)
        .bind(changes.capacity)
        .bind(changes.enabled)
        .fetch_one(pool)
        .await?;
        Ok(node)
    }

    /// Delete a node. Refused while any non-terminal order references it.
    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
        let referencing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders \
             WHERE (source_node_id = $1 OR dest_node_id = $1) \
               AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        if referencing > 0 {
            return Err(WarpathError::ValidationError(format!(
                "node {id} is referenced by {referencing} active order(s)"
            )));
        }

        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enabled storage node with remaining capacity for a new payload.
    /// Ties break on fewest current payloads, then smallest node id.
    pub async fn find_storage_destination(pool: &PgPool) -> Result<Option<Node>> {
        let node = sqlx::query_as::<_, Node>(&format!(
            "SELECT {cols} FROM nodes n \
             LEFT JOIN payloads p ON p.node_id = n.id \
             WHERE n.enabled AND n.node_type = 'storage' \
             GROUP BY n.id \
             HAVING n.capacity = 0 OR COUNT(p.id) < n.capacity \
             ORDER BY COUNT(p.id) ASC, n.id ASC \
             LIMIT 1",
            cols = "n.id, n.name, n.rds_location, n.node_type, n.zone, n.capacity, n.enabled, \
                    n.created_at, n.updated_at"
        ))
        .fetch_optional(pool)
        .await?;
        Ok(node)
    }

    pub async fn payload_count(pool: &PgPool, id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payloads WHERE node_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
