//! Order: one transport intent, the central state machine of the system.
//!
//! All status transitions funnel through [`Order::update_status`], which
//! records an order-history row in the same transaction and refuses to move
//! an order out of a terminal status.

use crate::error::{Result, WarpathError};
use crate::state_machine::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    /// Edge-assigned identity; unique, drives idempotent reprocessing.
    pub external_uuid: String,
    pub client_id: String,
    pub factory_id: String,
    pub order_type: String,
    pub status: String,
    pub quantity: f64,
    pub pickup_node_name: String,
    pub delivery_node_name: String,
    pub priority: i32,
    pub payload_desc: String,
    pub payload_type_id: Option<i64>,
    pub source_node_id: Option<i64>,
    pub dest_node_id: Option<i64>,
    /// Empty until dispatched; unique among live orders once set.
    pub rds_order_id: String,
    /// Last observed external state.
    pub rds_state: String,
    pub robot_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub external_uuid: String,
    pub client_id: String,
    pub factory_id: String,
    pub order_type: String,
    pub quantity: f64,
    pub pickup_node_name: String,
    pub delivery_node_name: String,
    pub priority: i32,
    pub payload_desc: String,
    pub payload_type_id: Option<i64>,
    pub dest_node_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderHistoryEntry {
    pub id: i64,
    pub order_id: i64,
    pub status: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str = "id, external_uuid, client_id, factory_id, order_type, status, \
     quantity, pickup_node_name, delivery_node_name, priority, payload_desc, payload_type_id, \
     source_node_id, dest_node_id, rds_order_id, rds_state, robot_id, created_at, updated_at";

impl Order {
    pub fn parsed_status(&self) -> Result<OrderStatus> {
        self.status
            .parse()
            .map_err(WarpathError::StateTransitionError)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed" | "cancelled")
    }

    pub async fn create(pool: &PgPool, new_order: NewOrder) -> Result<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (external_uuid, client_id, factory_id, order_type, status, \
             quantity, pickup_node_name, delivery_node_name, priority, payload_desc, \
             payload_type_id, dest_node_id) \
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&new_order.external_uuid)
        .bind(&new_order.client_id)
        .bind(&new_order.factory_id)
        .bind(&new_order.order_type)
        .bind(new_order.quantity)
        .bind(&new_order.pickup_node_name)
        .bind(&new_order.delivery_node_name)
        .bind(new_order.priority)
        .bind(&new_order.payload_desc)
        .bind(new_order.payload_type_id)
        .bind(new_order.dest_node_id)
        .fetch_one(pool)
        .await?;
        Ok(order)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Order>> {
        let order =
            sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(order)
    }

    pub async fn find_by_external_uuid(pool: &PgPool, external_uuid: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE external_uuid = $1"
        ))
        .bind(external_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(order)
    }

    pub async fn find_by_rds_order_id(pool: &PgPool, rds_order_id: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE rds_order_id = $1 \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(rds_order_id)
        .fetch_optional(pool)
        .await?;
        Ok(order)
    }

    /// Transition an order and append the history row in one transaction.
    ///
    /// Returns `false` without writing anything when the order is already in
    /// a terminal status (idempotent replay) or does not exist.
    pub async fn update_status(
        pool: &PgPool,
        id: i64,
        status: OrderStatus,
        detail: &str,
    ) -> Result<bool> {
        let mut tx = pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE orders SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("INSERT INTO order_history (order_id, status, detail) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(status.to_string())
            .bind(detail)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Delivery-receipt sequence: `Confirmed` with the receipt detail, then
    /// `Completed`, both history rows in one transaction.
    pub async fn confirm_and_complete(pool: &PgPool, id: i64, receipt_detail: &str) -> Result<bool> {
        let mut tx = pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE orders SET status = 'completed', updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("INSERT INTO order_history (order_id, status, detail) VALUES ($1, 'confirmed', $2)")
            .bind(id)
            .bind(receipt_detail)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO order_history (order_id, status, detail) VALUES ($1, 'completed', 'order completed')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn set_source_node(pool: &PgPool, id: i64, node_id: i64) -> Result<()> {
        sqlx::query("UPDATE orders SET source_node_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(node_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_destination(
        pool: &PgPool,
        id: i64,
        dest_node_id: i64,
        delivery_node_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET dest_node_id = $2, delivery_node_name = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(dest_node_id)
        .bind(delivery_node_name)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record the external identifiers: RDS order id, last observed RDS
    /// state, and the assigned robot once known.
    pub async fn set_rds(
        pool: &PgPool,
        id: i64,
        rds_order_id: &str,
        rds_state: &str,
        robot_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET rds_order_id = $2, rds_state = $3, \
             robot_id = CASE WHEN $4 = '' THEN robot_id ELSE $4 END, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(rds_order_id)
        .bind(rds_state)
        .bind(robot_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// RDS order ids of all non-terminal dispatched orders; used at startup
    /// to repopulate the poller's tracked set.
    pub async fn list_dispatched_rds_order_ids(pool: &PgPool) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT rds_order_id FROM orders \
             WHERE rds_order_id <> '' \
               AND status NOT IN ('completed', 'failed', 'cancelled') \
             ORDER BY id",
        )
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }

    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(orders)
    }

    pub async fn history(pool: &PgPool, order_id: i64) -> Result<Vec<OrderHistoryEntry>> {
        let entries = sqlx::query_as::<_, OrderHistoryEntry>(
            "SELECT id, order_id, status, detail, created_at FROM order_history \
             WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_status(status: &str) -> Order {
        Order {
            id: 1,
            external_uuid: "u-1".to_string(),
            client_id: "edge-1".to_string(),
            factory_id: "factory-1".to_string(),
            order_type: "retrieve".to_string(),
            status: status.to_string(),
            quantity: 1.0,
            pickup_node_name: String::new(),
            delivery_node_name: "L1".to_string(),
            priority: 5,
            payload_desc: String::new(),
            payload_type_id: Some(1),
            source_node_id: None,
            dest_node_id: Some(2),
            rds_order_id: String::new(),
            rds_state: String::new(),
            robot_id: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parsed_status() {
        assert_eq!(
            order_with_status("in_transit").parsed_status().unwrap(),
            OrderStatus::InTransit
        );
        assert!(order_with_status("bogus").parsed_status().is_err());
    }

    #[test]
    fn test_is_terminal() {
        assert!(order_with_status("completed").is_terminal());
        assert!(order_with_status("failed").is_terminal());
        assert!(order_with_status("cancelled").is_terminal());
        assert!(!order_with_status("dispatched").is_terminal());
    }
}
