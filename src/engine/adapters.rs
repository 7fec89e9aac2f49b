//! Adapters bridging the dispatcher's and poller's capability seams onto the
//! event bus and the store.

use crate::dispatch::Emitter;
use crate::engine::events::{
    Event, EventBus, OrderCancelledEvent, OrderCompletedEvent, OrderDispatchedEvent,
    OrderFailedEvent, OrderReceivedEvent, OrderStatusChangedEvent,
};
use crate::error::{Result, WarpathError};
use crate::models::Order;
use crate::rds::{OrderResolver, StatusEmitter};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// Bridges dispatcher emissions to the event bus.
pub struct DispatchEmitter {
    bus: Arc<EventBus>,
}

impl DispatchEmitter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Emitter for DispatchEmitter {
    async fn emit_order_received(
        &self,
        order_id: i64,
        external_uuid: &str,
        client_id: &str,
        order_type: &str,
        payload_type_code: &str,
        delivery_node: &str,
    ) {
        self.bus
            .emit(Event::OrderReceived(OrderReceivedEvent {
                order_id,
                external_uuid: external_uuid.to_string(),
                client_id: client_id.to_string(),
                order_type: order_type.to_string(),
                payload_type_code: payload_type_code.to_string(),
                delivery_node: delivery_node.to_string(),
            }))
            .await;
    }

    async fn emit_order_dispatched(
        &self,
        order_id: i64,
        rds_order_id: &str,
        previous_rds_order_id: &str,
        source_node: &str,
        dest_node: &str,
    ) {
        self.bus
            .emit(Event::OrderDispatched(OrderDispatchedEvent {
                order_id,
                rds_order_id: rds_order_id.to_string(),
                previous_rds_order_id: previous_rds_order_id.to_string(),
                source_node: source_node.to_string(),
                dest_node: dest_node.to_string(),
            }))
            .await;
    }

    async fn emit_order_failed(
        &self,
        order_id: i64,
        external_uuid: &str,
        client_id: &str,
        error_code: &str,
        detail: &str,
    ) {
        self.bus
            .emit(Event::OrderFailed(OrderFailedEvent {
                order_id,
                external_uuid: external_uuid.to_string(),
                client_id: client_id.to_string(),
                error_code: error_code.to_string(),
                detail: detail.to_string(),
            }))
            .await;
    }

    async fn emit_order_cancelled(
        &self,
        order_id: i64,
        external_uuid: &str,
        client_id: &str,
        reason: &str,
    ) {
        self.bus
            .emit(Event::OrderCancelled(OrderCancelledEvent {
                order_id,
                external_uuid: external_uuid.to_string(),
                client_id: client_id.to_string(),
                reason: reason.to_string(),
            }))
            .await;
    }

    async fn emit_order_completed(&self, order_id: i64, external_uuid: &str, client_id: &str) {
        self.bus
            .emit(Event::OrderCompleted(OrderCompletedEvent {
                order_id,
                external_uuid: external_uuid.to_string(),
                client_id: client_id.to_string(),
            }))
            .await;
    }
}

/// Bridges poller status changes to the event bus.
pub struct PollerEmitter {
    bus: Arc<EventBus>,
}

impl PollerEmitter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl StatusEmitter for PollerEmitter {
    async fn emit_order_status_changed(
        &self,
        order_id: i64,
        rds_order_id: &str,
        old_state: &str,
        new_state: &str,
        robot_id: &str,
        detail: &str,
    ) {
        self.bus
            .emit(Event::OrderStatusChanged(OrderStatusChangedEvent {
                order_id,
                rds_order_id: rds_order_id.to_string(),
                old_state: old_state.to_string(),
                new_state: new_state.to_string(),
                robot_id: robot_id.to_string(),
                detail: detail.to_string(),
            }))
            .await;
    }
}

/// Resolves external RDS order ids to internal order ids through the store.
pub struct DbOrderResolver {
    pool: PgPool,
}

impl DbOrderResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderResolver for DbOrderResolver {
    async fn resolve_rds_order_id(&self, rds_order_id: &str) -> Result<i64> {
        let order = Order::find_by_rds_order_id(&self.pool, rds_order_id)
            .await?
            .ok_or_else(|| {
                WarpathError::NotFound(format!("no order for RDS order {rds_order_id}"))
            })?;
        Ok(order.id)
    }
}
