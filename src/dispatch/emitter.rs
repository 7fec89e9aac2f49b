//! Seam between the dispatcher and the engine's event bus.
//!
//! The dispatcher never sees the bus' concrete type; the engine hands it this
//! capability, which keeps the dispatcher testable with fakes.

use async_trait::async_trait;

#[async_trait]
pub trait Emitter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn emit_order_received(
        &self,
        order_id: i64,
        external_uuid: &str,
        client_id: &str,
        order_type: &str,
        payload_type_code: &str,
        delivery_node: &str,
    );

    /// `previous_rds_order_id` is non-empty on redirects, so the engine can
    /// untrack the superseded external order before tracking the new one.
    async fn emit_order_dispatched(
        &self,
        order_id: i64,
        rds_order_id: &str,
        previous_rds_order_id: &str,
        source_node: &str,
        dest_node: &str,
    );

    async fn emit_order_failed(
        &self,
        order_id: i64,
        external_uuid: &str,
        client_id: &str,
        error_code: &str,
        detail: &str,
    );

    async fn emit_order_cancelled(
        &self,
        order_id: i64,
        external_uuid: &str,
        client_id: &str,
        reason: &str,
    );

    async fn emit_order_completed(&self, order_id: i64, external_uuid: &str, client_id: &str);
}
