//! Event reactions: poller tracking, RDS state mapping, inventory transfer on
//! completion, and audit writes.

use crate::engine::events::{
    CorrectionAppliedEvent, Event, EventBus, EventType, NodeUpdatedEvent, OrderCancelledEvent,
    OrderCompletedEvent, OrderDispatchedEvent, OrderFailedEvent, OrderReceivedEvent,
    OrderStatusChangedEvent, PayloadChangedEvent,
};
use crate::messaging::envelope::{
    dispatch_topic, DeliveredReply, Envelope, UpdateReply, WaybillReply, KIND_DELIVERED,
    KIND_UPDATE, KIND_WAYBILL,
};
use crate::models::{AuditEntry, NewPayload, Order, OutboxEntry, Payload, PayloadType};
use crate::nodestate::Manager;
use crate::rds::{OrderState, Poller};
use crate::state_machine::OrderStatus;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

/// External RDS state -> internal order status. States the core cannot parse
/// map to Dispatched at the call site.
pub fn map_rds_state(state: OrderState) -> OrderStatus {
    match state {
        OrderState::Created | OrderState::ToBeDispatched => OrderStatus::Dispatched,
        OrderState::Running => OrderStatus::InTransit,
        OrderState::Finished => OrderStatus::Delivered,
        OrderState::Failed => OrderStatus::Failed,
        OrderState::Stopped => OrderStatus::Cancelled,
    }
}

/// Holds everything the event reactions need.
pub(crate) struct Reactor {
    pub pool: PgPool,
    pub poller: Arc<Poller>,
    pub nodestate: Arc<Manager>,
    pub bus: Arc<EventBus>,
    pub factory_id: String,
    pub dispatch_topic_prefix: String,
}

/// Register all engine reactions on the bus, in the order they must run.
pub(crate) async fn wire_event_handlers(reactor: Arc<Reactor>) {
    let bus = Arc::clone(&reactor.bus);

    // Dispatched orders enter (and superseded ones leave) the poller.
    {
        let reactor = Arc::clone(&reactor);
        bus.subscribe_types(
            vec![EventType::OrderDispatched],
            Box::new(move |event| {
                let reactor = Arc::clone(&reactor);
                Box::pin(async move {
                    if let Event::OrderDispatched(ev) = event {
                        reactor.handle_order_dispatched(ev).await;
                    }
                })
            }),
        )
        .await;
    }

    // Observed RDS lifecycle changes drive the order state machine.
    {
        let reactor = Arc::clone(&reactor);
        bus.subscribe_types(
            vec![EventType::OrderStatusChanged],
            Box::new(move |event| {
                let reactor = Arc::clone(&reactor);
                Box::pin(async move {
                    if let Event::OrderStatusChanged(ev) = event {
                        reactor.handle_rds_status_change(ev).await;
                    }
                })
            }),
        )
        .await;
    }

    // Confirmed physical receipt moves inventory.
    {
        let reactor = Arc::clone(&reactor);
        bus.subscribe_types(
            vec![EventType::OrderCompleted],
            Box::new(move |event| {
                let reactor = Arc::clone(&reactor);
                Box::pin(async move {
                    if let Event::OrderCompleted(ev) = event {
                        reactor.handle_order_completed(ev).await;
                    }
                })
            }),
        )
        .await;
    }

    // Audit trail.
    {
        let reactor = Arc::clone(&reactor);
        bus.subscribe_types(
            vec![
                EventType::OrderReceived,
                EventType::OrderFailed,
                EventType::OrderCancelled,
                EventType::OrderCompleted,
                EventType::PayloadChanged,
                EventType::NodeUpdated,
                EventType::CorrectionApplied,
            ],
            Box::new(move |event| {
                let reactor = Arc::clone(&reactor);
                Box::pin(async move {
                    reactor.write_audit(event).await;
                })
            }),
        )
        .await;
    }
}

impl Reactor {
    async fn handle_order_dispatched(&self, ev: OrderDispatchedEvent) {
        if !ev.previous_rds_order_id.is_empty() && ev.previous_rds_order_id != ev.rds_order_id {
            self.poller.untrack(&ev.previous_rds_order_id);
            info!(order_id = ev.order_id, old = %ev.previous_rds_order_id,
                  "untracked superseded RDS order");
        }
        self.poller.track(&ev.rds_order_id);
        info!(order_id = ev.order_id, rds_order_id = %ev.rds_order_id, "tracking RDS order");
    }

    async fn handle_rds_status_change(&self, ev: OrderStatusChangedEvent) {
        let order = match Order::find_by_id(&self.pool, ev.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id = ev.order_id, "status change for unknown order");
                return;
            }
            Err(e) => {
                error!(order_id = ev.order_id, error = %e, "load order failed");
                return;
            }
        };

        // First robot assignment: persist it and tell Edge the waybill.
        if !ev.robot_id.is_empty() && order.robot_id.is_empty() {
            if let Err(e) = Order::set_rds(
                &self.pool,
                order.id,
                &order.rds_order_id,
                &ev.new_state,
                &ev.robot_id,
            )
            .await
            {
                error!(order_id = order.id, error = %e, "record robot assignment failed");
            }
            self.enqueue_reply(
                &order.client_id,
                KIND_WAYBILL,
                &WaybillReply {
                    order_uuid: order.external_uuid.clone(),
                    waybill_id: order.rds_order_id.clone(),
                    robot_id: ev.robot_id.clone(),
                },
            )
            .await;
        }

        let parsed_state = ev.new_state.parse::<OrderState>();
        let mapped = parsed_state
            .as_ref()
            .map(|s| map_rds_state(*s))
            .unwrap_or(OrderStatus::Dispatched);
        let current = match order.parsed_status() {
            Ok(status) => status,
            Err(e) => {
                error!(order_id = order.id, error = %e, "unparseable order status");
                return;
            }
        };

        if mapped != current {
            let changed = Order::update_status(
                &self.pool,
                order.id,
                mapped,
                &format!("RDS: {} -> {}", ev.old_state, ev.new_state),
            )
            .await
            .unwrap_or_else(|e| {
                error!(order_id = order.id, error = %e, "status transition failed");
                false
            });
            if let Err(e) = Order::set_rds(
                &self.pool,
                order.id,
                &order.rds_order_id,
                &ev.new_state,
                &ev.robot_id,
            )
            .await
            {
                error!(order_id = order.id, error = %e, "record RDS state failed");
            }
            if changed {
                self.enqueue_reply(
                    &order.client_id,
                    KIND_UPDATE,
                    &UpdateReply {
                        order_uuid: order.external_uuid.clone(),
                        status: mapped.to_string(),
                        detail: format!("RDS state: {}", ev.new_state),
                    },
                )
                .await;
            }
        }

        match parsed_state {
            Ok(OrderState::Finished) => {
                self.enqueue_reply(
                    &order.client_id,
                    KIND_DELIVERED,
                    &DeliveredReply {
                        order_uuid: order.external_uuid.clone(),
                        delivered_at: chrono::Utc::now().to_rfc3339(),
                    },
                )
                .await;
            }
            Ok(OrderState::Failed) => {
                self.unclaim_order_payloads(order.id).await;
                self.bus
                    .emit(Event::OrderFailed(OrderFailedEvent {
                        order_id: order.id,
                        external_uuid: order.external_uuid.clone(),
                        client_id: order.client_id.clone(),
                        error_code: "rds_failed".to_string(),
                        detail: "RDS order failed".to_string(),
                    }))
                    .await;
            }
            Ok(OrderState::Stopped) => {
                self.unclaim_order_payloads(order.id).await;
            }
            _ => {}
        }
    }

    /// Physical receipt confirmed: move every claimed payload to the
    /// destination, or create a fresh one when nothing was claimed.
    async fn handle_order_completed(&self, ev: OrderCompletedEvent) {
        let order = match Order::find_by_id(&self.pool, ev.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id = ev.order_id, "completion for unknown order");
                return;
            }
            Err(e) => {
                error!(order_id = ev.order_id, error = %e, "load order failed");
                return;
            }
        };

        let Some(dest_node_id) = order.dest_node_id else {
            return;
        };

        let claimed = match Payload::list_claimed_by(&self.pool, order.id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(order_id = order.id, error = %e, "list claimed payloads failed");
                return;
            }
        };

        let mut moved_any = false;
        for payload in claimed {
            if let Err(e) = self.nodestate.move_payload(payload.id, dest_node_id).await {
                error!(payload_id = payload.id, error = %e, "move payload failed");
                continue;
            }
            moved_any = true;
            self.bus
                .emit(Event::PayloadChanged(PayloadChangedEvent {
                    payload_id: payload.id,
                    node_id: dest_node_id,
                    action: "moved".to_string(),
                    payload_type_code: self.payload_type_code(payload.payload_type_id).await,
                }))
                .await;
        }

        // move/store orders without a prior claim deliver new material
        if !moved_any {
            if let Some(payload_type_id) = order.payload_type_id {
                match self
                    .nodestate
                    .create_payload(NewPayload {
                        payload_type_id,
                        node_id: Some(dest_node_id),
                        is_partial: false,
                        notes: format!("delivered by order {}", order.id),
                    })
                    .await
                {
                    Ok(payload) => {
                        self.bus
                            .emit(Event::PayloadChanged(PayloadChangedEvent {
                                payload_id: payload.id,
                                node_id: dest_node_id,
                                action: "created".to_string(),
                                payload_type_code: self.payload_type_code(payload_type_id).await,
                            }))
                            .await;
                    }
                    Err(e) => {
                        error!(order_id = order.id, error = %e, "create delivered payload failed");
                    }
                }
            }
        }
    }

    async fn write_audit(&self, event: Event) {
        let result = match &event {
            Event::OrderReceived(OrderReceivedEvent {
                order_id,
                client_id,
                order_type,
                payload_type_code,
                ..
            }) => {
                AuditEntry::append(
                    &self.pool,
                    "order",
                    *order_id,
                    "received",
                    "",
                    &format!("{order_type} {payload_type_code} from {client_id}"),
                    "system",
                )
                .await
            }
            Event::OrderFailed(OrderFailedEvent {
                order_id, detail, ..
            }) => AuditEntry::append(&self.pool, "order", *order_id, "failed", "", detail, "system")
                .await,
            Event::OrderCancelled(OrderCancelledEvent {
                order_id, reason, ..
            }) => {
                AuditEntry::append(&self.pool, "order", *order_id, "cancelled", "", reason, "system")
                    .await
            }
            Event::OrderCompleted(OrderCompletedEvent { order_id, .. }) => {
                AuditEntry::append(&self.pool, "order", *order_id, "completed", "", "", "system")
                    .await
            }
            Event::PayloadChanged(PayloadChangedEvent {
                payload_id,
                action,
                payload_type_code,
                ..
            }) => {
                AuditEntry::append(
                    &self.pool,
                    "payload",
                    *payload_id,
                    action,
                    "",
                    payload_type_code,
                    "system",
                )
                .await
            }
            Event::NodeUpdated(NodeUpdatedEvent {
                node_id,
                node_name,
                action,
            }) => {
                AuditEntry::append(&self.pool, "node", *node_id, action, "", node_name, "system")
                    .await
            }
            Event::CorrectionApplied(CorrectionAppliedEvent {
                correction_id,
                correction_type,
                reason,
                actor,
                ..
            }) => {
                AuditEntry::append(
                    &self.pool,
                    "correction",
                    *correction_id,
                    correction_type,
                    "",
                    reason,
                    actor,
                )
                .await
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(error = %e, "audit write failed");
        }
    }

    async fn unclaim_order_payloads(&self, order_id: i64) {
        let ids = match Payload::ids_claimed_by(&self.pool, order_id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(order_id = order_id, error = %e, "list claimed payloads failed");
                return;
            }
        };
        for payload_id in ids {
            if let Err(e) = Payload::unclaim(&self.pool, payload_id).await {
                error!(payload_id = payload_id, error = %e, "unclaim failed");
            }
        }
    }

    async fn payload_type_code(&self, payload_type_id: i64) -> String {
        PayloadType::find_by_id(&self.pool, payload_type_id)
            .await
            .ok()
            .flatten()
            .map(|pt| pt.code)
            .unwrap_or_default()
    }

    async fn enqueue_reply(&self, client_id: &str, kind: &str, body: &impl serde::Serialize) {
        let envelope = match Envelope::new(kind, client_id, &self.factory_id, body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(kind = kind, error = %e, "encode reply failed");
                return;
            }
        };
        let data = match envelope.encode() {
            Ok(data) => data,
            Err(e) => {
                error!(kind = kind, error = %e, "encode reply failed");
                return;
            }
        };
        let topic = dispatch_topic(&self.dispatch_topic_prefix, client_id);
        if let Err(e) = OutboxEntry::enqueue(&self.pool, &topic, &data, kind, client_id).await {
            error!(kind = kind, topic = %topic, error = %e, "enqueue reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_state_mapping_table() {
        assert_eq!(map_rds_state(OrderState::Created), OrderStatus::Dispatched);
        assert_eq!(
            map_rds_state(OrderState::ToBeDispatched),
            OrderStatus::Dispatched
        );
        assert_eq!(map_rds_state(OrderState::Running), OrderStatus::InTransit);
        assert_eq!(map_rds_state(OrderState::Finished), OrderStatus::Delivered);
        assert_eq!(map_rds_state(OrderState::Failed), OrderStatus::Failed);
        assert_eq!(map_rds_state(OrderState::Stopped), OrderStatus::Cancelled);
    }

    #[test]
    fn test_state_mapping_injective_outside_dispatch_group() {
        // Running/Finished/Failed/Stopped map to four distinct statuses.
        let mapped = [
            map_rds_state(OrderState::Running),
            map_rds_state(OrderState::Finished),
            map_rds_state(OrderState::Failed),
            map_rds_state(OrderState::Stopped),
        ];
        for (i, a) in mapped.iter().enumerate() {
            for b in mapped.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    fn arb_order_state() -> impl Strategy<Value = OrderState> {
        prop_oneof![
            Just(OrderState::Created),
            Just(OrderState::ToBeDispatched),
            Just(OrderState::Running),
            Just(OrderState::Finished),
            Just(OrderState::Failed),
            Just(OrderState::Stopped),
        ]
    }

    proptest! {
        /// The mapping is a pure function: repeated application agrees.
        #[test]
        fn prop_state_mapping_constant(state in arb_order_state()) {
            prop_assert_eq!(map_rds_state(state), map_rds_state(state));
        }

        /// Terminal external states never map to an active-pipeline status
        /// other than Delivered.
        #[test]
        fn prop_terminal_states_leave_pipeline(state in arb_order_state()) {
            if state.is_terminal() {
                let mapped = map_rds_state(state);
                prop_assert!(
                    mapped == OrderStatus::Delivered || mapped.is_terminal()
                );
            }
        }
    }
}
