//! Typed in-process event bus.
//!
//! `emit` delivers to every matching subscriber in registration order and
//! returns only when all handlers have run; it is a reaction dispatcher, not
//! a queue. Handlers must not block on the network; they enqueue durable work
//! (outbox, cache refresh) instead.

use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    OrderReceived,
    OrderDispatched,
    OrderStatusChanged,
    OrderCompleted,
    OrderFailed,
    OrderCancelled,
    PayloadChanged,
    NodeUpdated,
    CorrectionApplied,
    RdsConnected,
    RdsDisconnected,
    MessagingConnected,
    MessagingDisconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceivedEvent {
    pub order_id: i64,
    pub external_uuid: String,
    pub client_id: String,
    pub order_type: String,
    pub payload_type_code: String,
    pub delivery_node: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderDispatchedEvent {
    pub order_id: i64,
    pub rds_order_id: String,
    /// Non-empty on redirects: the superseded external id to untrack.
    pub previous_rds_order_id: String,
    pub source_node: String,
    pub dest_node: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusChangedEvent {
    pub order_id: i64,
    pub rds_order_id: String,
    pub old_state: String,
    pub new_state: String,
    pub robot_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCompletedEvent {
    pub order_id: i64,
    pub external_uuid: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderFailedEvent {
    pub order_id: i64,
    pub external_uuid: String,
    pub client_id: String,
    pub error_code: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCancelledEvent {
    pub order_id: i64,
    pub external_uuid: String,
    pub client_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadChangedEvent {
    pub payload_id: i64,
    pub node_id: i64,
    /// "moved", "created", "removed", "adjusted"
    pub action: String,
    pub payload_type_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdatedEvent {
    pub node_id: i64,
    pub node_name: String,
    /// "created", "updated", "deleted"
    pub action: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionAppliedEvent {
    pub correction_id: i64,
    pub correction_type: String,
    pub node_id: i64,
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OrderReceived(OrderReceivedEvent),
    OrderDispatched(OrderDispatchedEvent),
    OrderStatusChanged(OrderStatusChangedEvent),
    OrderCompleted(OrderCompletedEvent),
    OrderFailed(OrderFailedEvent),
    OrderCancelled(OrderCancelledEvent),
    PayloadChanged(PayloadChangedEvent),
    NodeUpdated(NodeUpdatedEvent),
    CorrectionApplied(CorrectionAppliedEvent),
    RdsConnected(ConnectionEvent),
    RdsDisconnected(ConnectionEvent),
    MessagingConnected(ConnectionEvent),
    MessagingDisconnected(ConnectionEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::OrderReceived(_) => EventType::OrderReceived,
            Event::OrderDispatched(_) => EventType::OrderDispatched,
            Event::OrderStatusChanged(_) => EventType::OrderStatusChanged,
            Event::OrderCompleted(_) => EventType::OrderCompleted,
            Event::OrderFailed(_) => EventType::OrderFailed,
            Event::OrderCancelled(_) => EventType::OrderCancelled,
            Event::PayloadChanged(_) => EventType::PayloadChanged,
            Event::NodeUpdated(_) => EventType::NodeUpdated,
            Event::CorrectionApplied(_) => EventType::CorrectionApplied,
            Event::RdsConnected(_) => EventType::RdsConnected,
            Event::RdsDisconnected(_) => EventType::RdsDisconnected,
            Event::MessagingConnected(_) => EventType::MessagingConnected,
            Event::MessagingDisconnected(_) => EventType::MessagingDisconnected,
        }
    }
}

/// Async reaction to an event.
pub type EventHandler =
    Box<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(Vec<EventType>, EventHandler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given event types. Registration order is
    /// delivery order.
    pub async fn subscribe_types(&self, types: Vec<EventType>, handler: EventHandler) {
        self.handlers.write().await.push((types, handler));
    }

    /// Deliver to every matching subscriber, sequentially, before returning.
    /// Handlers may themselves emit; nested emits run inline.
    pub async fn emit(&self, event: Event) {
        let event_type = event.event_type();
        debug!(event = ?event_type, "event emitted");
        let handlers = self.handlers.read().await;
        for (types, handler) in handlers.iter() {
            if types.contains(&event_type) {
                handler(event.clone()).await;
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn connection_event(detail: &str) -> Event {
        Event::RdsConnected(ConnectionEvent {
            detail: detail.to_string(),
        })
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe_types(
                vec![EventType::RdsConnected],
                Box::new(move |_event| {
                    let seen = Arc::clone(&seen);
                    Box::pin(async move {
                        seen.lock().unwrap().push(tag);
                    })
                }),
            )
            .await;
        }

        bus.emit(connection_event("up")).await;
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_type_filtering() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_orders = Arc::clone(&seen);
        bus.subscribe_types(
            vec![EventType::OrderFailed, EventType::OrderCancelled],
            Box::new(move |event| {
                let seen = Arc::clone(&seen_orders);
                Box::pin(async move {
                    seen.lock().unwrap().push(event.event_type());
                })
            }),
        )
        .await;

        bus.emit(connection_event("ignored")).await;
        bus.emit(Event::OrderFailed(OrderFailedEvent {
            order_id: 1,
            external_uuid: "u1".to_string(),
            client_id: "edge".to_string(),
            error_code: "no_source".to_string(),
            detail: String::new(),
        }))
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![EventType::OrderFailed]);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(connection_event("nobody home")).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
