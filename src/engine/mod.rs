//! Engine: composition root wiring store, cache, RDS, messaging, dispatcher,
//! and poller together through the event bus.

mod adapters;
#[allow(clippy::module_inception)]
mod engine;
mod events;
mod wiring;

pub use adapters::{DbOrderResolver, DispatchEmitter, PollerEmitter};
pub use engine::Engine;
pub use events::{
    ConnectionEvent, CorrectionAppliedEvent, Event, EventBus, EventHandler, EventType,
    NodeUpdatedEvent, OrderCancelledEvent, OrderCompletedEvent, OrderDispatchedEvent,
    OrderFailedEvent, OrderReceivedEvent, OrderStatusChangedEvent, PayloadChangedEvent,
};
pub use wiring::map_rds_state;
