//! Pub/sub messaging between warpath and Edge.
//!
//! The wire unit is the [`Envelope`]. Transport is backend-agnostic behind
//! [`MessageBackend`]; the production backend rides PostgreSQL queues, tests
//! use the in-process backend. Outbound replies never publish directly: they
//! go through the durable outbox and are drained by [`OutboxDrainer`].

pub mod backend;
pub mod client;
pub mod consumer;
pub mod envelope;
pub mod outbox_drainer;

pub use backend::{InboundMessage, MemoryBackend, MessageBackend, PgqBackend};
pub use client::{MessagingClient, SubscriptionHandle};
pub use consumer::{Consumer, OrderHandler};
pub use envelope::{
    dispatch_topic, AckReply, CancelledReply, DeliveredReply, DeliveryReceipt, Envelope,
    ErrorReply, OrderCancel, OrderRequest, RedirectRequest, UpdateReply, WaybillReply,
};
pub use outbox_drainer::OutboxDrainer;
