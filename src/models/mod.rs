//! Durable catalog: nodes, payload types, payloads, orders, outbox, audit,
//! corrections.
//!
//! Every type owns its SQL; atomic operations (claims, status transitions)
//! run as single statements or transactions so callers never need to lock.

pub mod audit;
pub mod correction;
pub mod node;
pub mod order;
pub mod outbox;
pub mod payload;
pub mod payload_type;

pub use audit::AuditEntry;
pub use correction::{Correction, NewCorrection};
pub use node::{NewNode, Node};
pub use order::{NewOrder, Order, OrderHistoryEntry};
pub use outbox::OutboxEntry;
pub use payload::{NewPayload, Payload};
pub use payload_type::{NewPayloadType, PayloadType};
