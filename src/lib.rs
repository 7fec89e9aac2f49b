//! Warpath: factory-floor order orchestration and dispatch coordinator.
//!
//! Bridges a warehouse-side order producer (Edge) with a Robot Dispatch
//! Service. Order intents arrive over pub/sub messaging; warpath resolves
//! source and destination nodes, claims payloads to prevent double-dispatch,
//! submits join orders to RDS, tracks their lifecycle by polling, and streams
//! status updates back to Edge while moving payload records between node
//! inventories on confirmed physical receipt.

pub mod config;
pub mod database;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod nodestate;
pub mod rds;
pub mod state_machine;

pub use config::WarpathConfig;
pub use engine::Engine;
pub use error::{Result, WarpathError};
