//! Write-through node state: SQL first, then the Redis projection.
//!
//! The cache is advisory. Every mutation lands in the store before the
//! affected node's cache entry is rebuilt; losing Redis only changes read
//! latency, never behavior.

mod manager;
mod redis_store;
mod types;

pub use manager::Manager;
pub use redis_store::RedisStore;
pub use types::{NodeMeta, NodeStateView};
