//! Cached node projections.

use crate::models::payload::PayloadWithType;
use serde::{Deserialize, Serialize};

/// Node metadata as cached in Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub node_id: i64,
    pub node_name: String,
    pub node_type: String,
    pub zone: String,
    pub capacity: i64,
    pub enabled: bool,
}

/// Full node view: metadata plus current payload listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStateView {
    pub node_id: i64,
    pub node_name: String,
    pub node_type: String,
    pub zone: String,
    pub capacity: i64,
    pub enabled: bool,
    pub payloads: Vec<PayloadWithType>,
    pub payload_count: usize,
}
