//! Node state manager: mutations go to the store first, then the affected
//! node's cache entry is rebuilt from the store. Reads prefer the cache and
//! fall back to SQL; a cache outage degrades to direct store reads.

use crate::error::{Result, WarpathError};
use crate::models::payload::PayloadWithType;
use crate::models::{Correction, NewCorrection, NewPayload, Node, Payload};
use crate::nodestate::redis_store::RedisStore;
use crate::nodestate::types::{NodeMeta, NodeStateView};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{info, warn};

pub struct Manager {
    pool: PgPool,
    redis: Option<RedisStore>,
}

impl Manager {
    pub fn new(pool: PgPool, redis: Option<RedisStore>) -> Self {
        Self { pool, redis }
    }

    pub fn has_cache(&self) -> bool {
        self.redis.is_some()
    }

    /// Create a payload at a node and refresh that node's cache entry.
    pub async fn create_payload(&self, new_payload: NewPayload) -> Result<Payload> {
        let payload = Payload::create(&self.pool, new_payload).await?;
        if let Some(node_id) = payload.node_id {
            self.refresh_node(node_id).await;
        }
        Ok(payload)
    }

    /// Delete a payload and refresh its node's cache entry.
    pub async fn remove_payload(&self, payload_id: i64) -> Result<()> {
        let payload = Payload::find_by_id(&self.pool, payload_id)
            .await?
            .ok_or_else(|| WarpathError::NotFound(format!("payload {payload_id}")))?;
        Payload::delete(&self.pool, payload_id).await?;
        if let Some(node_id) = payload.node_id {
            self.refresh_node(node_id).await;
        }
        Ok(())
    }

    /// Relocate a payload on confirmed receipt; refreshes both nodes.
    pub async fn move_payload(&self, payload_id: i64, to_node_id: i64) -> Result<()> {
        let payload = Payload::find_by_id(&self.pool, payload_id)
            .await?
            .ok_or_else(|| WarpathError::NotFound(format!("payload {payload_id}")))?;
        Payload::move_to(&self.pool, payload_id, to_node_id).await?;
        if let Some(from_node_id) = payload.node_id {
            self.refresh_node(from_node_id).await;
        }
        self.refresh_node(to_node_id).await;
        Ok(())
    }

    /// Record an administrative correction and apply its effect.
    pub async fn apply_correction(&self, new_correction: NewCorrection) -> Result<Correction> {
        let correction = Correction::create(&self.pool, new_correction).await?;

        match correction.correction_type.as_str() {
            "add" => {
                let payload_type_id = correction.payload_type_id.ok_or_else(|| {
                    WarpathError::ValidationError("add correction requires payload_type_id".into())
                })?;
                self.create_payload(NewPayload {
                    payload_type_id,
                    node_id: Some(correction.node_id),
                    is_partial: false,
                    notes: format!("correction #{}: {}", correction.id, correction.reason),
                })
                .await?;
            }
            "remove" => {
                let payload_id = correction.payload_id.ok_or_else(|| {
                    WarpathError::ValidationError("remove correction requires payload_id".into())
                })?;
                self.remove_payload(payload_id).await?;
            }
            "move" => {
                let payload_id = correction.payload_id.ok_or_else(|| {
                    WarpathError::ValidationError("move correction requires payload_id".into())
                })?;
                self.move_payload(payload_id, correction.node_id).await?;
            }
            "adjust" => {
                let payload_id = correction.payload_id.ok_or_else(|| {
                    WarpathError::ValidationError("adjust correction requires payload_id".into())
                })?;
                Payload::mark_partial(
                    &self.pool,
                    payload_id,
                    &format!("counted {} ({})", correction.quantity, correction.reason),
                )
                .await?;
                self.refresh_node(correction.node_id).await;
            }
            other => {
                return Err(WarpathError::ValidationError(format!(
                    "unknown correction type: {other}"
                )));
            }
        }

        Ok(correction)
    }

    /// Read a node's state, cache first.
    pub async fn get_node_state(&self, node_id: i64) -> Result<NodeStateView> {
        if let Some(redis) = &self.redis {
            match redis.get_node_meta(node_id).await {
                Ok(Some(meta)) => {
                    let payloads = redis
                        .get_node_payloads(node_id)
                        .await
                        .unwrap_or_default()
                        .unwrap_or_default();
                    let payload_count = payloads.len();
                    return Ok(NodeStateView {
                        node_id: meta.node_id,
                        node_name: meta.node_name,
                        node_type: meta.node_type,
                        zone: meta.zone,
                        capacity: meta.capacity,
                        enabled: meta.enabled,
                        payloads,
                        payload_count,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(node_id = node_id, error = %e, "cache read failed"),
            }
        }

        let view = self.node_state_from_store(node_id).await?;
        // populate on miss
        self.write_cache_entry(&view).await;
        Ok(view)
    }

    pub async fn get_all_node_states(&self) -> Result<HashMap<i64, NodeStateView>> {
        let nodes = Node::list_all(&self.pool).await?;
        let mut states = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let state = self.get_node_state(node.id).await?;
            states.insert(node.id, state);
        }
        Ok(states)
    }

    /// Flush and rebuild the whole cache from the store. Called at startup.
    pub async fn sync_from_store(&self) -> Result<()> {
        let Some(redis) = &self.redis else {
            info!("no cache configured, node state served from store");
            return Ok(());
        };

        if let Err(e) = redis.flush_all().await {
            warn!(error = %e, "cache flush failed, continuing without rebuild");
            return Ok(());
        }

        let nodes = Node::list_all(&self.pool).await?;
        let count = nodes.len();
        for node in nodes {
            let view = self.node_state_from_store(node.id).await?;
            self.write_cache_entry(&view).await;
        }
        info!(nodes = count, "node state cache rebuilt");
        Ok(())
    }

    /// Re-read one node's metadata into the cache after a node edit.
    pub async fn refresh_node_meta(&self, node_id: i64) {
        let Some(redis) = &self.redis else { return };
        let node = match Node::find_by_id(&self.pool, node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                if let Err(e) = redis.remove_node(node_id).await {
                    warn!(node_id = node_id, error = %e, "cache eviction failed");
                }
                return;
            }
            Err(e) => {
                warn!(node_id = node_id, error = %e, "meta refresh read failed");
                return;
            }
        };
        let meta = NodeMeta {
            node_id: node.id,
            node_name: node.name,
            node_type: node.node_type,
            zone: node.zone,
            capacity: node.capacity,
            enabled: node.enabled,
        };
        if let Err(e) = redis.set_node_meta(node_id, &meta).await {
            warn!(node_id = node_id, error = %e, "meta refresh write failed");
        }
    }

    /// Re-read one node's payload list into the cache. Best-effort.
    pub async fn refresh_node(&self, node_id: i64) {
        let Some(redis) = &self.redis else { return };
        let payloads = match Payload::list_by_node(&self.pool, node_id).await {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!(node_id = node_id, error = %e, "payload refresh read failed");
                return;
            }
        };
        if let Err(e) = redis.set_node_payloads(node_id, &payloads).await {
            warn!(node_id = node_id, error = %e, "payload refresh write failed");
        }
    }

    async fn write_cache_entry(&self, view: &NodeStateView) {
        let Some(redis) = &self.redis else { return };
        let meta = NodeMeta {
            node_id: view.node_id,
            node_name: view.node_name.clone(),
            node_type: view.node_type.clone(),
            zone: view.zone.clone(),
            capacity: view.capacity,
            enabled: view.enabled,
        };
        if let Err(e) = redis.set_node_meta(view.node_id, &meta).await {
            warn!(node_id = view.node_id, error = %e, "cache meta write failed");
            return;
        }
        if let Err(e) = redis.set_node_payloads(view.node_id, &view.payloads).await {
            warn!(node_id = view.node_id, error = %e, "cache payload write failed");
        }
    }

    async fn node_state_from_store(&self, node_id: i64) -> Result<NodeStateView> {
        let node = Node::find_by_id(&self.pool, node_id)
            .await?
            .ok_or_else(|| WarpathError::NotFound(format!("node {node_id}")))?;
        let payloads: Vec<PayloadWithType> = Payload::list_by_node(&self.pool, node_id).await?;
        let payload_count = payloads.len();
        Ok(NodeStateView {
            node_id: node.id,
            node_name: node.name,
            node_type: node.node_type,
            zone: node.zone,
            capacity: node.capacity,
            enabled: node.enabled,
            payloads,
            payload_count,
        })
    }
}
