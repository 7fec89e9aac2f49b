//! Redis projection of node state.
//!
//! Uses `redis::aio::ConnectionManager` for multiplexed connections with
//! automatic reconnection. Values are JSON.

use crate::config::RedisConfig;
use crate::error::Result;
use crate::models::payload::PayloadWithType;
use crate::nodestate::types::NodeMeta;
use tracing::debug;

#[derive(Clone)]
pub struct RedisStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

fn meta_key(node_id: i64) -> String {
    format!("warpath:node:{node_id}:meta")
}

fn payloads_key(node_id: i64) -> String {
    format!("warpath:node:{node_id}:payloads")
}

fn count_key(node_id: i64) -> String {
    format!("warpath:node:{node_id}:count")
}

const NODE_SET_KEY: &str = "warpath:nodes";

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = if config.password.is_empty() {
            format!("{}/{}", config.address.trim_end_matches('/'), config.db)
        } else {
            // redis://[:password@]host:port/db
            let rest = config.address.trim_start_matches("redis://");
            format!("redis://:{}@{}/{}", config.password, rest, config.db)
        };
        let client = redis::Client::open(url.as_str())?;
        let connection_manager = redis::aio::ConnectionManager::new(client).await?;
        debug!(address = %config.address, db = config.db, "redis connected");
        Ok(Self { connection_manager })
    }

    pub async fn get_node_meta(&self, node_id: i64) -> Result<Option<NodeMeta>> {
        let mut conn = self.connection_manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(meta_key(node_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set_node_meta(&self, node_id: i64, meta: &NodeMeta) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let json = serde_json::to_string(meta)?;
        redis::pipe()
            .cmd("SET")
            .arg(meta_key(node_id))
            .arg(json)
            .ignore()
            .cmd("SADD")
            .arg(NODE_SET_KEY)
            .arg(node_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_node_payloads(&self, node_id: i64) -> Result<Option<Vec<PayloadWithType>>> {
        let mut conn = self.connection_manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(payloads_key(node_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set_node_payloads(
        &self,
        node_id: i64,
        payloads: &[PayloadWithType],
    ) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let json = serde_json::to_string(payloads)?;
        redis::pipe()
            .cmd("SET")
            .arg(payloads_key(node_id))
            .arg(json)
            .ignore()
            .cmd("SET")
            .arg(count_key(node_id))
            .arg(payloads.len())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_count(&self, node_id: i64) -> Result<Option<usize>> {
        let mut conn = self.connection_manager.clone();
        let count: Option<usize> = redis::cmd("GET")
            .arg(count_key(node_id))
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    pub async fn all_node_ids(&self) -> Result<Vec<i64>> {
        let mut conn = self.connection_manager.clone();
        let ids: Vec<i64> = redis::cmd("SMEMBERS")
            .arg(NODE_SET_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(ids)
    }

    pub async fn remove_node(&self, node_id: i64) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        redis::pipe()
            .cmd("DEL")
            .arg(meta_key(node_id))
            .ignore()
            .cmd("DEL")
            .arg(payloads_key(node_id))
            .ignore()
            .cmd("DEL")
            .arg(count_key(node_id))
            .ignore()
            .cmd("SREM")
            .arg(NODE_SET_KEY)
            .arg(node_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Drop every warpath key; used before a full rebuild.
    pub async fn flush_all(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let ids = self.all_node_ids().await?;
        for node_id in ids {
            self.remove_node(node_id).await?;
        }
        redis::cmd("DEL")
            .arg(NODE_SET_KEY)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(meta_key(7), "warpath:node:7:meta");
        assert_eq!(payloads_key(7), "warpath:node:7:payloads");
        assert_eq!(count_key(7), "warpath:node:7:count");
    }
}
