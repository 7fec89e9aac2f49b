//! Message transport backends.
//!
//! [`PgqBackend`] rides PostgreSQL message-queue SQL functions (`pgmq_*`),
//! one queue per topic. [`MemoryBackend`] is the in-process transport used by
//! tests and single-box deployments. Both give at-least-once delivery: a
//! message stays readable until it is acked.

use crate::error::{Result, WarpathError};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// One message read from a topic, pending ack.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: i64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn close(&self);
    fn is_connected(&self) -> bool;
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
    /// Read up to `limit` messages without consuming them.
    async fn read(&self, topic: &str, limit: i64) -> Result<Vec<InboundMessage>>;
    /// Consume a previously read message.
    async fn ack(&self, topic: &str, msg_id: i64) -> Result<()>;
}

/// Queue names must be plain identifiers; topics use `/` separators.
pub fn queue_name(topic: &str) -> String {
    topic
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// PostgreSQL queue backend.
pub struct PgqBackend {
    pool: PgPool,
    connected: AtomicBool,
    /// Queues already created this process; creation is idempotent but cheap
    /// to skip.
    known_queues: Mutex<HashSet<String>>,
    /// Visibility timeout for reads, seconds.
    visibility_timeout: i32,
}

impl PgqBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            connected: AtomicBool::new(false),
            known_queues: Mutex::new(HashSet::new()),
            visibility_timeout: 30,
        }
    }

    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        {
            let known = self.known_queues.lock().expect("known_queues poisoned");
            if known.contains(queue) {
                return Ok(());
            }
        }
        sqlx::query("SELECT pgmq_create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(|e| WarpathError::MessagingError(format!("create queue {queue}: {e}")))?;
        debug!(queue = queue, "queue created");
        self.known_queues
            .lock()
            .expect("known_queues poisoned")
            .insert(queue.to_string());
        Ok(())
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

#[async_trait]
impl MessageBackend for PgqBackend {
    async fn connect(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| WarpathError::MessagingError(format!("connect: {e}")))?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let queue = queue_name(topic);
        self.ensure_queue(&queue).await?;

        let message: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| WarpathError::MessagingError(format!("non-JSON payload: {e}")))?;
        sqlx::query("SELECT pgmq_send($1, $2)")
            .bind(&queue)
            .bind(&message)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                self.mark_disconnected();
                WarpathError::MessagingError(format!("publish to {queue}: {e}"))
            })?;
        Ok(())
    }

    async fn read(&self, topic: &str, limit: i64) -> Result<Vec<InboundMessage>> {
        let queue = queue_name(topic);
        self.ensure_queue(&queue).await?;

        let rows = sqlx::query("SELECT msg_id, message FROM pgmq_read($1, $2, $3)")
            .bind(&queue)
            .bind(self.visibility_timeout)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                self.mark_disconnected();
                WarpathError::MessagingError(format!("read from {queue}: {e}"))
            })?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let msg_id: i64 = row.get("msg_id");
            let message: serde_json::Value = row.get("message");
            messages.push(InboundMessage {
                id: msg_id,
                payload: serde_json::to_vec(&message)
                    .map_err(|e| WarpathError::MessagingError(e.to_string()))?,
            });
        }
        Ok(messages)
    }

    async fn ack(&self, topic: &str, msg_id: i64) -> Result<()> {
        let queue = queue_name(topic);
        sqlx::query("SELECT pgmq_delete($1, $2)")
            .bind(&queue)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .map_err(|e| WarpathError::MessagingError(format!("ack on {queue}: {e}")))?;
        Ok(())
    }
}

#[derive(Default)]
struct TopicQueue {
    next_id: i64,
    messages: VecDeque<InboundMessage>,
}

/// In-process backend: FIFO per topic, at-least-once (read does not consume).
#[derive(Default)]
pub struct MemoryBackend {
    connected: AtomicBool,
    topics: Mutex<HashMap<String, TopicQueue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently queued on a topic; used by tests and health checks.
    pub fn depth(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .expect("topics poisoned")
            .get(topic)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBackend for MemoryBackend {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(WarpathError::MessagingError("not connected".to_string()));
        }
        let mut topics = self.topics.lock().expect("topics poisoned");
        let queue = topics.entry(topic.to_string()).or_default();
        queue.next_id += 1;
        let id = queue.next_id;
        queue.messages.push_back(InboundMessage {
            id,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn read(&self, topic: &str, limit: i64) -> Result<Vec<InboundMessage>> {
        if !self.is_connected() {
            return Err(WarpathError::MessagingError("not connected".to_string()));
        }
        let topics = self.topics.lock().expect("topics poisoned");
        Ok(topics
            .get(topic)
            .map(|q| {
                q.messages
                    .iter()
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, topic: &str, msg_id: i64) -> Result<()> {
        let mut topics = self.topics.lock().expect("topics poisoned");
        if let Some(queue) = topics.get_mut(topic) {
            queue.messages.retain(|m| m.id != msg_id);
        } else {
            warn!(topic = topic, msg_id = msg_id, "ack for unknown topic");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_sanitizes_topic() {
        assert_eq!(queue_name("warpath/orders"), "warpath_orders");
        assert_eq!(queue_name("warpath/dispatch/edge-1"), "warpath_dispatch_edge_1");
        assert_eq!(queue_name("plain"), "plain");
    }

    #[tokio::test]
    async fn test_memory_backend_fifo_and_ack() {
        let backend = MemoryBackend::new();
        backend.connect().await.unwrap();

        backend.publish("t", b"one").await.unwrap();
        backend.publish("t", b"two").await.unwrap();
        backend.publish("t", b"three").await.unwrap();

        let read = backend.read("t", 2).await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].payload, b"one");
        assert_eq!(read[1].payload, b"two");

        // unacked messages stay readable
        let again = backend.read("t", 10).await.unwrap();
        assert_eq!(again.len(), 3);

        backend.ack("t", read[0].id).await.unwrap();
        let after_ack = backend.read("t", 10).await.unwrap();
        assert_eq!(after_ack.len(), 2);
        assert_eq!(after_ack[0].payload, b"two");
    }

    #[tokio::test]
    async fn test_memory_backend_rejects_when_disconnected() {
        let backend = MemoryBackend::new();
        assert!(!backend.is_connected());
        assert!(backend.publish("t", b"x").await.is_err());

        backend.connect().await.unwrap();
        backend.publish("t", b"x").await.unwrap();
        backend.close().await;
        assert!(backend.read("t", 1).await.is_err());
    }
}
