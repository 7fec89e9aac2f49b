//! Backend-agnostic messaging client.
//!
//! Owns the active [`MessageBackend`], swaps it on live reconfiguration, and
//! runs subscription loops with bounded exponential backoff on transport
//! errors. Delivery to a handler is sequential per topic; a message is acked
//! only after its handler returns success, giving at-least-once semantics.

use crate::config::MessagingConfig;
use crate::error::{Result, WarpathError};
use crate::messaging::backend::{InboundMessage, MemoryBackend, MessageBackend, PgqBackend};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Async handler invoked for each inbound message.
pub type MessageHandler = Box<
    dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
>;

pub struct MessagingClient {
    backend: RwLock<Arc<dyn MessageBackend>>,
    config: RwLock<MessagingConfig>,
    pool: Option<PgPool>,
}

impl MessagingClient {
    pub fn new(config: MessagingConfig, pool: Option<PgPool>) -> Result<Self> {
        let backend = Self::build_backend(&config, pool.as_ref())?;
        Ok(Self {
            backend: RwLock::new(backend),
            config: RwLock::new(config),
            pool,
        })
    }

    fn build_backend(
        config: &MessagingConfig,
        pool: Option<&PgPool>,
    ) -> Result<Arc<dyn MessageBackend>> {
        match config.backend.as_str() {
            "postgres" => {
                let pool = pool.ok_or_else(|| {
                    WarpathError::ConfigurationError(
                        "postgres messaging backend requires a database pool".to_string(),
                    )
                })?;
                Ok(Arc::new(PgqBackend::new(pool.clone())))
            }
            "memory" => Ok(Arc::new(MemoryBackend::new())),
            other => Err(WarpathError::ConfigurationError(format!(
                "unknown messaging backend: {other}"
            ))),
        }
    }

    fn backend(&self) -> Arc<dyn MessageBackend> {
        Arc::clone(&self.backend.read().expect("backend lock poisoned"))
    }

    fn config_snapshot(&self) -> MessagingConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub async fn connect(&self) -> Result<()> {
        self.backend().connect().await
    }

    pub async fn close(&self) {
        self.backend().close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.backend().is_connected()
    }

    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.backend().publish(topic, payload).await
    }

    /// Swap in a backend built from new configuration and connect it. The old
    /// backend is closed; running subscription loops pick up the new backend
    /// on their next read.
    pub async fn reconfigure(&self, config: MessagingConfig) -> Result<()> {
        let new_backend = Self::build_backend(&config, self.pool.as_ref())?;
        new_backend.connect().await?;

        let old_backend = {
            let mut guard = self.backend.write().expect("backend lock poisoned");
            std::mem::replace(&mut *guard, new_backend)
        };
        old_backend.close().await;
        *self.config.write().expect("config lock poisoned") = config;
        info!("messaging reconfigured");
        Ok(())
    }

    /// Start a consumption loop for one topic. Messages are handled one at a
    /// time in queue order; handler failure leaves the message unacked for
    /// redelivery.
    pub fn subscribe(self: &Arc<Self>, topic: String, handler: MessageHandler) -> SubscriptionHandle {
        let client = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let config = client.config_snapshot();
            let consume_interval = Duration::from_millis(config.consume_interval_ms);
            let backoff_base = Duration::from_millis(config.reconnect_base_ms);
            let backoff_max = Duration::from_millis(config.reconnect_max_ms);
            let mut backoff = backoff_base;

            debug!(topic = %topic, "subscription loop started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let backend = client.backend();
                match backend.read(&topic, 10).await {
                    Ok(messages) => {
                        backoff = backoff_base;
                        for message in messages {
                            if *shutdown_rx.borrow() {
                                return;
                            }
                            let msg_id = message.id;
                            match handler(message).await {
                                Ok(()) => {
                                    if let Err(e) = backend.ack(&topic, msg_id).await {
                                        warn!(topic = %topic, msg_id, error = %e, "ack failed");
                                    }
                                }
                                Err(e) => {
                                    warn!(topic = %topic, msg_id, error = %e,
                                          "handler failed, message left for redelivery");
                                }
                            }
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(consume_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "read failed, backing off");
                        if let Err(e) = backend.connect().await {
                            debug!(topic = %topic, error = %e, "reconnect attempt failed");
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                        backoff = (backoff * 2).min(backoff_max);
                    }
                }
            }
            debug!(topic = %topic, "subscription loop stopped");
        });

        SubscriptionHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

pub struct SubscriptionHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_config() -> MessagingConfig {
        MessagingConfig {
            backend: "memory".to_string(),
            consume_interval_ms: 10,
            reconnect_base_ms: 10,
            reconnect_max_ms: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_and_sequential_delivery() {
        let client = Arc::new(MessagingClient::new(memory_config(), None).unwrap());
        client.connect().await.unwrap();

        for i in 0..5u8 {
            client.publish("t", &[i]).await.unwrap();
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_handler = Arc::clone(&seen);
        let handle = client.subscribe(
            "t".to_string(),
            Box::new(move |msg| {
                let seen = Arc::clone(&seen_in_handler);
                Box::pin(async move {
                    seen.lock().unwrap().push(msg.payload[0]);
                    Ok(())
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop().await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_handler_leaves_message_for_redelivery() {
        let client = Arc::new(MessagingClient::new(memory_config(), None).unwrap());
        client.connect().await.unwrap();
        client.publish("t", b"poison").await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_handler = Arc::clone(&attempts);
        let handle = client.subscribe(
            "t".to_string(),
            Box::new(move |_msg| {
                let attempts = Arc::clone(&attempts_in_handler);
                Box::pin(async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(WarpathError::MessagingError("transient".to_string()))
                    } else {
                        Ok(())
                    }
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await;

        // failed twice, succeeded on the third delivery, then acked
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let config = MessagingConfig {
            backend: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(MessagingClient::new(config, None).is_err());
    }
}
