//! Outbox drainer: periodic task moving pending envelopes from the store to
//! messaging with at-least-once semantics.
//!
//! Entries are fetched in increasing id order and drained per client; a
//! publish failure stops that client's batch so per-client FIFO holds, while
//! other clients keep draining. Shutdown is observed between entries, never
//! mid-publish.

use crate::config::MessagingConfig;
use crate::error::Result;
use crate::messaging::client::MessagingClient;
use crate::models::OutboxEntry;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct OutboxDrainer {
    pool: PgPool,
    client: Arc<MessagingClient>,
    interval: Duration,
    batch_size: i64,
    max_attempts: i32,
}

impl OutboxDrainer {
    pub fn new(pool: PgPool, client: Arc<MessagingClient>, config: &MessagingConfig) -> Self {
        Self {
            pool,
            client,
            interval: Duration::from_millis(config.outbox_drain_interval_ms),
            batch_size: config.outbox_batch_size,
            max_attempts: config.outbox_max_attempts,
        }
    }

    pub fn start(self) -> DrainerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        info!(interval_ms = self.interval.as_millis() as u64, "outbox drainer started");

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.drain_once(&mut shutdown_rx).await {
                            warn!(error = %e, "outbox drain tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("outbox drainer stopping");
                        break;
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        });

        DrainerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// One drain pass. Skips entirely while messaging is disconnected; unsent
    /// entries simply stay pending for the next tick.
    async fn drain_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        if !self.client.is_connected() {
            return Ok(());
        }

        let pending = OutboxEntry::list_pending(&self.pool, self.batch_size).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut sent = 0usize;
        for (client_id, entries) in group_by_client(pending) {
            for entry in entries {
                if *shutdown.borrow() {
                    return Ok(());
                }
                match self.client.publish(&entry.topic, &entry.payload).await {
                    Ok(()) => {
                        OutboxEntry::mark_sent(&self.pool, entry.id).await?;
                        sent += 1;
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, outbox_id = entry.id, error = %e,
                              "publish failed, holding client queue");
                        OutboxEntry::record_failure(&self.pool, entry.id, self.max_attempts)
                            .await?;
                        // preserve per-client ordering: stop this client's batch
                        break;
                    }
                }
                if !self.client.is_connected() {
                    return Ok(());
                }
            }
        }
        if sent > 0 {
            debug!(sent = sent, "outbox entries published");
        }
        Ok(())
    }
}

pub struct DrainerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DrainerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Group pending entries by client, preserving increasing id order inside
/// each group and first-seen order across groups.
pub fn group_by_client(entries: Vec<OutboxEntry>) -> Vec<(String, Vec<OutboxEntry>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<OutboxEntry>)> = Vec::new();
    for entry in entries {
        match index.get(&entry.client_id) {
            Some(&i) => groups[i].1.push(entry),
            None => {
                index.insert(entry.client_id.clone(), groups.len());
                groups.push((entry.client_id.clone(), vec![entry]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn entry(id: i64, client_id: &str) -> OutboxEntry {
        OutboxEntry {
            id,
            topic: format!("warpath/dispatch/{client_id}"),
            payload: vec![],
            kind: "update".to_string(),
            client_id: client_id.to_string(),
            attempts: 0,
            created_at: Utc::now(),
            sent_at: None,
            dead_at: None,
        }
    }

    #[test]
    fn test_group_by_client_preserves_order() {
        let groups = group_by_client(vec![
            entry(1, "a"),
            entry(2, "b"),
            entry(3, "a"),
            entry(4, "c"),
            entry(5, "b"),
        ]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0, "a");
        assert_eq!(
            groups[0].1.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(
            groups[1].1.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![2, 5]
        );
        assert_eq!(
            groups[2].1.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![4]
        );
    }

    proptest! {
        /// Ids within each client group stay strictly increasing whenever the
        /// input batch is id-ordered, which is how the store returns it.
        #[test]
        fn prop_per_client_ids_increasing(clients in proptest::collection::vec(0u8..4, 0..64)) {
            let entries: Vec<OutboxEntry> = clients
                .iter()
                .enumerate()
                .map(|(i, c)| entry(i as i64 + 1, &format!("client-{c}")))
                .collect();
            for (_, group) in group_by_client(entries) {
                for pair in group.windows(2) {
                    prop_assert!(pair[0].id < pair[1].id);
                }
            }
        }
    }
}
