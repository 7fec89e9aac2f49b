//! RDS order lifecycle poller.
//!
//! Holds the set of external order ids being tracked and polls their state on
//! an interval. Observed state changes are emitted through [`StatusEmitter`]
//! after resolving the internal order id via [`OrderResolver`]; terminal
//! external states drop the id from the tracked set.
//!
//! The tracked map is mutex-guarded; each tick iterates over a snapshot so
//! the lock is never held across HTTP.

use crate::error::Result;
use crate::rds::client::RdsApi;
use crate::rds::types::OrderState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Translates an external RDS order id to the internal order id.
#[async_trait]
pub trait OrderResolver: Send + Sync {
    async fn resolve_rds_order_id(&self, rds_order_id: &str) -> Result<i64>;
}

/// Sink for observed lifecycle changes.
#[async_trait]
pub trait StatusEmitter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn emit_order_status_changed(
        &self,
        order_id: i64,
        rds_order_id: &str,
        old_state: &str,
        new_state: &str,
        robot_id: &str,
        detail: &str,
    );
}

pub struct Poller {
    client: Arc<dyn RdsApi>,
    emitter: Arc<dyn StatusEmitter>,
    resolver: Arc<dyn OrderResolver>,
    poll_interval: Duration,
    /// rds_order_id -> last observed external state (raw wire string).
    tracked: Mutex<HashMap<String, String>>,
}

impl Poller {
    pub fn new(
        client: Arc<dyn RdsApi>,
        emitter: Arc<dyn StatusEmitter>,
        resolver: Arc<dyn OrderResolver>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            emitter,
            resolver,
            poll_interval,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Begin tracking an external order id. Idempotent; an already-tracked id
    /// keeps its last observed state.
    pub fn track(&self, rds_order_id: &str) {
        let mut tracked = self.tracked.lock().expect("tracked set poisoned");
        tracked
            .entry(rds_order_id.to_string())
            .or_insert_with(String::new);
        debug!(rds_order_id = rds_order_id, "tracking RDS order");
    }

    pub fn untrack(&self, rds_order_id: &str) {
        let mut tracked = self.tracked.lock().expect("tracked set poisoned");
        if tracked.remove(rds_order_id).is_some() {
            debug!(rds_order_id = rds_order_id, "untracked RDS order");
        }
    }

    pub fn active_count(&self) -> usize {
        self.tracked.lock().expect("tracked set poisoned").len()
    }

    pub fn is_tracked(&self, rds_order_id: &str) -> bool {
        self.tracked
            .lock()
            .expect("tracked set poisoned")
            .contains_key(rds_order_id)
    }

    /// One poll pass over a snapshot of the tracked set.
    pub async fn poll_once(&self) {
        let snapshot: Vec<(String, String)> = {
            let tracked = self.tracked.lock().expect("tracked set poisoned");
            tracked
                .iter()
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect()
        };

        for (rds_order_id, last_state) in snapshot {
            let detail = match self.client.get_order_details(&rds_order_id).await {
                Ok(detail) => detail,
                Err(e) => {
                    // transient: retried next tick
                    debug!(rds_order_id = %rds_order_id, error = %e, "order details fetch failed");
                    continue;
                }
            };

            if detail.state == last_state {
                continue;
            }

            let order_id = match self.resolver.resolve_rds_order_id(&rds_order_id).await {
                Ok(order_id) => order_id,
                Err(e) => {
                    warn!(rds_order_id = %rds_order_id, error = %e, "cannot resolve RDS order");
                    continue;
                }
            };

            self.emitter
                .emit_order_status_changed(
                    order_id,
                    &rds_order_id,
                    &last_state,
                    &detail.state,
                    &detail.robot_id,
                    &format!("RDS state {} -> {}", last_state, detail.state),
                )
                .await;

            let terminal = detail
                .state
                .parse::<OrderState>()
                .map(|s| s.is_terminal())
                .unwrap_or(false);

            let mut tracked = self.tracked.lock().expect("tracked set poisoned");
            if terminal {
                tracked.remove(&rds_order_id);
                debug!(rds_order_id = %rds_order_id, state = %detail.state,
                       "RDS order reached terminal state, untracked");
            } else if let Some(entry) = tracked.get_mut(&rds_order_id) {
                *entry = detail.state.clone();
            }
        }
    }

    /// Spawn the periodic poll loop.
    pub fn start(self: &Arc<Self>) -> PollerHandle {
        let poller = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        info!(interval_ms = self.poll_interval.as_millis() as u64, "RDS poller started");

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => poller.poll_once().await,
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            debug!("RDS poller stopped");
        });

        PollerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarpathError;
    use crate::rds::types::{
        DispatchableRequest, JoinOrderRequest, ManualFinishRequest, OrderDetail, PingInfo,
        RedoFailedRequest, RobotStatus, SetPriorityRequest, TerminateRequest,
    };

    /// RDS fake scripted with a fixed state per order id.
    #[derive(Default)]
    struct FakeRds {
        states: Mutex<HashMap<String, (String, String)>>, // id -> (state, robot)
    }

    impl FakeRds {
        fn set_state(&self, id: &str, state: &str, robot: &str) {
            self.states
                .lock()
                .unwrap()
                .insert(id.to_string(), (state.to_string(), robot.to_string()));
        }
    }

    #[async_trait]
    impl RdsApi for FakeRds {
        async fn ping(&self) -> Result<PingInfo> {
            Ok(PingInfo {
                product: "fake".to_string(),
                version: "0".to_string(),
            })
        }
        async fn create_join_order(&self, _req: &JoinOrderRequest) -> Result<()> {
            Ok(())
        }
        async fn terminate_order(&self, _req: &TerminateRequest) -> Result<()> {
            Ok(())
        }
        async fn set_priority(&self, _req: &SetPriorityRequest) -> Result<()> {
            Ok(())
        }
        async fn get_order_details(&self, id: &str) -> Result<OrderDetail> {
            let states = self.states.lock().unwrap();
            let (state, robot) = states
                .get(id)
                .cloned()
                .ok_or_else(|| WarpathError::RdsError(format!("unknown order {id}")))?;
            Ok(OrderDetail {
                id: id.to_string(),
                state,
                robot_id: robot,
                ..Default::default()
            })
        }
        async fn list_orders(&self, _page: i32, _size: i32) -> Result<Vec<OrderDetail>> {
            Ok(vec![])
        }
        async fn get_robots_status(&self) -> Result<Vec<RobotStatus>> {
            Ok(vec![])
        }
        async fn set_dispatchable(&self, _req: &DispatchableRequest) -> Result<()> {
            Ok(())
        }
        async fn redo_failed(&self, _req: &RedoFailedRequest) -> Result<()> {
            Ok(())
        }
        async fn manual_finish(&self, _req: &ManualFinishRequest) -> Result<()> {
            Ok(())
        }
        async fn get_bin_details(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn get_scene(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    struct FakeResolver;

    #[async_trait]
    impl OrderResolver for FakeResolver {
        async fn resolve_rds_order_id(&self, rds_order_id: &str) -> Result<i64> {
            rds_order_id
                .strip_prefix("wp-")
                .and_then(|rest| rest.split('-').next())
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| WarpathError::NotFound(rds_order_id.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<(i64, String, String, String, String)>>,
    }

    #[async_trait]
    impl StatusEmitter for RecordingEmitter {
        async fn emit_order_status_changed(
            &self,
            order_id: i64,
            rds_order_id: &str,
            old_state: &str,
            new_state: &str,
            robot_id: &str,
            _detail: &str,
        ) {
            self.events.lock().unwrap().push((
                order_id,
                rds_order_id.to_string(),
                old_state.to_string(),
                new_state.to_string(),
                robot_id.to_string(),
            ));
        }
    }

    fn new_poller(rds: Arc<FakeRds>, emitter: Arc<RecordingEmitter>) -> Poller {
        Poller::new(
            rds,
            emitter,
            Arc::new(FakeResolver),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_emits_on_state_change_and_updates_recorded_state() {
        let rds = Arc::new(FakeRds::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let poller = new_poller(Arc::clone(&rds), Arc::clone(&emitter));

        rds.set_state("wp-7-abc", "RUNNING", "AGV-2");
        poller.track("wp-7-abc");

        poller.poll_once().await;
        {
            let events = emitter.events.lock().unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0], (7, "wp-7-abc".into(), "".into(), "RUNNING".into(), "AGV-2".into()));
        }

        // no change, no event
        poller.poll_once().await;
        assert_eq!(emitter.events.lock().unwrap().len(), 1);
        assert!(poller.is_tracked("wp-7-abc"));
    }

    #[tokio::test]
    async fn test_terminal_state_emits_then_untracks() {
        let rds = Arc::new(FakeRds::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let poller = new_poller(Arc::clone(&rds), Arc::clone(&emitter));

        rds.set_state("wp-9-xyz", "FINISHED", "AGV-1");
        poller.track("wp-9-xyz");
        assert_eq!(poller.active_count(), 1);

        poller.poll_once().await;
        assert_eq!(emitter.events.lock().unwrap().len(), 1);
        assert_eq!(poller.active_count(), 0);

        // a full cycle leaves no terminal states tracked
        poller.poll_once().await;
        assert_eq!(emitter.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_order_tracked() {
        let rds = Arc::new(FakeRds::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let poller = new_poller(Arc::clone(&rds), Arc::clone(&emitter));

        poller.track("wp-3-err");
        poller.poll_once().await;

        assert!(emitter.events.lock().unwrap().is_empty());
        assert!(poller.is_tracked("wp-3-err"));

        // next tick the order materializes
        rds.set_state("wp-3-err", "CREATED", "");
        poller.poll_once().await;
        assert_eq!(emitter.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_order_keeps_tracking() {
        let rds = Arc::new(FakeRds::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let poller = new_poller(Arc::clone(&rds), Arc::clone(&emitter));

        rds.set_state("orphan", "RUNNING", "");
        poller.track("orphan");
        poller.poll_once().await;

        assert!(emitter.events.lock().unwrap().is_empty());
        assert!(poller.is_tracked("orphan"));
    }

    #[tokio::test]
    async fn test_track_untrack_idempotent() {
        let rds = Arc::new(FakeRds::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let poller = new_poller(rds, emitter);

        poller.track("wp-1-a");
        poller.track("wp-1-a");
        assert_eq!(poller.active_count(), 1);
        poller.untrack("wp-1-a");
        poller.untrack("wp-1-a");
        assert_eq!(poller.active_count(), 0);
    }
}
