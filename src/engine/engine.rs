//! The engine assembles every component, loads active orders into the poller
//! at startup, reacts to events, and watches connection health.

use crate::config::{MessagingConfig, RdsConfig, WarpathConfig};
use crate::dispatch::Dispatcher;
use crate::engine::adapters::{DbOrderResolver, DispatchEmitter, PollerEmitter};
use crate::engine::events::{ConnectionEvent, CorrectionAppliedEvent, Event, EventBus, NodeUpdatedEvent};
use crate::engine::wiring::{wire_event_handlers, Reactor};
use crate::error::Result;
use crate::messaging::MessagingClient;
use crate::models::{
    AuditEntry, Correction, NewCorrection, NewNode, NewPayloadType, Node, Order,
    OrderHistoryEntry, PayloadType,
};
use crate::nodestate::{Manager, NodeStateView};
use crate::rds::{
    Client as RdsClient, DispatchableRequest, ManualFinishRequest, OrderDetail, Poller,
    PollerHandle, RdsApi, RedoFailedRequest, RobotStatus, SetPriorityRequest,
};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub struct Engine {
    config: RwLock<WarpathConfig>,
    pool: PgPool,
    rds_client: Arc<RdsClient>,
    rds_api: Arc<dyn RdsApi>,
    nodestate: Arc<Manager>,
    msg_client: Arc<MessagingClient>,
    events: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
    poller: Arc<Poller>,
    poller_handle: Mutex<Option<PollerHandle>>,
    health_shutdown: Mutex<Option<watch::Sender<bool>>>,
    health_join: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    rds_connected: AtomicBool,
    msg_connected: AtomicBool,
}

impl Engine {
    pub fn new(
        config: WarpathConfig,
        pool: PgPool,
        rds_client: Arc<RdsClient>,
        nodestate: Arc<Manager>,
        msg_client: Arc<MessagingClient>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let rds_api: Arc<dyn RdsApi> = rds_client.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            Arc::clone(&rds_api),
            Arc::new(DispatchEmitter::new(Arc::clone(&events))),
            config.factory_id.clone(),
            config.messaging.dispatch_topic_prefix.clone(),
        ));

        let poller = Arc::new(Poller::new(
            Arc::clone(&rds_api),
            Arc::new(PollerEmitter::new(Arc::clone(&events))),
            Arc::new(DbOrderResolver::new(pool.clone())),
            config.poll_interval(),
        ));

        Arc::new(Self {
            config: RwLock::new(config),
            pool,
            rds_client,
            rds_api,
            nodestate,
            msg_client,
            events,
            dispatcher,
            poller,
            poller_handle: Mutex::new(None),
            health_shutdown: Mutex::new(None),
            health_join: Mutex::new(None),
            started: AtomicBool::new(false),
            rds_connected: AtomicBool::new(false),
            msg_connected: AtomicBool::new(false),
        })
    }

    /// Wire event reactions, resume lifecycle tracking for dispatched orders,
    /// and start the poller and health loop.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (factory_id, dispatch_topic_prefix) = {
            let config = self.config.read().expect("config lock poisoned");
            (
                config.factory_id.clone(),
                config.messaging.dispatch_topic_prefix.clone(),
            )
        };
        let reactor = Arc::new(Reactor {
            pool: self.pool.clone(),
            poller: Arc::clone(&self.poller),
            nodestate: Arc::clone(&self.nodestate),
            bus: Arc::clone(&self.events),
            factory_id,
            dispatch_topic_prefix,
        });
        wire_event_handlers(reactor).await;

        self.load_active_orders().await;

        let poller_handle = self.poller.start();
        *self.poller_handle.lock().expect("poller handle poisoned") = Some(poller_handle);

        self.check_connection_status().await;

        // periodic connection health loop
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick already handled above
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.check_connection_status().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *self.health_shutdown.lock().expect("health lock poisoned") = Some(shutdown_tx);
        *self.health_join.lock().expect("health lock poisoned") = Some(join);

        info!("engine started");
    }

    pub async fn stop(&self) {
        let shutdown = self.health_shutdown.lock().expect("health lock poisoned").take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        let join = self.health_join.lock().expect("health lock poisoned").take();
        if let Some(join) = join {
            let _ = join.await;
        }

        let handle = self.poller_handle.lock().expect("poller handle poisoned").take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        info!("engine stopped");
    }

    // --- accessors ---

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn poller(&self) -> Arc<Poller> {
        Arc::clone(&self.poller)
    }

    pub fn node_state(&self) -> Arc<Manager> {
        Arc::clone(&self.nodestate)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> WarpathConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    // --- startup recovery ---

    async fn load_active_orders(&self) {
        match Order::list_dispatched_rds_order_ids(&self.pool).await {
            Ok(ids) => {
                let count = ids.len();
                for id in ids {
                    self.poller.track(&id);
                }
                if count > 0 {
                    info!(count = count, "loaded active RDS orders into poller");
                }
            }
            Err(e) => error!(error = %e, "load active orders failed"),
        }
    }

    // --- connection health ---

    pub async fn check_connection_status(&self) {
        match self.rds_api.ping().await {
            Ok(ping) => {
                if !self.rds_connected.swap(true, Ordering::SeqCst) {
                    self.events
                        .emit(Event::RdsConnected(ConnectionEvent {
                            detail: format!("RDS Core connected ({} {})", ping.product, ping.version),
                        }))
                        .await;
                }
            }
            Err(e) => {
                if self.rds_connected.swap(false, Ordering::SeqCst) {
                    self.events
                        .emit(Event::RdsDisconnected(ConnectionEvent {
                            detail: e.to_string(),
                        }))
                        .await;
                }
            }
        }

        if self.msg_client.is_connected() {
            if !self.msg_connected.swap(true, Ordering::SeqCst) {
                self.events
                    .emit(Event::MessagingConnected(ConnectionEvent {
                        detail: "messaging connected".to_string(),
                    }))
                    .await;
            }
        } else if self.msg_connected.swap(false, Ordering::SeqCst) {
            self.events
                .emit(Event::MessagingDisconnected(ConnectionEvent {
                    detail: "messaging disconnected".to_string(),
                }))
                .await;
        }
    }

    // --- live reconfiguration ---

    pub async fn reconfigure_rds(&self, rds: RdsConfig) -> Result<()> {
        self.rds_client
            .reconfigure(&rds.base_url, Duration::from_millis(rds.timeout_ms))?;
        info!(base_url = %rds.base_url, "RDS reconfigured");
        self.config.write().expect("config lock poisoned").rds = rds;
        self.check_connection_status().await;
        Ok(())
    }

    pub async fn reconfigure_messaging(&self, messaging: MessagingConfig) -> Result<()> {
        self.msg_client.reconfigure(messaging.clone()).await?;
        self.config.write().expect("config lock poisoned").messaging = messaging;
        self.check_connection_status().await;
        Ok(())
    }

    // --- admin surface (consumed by the external web layer) ---

    pub async fn create_node(&self, new_node: NewNode) -> Result<Node> {
        let node = Node::create(&self.pool, new_node).await?;
        self.nodestate.refresh_node_meta(node.id).await;
        self.events
            .emit(Event::NodeUpdated(NodeUpdatedEvent {
                node_id: node.id,
                node_name: node.name.clone(),
                action: "created".to_string(),
            }))
            .await;
        Ok(node)
    }

    pub async fn update_node(&self, id: i64, changes: NewNode) -> Result<Node> {
        let node = Node::update(&self.pool, id, changes).await?;
        self.nodestate.refresh_node_meta(node.id).await;
        self.events
            .emit(Event::NodeUpdated(NodeUpdatedEvent {
                node_id: node.id,
                node_name: node.name.clone(),
                action: "updated".to_string(),
            }))
            .await;
        Ok(node)
    }

    pub async fn delete_node(&self, id: i64) -> Result<bool> {
        let node = Node::find_by_id(&self.pool, id).await?;
        let deleted = Node::delete(&self.pool, id).await?;
        if deleted {
            self.nodestate.refresh_node_meta(id).await;
            self.events
                .emit(Event::NodeUpdated(NodeUpdatedEvent {
                    node_id: id,
                    node_name: node.map(|n| n.name).unwrap_or_default(),
                    action: "deleted".to_string(),
                }))
                .await;
        }
        Ok(deleted)
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        Node::list_all(&self.pool).await
    }

    pub async fn create_payload_type(&self, new_type: NewPayloadType) -> Result<PayloadType> {
        PayloadType::create(&self.pool, new_type).await
    }

    pub async fn update_payload_type(&self, id: i64, changes: NewPayloadType) -> Result<PayloadType> {
        PayloadType::update(&self.pool, id, changes).await
    }

    pub async fn delete_payload_type(&self, id: i64) -> Result<bool> {
        PayloadType::delete(&self.pool, id).await
    }

    pub async fn list_payload_types(&self) -> Result<Vec<PayloadType>> {
        PayloadType::list_all(&self.pool).await
    }

    pub async fn apply_correction(&self, new_correction: NewCorrection) -> Result<Correction> {
        let correction = self.nodestate.apply_correction(new_correction).await?;
        self.events
            .emit(Event::CorrectionApplied(CorrectionAppliedEvent {
                correction_id: correction.id,
                correction_type: correction.correction_type.clone(),
                node_id: correction.node_id,
                reason: correction.reason.clone(),
                actor: correction.actor.clone(),
            }))
            .await;
        Ok(correction)
    }

    pub async fn node_states(&self) -> Result<HashMap<i64, NodeStateView>> {
        self.nodestate.get_all_node_states().await
    }

    pub async fn node_state_view(&self, node_id: i64) -> Result<NodeStateView> {
        self.nodestate.get_node_state(node_id).await
    }

    pub async fn recent_orders(&self, limit: i64) -> Result<Vec<Order>> {
        Order::list_recent(&self.pool, limit).await
    }

    pub async fn order_history(&self, order_id: i64) -> Result<Vec<OrderHistoryEntry>> {
        Order::history(&self.pool, order_id).await
    }

    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        AuditEntry::list_recent(&self.pool, limit).await
    }

    pub async fn recent_corrections(&self, limit: i64) -> Result<Vec<Correction>> {
        Correction::list_recent(&self.pool, limit).await
    }

    // --- RDS explorer passthroughs ---

    pub async fn robots_status(&self) -> Result<Vec<RobotStatus>> {
        self.rds_api.get_robots_status().await
    }

    pub async fn set_robots_dispatchable(&self, robots: Vec<String>, dispatchable: bool) -> Result<()> {
        self.rds_api
            .set_dispatchable(&DispatchableRequest {
                robots,
                dispatchable,
            })
            .await
    }

    pub async fn redo_failed_orders(&self, robots: Vec<String>) -> Result<()> {
        self.rds_api.redo_failed(&RedoFailedRequest { robots }).await
    }

    pub async fn manual_finish_orders(&self, robots: Vec<String>) -> Result<()> {
        self.rds_api
            .manual_finish(&ManualFinishRequest { robots })
            .await
    }

    pub async fn list_rds_orders(&self, page: i32, size: i32) -> Result<Vec<OrderDetail>> {
        self.rds_api.list_orders(page, size).await
    }

    pub async fn set_rds_order_priority(&self, rds_order_id: &str, priority: i32) -> Result<()> {
        self.rds_api
            .set_priority(&SetPriorityRequest {
                id: rds_order_id.to_string(),
                priority,
            })
            .await
    }

    pub async fn rds_bin_details(&self) -> Result<serde_json::Value> {
        self.rds_api.get_bin_details().await
    }

    pub async fn rds_scene(&self) -> Result<serde_json::Value> {
        self.rds_api.get_scene().await
    }
}
