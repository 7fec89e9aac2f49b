//! Cross-component flows that run against in-process fakes: poller ->
//! emitter -> event bus, and messaging consumer round trips.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warpath::config::MessagingConfig;
use warpath::engine::{DispatchEmitter, Event, EventBus, EventType, PollerEmitter};
use warpath::error::{Result, WarpathError};
use warpath::messaging::{
    dispatch_topic, Consumer, DeliveryReceipt, Envelope, MessagingClient, OrderCancel,
    OrderHandler, OrderRequest, RedirectRequest,
};
use warpath::rds::{
    DispatchableRequest, JoinOrderRequest, ManualFinishRequest, OrderDetail, OrderResolver,
    PingInfo, Poller, RdsApi, RedoFailedRequest, RobotStatus, SetPriorityRequest,
    TerminateRequest,
};

#[derive(Default)]
struct ScriptedRds {
    states: Mutex<HashMap<String, (String, String)>>,
}

impl ScriptedRds {
    fn set_state(&self, id: &str, state: &str, robot: &str) {
        self.states
            .lock()
            .unwrap()
            .insert(id.to_string(), (state.to_string(), robot.to_string()));
    }
}

#[async_trait]
impl RdsApi for ScriptedRds {
    async fn ping(&self) -> Result<PingInfo> {
        Ok(PingInfo {
            product: "scripted".to_string(),
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

struct StaticResolver {
    order_id: i64,
}

#[async_trait]
impl OrderResolver for StaticResolver {
    async fn resolve_rds_order_id(&self, _rds_order_id: &str) -> Result<i64> {
        Ok(self.order_id)
    }
}

async fn collect_events(bus: &EventBus, types: Vec<EventType>) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_types(
        types,
        Box::new(move |event| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(event);
            })
        }),
    )
    .await;
    seen
}

#[tokio::test]
async fn poller_drives_status_changed_events_through_the_bus() {
    let bus = Arc::new(EventBus::new());
    let seen = collect_events(&bus, vec![EventType::OrderStatusChanged]).await;

    let rds = Arc::new(ScriptedRds::default());
    let rds_api: Arc<dyn RdsApi> = rds.clone();
    let poller = Arc::new(Poller::new(
        rds_api,
        Arc::new(PollerEmitter::new(Arc::clone(&bus))),
        Arc::new(StaticResolver { order_id: 11 }),
        Duration::from_millis(10),
    ));

    // Running -> Finished across two poll cycles
    rds.set_state("wp-11-aaaa", "RUNNING", "AGV-4");
    poller.track("wp-11-aaaa");
    poller.poll_once().await;
    rds.set_state("wp-11-aaaa", "FINISHED", "AGV-4");
    poller.poll_once().await;

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 2);
    match &events[0] {
        Event::OrderStatusChanged(ev) => {
            assert_eq!(ev.order_id, 11);
            assert_eq!(ev.old_state, "");
            assert_eq!(ev.new_state, "RUNNING");
            assert_eq!(ev.robot_id, "AGV-4");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        Event::OrderStatusChanged(ev) => {
            assert_eq!(ev.old_state, "RUNNING");
            assert_eq!(ev.new_state, "FINISHED");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // terminal state left the tracked set
    assert_eq!(poller.active_count(), 0);
}

#[tokio::test]
async fn dispatch_emitter_feeds_bus_subscribers_in_order() {
    let bus = Arc::new(EventBus::new());
    let received = collect_events(
        &bus,
        vec![EventType::OrderReceived, EventType::OrderDispatched],
    )
    .await;

    let emitter = DispatchEmitter::new(Arc::clone(&bus));
    use warpath::dispatch::Emitter;
    emitter
        .emit_order_received(5, "u5", "edge-2", "retrieve", "WIDGET", "L1")
        .await;
    emitter
        .emit_order_dispatched(5, "wp-5-bbbb", "", "S1", "L1")
        .await;

    let events = received.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type(), EventType::OrderReceived);
    assert_eq!(events[1].event_type(), EventType::OrderDispatched);
}

#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl OrderHandler for RecordingHandler {
    async fn handle_order_request(&self, env: &Envelope, req: OrderRequest) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("request {} from {}", req.order_uuid, env.client_id));
    }
    async fn handle_order_cancel(&self, _env: &Envelope, req: OrderCancel) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cancel {}", req.order_uuid));
    }
    async fn handle_delivery_receipt(&self, _env: &Envelope, req: DeliveryReceipt) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("receipt {}", req.order_uuid));
    }
    async fn handle_redirect_request(&self, _env: &Envelope, req: RedirectRequest) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("redirect {} to {}", req.order_uuid, req.new_delivery_node));
    }
}

#[tokio::test]
async fn consumer_round_trip_over_memory_backend() {
    let config = MessagingConfig {
        backend: "memory".to_string(),
        consume_interval_ms: 10,
        ..Default::default()
    };
    let client = Arc::new(MessagingClient::new(config.clone(), None).unwrap());
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let topic = config.orders_topic.clone();
    for (kind, body) in [
        (
            "order_request",
            serde_json::json!({"order_uuid": "u9", "order_type": "retrieve",
                              "payload_type_code": "WIDGET", "delivery_node": "L1"}),
        ),
        (
            "redirect_request",
            serde_json::json!({"order_uuid": "u9", "new_delivery_node": "L2"}),
        ),
    ] {
        let env = Envelope::new(kind, "edge-3", "factory-1", &body).unwrap();
        client.publish(&topic, &env.encode().unwrap()).await.unwrap();
    }

    let handler = Arc::new(RecordingHandler::default());
    let consumer = Consumer::new(Arc::clone(&client), topic, handler.clone());
    let handle = consumer.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    assert_eq!(
        *handler.calls.lock().unwrap(),
        vec!["request u9 from edge-3", "redirect u9 to L2"]
    );

    // reply topics are one per client
    assert_eq!(
        dispatch_topic("warpath/dispatch", "edge-3"),
        "warpath/dispatch/edge-3"
    );
}
