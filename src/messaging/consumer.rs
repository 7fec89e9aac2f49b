//! Inbound consumer: decodes Edge envelopes off the orders topic and routes
//! them to the dispatcher by kind.
//!
//! Undecodable messages and unknown kinds are acked and dropped; redelivering
//! them could never succeed.

use crate::error::Result;
use crate::messaging::client::{MessagingClient, SubscriptionHandle};
use crate::messaging::envelope::{
    DeliveryReceipt, Envelope, OrderCancel, OrderRequest, RedirectRequest, KIND_DELIVERY_RECEIPT,
    KIND_ORDER_CANCEL, KIND_ORDER_REQUEST, KIND_REDIRECT_REQUEST,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// The dispatcher-side contract for inbound order traffic.
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn handle_order_request(&self, env: &Envelope, req: OrderRequest);
    async fn handle_order_cancel(&self, env: &Envelope, req: OrderCancel);
    async fn handle_delivery_receipt(&self, env: &Envelope, req: DeliveryReceipt);
    async fn handle_redirect_request(&self, env: &Envelope, req: RedirectRequest);
}

pub struct Consumer {
    client: Arc<MessagingClient>,
    topic: String,
    handler: Arc<dyn OrderHandler>,
}

impl Consumer {
    pub fn new(client: Arc<MessagingClient>, topic: String, handler: Arc<dyn OrderHandler>) -> Self {
        Self {
            client,
            topic,
            handler,
        }
    }

    pub fn start(&self) -> SubscriptionHandle {
        let handler = Arc::clone(&self.handler);
        info!(topic = %self.topic, "order consumer started");
        self.client.subscribe(
            self.topic.clone(),
            Box::new(move |message| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    dispatch_envelope(&handler, &message.payload).await;
                    Ok(())
                })
            }),
        )
    }
}

async fn dispatch_envelope(handler: &Arc<dyn OrderHandler>, payload: &[u8]) {
    let env = match Envelope::decode(payload) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "dropping undecodable envelope");
            return;
        }
    };

    match env.kind.as_str() {
        KIND_ORDER_REQUEST => match env.body_as::<OrderRequest>() {
            Ok(req) => handler.handle_order_request(&env, req).await,
            Err(e) => warn!(error = %e, "bad order_request body"),
        },
        KIND_ORDER_CANCEL => match env.body_as::<OrderCancel>() {
            Ok(req) => handler.handle_order_cancel(&env, req).await,
            Err(e) => warn!(error = %e, "bad order_cancel body"),
        },
        KIND_DELIVERY_RECEIPT => match env.body_as::<DeliveryReceipt>() {
            Ok(req) => handler.handle_delivery_receipt(&env, req).await,
            Err(e) => warn!(error = %e, "bad delivery_receipt body"),
        },
        KIND_REDIRECT_REQUEST => match env.body_as::<RedirectRequest>() {
            Ok(req) => handler.handle_redirect_request(&env, req).await,
            Err(e) => warn!(error = %e, "bad redirect_request body"),
        },
        other => warn!(kind = other, "dropping envelope with unknown kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OrderHandler for RecordingHandler {
        async fn handle_order_request(&self, _env: &Envelope, req: OrderRequest) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("request:{}", req.order_uuid));
        }
        async fn handle_order_cancel(&self, _env: &Envelope, req: OrderCancel) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("cancel:{}", req.order_uuid));
        }
        async fn handle_delivery_receipt(&self, _env: &Envelope, req: DeliveryReceipt) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("receipt:{}", req.order_uuid));
        }
        async fn handle_redirect_request(&self, _env: &Envelope, req: RedirectRequest) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("redirect:{}", req.order_uuid));
        }
    }

    fn envelope_bytes(kind: &str, body: &impl serde::Serialize) -> Vec<u8> {
        Envelope::new(kind, "edge-1", "factory-1", body)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_consumer_routes_by_kind_in_order() {
        let client = Arc::new(
            MessagingClient::new(
                MessagingConfig {
                    backend: "memory".to_string(),
                    consume_interval_ms: 10,
                    ..Default::default()
                },
                None,
            )
            .unwrap(),
        );
        client.connect().await.unwrap();

        let topic = "edge/orders".to_string();
        client
            .publish(
                &topic,
                &envelope_bytes(
                    KIND_ORDER_REQUEST,
                    &OrderRequest {
                        order_uuid: "u1".to_string(),
                        order_type: "retrieve".to_string(),
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();
        client
            .publish(
                &topic,
                &envelope_bytes(
                    KIND_ORDER_CANCEL,
                    &OrderCancel {
                        order_uuid: "u1".to_string(),
                        reason: "changed my mind".to_string(),
                    },
                ),
            )
            .await
            .unwrap();
        // unknown kinds are dropped, not redelivered
        client
            .publish(&topic, &envelope_bytes("telemetry", &serde_json::json!({})))
            .await
            .unwrap();
        client
            .publish(
                &topic,
                &envelope_bytes(
                    KIND_DELIVERY_RECEIPT,
                    &DeliveryReceipt {
                        order_uuid: "u1".to_string(),
                        receipt_type: "OK".to_string(),
                        final_count: 1.0,
                    },
                ),
            )
            .await
            .unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let consumer = Consumer::new(Arc::clone(&client), topic, handler.clone());
        let handle = consumer.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop().await;

        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec!["request:u1", "cancel:u1", "receipt:u1"]
        );
    }

    #[tokio::test]
    async fn test_undecodable_envelope_is_dropped() {
        let handler: Arc<dyn OrderHandler> = Arc::new(RecordingHandler::default());
        // must not panic
        dispatch_envelope(&handler, b"not json").await;
    }
}
