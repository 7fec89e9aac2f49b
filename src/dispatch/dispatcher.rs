//! The dispatcher: inbound order intents -> sourced, claimed, RDS-dispatched
//! orders.
//!
//! Every reply to Edge goes through the outbox, never straight to messaging,
//! so a crash between the store commit and the wire loses nothing. Failure
//! of any step releases payload claims held by the order.

use crate::dispatch::emitter::Emitter;
use crate::error::ErrorCode;
use crate::messaging::consumer::OrderHandler;
use crate::messaging::envelope::{
    dispatch_topic, AckReply, CancelledReply, DeliveryReceipt, Envelope, ErrorReply, OrderCancel,
    OrderRequest, RedirectRequest, KIND_ACK, KIND_CANCELLED, KIND_ERROR,
};
use crate::models::{NewOrder, Node, Order, OutboxEntry, Payload, PayloadType};
use crate::rds::{JoinOrderRequest, RdsApi, TerminateRequest};
use crate::state_machine::{OrderStatus, OrderType};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Dispatcher {
    pool: PgPool,
    rds: Arc<dyn RdsApi>,
    emitter: Arc<dyn Emitter>,
    factory_id: String,
    dispatch_topic_prefix: String,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        rds: Arc<dyn RdsApi>,
        emitter: Arc<dyn Emitter>,
        factory_id: String,
        dispatch_topic_prefix: String,
    ) -> Self {
        Self {
            pool,
            rds,
            emitter,
            factory_id,
            dispatch_topic_prefix,
        }
    }

    async fn process_order_request(&self, env: &Envelope, req: OrderRequest) {
        // Replays of a known intent are no-ops past Pending: best-effort ack,
        // nothing else. An order still in Pending was interrupted and is
        // picked up again below.
        let pending_replay = match Order::find_by_external_uuid(&self.pool, &req.order_uuid).await
        {
            Ok(Some(existing)) if existing.status != "pending" => {
                info!(order_uuid = %req.order_uuid, status = %existing.status,
                      "duplicate order request ignored");
                let source_node = match existing.source_node_id {
                    Some(node_id) => Node::find_by_id(&self.pool, node_id)
                        .await
                        .ok()
                        .flatten()
                        .map(|n| n.name)
                        .unwrap_or_default(),
                    None => String::new(),
                };
                self.send_ack(&env.client_id, &req.order_uuid, existing.id, &source_node)
                    .await;
                return;
            }
            Ok(existing) => existing,
            Err(e) => {
                error!(order_uuid = %req.order_uuid, error = %e, "order lookup failed");
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::InternalError,
                    &e.to_string(),
                )
                .await;
                return;
            }
        };

        // Resolve payload type
        let payload_type = match PayloadType::find_by_code(&self.pool, &req.payload_type_code).await
        {
            Ok(Some(payload_type)) => payload_type,
            Ok(None) => {
                warn!(code = %req.payload_type_code, "payload type not found");
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::PayloadTypeError,
                    &format!("payload type {:?} not found", req.payload_type_code),
                )
                .await;
                return;
            }
            Err(e) => {
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::InternalError,
                    &e.to_string(),
                )
                .await;
                return;
            }
        };

        // Resolve destination node up front when given
        let mut dest_node_id = None;
        if !req.delivery_node.is_empty() {
            match Node::find_by_name(&self.pool, &req.delivery_node).await {
                Ok(Some(node)) => dest_node_id = Some(node.id),
                Ok(None) => {
                    warn!(node = %req.delivery_node, "delivery node not found");
                    self.send_error(
                        &env.client_id,
                        &req.order_uuid,
                        ErrorCode::InvalidNode,
                        &format!("delivery node {:?} not found", req.delivery_node),
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    self.send_error(
                        &env.client_id,
                        &req.order_uuid,
                        ErrorCode::InternalError,
                        &e.to_string(),
                    )
                    .await;
                    return;
                }
            }
        }

        let order = match pending_replay {
            Some(order) => order,
            None => {
                let order = match Order::create(
                    &self.pool,
                    NewOrder {
                        external_uuid: req.order_uuid.clone(),
                        client_id: env.client_id.clone(),
                        factory_id: env.factory_id.clone(),
                        order_type: req.order_type.clone(),
                        quantity: req.quantity,
                        pickup_node_name: req.pickup_node.clone(),
                        delivery_node_name: req.delivery_node.clone(),
                        priority: req.priority,
                        payload_desc: req.payload_desc.clone(),
                        payload_type_id: Some(payload_type.id),
                        dest_node_id,
                    },
                )
                .await
                {
                    Ok(order) => order,
                    Err(e) => {
                        error!(order_uuid = %req.order_uuid, error = %e, "create order failed");
                        self.send_error(
                            &env.client_id,
                            &req.order_uuid,
                            ErrorCode::InternalError,
                            &e.to_string(),
                        )
                        .await;
                        return;
                    }
                };
                let _ = Order::update_status(
                    &self.pool,
                    order.id,
                    OrderStatus::Pending,
                    "order received",
                )
                .await;

                self.emitter
                    .emit_order_received(
                        order.id,
                        &order.external_uuid,
                        &env.client_id,
                        &req.order_type,
                        &req.payload_type_code,
                        &req.delivery_node,
                    )
                    .await;
                order
            }
        };

        match req.order_type.parse::<OrderType>() {
            Ok(OrderType::Retrieve) => {
                self.handle_retrieve(&order, &env.client_id, &req.payload_type_code)
                    .await
            }
            Ok(OrderType::Move) => {
                self.handle_move(&order, &env.client_id, &req.payload_type_code)
                    .await
            }
            Ok(OrderType::Store) => self.handle_store(&order, &env.client_id).await,
            Err(_) => {
                warn!(order_type = %req.order_type, "unknown order type");
                self.fail_order(
                    &order,
                    &env.client_id,
                    ErrorCode::UnknownType,
                    &format!("unknown order type: {}", req.order_type),
                )
                .await;
            }
        }
    }

    async fn handle_retrieve(&self, order: &Order, client_id: &str, payload_type_code: &str) {
        let _ = Order::update_status(&self.pool, order.id, OrderStatus::Sourcing, "finding source")
            .await;

        // FIFO source selection, then claim to prevent double-dispatch
        let source = match Payload::find_source_fifo(&self.pool, payload_type_code).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::NoSource,
                    &format!("no source payload found for type {payload_type_code}"),
                )
                .await;
                return;
            }
            Err(e) => {
                self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                    .await;
                return;
            }
        };

        if let Err(e) = Payload::claim(&self.pool, source.id, order.id).await {
            self.fail_order(order, client_id, ErrorCode::ClaimFailed, &e.to_string())
                .await;
            return;
        }

        let Some(source_node_id) = source.node_id else {
            self.fail_order(order, client_id, ErrorCode::NodeError, "source payload is in transit")
                .await;
            return;
        };
        if let Err(e) = Order::set_source_node(&self.pool, order.id, source_node_id).await {
            self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                .await;
            return;
        }

        let source_node = match self.load_node(order, client_id, source_node_id).await {
            Some(node) => node,
            None => return,
        };
        let Some(dest_node_id) = order.dest_node_id else {
            self.fail_order(
                order,
                client_id,
                ErrorCode::InvalidNode,
                "retrieve order requires delivery_node",
            )
            .await;
            return;
        };
        let dest_node = match self.load_node(order, client_id, dest_node_id).await {
            Some(node) => node,
            None => return,
        };

        self.dispatch_to_rds(order, client_id, &source_node, &dest_node)
            .await;
    }

    async fn handle_move(&self, order: &Order, client_id: &str, payload_type_code: &str) {
        let _ = Order::update_status(&self.pool, order.id, OrderStatus::Sourcing, "validating move")
            .await;

        if order.pickup_node_name.is_empty() {
            self.fail_order(
                order,
                client_id,
                ErrorCode::MissingPickup,
                "move order requires pickup_node",
            )
            .await;
            return;
        }

        let pickup_node = match Node::find_by_name(&self.pool, &order.pickup_node_name).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::InvalidNode,
                    &format!("pickup node {:?} not found", order.pickup_node_name),
                )
                .await;
                return;
            }
            Err(e) => {
                self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                    .await;
                return;
            }
        };

        // Claim an unclaimed payload of the requested type at the pickup node,
        // smallest id first.
        if !payload_type_code.is_empty() {
            let payloads = match Payload::list_by_node(&self.pool, pickup_node.id).await {
                Ok(payloads) => payloads,
                Err(e) => {
                    self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                        .await;
                    return;
                }
            };
            let mut candidates: Vec<i64> = payloads
                .iter()
                .filter(|p| p.payload_type_code == payload_type_code && p.claimed_by.is_none())
                .map(|p| p.id)
                .collect();
            candidates.sort_unstable();

            if candidates.is_empty() {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::NoPayload,
                    &format!(
                        "no unclaimed {payload_type_code} payload at {}",
                        order.pickup_node_name
                    ),
                )
                .await;
                return;
            }

            let mut claimed = false;
            for candidate in candidates {
                if Payload::claim(&self.pool, candidate, order.id).await.is_ok() {
                    claimed = true;
                    break;
                }
            }
            if !claimed {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::ClaimFailed,
                    &format!(
                        "all {payload_type_code} payloads at {} claimed concurrently",
                        order.pickup_node_name
                    ),
                )
                .await;
                return;
            }
        }

        if let Err(e) = Order::set_source_node(&self.pool, order.id, pickup_node.id).await {
            self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                .await;
            return;
        }

        let Some(dest_node_id) = order.dest_node_id else {
            self.fail_order(
                order,
                client_id,
                ErrorCode::InvalidNode,
                "move order requires delivery_node",
            )
            .await;
            return;
        };
        let dest_node = match self.load_node(order, client_id, dest_node_id).await {
            Some(node) => node,
            None => return,
        };

        self.dispatch_to_rds(order, client_id, &pickup_node, &dest_node)
            .await;
    }

    async fn handle_store(&self, order: &Order, client_id: &str) {
        let _ = Order::update_status(
            &self.pool,
            order.id,
            OrderStatus::Sourcing,
            "finding storage destination",
        )
        .await;

        // Store orders never pre-claim; a fresh payload is created at
        // completion.
        let dest_node = match Node::find_storage_destination(&self.pool).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::NoStorage,
                    "no available storage node found",
                )
                .await;
                return;
            }
            Err(e) => {
                self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                    .await;
                return;
            }
        };
        if let Err(e) =
            Order::set_destination(&self.pool, order.id, dest_node.id, &dest_node.name).await
        {
            self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                .await;
            return;
        }

        // Pickup is the explicit pickup node, falling back to the requesting
        // line's delivery_node.
        let pickup_name = if !order.pickup_node_name.is_empty() {
            order.pickup_node_name.clone()
        } else {
            order.delivery_node_name.clone()
        };
        if pickup_name.is_empty() {
            self.fail_order(
                order,
                client_id,
                ErrorCode::MissingPickup,
                "store order requires a pickup location",
            )
            .await;
            return;
        }

        let pickup_node = match Node::find_by_name(&self.pool, &pickup_name).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::InvalidNode,
                    &format!("node {pickup_name:?} not found"),
                )
                .await;
                return;
            }
            Err(e) => {
                self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                    .await;
                return;
            }
        };

        if let Err(e) = Order::set_source_node(&self.pool, order.id, pickup_node.id).await {
            self.fail_order(order, client_id, ErrorCode::InternalError, &e.to_string())
                .await;
            return;
        }

        self.dispatch_to_rds(order, client_id, &pickup_node, &dest_node)
            .await;
    }

    /// Submit the join order to RDS and move the order to Dispatched.
    async fn dispatch_to_rds(
        &self,
        order: &Order,
        client_id: &str,
        source_node: &Node,
        dest_node: &Node,
    ) {
        let rds_order_id = generate_rds_order_id(order.id);

        let request = JoinOrderRequest {
            id: rds_order_id.clone(),
            external_id: order.external_uuid.clone(),
            from: source_node.rds_location.clone(),
            to: dest_node.rds_location.clone(),
            priority: order.priority,
        };

        if let Err(e) = self.rds.create_join_order(&request).await {
            warn!(order_id = order.id, error = %e, "RDS create order failed");
            self.fail_order(order, client_id, ErrorCode::RdsFailed, &e.to_string())
                .await;
            return;
        }

        if let Err(e) =
            Order::set_rds(&self.pool, order.id, &rds_order_id, "CREATED", "").await
        {
            error!(order_id = order.id, error = %e, "record RDS order id failed");
        }
        let _ = Order::update_status(
            &self.pool,
            order.id,
            OrderStatus::Dispatched,
            &format!("RDS order {rds_order_id} created"),
        )
        .await;

        // On redirects the loaded copy still holds the superseded id.
        self.emitter
            .emit_order_dispatched(
                order.id,
                &rds_order_id,
                &order.rds_order_id,
                &source_node.name,
                &dest_node.name,
            )
            .await;

        self.send_ack(client_id, &order.external_uuid, order.id, &source_node.name)
            .await;
    }

    async fn process_order_cancel(&self, env: &Envelope, req: OrderCancel) {
        let order = match Order::find_by_external_uuid(&self.pool, &req.order_uuid).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_uuid = %req.order_uuid, "cancel for unknown order");
                return;
            }
            Err(e) => {
                error!(order_uuid = %req.order_uuid, error = %e, "cancel lookup failed");
                return;
            }
        };

        if order.is_terminal() {
            info!(order_uuid = %req.order_uuid, status = %order.status,
                  "cancel for terminal order ignored");
            self.send_cancelled(&env.client_id, &req.order_uuid, &req.reason)
                .await;
            return;
        }

        // Best-effort terminate; a failure here never blocks the cancel.
        if !order.rds_order_id.is_empty() {
            if let Err(e) = self
                .rds
                .terminate_order(&TerminateRequest {
                    id: order.rds_order_id.clone(),
                    disable_vehicle: false,
                })
                .await
            {
                warn!(rds_order_id = %order.rds_order_id, error = %e, "terminate RDS order failed");
            }
        }

        self.unclaim_order_payloads(order.id).await;
        let _ = Order::update_status(&self.pool, order.id, OrderStatus::Cancelled, &req.reason)
            .await;

        self.emitter
            .emit_order_cancelled(order.id, &order.external_uuid, &env.client_id, &req.reason)
            .await;

        self.send_cancelled(&env.client_id, &req.order_uuid, &req.reason)
            .await;
    }

    async fn process_delivery_receipt(&self, env: &Envelope, req: DeliveryReceipt) {
        let order = match Order::find_by_external_uuid(&self.pool, &req.order_uuid).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_uuid = %req.order_uuid, "delivery receipt for unknown order");
                return;
            }
            Err(e) => {
                error!(order_uuid = %req.order_uuid, error = %e, "receipt lookup failed");
                return;
            }
        };

        let detail = format!("receipt: {}, count: {:.1}", req.receipt_type, req.final_count);
        match Order::confirm_and_complete(&self.pool, order.id, &detail).await {
            Ok(true) => {
                self.emitter
                    .emit_order_completed(order.id, &order.external_uuid, &env.client_id)
                    .await;
            }
            Ok(false) => {
                info!(order_uuid = %req.order_uuid, status = %order.status,
                      "delivery receipt for terminal order ignored");
            }
            Err(e) => {
                error!(order_id = order.id, error = %e, "complete order failed");
            }
        }
    }

    async fn process_redirect_request(&self, env: &Envelope, req: RedirectRequest) {
        let order = match Order::find_by_external_uuid(&self.pool, &req.order_uuid).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_uuid = %req.order_uuid, "redirect for unknown order");
                return;
            }
            Err(e) => {
                error!(order_uuid = %req.order_uuid, error = %e, "redirect lookup failed");
                return;
            }
        };

        if order.is_terminal() {
            info!(order_uuid = %req.order_uuid, status = %order.status,
                  "redirect for terminal order ignored");
            self.send_error(
                &env.client_id,
                &req.order_uuid,
                ErrorCode::RedirectFailed,
                "order already terminal",
            )
            .await;
            return;
        }

        // Best-effort terminate of the current RDS order
        if !order.rds_order_id.is_empty() {
            if let Err(e) = self
                .rds
                .terminate_order(&TerminateRequest {
                    id: order.rds_order_id.clone(),
                    disable_vehicle: false,
                })
                .await
            {
                warn!(rds_order_id = %order.rds_order_id, error = %e,
                      "terminate for redirect failed");
            }
        }

        let new_dest = match Node::find_by_name(&self.pool, &req.new_delivery_node).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::InvalidNode,
                    &format!("redirect destination {:?} not found", req.new_delivery_node),
                )
                .await;
                return;
            }
            Err(e) => {
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::InternalError,
                    &e.to_string(),
                )
                .await;
                return;
            }
        };

        if let Err(e) =
            Order::set_destination(&self.pool, order.id, new_dest.id, &new_dest.name).await
        {
            self.send_error(
                &env.client_id,
                &req.order_uuid,
                ErrorCode::InternalError,
                &e.to_string(),
            )
            .await;
            return;
        }

        let Some(source_node_id) = order.source_node_id else {
            self.send_error(
                &env.client_id,
                &req.order_uuid,
                ErrorCode::RedirectFailed,
                "no source node for redirect",
            )
            .await;
            return;
        };
        let source_node = match Node::find_by_id(&self.pool, source_node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::RedirectFailed,
                    &format!("source node {source_node_id} missing"),
                )
                .await;
                return;
            }
            Err(e) => {
                self.send_error(
                    &env.client_id,
                    &req.order_uuid,
                    ErrorCode::RedirectFailed,
                    &e.to_string(),
                )
                .await;
                return;
            }
        };

        let _ = Order::update_status(
            &self.pool,
            order.id,
            OrderStatus::Sourcing,
            &format!("redirecting to {}", req.new_delivery_node),
        )
        .await;
        self.dispatch_to_rds(&order, &env.client_id, &source_node, &new_dest)
            .await;
    }

    /// Move the order to Failed, release its claims, emit, reply.
    async fn fail_order(&self, order: &Order, client_id: &str, code: ErrorCode, detail: &str) {
        let _ = Order::update_status(&self.pool, order.id, OrderStatus::Failed, detail).await;
        self.unclaim_order_payloads(order.id).await;
        self.emitter
            .emit_order_failed(order.id, &order.external_uuid, client_id, code.as_str(), detail)
            .await;
        self.send_error(client_id, &order.external_uuid, code, detail)
            .await;
    }

    /// Collect claim holders first, then release row-by-row; no read cursor
    /// stays open while writes are issued.
    async fn unclaim_order_payloads(&self, order_id: i64) {
        let ids = match Payload::ids_claimed_by(&self.pool, order_id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(order_id = order_id, error = %e, "list claimed payloads failed");
                return;
            }
        };
        for payload_id in ids {
            if let Err(e) = Payload::unclaim(&self.pool, payload_id).await {
                error!(payload_id = payload_id, error = %e, "unclaim failed");
            }
        }
    }

    async fn load_node(&self, order: &Order, client_id: &str, node_id: i64) -> Option<Node> {
        match Node::find_by_id(&self.pool, node_id).await {
            Ok(Some(node)) => Some(node),
            Ok(None) => {
                self.fail_order(
                    order,
                    client_id,
                    ErrorCode::NodeError,
                    &format!("node {node_id} missing"),
                )
                .await;
                None
            }
            Err(e) => {
                self.fail_order(order, client_id, ErrorCode::NodeError, &e.to_string())
                    .await;
                None
            }
        }
    }

    async fn send_ack(&self, client_id: &str, order_uuid: &str, order_id: i64, source_node: &str) {
        self.enqueue_reply(
            client_id,
            KIND_ACK,
            &AckReply {
                order_uuid: order_uuid.to_string(),
                warpath_order_id: order_id,
                source_node: source_node.to_string(),
            },
        )
        .await;
    }

    async fn send_error(&self, client_id: &str, order_uuid: &str, code: ErrorCode, detail: &str) {
        self.enqueue_reply(
            client_id,
            KIND_ERROR,
            &ErrorReply {
                order_uuid: order_uuid.to_string(),
                error_code: code.as_str().to_string(),
                detail: detail.to_string(),
            },
        )
        .await;
    }

    async fn send_cancelled(&self, client_id: &str, order_uuid: &str, reason: &str) {
        self.enqueue_reply(
            client_id,
            KIND_CANCELLED,
            &CancelledReply {
                order_uuid: order_uuid.to_string(),
                reason: reason.to_string(),
            },
        )
        .await;
    }

    async fn enqueue_reply(&self, client_id: &str, kind: &str, body: &impl serde::Serialize) {
        let envelope = match Envelope::new(kind, client_id, &self.factory_id, body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(kind = kind, error = %e, "encode reply failed");
                return;
            }
        };
        let data = match envelope.encode() {
            Ok(data) => data,
            Err(e) => {
                error!(kind = kind, error = %e, "encode reply failed");
                return;
            }
        };
        let topic = dispatch_topic(&self.dispatch_topic_prefix, client_id);
        if let Err(e) = OutboxEntry::enqueue(&self.pool, &topic, &data, kind, client_id).await {
            error!(kind = kind, topic = %topic, error = %e, "enqueue reply failed");
        }
    }
}

/// External RDS order id: unique per dispatch attempt.
fn generate_rds_order_id(order_id: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("wp-{}-{}", order_id, &suffix[..8])
}

#[async_trait]
impl OrderHandler for Dispatcher {
    async fn handle_order_request(&self, env: &Envelope, req: OrderRequest) {
        self.process_order_request(env, req).await;
    }

    async fn handle_order_cancel(&self, env: &Envelope, req: OrderCancel) {
        self.process_order_cancel(env, req).await;
    }

    async fn handle_delivery_receipt(&self, env: &Envelope, req: DeliveryReceipt) {
        self.process_delivery_receipt(env, req).await;
    }

    async fn handle_redirect_request(&self, env: &Envelope, req: RedirectRequest) {
        self.process_redirect_request(env, req).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rds_order_id_shape() {
        let id = generate_rds_order_id(42);
        assert!(id.starts_with("wp-42-"));
        assert_eq!(id.len(), "wp-42-".len() + 8);
        // unique per attempt
        assert_ne!(generate_rds_order_id(42), generate_rds_order_id(42));
    }
}
