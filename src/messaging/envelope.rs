//! Envelope wire format and per-kind bodies.
//!
//! All inbound and outbound messages share one JSON envelope:
//!
//! ```json
//! { "kind": "...", "client_id": "...", "factory_id": "...",
//!   "ts": "<RFC3339>", "body": { ... } }
//! ```

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Inbound envelope kinds.
pub const KIND_ORDER_REQUEST: &str = "order_request";
pub const KIND_ORDER_CANCEL: &str = "order_cancel";
pub const KIND_DELIVERY_RECEIPT: &str = "delivery_receipt";
pub const KIND_REDIRECT_REQUEST: &str = "redirect_request";

/// Outbound envelope kinds.
pub const KIND_ACK: &str = "ack";
pub const KIND_ERROR: &str = "error";
pub const KIND_UPDATE: &str = "update";
pub const KIND_WAYBILL: &str = "waybill";
pub const KIND_DELIVERED: &str = "delivered";
pub const KIND_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    pub client_id: String,
    pub factory_id: String,
    pub ts: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn new(
        kind: &str,
        client_id: &str,
        factory_id: &str,
        body: &impl Serialize,
    ) -> Result<Envelope> {
        Ok(Envelope {
            kind: kind.to_string(),
            client_id: client_id.to_string(),
            factory_id: factory_id.to_string(),
            ts: Utc::now(),
            body: serde_json::to_value(body)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decode the body into its kind-specific shape.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Reply topic for one Edge client.
pub fn dispatch_topic(prefix: &str, client_id: &str) -> String {
    format!("{prefix}/{client_id}")
}

// --- Inbound bodies ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_uuid: String,
    pub order_type: String,
    #[serde(default)]
    pub payload_type_code: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub pickup_node: String,
    #[serde(default)]
    pub delivery_node: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub payload_desc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCancel {
    pub order_uuid: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub order_uuid: String,
    #[serde(default)]
    pub receipt_type: String,
    #[serde(default)]
    pub final_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedirectRequest {
    pub order_uuid: String,
    pub new_delivery_node: String,
}

// --- Outbound bodies ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckReply {
    pub order_uuid: String,
    pub warpath_order_id: i64,
    pub source_node: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub order_uuid: String,
    pub error_code: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateReply {
    pub order_uuid: String,
    pub status: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaybillReply {
    pub order_uuid: String,
    pub waybill_id: String,
    pub robot_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveredReply {
    pub order_uuid: String,
    pub delivered_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelledReply {
    pub order_uuid: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let req = OrderRequest {
            order_uuid: "u1".to_string(),
            order_type: "retrieve".to_string(),
            payload_type_code: "WIDGET".to_string(),
            quantity: 1.0,
            delivery_node: "L1".to_string(),
            priority: 5,
            ..Default::default()
        };
        let env = Envelope::new(KIND_ORDER_REQUEST, "edge-1", "factory-1", &req).unwrap();
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, "order_request");
        assert_eq!(decoded.client_id, "edge-1");
        assert_eq!(decoded.body_as::<OrderRequest>().unwrap(), req);
    }

    #[test]
    fn test_envelope_wire_fields() {
        let env = Envelope::new(
            KIND_ACK,
            "edge-1",
            "factory-1",
            &AckReply {
                order_uuid: "u1".to_string(),
                warpath_order_id: 42,
                source_node: "S1".to_string(),
            },
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "ack");
        assert_eq!(value["client_id"], "edge-1");
        assert_eq!(value["factory_id"], "factory-1");
        assert_eq!(value["body"]["warpath_order_id"], 42);
        assert_eq!(value["body"]["source_node"], "S1");
        // ts must be RFC3339
        let ts = value["ts"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_order_request_missing_optionals_default() {
        let raw = br#"{"kind":"order_request","client_id":"c","factory_id":"f",
            "ts":"2025-03-01T00:00:00Z",
            "body":{"order_uuid":"u2","order_type":"store"}}"#;
        let env = Envelope::decode(raw).unwrap();
        let req: OrderRequest = env.body_as().unwrap();
        assert_eq!(req.order_uuid, "u2");
        assert_eq!(req.payload_type_code, "");
        assert_eq!(req.priority, 0);
        assert_eq!(req.quantity, 0.0);
    }

    #[test]
    fn test_dispatch_topic() {
        assert_eq!(
            dispatch_topic("warpath/dispatch", "edge-1"),
            "warpath/dispatch/edge-1"
        );
    }
}
