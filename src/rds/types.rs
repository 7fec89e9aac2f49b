//! RDS wire types.
//!
//! Every RDS response carries a success flag; non-success surfaces as a typed
//! error at the client. [`OrderState`] is the only external state vocabulary
//! the core understands; states it cannot parse are treated as still
//! dispatched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External order lifecycle as reported by RDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Created,
    ToBeDispatched,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl OrderState {
    /// Terminal RDS states stop lifecycle tracking.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::ToBeDispatched => write!(f, "TO_BE_DISPATCHED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "TO_BE_DISPATCHED" => Ok(Self::ToBeDispatched),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            _ => Err(format!("unknown RDS order state: {s}")),
        }
    }
}

/// Common success/message pair present on every RDS response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(flatten)]
    pub response: ApiResponse,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingInfo {
    pub product: String,
    pub version: String,
}

/// Pickup-to-delivery join order.
#[derive(Debug, Clone, Serialize)]
pub struct JoinOrderRequest {
    pub id: String,
    #[serde(rename = "externalId")]
    pub external_id: String,
    pub from: String,
    pub to: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminateRequest {
    pub id: String,
    #[serde(rename = "disableVehicle")]
    pub disable_vehicle: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetPriorityRequest {
    pub id: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderDetail {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "externalId", default)]
    pub external_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "robotId", default)]
    pub robot_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetailsResponse {
    #[serde(flatten)]
    pub response: ApiResponse,
    pub data: Option<OrderDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderListResponse {
    #[serde(flatten)]
    pub response: ApiResponse,
    #[serde(default)]
    pub data: Vec<OrderDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RobotStatus {
    #[serde(rename = "robotId", default)]
    pub robot_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub battery: f64,
    #[serde(default)]
    pub dispatchable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RobotsStatusResponse {
    #[serde(flatten)]
    pub response: ApiResponse,
    #[serde(default)]
    pub report: Vec<RobotStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchableRequest {
    pub robots: Vec<String>,
    pub dispatchable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedoFailedRequest {
    pub robots: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualFinishRequest {
    pub robots: Vec<String>,
}

/// Bin and scene payloads are passed through opaquely to the admin surface.
#[derive(Debug, Clone, Deserialize)]
pub struct OpaqueDataResponse {
    #[serde(flatten)]
    pub response: ApiResponse,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_state_round_trip() {
        for state in [
            OrderState::Created,
            OrderState::ToBeDispatched,
            OrderState::Running,
            OrderState::Finished,
            OrderState::Failed,
            OrderState::Stopped,
        ] {
            assert_eq!(state.to_string().parse::<OrderState>().unwrap(), state);
        }
        assert!("PAUSED".parse::<OrderState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderState::Finished.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(OrderState::Stopped.is_terminal());
        assert!(!OrderState::Created.is_terminal());
        assert!(!OrderState::ToBeDispatched.is_terminal());
        assert!(!OrderState::Running.is_terminal());
    }

    #[test]
    fn test_join_order_wire_keys() {
        let req = JoinOrderRequest {
            id: "wp-1-abc".to_string(),
            external_id: "u1".to_string(),
            from: "S1".to_string(),
            to: "L1".to_string(),
            priority: 5,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["from"], "S1");
        assert_eq!(value["to"], "L1");
        assert_eq!(value["externalId"], "u1");
    }

    #[test]
    fn test_order_details_response_decoding() {
        let raw = r#"{"success":true,"message":"","data":{"id":"r1","state":"RUNNING","robotId":"AGV-3"}}"#;
        let resp: OrderDetailsResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.response.success);
        let detail = resp.data.unwrap();
        assert_eq!(detail.state, "RUNNING");
        assert_eq!(detail.robot_id, "AGV-3");
    }
}
