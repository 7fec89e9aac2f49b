//! Order status and order type vocabularies.
//!
//! Statuses are persisted as snake_case strings. The graph:
//!
//! ```text
//! Pending -> Sourcing -> Dispatched -> InTransit -> Delivered -> Confirmed -> Completed
//!                                      \->                       \->
//!                                      Failed                   Cancelled
//! ```
//!
//! Terminal statuses forbid further transitions except no-op idempotent
//! replays.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order persisted, not yet sourced
    Pending,
    /// Resolving source payload / destination node
    Sourcing,
    /// Accepted by RDS, waiting for a robot
    Dispatched,
    /// Robot en route
    InTransit,
    /// RDS reports physical delivery
    Delivered,
    /// Edge confirmed receipt
    Confirmed,
    /// Inventory transferred, order closed
    Completed,
    /// Order failed
    Failed,
    /// Order cancelled
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses are irrevocable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether an order in this status still occupies the RDS pipeline.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Dispatched | Self::InTransit | Self::Delivered)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sourcing => write!(f, "sourcing"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::InTransit => write!(f, "in_transit"),
            Self::Delivered => write!(f, "delivered"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sourcing" => Ok(Self::Sourcing),
            "dispatched" => Ok(Self::Dispatched),
            "in_transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Transport intent kinds accepted from Edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Storage -> line, FIFO-sourced
    Retrieve,
    /// Named node -> named node
    Move,
    /// Line -> storage, destination auto-selected
    Store,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieve => write!(f, "retrieve"),
            Self::Move => write!(f, "move"),
            Self::Store => write!(f, "store"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retrieve" => Ok(Self::Retrieve),
            "move" => Ok(Self::Move),
            "store" => Ok(Self::Store),
            _ => Err(format!("invalid order type: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Sourcing.is_terminal());
        assert!(!OrderStatus::Dispatched.is_terminal());
        assert!(!OrderStatus::InTransit.is_terminal());
        assert!(!OrderStatus::Delivered.is_terminal());
        assert!(!OrderStatus::Confirmed.is_terminal());
    }

    #[test]
    fn test_active_statuses() {
        assert!(OrderStatus::Dispatched.is_active());
        assert!(OrderStatus::InTransit.is_active());
        assert!(OrderStatus::Delivered.is_active());
        assert!(!OrderStatus::Pending.is_active());
        assert!(!OrderStatus::Completed.is_active());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Sourcing,
            OrderStatus::Dispatched,
            OrderStatus::InTransit,
            OrderStatus::Delivered,
            OrderStatus::Confirmed,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!(OrderStatus::InTransit.to_string(), "in_transit");
        assert!("running".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_type_parsing() {
        assert_eq!("retrieve".parse::<OrderType>().unwrap(), OrderType::Retrieve);
        assert_eq!("move".parse::<OrderType>().unwrap(), OrderType::Move);
        assert_eq!("store".parse::<OrderType>().unwrap(), OrderType::Store);
        assert!("fetch".parse::<OrderType>().is_err());
    }

    #[test]
    fn test_status_serde_wire_format() {
        let json = serde_json::to_string(&OrderStatus::InTransit).unwrap();
        assert_eq!(json, "\"in_transit\"");
        let parsed: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, OrderStatus::InTransit);
    }
}
