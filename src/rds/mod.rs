//! Robot Dispatch Service integration: typed HTTP client and order-lifecycle
//! poller.

pub mod client;
pub mod poller;
pub mod types;

pub use client::{Client, RdsApi};
pub use poller::{OrderResolver, Poller, PollerHandle, StatusEmitter};
pub use types::{
    ApiResponse, DispatchableRequest, JoinOrderRequest, ManualFinishRequest, OrderDetail,
    OrderState, PingInfo, RedoFailedRequest, RobotStatus, SetPriorityRequest, TerminateRequest,
};
