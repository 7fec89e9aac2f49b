//! Synchronous request/response client for the RDS HTTP API.
//!
//! The client is stateless between calls and carries no retry policy; callers
//! (the poller, the dispatcher) decide what a failure means. Base URL and
//! timeout can be swapped live via [`Client::reconfigure`].

use crate::error::{Result, WarpathError};
use crate::rds::types::{
    ApiResponse, DispatchableRequest, JoinOrderRequest, ManualFinishRequest, OpaqueDataResponse,
    OrderDetail, OrderDetailsResponse, OrderListResponse, PingInfo, PingResponse,
    RedoFailedRequest, RobotStatus, RobotsStatusResponse, SetPriorityRequest, TerminateRequest,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// The RDS surface consumed by warpath components. Trait-shaped so the
/// dispatcher and poller can be exercised against fakes.
#[async_trait]
pub trait RdsApi: Send + Sync {
    async fn ping(&self) -> Result<PingInfo>;
    async fn create_join_order(&self, req: &JoinOrderRequest) -> Result<()>;
    async fn terminate_order(&self, req: &TerminateRequest) -> Result<()>;
    async fn set_priority(&self, req: &SetPriorityRequest) -> Result<()>;
    async fn get_order_details(&self, id: &str) -> Result<OrderDetail>;
    async fn list_orders(&self, page: i32, size: i32) -> Result<Vec<OrderDetail>>;
    async fn get_robots_status(&self) -> Result<Vec<RobotStatus>>;
    async fn set_dispatchable(&self, req: &DispatchableRequest) -> Result<()>;
    async fn redo_failed(&self, req: &RedoFailedRequest) -> Result<()>;
    async fn manual_finish(&self, req: &ManualFinishRequest) -> Result<()>;
    async fn get_bin_details(&self) -> Result<serde_json::Value>;
    async fn get_scene(&self) -> Result<serde_json::Value>;
}

struct ClientState {
    base_url: String,
    http: reqwest::Client,
}

pub struct Client {
    state: RwLock<ClientState>,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(ClientState {
                base_url: base_url.trim_end_matches('/').to_string(),
                http: build_http(timeout)?,
            }),
        })
    }

    /// Swap base URL and timeout live. In-flight requests finish against the
    /// old settings.
    pub fn reconfigure(&self, base_url: &str, timeout: Duration) -> Result<()> {
        let http = build_http(timeout)?;
        let mut state = self.state.write().expect("client state poisoned");
        state.base_url = base_url.trim_end_matches('/').to_string();
        state.http = http;
        debug!(base_url = base_url, "RDS client reconfigured");
        Ok(())
    }

    pub fn base_url(&self) -> String {
        self.state.read().expect("client state poisoned").base_url.clone()
    }

    fn snapshot(&self) -> (String, reqwest::Client) {
        let state = self.state.read().expect("client state poisoned");
        (state.base_url.clone(), state.http.clone())
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let (base_url, http) = self.snapshot();
        let response = http.get(format!("{base_url}{path}")).send().await?;
        Ok(response.error_for_status()?.json::<R>().await?)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let (base_url, http) = self.snapshot();
        let response = http.post(format!("{base_url}{path}")).json(body).send().await?;
        Ok(response.error_for_status()?.json::<R>().await?)
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("warpath/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| WarpathError::ConfigurationError(format!("build HTTP client: {e}")))
}

/// Non-success responses become typed errors.
pub fn check_response(response: &ApiResponse) -> Result<()> {
    if response.success {
        Ok(())
    } else if response.message.is_empty() {
        Err(WarpathError::RdsError("RDS reported failure".to_string()))
    } else {
        Err(WarpathError::RdsError(response.message.clone()))
    }
}

#[async_trait]
impl RdsApi for Client {
    async fn ping(&self) -> Result<PingInfo> {
        let resp: PingResponse = self.get("/ping").await?;
        check_response(&resp.response)?;
        Ok(PingInfo {
            product: resp.product,
            version: resp.version,
        })
    }

    async fn create_join_order(&self, req: &JoinOrderRequest) -> Result<()> {
        let resp: ApiResponse = self.post("/setOrder", req).await?;
        check_response(&resp)
    }

    async fn terminate_order(&self, req: &TerminateRequest) -> Result<()> {
        let resp: ApiResponse = self.post("/terminate", req).await?;
        check_response(&resp)
    }

    async fn set_priority(&self, req: &SetPriorityRequest) -> Result<()> {
        let resp: ApiResponse = self.post("/setPriority", req).await?;
        check_response(&resp)
    }

    async fn get_order_details(&self, id: &str) -> Result<OrderDetail> {
        let resp: OrderDetailsResponse = self.get(&format!("/orderDetails/{id}")).await?;
        check_response(&resp.response)?;
        resp.data
            .ok_or_else(|| WarpathError::RdsError(format!("no details for order {id}")))
    }

    async fn list_orders(&self, page: i32, size: i32) -> Result<Vec<OrderDetail>> {
        let resp: OrderListResponse = self.get(&format!("/orders?page={page}&size={size}")).await?;
        check_response(&resp.response)?;
        Ok(resp.data)
    }

    async fn get_robots_status(&self) -> Result<Vec<RobotStatus>> {
        let resp: RobotsStatusResponse = self.get("/robotsStatus").await?;
        check_response(&resp.response)?;
        Ok(resp.report)
    }

    async fn set_dispatchable(&self, req: &DispatchableRequest) -> Result<()> {
        let resp: ApiResponse = self.post("/dispatchable", req).await?;
        check_response(&resp)
    }

    async fn redo_failed(&self, req: &RedoFailedRequest) -> Result<()> {
        let resp: ApiResponse = self.post("/redoFailedOrder", req).await?;
        check_response(&resp)
    }

    async fn manual_finish(&self, req: &ManualFinishRequest) -> Result<()> {
        let resp: ApiResponse = self.post("/manualFinished", req).await?;
        check_response(&resp)
    }

    async fn get_bin_details(&self) -> Result<serde_json::Value> {
        let resp: OpaqueDataResponse = self.get("/binDetails").await?;
        check_response(&resp.response)?;
        Ok(resp.data)
    }

    async fn get_scene(&self) -> Result<serde_json::Value> {
        let resp: OpaqueDataResponse = self.get("/scene").await?;
        check_response(&resp.response)?;
        Ok(resp.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_response() {
        assert!(check_response(&ApiResponse {
            success: true,
            message: String::new()
        })
        .is_ok());

        let err = check_response(&ApiResponse {
            success: false,
            message: "no route to destination".to_string(),
        })
        .unwrap_err();
        assert_eq!(
            err,
            WarpathError::RdsError("no route to destination".to_string())
        );

        let err = check_response(&ApiResponse {
            success: false,
            message: String::new(),
        })
        .unwrap_err();
        assert_eq!(err, WarpathError::RdsError("RDS reported failure".to_string()));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = Client::new("http://rds.local:9050/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://rds.local:9050");
        client
            .reconfigure("http://rds2.local:9050/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(client.base_url(), "http://rds2.local:9050");
    }
}
