//! Fixed-interval polling for asynchronous remote operations.
//!
//! Once the API has accepted an asynchronous mutation (HTTP 202 or an order
//! submission), the only recourse is to poll until a terminal state appears
//! or the wall clock runs out. There is no backoff and no cancellation of
//! the in-flight remote operation: a local timeout stops waiting but cannot
//! undo the server-side action.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::api::ApiClient;
use crate::descriptor::WaitConfig;
use crate::error::{Error, Result};

/// Order states that mean the provisioning request finished successfully.
const ORDER_OK_STATES: &[&str] = &["done"];
/// Order states that mean the provisioning request failed for good.
const ORDER_ERRED_STATES: &[&str] = &["erred", "rejected", "canceled"];

/// Polls a remote resource or order until it reaches a terminal state.
pub struct Poller<'a> {
    client: &'a ApiClient,
    interval: Duration,
    timeout: Duration,
}

impl<'a> Poller<'a> {
    pub fn new(client: &'a ApiClient, interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            interval,
            timeout,
        }
    }

    /// Poll the resource detail endpoint until its state field matches an
    /// ok state. An erred state is fatal. A 404 mid-poll is success: the
    /// resource legitimately disappeared (e.g. a termination race), which
    /// is reported as `None`.
    pub async fn wait_for_resource_state(
        &self,
        detail_path: &str,
        uuid: &str,
        wait: &WaitConfig,
    ) -> Result<Option<Value>> {
        let mut path_params = HashMap::new();
        path_params.insert("uuid".to_string(), uuid.to_string());

        let start = Instant::now();
        while start.elapsed() < self.timeout {
            let response = self
                .client
                .request(reqwest::Method::GET, detail_path, Some(&path_params), None, None)
                .await;

            match response {
                Err(Error::Http { status: 404, .. }) => return Ok(None),
                Err(other) => return Err(other),
                Ok(response) => {
                    if let Some(state) = response.body.get(&wait.state_field).and_then(Value::as_str)
                    {
                        if wait.ok_states.iter().any(|ok| ok == state) {
                            return Ok(Some(response.body));
                        }
                        if wait.erred_states.iter().any(|erred| erred == state) {
                            return Err(Error::RemoteErred {
                                state: state.to_string(),
                                detail: None,
                            });
                        }
                    }
                }
            }

            tokio::time::sleep(self.interval).await;
        }

        Err(Error::Timeout(format!(
            "resource {uuid} to become stable"
        )))
    }

    /// Poll an order until it is done. `erred`, `rejected`, and `canceled`
    /// are fatal; the order's own error message is forwarded when present.
    pub async fn wait_for_order(&self, order_detail_path: &str, uuid: &str) -> Result<Value> {
        let mut path_params = HashMap::new();
        path_params.insert("uuid".to_string(), uuid.to_string());

        let start = Instant::now();
        while start.elapsed() < self.timeout {
            let response = self
                .client
                .request(reqwest::Method::GET, order_detail_path, Some(&path_params), None, None)
                .await?;

            if let Some(state) = response.body.get("state").and_then(Value::as_str) {
                if ORDER_OK_STATES.contains(&state) {
                    return Ok(response.body);
                }
                if ORDER_ERRED_STATES.contains(&state) {
                    let detail = response
                        .body
                        .get("error_message")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Err(Error::RemoteErred {
                        state: state.to_string(),
                        detail,
                    });
                }
            }

            tokio::time::sleep(self.interval).await;
        }

        Err(Error::Timeout(format!("order {uuid} to complete")))
    }
}
