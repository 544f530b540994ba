//! HTTP access to tracking endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// One request against a single endpoint. Any `Err` makes the tracker move
/// on to the next endpoint.
#[async_trait]
pub trait TrackingTransport: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> BridgeResult<Value>;

    async fn post(&self, url: &str, body: &Value) -> BridgeResult<Value>;
}

/// [`TrackingTransport`] over `reqwest`. Non-2xx responses are failures.
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> BridgeResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("http client: {}", e)))?;
        Ok(Self { http_client })
    }

    async fn read(response: reqwest::Response) -> BridgeResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Network(format!("HTTP {}: {}", status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TrackingTransport for HttpTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> BridgeResult<Value> {
        debug!(url, "tracker GET");
        let response = self.http_client.get(url).query(query).send().await?;
        Self::read(response).await
    }

    async fn post(&self, url: &str, body: &Value) -> BridgeResult<Value> {
        debug!(url, "tracker POST");
        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::read(response).await
    }
}
