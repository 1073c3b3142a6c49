//! Transport seam for SIEM delivery.
//!
//! Production sends through `reqwest` with a per-request timeout; tests
//! swap in a scripted transport to exercise retry behavior.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// One outbound delivery, already rendered for the target's wire protocol.
#[derive(Clone, Debug)]
pub struct DeliveryRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// How deliveries leave the process.
#[async_trait]
pub trait SiemTransport: Send + Sync {
    /// POST the request; any non-2xx or I/O problem is an error string.
    async fn send(&self, request: &DeliveryRequest) -> Result<(), String>;
}

/// reqwest-backed transport with a bounded per-request timeout.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout_seconds: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SiemTransport for HttpTransport {
    async fn send(&self, request: &DeliveryRequest) -> Result<(), String> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let response = builder.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("target returned {}", response.status()))
        }
    }
}
