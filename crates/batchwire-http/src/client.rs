//! HTTP batch transport backed by `reqwest`.
//!
//! Deliberately carries no retry or circuit-breaker layer: a batch POST is a
//! mutation and must not be replayed by the transport. Timeout handling and
//! default protocol headers live here; everything above the raw send is the
//! engine's business.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use batchwire_core::error::TransportError;
use batchwire_core::response::BatchResponse;
use batchwire_core::transport::BatchTransport;

/// Configuration for [`HttpBatchTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Timeout for each HTTP call (the batch POST and refresh GETs).
    pub request_timeout: Duration,
    /// Value of the `OData-Version` header sent with every request.
    pub protocol_version: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            protocol_version: "4.0".to_string(),
        }
    }
}

/// Transport sending batch bodies to a service root over HTTP.
pub struct HttpBatchTransport {
    service_root: String,
    http: reqwest::Client,
    protocol_version: String,
}

impl HttpBatchTransport {
    /// Create a transport for the given service root URL.
    pub fn new(service_root: impl Into<String>, config: HttpTransportConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build reqwest client");
        let mut service_root = service_root.into();
        if !service_root.ends_with('/') {
            service_root.push('/');
        }
        Self {
            service_root,
            http,
            protocol_version: config.protocol_version,
        }
    }

    /// Create with default configuration.
    pub fn default_for(service_root: impl Into<String>) -> Self {
        Self::new(service_root, HttpTransportConfig::default())
    }

    /// Resolve a service-relative path (leading slash) against the root.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.service_root, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn send_batch(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<BatchResponse, TransportError> {
        let mut req = self
            .http
            .post(url)
            .header("OData-Version", &self.protocol_version)
            .header("Accept", "application/json")
            .body(body);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        tracing::debug!(url, "sending batch request");
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "batch request rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<BatchResponse>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        let absolute = self.absolute(url);
        tracing::debug!(url = %absolute, "fetching entity");
        let resp = self
            .http
            .get(&absolute)
            .header("OData-Version", &self.protocol_version)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}
