//! The `BatchTransport` trait — the seam to raw HTTP delivery.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::response::BatchResponse;

/// What the coordinator needs from the HTTP layer.
///
/// Implementations own authentication, connection lifecycle, timeouts and
/// cancellation; the engine only hands them bytes and headers. The trait is
/// object-safe and can be stored as `Arc<dyn BatchTransport>`.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// POST a raw multipart body to the batch endpoint and return the parsed
    /// response structure. A non-2xx outer status is a fatal
    /// [`TransportError`] — per-operation failures live inside the parsed
    /// body instead.
    async fn send_batch(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<BatchResponse, TransportError>;

    /// GET a single resource as JSON. Used to re-fetch an entity after an
    /// update when a forced refresh was requested.
    async fn get(&self, url: &str) -> Result<Value, TransportError>;
}
