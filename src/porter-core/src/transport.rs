//! HTTP transport to the organization backend.
//!
//! ## Endpoints
//!
//! - `POST /v1/access-events/batch` - Upload recorded scans
//! - `GET /v1/revocations?since=<rfc3339>` - Fetch revocation delta
//!
//! Events carry a stable `event_uid` so the backend can deduplicate
//! at-least-once re-deliveries. The backend acknowledges per event and may
//! acknowledge a subset of a batch.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::TransportError;
use crate::queue::{AccessEvent, PendingEvent};
use crate::revocation::RevocationRecord;

/// A revocation fetch result.
#[derive(Debug, Clone, Default)]
pub struct RevocationDelta {
    /// Newly revoked authorizations since the requested timestamp.
    pub revoked: Vec<RevocationRecord>,
    /// Server watermark to checkpoint after applying the delta.
    pub watermark: Option<DateTime<Utc>>,
}

/// Connection to the organization backend.
///
/// The sync orchestrator is the only caller; transport failures never
/// reach the scanning UI.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Upload a batch of pending events.
    ///
    /// Returns the local ids of the events the backend acknowledged. The
    /// backend may acknowledge a subset; unacknowledged events stay queued
    /// for the next cycle.
    ///
    /// # Errors
    ///
    /// `TransportError` when the request fails or the response cannot be
    /// used. No event is considered acknowledged in that case.
    async fn push_events(&self, events: &[PendingEvent]) -> Result<Vec<u64>, TransportError>;

    /// Fetch revocations issued since `since` (everything when `None`).
    ///
    /// # Errors
    ///
    /// `TransportError` when the request fails or the response cannot be
    /// used.
    async fn fetch_revocations_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<RevocationDelta, TransportError>;
}

/// Batch upload request body.
#[derive(Debug, Serialize)]
struct EventBatchRequest<'a> {
    events: Vec<&'a AccessEvent>,
}

/// Batch upload response body.
#[derive(Debug, Deserialize)]
struct EventBatchResponse {
    /// `event_uid`s the backend accepted.
    acknowledged: Vec<String>,
}

/// Revocation fetch response body.
#[derive(Debug, Deserialize)]
struct RevocationsResponse {
    revoked: Vec<RevocationRecord>,
    /// Server-side timestamp covering this response.
    watermark: Option<DateTime<Utc>>,
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport against the given base URL.
    ///
    /// # Errors
    ///
    /// `TransportError::Http` when the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        // Aggressive timeouts so an unreachable backend fails fast instead
        // of stalling the sync cycle.
        let connect_timeout = Duration::from_secs(3);
        let read_timeout = timeout.min(Duration::from_secs(8));

        let client = ClientBuilder::new()
            .timeout(read_timeout)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_idle_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .user_agent(format!("PorterCore/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn push_events(&self, events: &[PendingEvent]) -> Result<Vec<u64>, TransportError> {
        let url = format!("{}/v1/access-events/batch", self.base_url);
        let body = EventBatchRequest {
            events: events.iter().map(|p| &p.event).collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Event upload request failed");
                TransportError::http(format!("Request to {url} failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Event upload rejected");
            return Err(TransportError::http(format!("HTTP {status} from {url}")));
        }

        let body = response.json::<EventBatchResponse>().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to parse upload response");
            TransportError::invalid_response(format!("Failed to parse response from {url}: {e}"))
        })?;

        // Map acknowledged uids back to the local ids of this batch.
        let acked: Vec<u64> = events
            .iter()
            .filter(|p| body.acknowledged.contains(&p.event.event_uid))
            .map(|p| p.local_id)
            .collect();

        debug!(
            sent = events.len(),
            acked = acked.len(),
            "Event batch uploaded"
        );
        Ok(acked)
    }

    #[instrument(skip(self))]
    async fn fetch_revocations_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<RevocationDelta, TransportError> {
        let mut url = format!("{}/v1/revocations", self.base_url);
        if let Some(ts) = since {
            url.push_str(&format!("?since={}", ts.to_rfc3339()));
        }

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Revocation fetch request failed");
            TransportError::http(format!("Request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Revocation fetch rejected");
            return Err(TransportError::http(format!("HTTP {status} from {url}")));
        }

        let body = response.json::<RevocationsResponse>().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to parse revocation response");
            TransportError::invalid_response(format!("Failed to parse response from {url}: {e}"))
        })?;

        debug!(count = body.revoked.len(), "Revocation delta fetched");
        Ok(RevocationDelta {
            revoked: body.revoked,
            watermark: body.watermark,
        })
    }
}
