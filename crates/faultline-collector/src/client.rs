//! HTTP collector client
//!
//! Wraps `reqwest::Client` with the collector's endpoint layout and the
//! client-id header. Submission is declined without a network call while
//! the client id is unset; the caller sees that as a retryable failure, so
//! queued records survive until the host finishes configuration.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use faultline_core::config::CollectorConfig;
use faultline_core::domain::TelemetryError;
use faultline_core::ports::{CollectorClient, CollectorResponse};

/// Header carrying the host's collector credential.
pub const CLIENT_ID_HEADER: &str = "faultline-client-id";

/// Endpoint for single-record JSON submission.
const RECORDS_PATH: &str = "/records";
/// Endpoint for whole-file multipart upload.
const UPLOADS_PATH: &str = "/uploads";

/// HTTP client for the remote collector
pub struct HttpCollector {
    client: Client,
    base_url: String,
    client_id: String,
}

impl HttpCollector {
    /// Creates a collector client from configuration.
    pub fn new(config: &CollectorConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
        }
    }

    /// Creates a client against a custom base URL (useful for testing).
    pub fn with_base_url(client_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
        }
    }

    /// The configured client id, if usable.
    fn client_id(&self) -> Option<&str> {
        if self.client_id.is_empty() || self.base_url.is_empty() {
            None
        } else {
            Some(&self.client_id)
        }
    }

    async fn into_response(
        response: reqwest::Response,
    ) -> Result<CollectorResponse, TelemetryError> {
        let status = response.status().as_u16();
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        if !(200..300).contains(&status) {
            warn!(status, "Collector answered with a non-success status");
        }
        Ok(CollectorResponse { status, body })
    }
}

#[async_trait]
impl CollectorClient for HttpCollector {
    async fn submit(&self, payload: &str) -> Result<CollectorResponse, TelemetryError> {
        let Some(client_id) = self.client_id() else {
            return Err(TelemetryError::Network(
                "collector not configured (missing base url or client id)".to_string(),
            ));
        };

        // Refuse to ship something the collector can't parse.
        serde_json::from_str::<serde_json::Value>(payload)
            .map_err(|e| TelemetryError::Serialization(format!("record payload: {e}")))?;

        debug!(bytes = payload.len(), "Submitting record to collector");
        let response = self
            .client
            .post(format!("{}{RECORDS_PATH}", self.base_url))
            .header(CLIENT_ID_HEADER, client_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        Self::into_response(response).await
    }

    async fn submit_file(&self, file: &Path) -> Result<CollectorResponse, TelemetryError> {
        let Some(client_id) = self.client_id() else {
            return Err(TelemetryError::Network(
                "collector not configured (missing base url or client id)".to_string(),
            ));
        };

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "record.log".to_string());
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| TelemetryError::Persistence(e.to_string()))?;

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("text/plain")
            .map_err(|e| TelemetryError::Network(e.to_string()))?;
        let form = Form::new().part("logFile", part);

        debug!(file = %file.display(), "Uploading record file to collector");
        let response = self
            .client
            .post(format!("{}{UPLOADS_PATH}", self.base_url))
            .header(CLIENT_ID_HEADER, client_id)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        Self::into_response(response).await
    }
}
