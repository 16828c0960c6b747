//! Collector client port (driven/secondary port)
//!
//! Interface for submitting serialized records to the remote collector.
//! Transport concerns (connection pooling, timeouts, TLS) belong to the
//! adapter; the pipeline only cares about the response status, which it
//! classifies through the [`Disposition`] policy table.
//!
//! ## Design Notes
//!
//! - All calls are asynchronous and must never run on the crash path; the
//!   interceptor persists synchronously and leaves delivery to the worker.
//! - Status-code ranges are policy, not transport detail: every 2xx is a
//!   terminal success, every 4xx is a terminal rejection (deleted without
//!   retry), everything else stays queued for a later attempt.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::TelemetryError;

/// Response from one collector submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorResponse {
    /// HTTP status code answered by the collector
    pub status: u16,
    /// Response body, if the collector sent one
    pub body: Option<String>,
}

impl CollectorResponse {
    /// Creates a response with no body.
    pub fn status_only(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Classifies this response through the retry policy table.
    pub fn disposition(&self) -> Disposition {
        Disposition::from_status(self.status)
    }
}

/// Terminal-or-retry classification of a collector outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The collector accepted the record; delete the local file
    Delivered,
    /// The collector will never accept this record; delete the local file
    /// without counting it as delivered
    Rejected,
    /// Transient failure; leave the record queued
    Retry,
}

impl Disposition {
    /// Maps a status code onto the policy table.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Disposition::Delivered,
            400..=499 => Disposition::Rejected,
            _ => Disposition::Retry,
        }
    }

    /// Whether the local file can be deleted.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Disposition::Retry)
    }
}

/// Asynchronous client for the remote collector
///
/// Implementations must be cheap to call concurrently; the delivery worker
/// fans out one submission per pending file.
#[async_trait]
pub trait CollectorClient: Send + Sync {
    /// Submits one serialized record.
    ///
    /// Transport-level failures (timeout, no connectivity) are reported as
    /// [`TelemetryError::Network`] and treated as retryable by the caller.
    async fn submit(&self, payload: &str) -> Result<CollectorResponse, TelemetryError>;

    /// Uploads a record file as-is (batched/zipped upload path).
    async fn submit_file(&self, file: &Path) -> Result<CollectorResponse, TelemetryError>;
}
