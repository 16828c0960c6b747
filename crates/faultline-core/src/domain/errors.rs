//! Pipeline error taxonomy
//!
//! Failure classes for the capture-and-delivery pipeline. The guiding rule
//! is that crash reporting must never crash the host: persistence and
//! network failures degrade the pipeline, they don't propagate out of it.

use thiserror::Error;

/// Errors that can occur in the telemetry pipeline
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// Disk write/read failed; the operation continues degraded
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Timeout or connectivity problem; the record stays queued
    #[error("Network failure: {0}")]
    Network(String),

    /// Malformed on-disk record; skipped during enumeration
    #[error("Malformed record: {0}")]
    Serialization(String),

    /// An SDK-internal panic recurred within the cool-down window
    #[error("Recursive crash loop suppressed ({elapsed_ms} ms since previous internal crash)")]
    RecursiveCrashLoop {
        /// Milliseconds elapsed since the previous internal-origin crash
        elapsed_ms: u64,
    },

    /// The collector answered with a never-retry response class
    #[error("Collector permanently rejected record (status {status})")]
    PermanentRejection {
        /// HTTP status returned by the collector
        status: u16,
    },
}

impl From<std::io::Error> for TelemetryError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
