//! The captured-failure record
//!
//! A [`Record`] is the immutable, structured representation of one crash or
//! one explicitly-reported error. It is built exactly once, on the thread
//! that observed the failure, then only ever read: the store serializes it,
//! the delivery worker ships it, nobody mutates it.
//!
//! The wire format is one JSON object per record (camelCase field names);
//! see [`Record`] field docs for the layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::device::{DeviceInfo, HostAppInfo};
use super::newtypes::{RecordId, SessionId};

/// Timestamp layout used for the human-readable `localTime` field and for
/// queue filenames.
pub const LOCAL_TIME_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%3f";

// ============================================================================
// RecordKind
// ============================================================================

/// The two record variants the pipeline distinguishes
///
/// The kind decides the queue partition a record lands in and the `isFatal`
/// flag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// An uncaught panic; the process is going down
    Crash,
    /// An explicitly reported, non-fatal error
    Error,
}

impl RecordKind {
    /// Queue sub-directory this kind is persisted under.
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Crash => "crashes",
            RecordKind::Error => "errors",
        }
    }

    /// Filename prefix for records of this kind.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            RecordKind::Crash => "crash",
            RecordKind::Error => "error",
        }
    }

    /// Whether records of this kind terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RecordKind::Crash)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_prefix())
    }
}

// ============================================================================
// Origin
// ============================================================================

/// Structured description of the failure that produced a record
///
/// Mirrors a throwable: a message, the ordered stack frames of the failing
/// thread, and an optional nested cause of the same shape. The `extra` map
/// carries per-origin payload such as the error title and details of an
/// explicit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub message: String,
    pub stack_trace: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Origin>>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Origin {
    /// Creates an origin with a message and no frames.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: Vec::new(),
            cause: None,
            extra: Map::new(),
        }
    }

    /// Sets the ordered stack frames.
    pub fn with_stack_trace(mut self, frames: Vec<String>) -> Self {
        self.stack_trace = frames;
        self
    }

    /// Nests a cause under this origin.
    pub fn with_cause(mut self, cause: Origin) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attaches an extra payload entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Number of origins in the cause chain, this one included.
    pub fn chain_depth(&self) -> usize {
        1 + self.cause.as_ref().map_or(0, |c| c.chain_depth())
    }

    /// Iterates over every message in the cause chain, outermost first.
    pub fn messages(&self) -> Vec<&str> {
        let mut out = vec![self.message.as_str()];
        let mut cursor = self.cause.as_deref();
        while let Some(origin) = cursor {
            out.push(origin.message.as_str());
            cursor = origin.cause.as_deref();
        }
        out
    }
}

// ============================================================================
// ThreadSnapshot and Breadcrumb
// ============================================================================

/// Stack frames of one live thread at capture time
///
/// The capturing thread is excluded; its frames are already in [`Origin`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    pub name: String,
    pub stack_trace: Vec<String>,
}

/// One externally-supplied UI trace entry
///
/// Breadcrumbs are pulled from the breadcrumb collaborator at delivery
/// time, keyed by session id; they are never part of the record at capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    /// Capture time of the trace entry, epoch milliseconds
    pub timestamp: i64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

// ============================================================================
// BuildMode
// ============================================================================

/// Whether the host binary was built with debug assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    #[serde(rename = "DEBUG")]
    Debug,
    #[serde(rename = "RELEASE")]
    Release,
}

impl BuildMode {
    /// The mode this binary was compiled in.
    pub fn current() -> Self {
        if cfg!(debug_assertions) {
            BuildMode::Debug
        } else {
            BuildMode::Release
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Immutable structured representation of one captured crash or error
///
/// Wire format (one JSON object per persisted file):
/// `id`, `timestamp` (epoch millis), `localTime`, `sessionId`, `isFatal`,
/// `buildMode`, `origin{message, stackTrace[], cause?, ...}`,
/// `originThread`, `otherThreads[]`, `deviceInfo{}`, `appInfo{}`,
/// `metadata{}` and, once attached at delivery time, `breadcrumbs[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    id: RecordId,
    timestamp: i64,
    local_time: String,
    session_id: SessionId,
    is_fatal: bool,
    build_mode: BuildMode,
    origin: Origin,
    origin_thread: String,
    other_threads: Vec<ThreadSnapshot>,
    device_info: DeviceInfo,
    app_info: HostAppInfo,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    breadcrumbs: Option<Vec<Breadcrumb>>,
}

impl Record {
    /// Starts building a record of the given kind for a session.
    pub fn builder(kind: RecordKind, session_id: SessionId) -> RecordBuilder {
        RecordBuilder::new(kind, session_id)
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Capture time, epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Capture time as a UTC instant.
    pub fn captured_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }

    /// Human-readable capture time ([`LOCAL_TIME_FORMAT`]).
    pub fn local_time(&self) -> &str {
        &self.local_time
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_fatal(&self) -> bool {
        self.is_fatal
    }

    /// The kind, derived from the fatality flag.
    pub fn kind(&self) -> RecordKind {
        if self.is_fatal {
            RecordKind::Crash
        } else {
            RecordKind::Error
        }
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Name of the thread the failure was observed on.
    pub fn origin_thread(&self) -> &str {
        &self.origin_thread
    }

    pub fn other_threads(&self) -> &[ThreadSnapshot] {
        &self.other_threads
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn app_info(&self) -> &HostAppInfo {
        &self.app_info
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Breadcrumbs, present only on payloads that went through delivery.
    pub fn breadcrumbs(&self) -> Option<&[Breadcrumb]> {
        self.breadcrumbs.as_deref()
    }
}

// ============================================================================
// RecordBuilder
// ============================================================================

/// Builder for [`Record`]
///
/// The only way to construct a record; `build()` derives the id and the
/// human-readable local time from the capture timestamp, after which the
/// record is frozen.
#[derive(Debug)]
pub struct RecordBuilder {
    kind: RecordKind,
    session_id: SessionId,
    captured_at: DateTime<Utc>,
    origin: Origin,
    origin_thread: String,
    other_threads: Vec<ThreadSnapshot>,
    device_info: DeviceInfo,
    app_info: HostAppInfo,
    metadata: Map<String, Value>,
}

impl RecordBuilder {
    fn new(kind: RecordKind, session_id: SessionId) -> Self {
        Self {
            kind,
            session_id,
            captured_at: Utc::now(),
            origin: Origin::new("<unknown>"),
            origin_thread: String::new(),
            other_threads: Vec::new(),
            device_info: DeviceInfo::default(),
            app_info: HostAppInfo::default(),
            metadata: Map::new(),
        }
    }

    /// Overrides the capture instant (defaults to now).
    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn origin_thread(mut self, name: impl Into<String>) -> Self {
        self.origin_thread = name.into();
        self
    }

    pub fn other_threads(mut self, threads: Vec<ThreadSnapshot>) -> Self {
        self.other_threads = threads;
        self
    }

    pub fn device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = info;
        self
    }

    pub fn app_info(mut self, info: HostAppInfo) -> Self {
        self.app_info = info;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Freezes the record.
    pub fn build(self) -> Record {
        Record {
            id: RecordId::derive(self.captured_at, &self.session_id),
            timestamp: self.captured_at.timestamp_millis(),
            local_time: self.captured_at.format(LOCAL_TIME_FORMAT).to_string(),
            session_id: self.session_id,
            is_fatal: self.kind.is_fatal(),
            build_mode: BuildMode::current(),
            origin: self.origin,
            origin_thread: self.origin_thread,
            other_threads: self.other_threads,
            device_info: self.device_info,
            app_info: self.app_info,
            metadata: self.metadata,
            breadcrumbs: None,
        }
    }
}
