//! Domain entities for captured failures
//!
//! Everything in this module is plain data: records are built once by the
//! capture path and only ever read afterwards.

pub mod device;
pub mod errors;
pub mod newtypes;
pub mod record;

pub use device::{DeviceInfo, HostAppInfo};
pub use errors::TelemetryError;
pub use newtypes::{RecordId, SessionId};
pub use record::{Breadcrumb, BuildMode, Origin, Record, RecordBuilder, RecordKind, ThreadSnapshot};
