//! Device and host-application descriptors
//!
//! Both structs carry a small fixed set of known fields plus one explicit
//! open-ended `extra` map for host-supplied values. Never includes
//! hostname or username.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Non-identifying information about the machine the host app runs on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub os: String,
    pub kernel: String,
    pub arch: String,
    /// Open-ended extension values supplied by the host
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl DeviceInfo {
    /// Collect device information from the current system.
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            kernel: read_kernel_version(),
            arch: std::env::consts::ARCH.to_string(),
            extra: Map::new(),
        }
    }
}

fn read_kernel_version() -> String {
    std::fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from))
        .unwrap_or_default()
}

/// Descriptor of the host application embedding the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAppInfo {
    pub app_name: String,
    pub app_version: String,
    /// Open-ended extension values supplied by the host
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl HostAppInfo {
    /// Creates a descriptor for the given application name and version.
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            extra: Map::new(),
        }
    }
}
