//! Payload bodies for the host protocol.
//!
//! Field names mirror what the host already speaks: configure fields are
//! camelCase, log record fields keep the flat snake_case shape of host-side
//! log tooling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Which plugin authoring style the subprocess should host.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Collectd,
    Simple,
}

impl AdapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Collectd => "collectd",
            AdapterKind::Simple => "simple",
        }
    }
}

/// Body of the Configure message, the first (and only) piece of
/// configuration the host sends.
///
/// `modulePaths` is accepted for compatibility with hosts that configure
/// interpreter-based runners, but plugins here are linked into the binary,
/// so it is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub adapter: AdapterKind,

    /// Registry name of the plugin to host.
    pub plugin: String,

    /// Default read interval, in seconds.
    pub interval_seconds: f64,

    /// The plugin's own configuration block, converted to a config tree
    /// before the plugin sees it.
    #[serde(default)]
    pub plugin_config: serde_json::Map<String, serde_json::Value>,

    #[serde(default, rename = "typesDBPaths")]
    pub types_db_paths: Vec<PathBuf>,

    #[serde(default)]
    pub module_paths: Vec<PathBuf>,
}

impl ConfigureRequest {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds)
    }
}

/// Body of the ConfigureResult message. `error` is `null` on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureResult {
    pub error: Option<String>,
}

/// Body of a Log message, one per forwarded log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    pub logger: String,
    pub source_path: Option<String>,
    pub lineno: Option<u32>,

    /// Unix timestamp in float seconds at which the record was created.
    pub created: f64,

    pub level: String,
}

/// One datapoint inside a DatapointList message. The list groups these by
/// metric kind, so the kind itself is carried by the enclosing map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointPayload {
    pub metric: String,
    pub value: f64,
    pub dimensions: BTreeMap<String, String>,
    pub timestamp_ms: Option<i64>,
}
