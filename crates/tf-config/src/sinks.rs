use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output destinations. Both lists may be empty, in which case derived
/// values or alerts are only logged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SinksConfig {
    /// Derived-value destinations, e.g. `"file://out/derived.jsonl"`.
    #[serde(default)]
    pub derived: Vec<String>,
    /// Fired-alert destinations.
    #[serde(default)]
    pub alerts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkUri {
    /// JSON-lines file, appended to.
    File(PathBuf),
}

/// Parse a sink URI. Only `file://` is supported.
pub fn parse_sink_uri(uri: &str) -> anyhow::Result<SinkUri> {
    match uri.strip_prefix("file://") {
        Some("") => anyhow::bail!("sink URI {uri:?} has an empty path"),
        Some(path) => Ok(SinkUri::File(PathBuf::from(path))),
        None => anyhow::bail!("unsupported sink URI {uri:?} (expected file://<path>)"),
    }
}
