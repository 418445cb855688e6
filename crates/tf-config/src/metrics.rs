use serde::Deserialize;

use crate::types::HumanDuration;

/// Runtime metrics settings.
///
/// When disabled, neither the periodic summary log nor the exporter runs.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_report_interval")]
    pub report_interval: HumanDuration,
    /// Optional Prometheus text exposition endpoint, e.g. `"127.0.0.1:9901"`.
    #[serde(default)]
    pub prometheus_listen: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_report_interval() -> HumanDuration {
    "60s".parse().expect("hardcoded duration must parse")
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            report_interval: default_report_interval(),
            prometheus_listen: None,
        }
    }
}
