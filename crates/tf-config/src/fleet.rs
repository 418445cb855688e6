use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    /// Maximum sample age for a device to count as online.
    pub liveness_threshold: HumanDuration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            liveness_threshold: "5m".parse().expect("hardcoded duration must parse"),
        }
    }
}

/// A `[[device]]` directory entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: String,
    /// Device class; selects the cache horizon from `[cache.classes]`.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}
