use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// SelectorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorMode {
    Tag,
    Group,
    Organization,
    CustomQuery,
}

/// `selector = { mode = "tag", value = "site=plant-a" }`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SelectorConfig {
    pub mode: SelectorMode,
    pub value: String,
}

// ---------------------------------------------------------------------------
// RuleConfig: one [[rule]] entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub id: String,
    /// Display name; defaults to `id`.
    #[serde(default)]
    pub name: String,
    pub selector: SelectorConfig,
    pub variable: String,
    /// Aggregation function compared against the threshold (`"AVG"`, `"P95"`, ...).
    pub function: String,
    /// One of `> < >= <= == !=`.
    pub operator: String,
    pub threshold: f64,
    #[serde(default = "default_interval")]
    pub interval: HumanDuration,
    /// Minimum spacing between two alerts of the same rule.
    #[serde(default = "default_cooldown")]
    pub cooldown: HumanDuration,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Extra aggregation functions computed from the same snapshot and
    /// attached to the alert.
    #[serde(default)]
    pub report: Vec<String>,
}

fn default_interval() -> HumanDuration {
    "5m".parse().expect("hardcoded duration must parse")
}

fn default_cooldown() -> HumanDuration {
    "5m".parse().expect("hardcoded duration must parse")
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// SyntheticConfig: one [[synthetic]] entry
// ---------------------------------------------------------------------------

/// Device-scoped derived variable. `device = "*"` applies it to every device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_device")]
    pub device: String,
    pub name: String,
    pub expression: String,
}

fn default_device() -> String {
    "*".to_string()
}
