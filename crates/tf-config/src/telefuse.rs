use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::fleet::{DeviceConfig, FleetConfig};
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::rule::{RuleConfig, SyntheticConfig};
use crate::runtime::{RuntimeConfig, StoreConfig};
use crate::server::ServerConfig;
use crate::sinks::SinksConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TelefuseConfigRaw {
    server: ServerConfig,
    runtime: RuntimeConfig,
    #[serde(default)]
    store: StoreConfig,
    cache: CacheConfig,
    #[serde(default)]
    fleet: FleetConfig,
    #[serde(default)]
    sinks: SinksConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default, rename = "device")]
    devices: Vec<DeviceConfig>,
    #[serde(default, rename = "synthetic")]
    synthetics: Vec<SyntheticConfig>,
    #[serde(default, rename = "rule")]
    rules: Vec<RuleConfig>,
}

// ---------------------------------------------------------------------------
// TelefuseConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TelefuseConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub fleet: FleetConfig,
    pub sinks: SinksConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    /// Static device directory, in file order.
    pub devices: Vec<DeviceConfig>,
    pub synthetics: Vec<SyntheticConfig>,
    /// Global rules, sorted by id.
    pub rules: Vec<RuleConfig>,
}

impl TelefuseConfig {
    /// Read and parse a `telefuse.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }

    /// Device class from the directory, if the device is listed.
    pub fn device_class(&self, device_id: &str) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .and_then(|d| d.class.as_deref())
    }
}

impl FromStr for TelefuseConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`TelefuseConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: TelefuseConfigRaw = toml::from_str(toml_str)?;

        let mut rules = raw.rules;
        for rule in &mut rules {
            if rule.name.is_empty() {
                rule.name = rule.id.clone();
            }
        }
        // Sort by id for deterministic scheduling order.
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        let config = TelefuseConfig {
            server: raw.server,
            runtime: raw.runtime,
            store: raw.store,
            cache: raw.cache,
            fleet: raw.fleet,
            sinks: raw.sinks,
            metrics: raw.metrics,
            logging: raw.logging,
            devices: raw.devices,
            synthetics: raw.synthetics,
            rules,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
