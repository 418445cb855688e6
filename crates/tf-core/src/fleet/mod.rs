//! Cross-device aggregation over a dynamically resolved fleet.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tf_config::{DeviceConfig, SelectorConfig, SelectorMode};

use crate::cache::RollingCache;

mod aggregate;

pub use aggregate::{AggregationFunction, AggregationResult, FleetSnapshot, MemberReading};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FleetError {
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("selector resolution failed: {0}")]
    Resolve(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("unknown aggregation function {0:?}")]
    UnknownFunction(String),
}

// ---------------------------------------------------------------------------
// FleetSelector
// ---------------------------------------------------------------------------

/// Which devices a rule covers. Resolved anew on every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetSelector {
    /// `key=value`, or bare `key` for "tag present".
    Tag { key: String, value: Option<String> },
    Group(String),
    Organization(String),
    /// Conjunction of `key=value` terms; empty matches every device.
    /// Keys `id`, `class`, `group` and `organization` address directory
    /// fields, anything else is a tag.
    CustomQuery(Vec<(String, String)>),
}

impl FleetSelector {
    pub fn from_config(cfg: &SelectorConfig) -> Result<Self, FleetError> {
        let value = cfg.value.trim();
        match cfg.mode {
            SelectorMode::Tag => {
                if value.is_empty() {
                    return Err(FleetError::InvalidSelector("empty tag selector".into()));
                }
                Ok(match value.split_once('=') {
                    Some((k, v)) => FleetSelector::Tag {
                        key: k.trim().to_string(),
                        value: Some(v.trim().to_string()),
                    },
                    None => FleetSelector::Tag {
                        key: value.to_string(),
                        value: None,
                    },
                })
            }
            SelectorMode::Group => non_empty(value, "group").map(FleetSelector::Group),
            SelectorMode::Organization => {
                non_empty(value, "organization").map(FleetSelector::Organization)
            }
            SelectorMode::CustomQuery => parse_query(value).map(FleetSelector::CustomQuery),
        }
    }
}

fn non_empty(value: &str, what: &str) -> Result<String, FleetError> {
    if value.is_empty() {
        return Err(FleetError::InvalidSelector(format!("empty {what} selector")));
    }
    Ok(value.to_string())
}

fn parse_query(text: &str) -> Result<Vec<(String, String)>, FleetError> {
    if text == "*" || text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|term| match term.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(FleetError::InvalidSelector(format!(
                "query term {:?} is not key=value",
                term.trim()
            ))),
        })
        .collect()
}

impl fmt::Display for FleetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetSelector::Tag { key, value: Some(v) } => write!(f, "tag:{key}={v}"),
            FleetSelector::Tag { key, value: None } => write!(f, "tag:{key}"),
            FleetSelector::Group(g) => write!(f, "group:{g}"),
            FleetSelector::Organization(o) => write!(f, "organization:{o}"),
            FleetSelector::CustomQuery(terms) if terms.is_empty() => f.write_str("query:*"),
            FleetSelector::CustomQuery(terms) => {
                let joined: Vec<String> = terms.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "query:{}", joined.join(","))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceDirectory
// ---------------------------------------------------------------------------

/// Source of fleet membership.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn resolve(&self, selector: &FleetSelector) -> anyhow::Result<Vec<String>>;
}

/// Directory backed by the `[[device]]` table.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    devices: Vec<DeviceConfig>,
}

impl StaticDirectory {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self { devices }
    }

    fn matches(selector: &FleetSelector, device: &DeviceConfig) -> bool {
        match selector {
            FleetSelector::Tag { key, value } => match (device.tags.get(key), value) {
                (Some(_), None) => true,
                (Some(actual), Some(wanted)) => actual == wanted,
                (None, _) => false,
            },
            FleetSelector::Group(g) => device.groups.iter().any(|x| x == g),
            FleetSelector::Organization(o) => device.organization.as_deref() == Some(o.as_str()),
            FleetSelector::CustomQuery(terms) => terms
                .iter()
                .all(|(k, v)| field_matches(device, k, v)),
        }
    }
}

fn field_matches(device: &DeviceConfig, key: &str, value: &str) -> bool {
    match key {
        "id" => device.id == value,
        "class" => device.class.as_deref() == Some(value),
        "group" => device.groups.iter().any(|g| g == value),
        "organization" => device.organization.as_deref() == Some(value),
        tag => device.tags.get(tag).is_some_and(|v| v == value),
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn resolve(&self, selector: &FleetSelector) -> anyhow::Result<Vec<String>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| Self::matches(selector, d))
            .map(|d| d.id.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FleetAggregator
// ---------------------------------------------------------------------------

pub struct FleetAggregator {
    directory: Arc<dyn DeviceDirectory>,
    cache: Arc<RollingCache>,
    liveness_ms: i64,
}

impl FleetAggregator {
    pub fn new(directory: Arc<dyn DeviceDirectory>, cache: Arc<RollingCache>, liveness_ms: i64) -> Self {
        Self {
            directory,
            cache,
            liveness_ms,
        }
    }

    pub fn liveness_ms(&self) -> i64 {
        self.liveness_ms
    }

    /// Resolve the selector once and read every member's latest value.
    pub async fn snapshot(
        &self,
        selector: &FleetSelector,
        variable: &str,
        now_ms: i64,
    ) -> Result<FleetSnapshot, FleetError> {
        let mut ids = self
            .directory
            .resolve(selector)
            .await
            .map_err(|e| FleetError::Resolve(format!("{selector}: {e:#}")))?;
        ids.sort();
        ids.dedup();

        let members = ids
            .into_iter()
            .map(|id| MemberReading {
                last_seen_ms: self.cache.last_seen(&id),
                value: self.cache.latest_value(&id, variable),
                device_id: id,
            })
            .collect();
        Ok(FleetSnapshot {
            variable: variable.to_string(),
            taken_at_ms: now_ms,
            liveness_ms: self.liveness_ms,
            members,
        })
    }
}
