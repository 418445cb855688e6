use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Rolling telemetry cache sizing. `[cache.classes]` overrides the horizon
/// per device class.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Retention horizon for devices without a class override.
    pub horizon: HumanDuration,
    /// Optional hard cap on retained points per device.
    #[serde(default)]
    pub max_points: Option<usize>,
    #[serde(default)]
    pub classes: HashMap<String, HumanDuration>,
}

impl CacheConfig {
    /// Horizon for a device of the given class, falling back to the default.
    pub fn horizon_for(&self, class: Option<&str>) -> HumanDuration {
        class
            .and_then(|c| self.classes.get(c))
            .copied()
            .unwrap_or(self.horizon)
    }

    /// The longest horizon of any class.
    pub fn max_horizon(&self) -> HumanDuration {
        self.classes
            .values()
            .copied()
            .fold(self.horizon, std::cmp::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CacheConfig {
        CacheConfig {
            horizon: "1h".parse().unwrap(),
            max_points: None,
            classes: HashMap::from([
                ("meter".to_string(), "24h".parse().unwrap()),
                ("probe".to_string(), "15m".parse().unwrap()),
            ]),
        }
    }

    #[test]
    fn horizon_for_class_override() {
        let c = sample();
        assert_eq!(c.horizon_for(Some("meter")).to_string(), "1d");
        assert_eq!(c.horizon_for(Some("probe")).to_string(), "15m");
    }

    #[test]
    fn horizon_for_unknown_or_missing_class() {
        let c = sample();
        assert_eq!(c.horizon_for(Some("pump")).to_string(), "1h");
        assert_eq!(c.horizon_for(None).to_string(), "1h");
    }

    #[test]
    fn max_horizon_spans_classes() {
        assert_eq!(sample().max_horizon().to_string(), "1d");
    }
}
