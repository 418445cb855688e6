use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

/// How far the aggregate overshot the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Relative deviation `|value - threshold| / |threshold|`: above 2 is
    /// critical, above 1 high, above 0.5 medium, otherwise low. A zero
    /// threshold has no scale and maps to medium.
    pub fn from_deviation(value: f64, threshold: f64) -> Self {
        if threshold == 0.0 {
            return Severity::Medium;
        }
        let deviation = ((value - threshold) / threshold).abs();
        if deviation > 2.0 {
            Severity::Critical
        } else if deviation > 1.0 {
            Severity::High
        } else if deviation > 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fired fleet-level alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAlert {
    /// `"{rule_id}|{fired_at_ms}"`.
    pub alert_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub function: String,
    pub variable: String,
    pub operator: String,
    pub threshold: f64,
    pub value: f64,
    pub severity: Severity,
    pub member_count: usize,
    pub reporting_count: usize,
    pub affected_devices: Vec<String>,
    /// Extra aggregates computed from the same snapshot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub report: BTreeMap<String, f64>,
    pub message: String,
    /// RFC 3339 with milliseconds, UTC.
    pub fired_at: String,
    pub fired_at_ms: i64,
}

pub fn alert_id(rule_id: &str, fired_at_ms: i64) -> String {
    format!("{rule_id}|{fired_at_ms}")
}

pub fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands() {
        assert_eq!(Severity::from_deviation(100.0, 90.0), Severity::Low);
        assert_eq!(Severity::from_deviation(150.0, 90.0), Severity::Medium);
        assert_eq!(Severity::from_deviation(200.0, 90.0), Severity::High);
        assert_eq!(Severity::from_deviation(300.0, 90.0), Severity::Critical);
        assert_eq!(Severity::from_deviation(5.0, 0.0), Severity::Medium);
        // below-threshold rules (operator `<`) use the same scale
        assert_eq!(Severity::from_deviation(10.0, 100.0), Severity::Medium);
    }

    #[test]
    fn fired_at_formatting() {
        assert_eq!(format_millis(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
        assert_eq!(alert_id("r1", 42), "r1|42");
    }
}
