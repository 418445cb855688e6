use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// One ingested device report: a timestamp and the numeric values sampled at
/// that instant. Never mutated once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub device_id: String,
    /// Milliseconds since the Unix epoch.
    pub ts_ms: i64,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl TelemetryPoint {
    pub fn new(device_id: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            device_id: device_id.into(),
            ts_ms,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// A single `(timestamp, value)` pair of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(ts_ms: i64, value: f64) -> Self {
        Self { ts_ms, value }
    }
}

/// Result of evaluating one synthetic variable for one device sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedValue {
    pub device_id: String,
    pub variable: String,
    pub value: f64,
    pub ts_ms: i64,
}

// ---------------------------------------------------------------------------
// Variable lookup
// ---------------------------------------------------------------------------

/// Name → value mapping consulted for bare identifiers in an expression.
pub trait Variables {
    fn get(&self, name: &str) -> Option<f64>;
}

impl Variables for HashMap<String, f64> {
    fn get(&self, name: &str) -> Option<f64> {
        HashMap::get(self, name).copied()
    }
}

impl Variables for BTreeMap<String, f64> {
    fn get(&self, name: &str) -> Option<f64> {
        BTreeMap::get(self, name).copied()
    }
}
