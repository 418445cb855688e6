use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::telemetry::Sample;

use super::FleetError;

// ---------------------------------------------------------------------------
// AggregationFunction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Stddev,
    Variance,
    PercentOnline,
    PercentOffline,
    P50,
    P75,
    P90,
    P95,
    P99,
}

impl AggregationFunction {
    pub const ALL: [AggregationFunction; 14] = [
        AggregationFunction::Count,
        AggregationFunction::Sum,
        AggregationFunction::Avg,
        AggregationFunction::Min,
        AggregationFunction::Max,
        AggregationFunction::Stddev,
        AggregationFunction::Variance,
        AggregationFunction::PercentOnline,
        AggregationFunction::PercentOffline,
        AggregationFunction::P50,
        AggregationFunction::P75,
        AggregationFunction::P90,
        AggregationFunction::P95,
        AggregationFunction::P99,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregationFunction::Count => "COUNT",
            AggregationFunction::Sum => "SUM",
            AggregationFunction::Avg => "AVG",
            AggregationFunction::Min => "MIN",
            AggregationFunction::Max => "MAX",
            AggregationFunction::Stddev => "STDDEV",
            AggregationFunction::Variance => "VARIANCE",
            AggregationFunction::PercentOnline => "PERCENT_ONLINE",
            AggregationFunction::PercentOffline => "PERCENT_OFFLINE",
            AggregationFunction::P50 => "P50",
            AggregationFunction::P75 => "P75",
            AggregationFunction::P90 => "P90",
            AggregationFunction::P95 => "P95",
            AggregationFunction::P99 => "P99",
        }
    }

    fn percentile(self) -> Option<f64> {
        match self {
            AggregationFunction::P50 => Some(50.0),
            AggregationFunction::P75 => Some(75.0),
            AggregationFunction::P90 => Some(90.0),
            AggregationFunction::P95 => Some(95.0),
            AggregationFunction::P99 => Some(99.0),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationFunction {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregationFunction::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FleetError::UnknownFunction(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One resolved member and what the cache knew about it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberReading {
    pub device_id: String,
    pub last_seen_ms: Option<i64>,
    /// Latest value of the snapshot's variable.
    pub value: Option<Sample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub function: AggregationFunction,
    pub member_count: usize,
    pub value: f64,
    pub timestamp_ms: i64,
}

/// Resolved membership plus per-member readings taken at one instant.
/// Every aggregate computed from the same snapshot sees the same data.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSnapshot {
    pub variable: String,
    pub taken_at_ms: i64,
    pub liveness_ms: i64,
    pub members: Vec<MemberReading>,
}

impl FleetSnapshot {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn within_liveness(&self, ts_ms: i64) -> bool {
        self.taken_at_ms.saturating_sub(ts_ms) <= self.liveness_ms
    }

    pub fn is_online(&self, member: &MemberReading) -> bool {
        member.last_seen_ms.is_some_and(|ts| self.within_liveness(ts))
    }

    pub fn online_count(&self) -> usize {
        self.members.iter().filter(|m| self.is_online(m)).count()
    }

    /// Members whose latest value of the variable is fresh enough to use.
    pub fn reporting(&self) -> impl Iterator<Item = (&str, f64)> {
        self.members.iter().filter_map(|m| {
            m.value
                .filter(|s| self.within_liveness(s.ts_ms))
                .map(|s| (m.device_id.as_str(), s.value))
        })
    }

    pub fn reporting_devices(&self) -> Vec<String> {
        self.reporting().map(|(id, _)| id.to_string()).collect()
    }

    pub fn aggregate(&self, function: AggregationFunction) -> Result<AggregationResult, FleetError> {
        let values: Vec<f64> = self.reporting().map(|(_, v)| v).collect();
        let value = match function {
            AggregationFunction::Count => self.members.len() as f64,
            AggregationFunction::Sum => values.iter().sum(),
            AggregationFunction::Avg => mean(&self.nonempty(function, &values)?),
            AggregationFunction::Min => self
                .nonempty(function, &values)?
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min),
            AggregationFunction::Max => self
                .nonempty(function, &values)?
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max),
            AggregationFunction::Variance => variance(&self.nonempty(function, &values)?),
            AggregationFunction::Stddev => variance(&self.nonempty(function, &values)?).sqrt(),
            AggregationFunction::PercentOnline | AggregationFunction::PercentOffline => {
                if self.members.is_empty() {
                    return Err(FleetError::InsufficientData(format!(
                        "{function}: selector resolved no devices"
                    )));
                }
                let online = self.online_count() as f64 / self.members.len() as f64;
                if function == AggregationFunction::PercentOnline {
                    online
                } else {
                    1.0 - online
                }
            }
            p => {
                let mut sorted = self.nonempty(p, &values)?;
                sorted.sort_by(f64::total_cmp);
                interpolate(&sorted, p.percentile().unwrap_or(50.0))
            }
        };
        Ok(AggregationResult {
            function,
            member_count: self.members.len(),
            value,
            timestamp_ms: self.taken_at_ms,
        })
    }

    /// All requested functions over this snapshot; the first failure wins.
    pub fn report(
        &self,
        functions: &[AggregationFunction],
    ) -> Result<Vec<AggregationResult>, FleetError> {
        functions.iter().map(|f| self.aggregate(*f)).collect()
    }

    fn nonempty(&self, function: AggregationFunction, values: &[f64]) -> Result<Vec<f64>, FleetError> {
        if values.is_empty() {
            return Err(FleetError::InsufficientData(format!(
                "{function}({}): none of {} member(s) reporting",
                self.variable,
                self.members.len()
            )));
        }
        Ok(values.to_vec())
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Linear interpolation between closest ranks at `p/100 * (n - 1)`.
fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
