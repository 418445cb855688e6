//! Global rules: periodic fleet aggregates compared against a threshold.

use std::fmt;
use std::str::FromStr;

use orion_error::ErrorOweBase;
use orion_error::prelude::*;
use tf_config::RuleConfig;

use crate::error::{CoreReason, CoreResult};
use crate::fleet::{AggregationFunction, FleetSelector};

mod runner;

pub use runner::RuleRunner;


// ---------------------------------------------------------------------------
// CmpOp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    /// `value <op> threshold`. Equality is exact.
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            CmpOp::Gt => value > threshold,
            CmpOp::Lt => value < threshold,
            CmpOp::Ge => value >= threshold,
            CmpOp::Le => value <= threshold,
            CmpOp::Eq => value == threshold,
            CmpOp::Ne => value != threshold,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmpOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s.trim() {
            ">" => CmpOp::Gt,
            "<" => CmpOp::Lt,
            ">=" => CmpOp::Ge,
            "<=" => CmpOp::Le,
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            other => anyhow::bail!("unknown comparison operator {other:?}"),
        })
    }
}

// ---------------------------------------------------------------------------
// RuleState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RuleState {
    #[default]
    Idle = 0,
    Resolving = 1,
    Aggregating = 2,
    Evaluating = 3,
    Firing = 4,
}

impl RuleState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => RuleState::Resolving,
            2 => RuleState::Aggregating,
            3 => RuleState::Evaluating,
            4 => RuleState::Firing,
            _ => RuleState::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleState::Idle => "idle",
            RuleState::Resolving => "resolving",
            RuleState::Aggregating => "aggregating",
            RuleState::Evaluating => "evaluating",
            RuleState::Firing => "firing",
        }
    }
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GlobalRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRule {
    pub id: String,
    pub name: String,
    pub selector: FleetSelector,
    pub variable: String,
    pub function: AggregationFunction,
    pub operator: CmpOp,
    pub threshold: f64,
    pub interval_ms: i64,
    pub cooldown_ms: i64,
    pub enabled: bool,
    pub report_functions: Vec<AggregationFunction>,
}

impl GlobalRule {
    pub fn from_config(cfg: &RuleConfig) -> CoreResult<Self> {
        let position = format!("rule {:?}", cfg.id);
        let selector = FleetSelector::from_config(&cfg.selector)
            .owe(CoreReason::RuleBuild)
            .position(position.clone())?;
        let function = cfg
            .function
            .parse::<AggregationFunction>()
            .owe(CoreReason::RuleBuild)
            .position(position.clone())?;
        let operator = cfg
            .operator
            .parse::<CmpOp>()
            .owe(CoreReason::RuleBuild)
            .position(position.clone())?;
        let report_functions = cfg
            .report
            .iter()
            .map(|f| f.parse::<AggregationFunction>())
            .collect::<Result<Vec<_>, _>>()
            .owe(CoreReason::RuleBuild)
            .position(position)?;

        Ok(Self {
            id: cfg.id.clone(),
            name: if cfg.name.is_empty() {
                cfg.id.clone()
            } else {
                cfg.name.clone()
            },
            selector,
            variable: cfg.variable.clone(),
            function,
            operator,
            threshold: cfg.threshold,
            interval_ms: cfg.interval.as_millis_i64(),
            cooldown_ms: cfg.cooldown.as_millis_i64(),
            enabled: cfg.enabled,
            report_functions,
        })
    }
}

// ---------------------------------------------------------------------------
// Cycle results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A previous cycle was still running; this tick did nothing.
    Dropped,
    Disabled,
    /// Resolution, aggregation or the alert hand-off failed.
    Failed { stage: RuleState, error: String },
    NotMet { value: f64 },
    /// Condition met inside the cooldown of the previous alert.
    Suppressed { value: f64 },
    Fired { alert_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub rule_id: String,
    /// States entered during the cycle, ending in `Idle` when it ran.
    pub visited: Vec<RuleState>,
    pub outcome: CycleOutcome,
}

/// Observable per-rule bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleStatus {
    pub state: RuleState,
    pub last_evaluated_ms: Option<i64>,
    pub last_value: Option<f64>,
    pub last_fired_ms: Option<i64>,
    pub last_failure: Option<String>,
    pub cycles: u64,
    pub fired: u64,
    pub failed: u64,
    pub suppressed: u64,
    pub dropped: u64,
}
