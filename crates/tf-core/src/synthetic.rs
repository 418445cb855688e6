//! Synthetic variables: expressions evaluated for every ingested sample.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use orion_error::ErrorOweBase;
use orion_error::prelude::*;
use tf_config::SyntheticConfig;
use tf_lang::{Expr, parse_expr};

use crate::cache::PushOutcome;
use crate::error::{CoreReason, CoreResult, EvalError};
use crate::eval::{EvalContext, Evaluator};
use crate::history::{HistoryLoader, HistoryRequest};
use crate::store::PointRecorder;
use crate::telemetry::{DerivedValue, TelemetryPoint};

/// Device selector meaning "every device".
pub const ANY_DEVICE: &str = "*";

/// A validated synthetic variable. Only constructed from text that parsed
/// and passed [`Evaluator::validate`].
#[derive(Debug)]
pub struct SyntheticDef {
    pub device: String,
    pub name: String,
    pub expression: String,
    expr: Expr,
    requests: Vec<HistoryRequest>,
}

impl SyntheticDef {
    pub fn applies_to(&self, device_id: &str) -> bool {
        self.device == ANY_DEVICE || self.device == device_id
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub device_id: String,
    pub variable: String,
    pub ts_ms: i64,
    pub outcome: Result<f64, EvalError>,
}

/// Everything that happened while processing one point.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    pub cache: PushOutcome,
    pub records: Vec<EvaluationRecord>,
}

impl SampleReport {
    pub fn derived(&self) -> Vec<DerivedValue> {
        self.records
            .iter()
            .filter_map(|r| {
                r.outcome.as_ref().ok().map(|v| DerivedValue {
                    device_id: r.device_id.clone(),
                    variable: r.variable.clone(),
                    value: *v,
                    ts_ms: r.ts_ms,
                })
            })
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_err()).count()
    }
}

// ---------------------------------------------------------------------------
// SyntheticVariableService
// ---------------------------------------------------------------------------

pub struct SyntheticVariableService {
    evaluator: Evaluator,
    history: HistoryLoader,
    recorder: Option<Arc<dyn PointRecorder>>,
    defs: RwLock<Vec<Arc<SyntheticDef>>>,
}

impl SyntheticVariableService {
    pub fn new(history: HistoryLoader, recorder: Option<Arc<dyn PointRecorder>>) -> Self {
        Self {
            evaluator: Evaluator::new(),
            history,
            recorder,
            defs: RwLock::new(Vec::new()),
        }
    }

    pub fn history(&self) -> &HistoryLoader {
        &self.history
    }

    /// Parse and validate a definition. On success it replaces any existing
    /// definition with the same device and name; on failure nothing changes.
    pub fn define(&self, device: &str, name: &str, expression: &str) -> Result<(), EvalError> {
        let expr = parse_expr(expression)?;
        self.evaluator.validate(&expr)?;
        let def = Arc::new(SyntheticDef {
            device: device.to_string(),
            name: name.to_string(),
            expression: expression.to_string(),
            requests: self.evaluator.history_requests(&expr),
            expr,
        });

        let mut defs = self.defs.write().expect("synthetic defs lock poisoned");
        match defs.iter_mut().find(|d| d.device == device && d.name == name) {
            Some(slot) => *slot = def,
            None => defs.push(def),
        }
        Ok(())
    }

    pub fn define_all(&self, configs: &[SyntheticConfig]) -> CoreResult<()> {
        for cfg in configs {
            self.define(&cfg.device, &cfg.name, &cfg.expression)
                .owe(CoreReason::Definition)
                .position(format!("synthetic {:?}", cfg.name))?;
        }
        Ok(())
    }

    pub fn remove(&self, device: &str, name: &str) -> bool {
        let mut defs = self.defs.write().expect("synthetic defs lock poisoned");
        let before = defs.len();
        defs.retain(|d| !(d.device == device && d.name == name));
        defs.len() != before
    }

    pub fn definitions_for(&self, device_id: &str) -> Vec<Arc<SyntheticDef>> {
        self.defs
            .read()
            .expect("synthetic defs lock poisoned")
            .iter()
            .filter(|d| d.applies_to(device_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.defs.read().expect("synthetic defs lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache and record the point, then evaluate every applicable
    /// definition at the point's timestamp.
    ///
    /// Definitions run in definition order; each one sees the point's
    /// values plus the values derived before it. Derived values are written
    /// back as a point of their own, so windowed functions can read them
    /// later. A failing definition is recorded and skipped.
    pub async fn on_sample(&self, point: TelemetryPoint) -> SampleReport {
        let point = Arc::new(point);
        let cache = self.history.cache().put(Arc::clone(&point));
        self.record(&point);

        let defs = self.definitions_for(&point.device_id);
        let mut vars: BTreeMap<String, f64> = point.values.clone();
        let mut derived = TelemetryPoint::new(point.device_id.clone(), point.ts_ms);
        let mut records = Vec::with_capacity(defs.len());

        for def in defs {
            let history = self
                .history
                .prefetch(&def.requests, &point.device_id, point.ts_ms)
                .await;
            let ctx = EvalContext::new(&point.device_id, point.ts_ms, &history);
            let outcome = self.evaluator.eval(&def.expr, &vars, Some(&ctx));
            match &outcome {
                Ok(v) => {
                    vars.insert(def.name.clone(), *v);
                    derived.values.insert(def.name.clone(), *v);
                }
                Err(e) => log::debug!(
                    "synthetic {} for {} at {} failed ({}): {e}",
                    def.name,
                    point.device_id,
                    point.ts_ms,
                    e.kind()
                ),
            }
            records.push(EvaluationRecord {
                device_id: point.device_id.clone(),
                variable: def.name.clone(),
                ts_ms: point.ts_ms,
                outcome,
            });
        }

        if !derived.values.is_empty() {
            self.record(&derived);
            self.history.cache().put(derived);
        }

        SampleReport { cache, records }
    }

    fn record(&self, point: &TelemetryPoint) {
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record(point)
        {
            log::warn!("record point for {} failed: {e}", point.device_id);
        }
    }
}
