use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::alert::{AlertDispatcher, GlobalAlert, Severity, alert_id, format_millis};
use crate::fleet::{FleetAggregator, FleetSnapshot};

use super::{CycleOutcome, CycleReport, GlobalRule, RuleState, RuleStatus};

/// Drives one [`GlobalRule`] through
/// `Idle -> Resolving -> Aggregating -> Evaluating -> Firing -> Idle`.
///
/// At most one cycle runs at a time: a cycle that finds the in-progress
/// flag already set returns [`CycleOutcome::Dropped`] immediately.
pub struct RuleRunner {
    rule: GlobalRule,
    aggregator: Arc<FleetAggregator>,
    dispatcher: Arc<dyn AlertDispatcher>,
    in_progress: AtomicBool,
    state: AtomicU8,
    status: Mutex<RuleStatus>,
}

/// Clears the in-progress flag and returns the state to `Idle` however the
/// cycle ends, including when its task is aborted.
struct CycleGuard<'a>(&'a RuleRunner);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.state.store(RuleState::Idle as u8, Ordering::Release);
        self.0.in_progress.store(false, Ordering::Release);
    }
}

impl RuleRunner {
    pub fn new(
        rule: GlobalRule,
        aggregator: Arc<FleetAggregator>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        Self {
            rule,
            aggregator,
            dispatcher,
            in_progress: AtomicBool::new(false),
            state: AtomicU8::new(RuleState::Idle as u8),
            status: Mutex::new(RuleStatus::default()),
        }
    }

    pub fn rule(&self) -> &GlobalRule {
        &self.rule
    }

    pub fn state(&self) -> RuleState {
        RuleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn status(&self) -> RuleStatus {
        let mut status = self.status.lock().expect("rule status lock poisoned").clone();
        status.state = self.state();
        status
    }

    fn enter(&self, state: RuleState, visited: &mut Vec<RuleState>) {
        self.state.store(state as u8, Ordering::Release);
        visited.push(state);
    }

    fn update(&self, f: impl FnOnce(&mut RuleStatus)) {
        f(&mut self.status.lock().expect("rule status lock poisoned"));
    }

    fn report(&self, mut visited: Vec<RuleState>, outcome: CycleOutcome) -> CycleReport {
        if !visited.is_empty() {
            visited.push(RuleState::Idle);
        }
        CycleReport {
            rule_id: self.rule.id.clone(),
            visited,
            outcome,
        }
    }

    fn failed(&self, stage: RuleState, error: String, visited: Vec<RuleState>) -> CycleReport {
        log::warn!("rule {} failed while {stage}: {error}", self.rule.id);
        self.update(|s| {
            s.failed += 1;
            s.last_failure = Some(format!("{stage}: {error}"));
        });
        self.report(visited, CycleOutcome::Failed { stage, error })
    }

    /// Run one evaluation cycle as of `now_ms`.
    pub async fn run_cycle(&self, now_ms: i64) -> CycleReport {
        if !self.rule.enabled {
            return self.report(Vec::new(), CycleOutcome::Disabled);
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.update(|s| s.dropped += 1);
            return self.report(Vec::new(), CycleOutcome::Dropped);
        }
        let _guard = CycleGuard(self);
        self.update(|s| s.cycles += 1);
        let mut visited = Vec::with_capacity(5);
        let rule = &self.rule;

        self.enter(RuleState::Resolving, &mut visited);
        let snapshot = match self
            .aggregator
            .snapshot(&rule.selector, &rule.variable, now_ms)
            .await
        {
            Ok(s) => s,
            Err(e) => return self.failed(RuleState::Resolving, e.to_string(), visited),
        };

        self.enter(RuleState::Aggregating, &mut visited);
        let (value, report) = match snapshot
            .aggregate(rule.function)
            .and_then(|r| Ok((r.value, snapshot.report(&rule.report_functions)?)))
        {
            Ok(v) => v,
            Err(e) => return self.failed(RuleState::Aggregating, e.to_string(), visited),
        };

        self.enter(RuleState::Evaluating, &mut visited);
        let last_fired = {
            let mut s = self.status.lock().expect("rule status lock poisoned");
            s.last_evaluated_ms = Some(now_ms);
            s.last_value = Some(value);
            s.last_fired_ms
        };
        if !rule.operator.check(value, rule.threshold) {
            return self.report(visited, CycleOutcome::NotMet { value });
        }
        if let Some(last) = last_fired
            && now_ms.saturating_sub(last) < rule.cooldown_ms
        {
            self.update(|s| s.suppressed += 1);
            return self.report(visited, CycleOutcome::Suppressed { value });
        }

        self.enter(RuleState::Firing, &mut visited);
        let report = report
            .into_iter()
            .map(|r| (r.function.to_string(), r.value))
            .collect();
        let alert = self.build_alert(&snapshot, value, report, now_ms);
        let id = alert.alert_id.clone();
        if let Err(e) = self.dispatcher.dispatch(alert).await {
            return self.failed(RuleState::Firing, format!("{e:#}"), visited);
        }
        self.update(|s| {
            s.fired += 1;
            s.last_fired_ms = Some(now_ms);
        });
        log::info!("rule {} fired: {}({}) = {value}", rule.id, rule.function, rule.variable);
        self.report(visited, CycleOutcome::Fired { alert_id: id })
    }

    fn build_alert(
        &self,
        snapshot: &FleetSnapshot,
        value: f64,
        report: BTreeMap<String, f64>,
        now_ms: i64,
    ) -> GlobalAlert {
        let rule = &self.rule;
        let affected = snapshot.reporting_devices();
        GlobalAlert {
            alert_id: alert_id(&rule.id, now_ms),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            function: rule.function.to_string(),
            variable: rule.variable.clone(),
            operator: rule.operator.to_string(),
            threshold: rule.threshold,
            value,
            severity: Severity::from_deviation(value, rule.threshold),
            member_count: snapshot.member_count(),
            reporting_count: affected.len(),
            affected_devices: affected,
            report,
            message: format!(
                "Global rule '{}' triggered: {}({}) {} {} (actual: {}, {} devices in scope)",
                rule.name,
                rule.function,
                rule.variable,
                rule.operator,
                rule.threshold,
                value,
                snapshot.member_count()
            ),
            fired_at: format_millis(now_ms),
            fired_at_ms: now_ms,
        }
    }
}
