use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use tf_core::rule::{CycleOutcome, CycleReport, RuleRunner};

use crate::metrics::RuntimeMetrics;

/// Construction parameters for one rule's scheduling task.
pub struct RuleTaskConfig {
    pub runner: Arc<RuleRunner>,
    pub interval: Duration,
    pub cancel: CancellationToken,
    pub metrics: Option<Arc<RuntimeMetrics>>,
}

/// Tick at the rule's interval and spawn one evaluation cycle per tick.
///
/// Missed ticks are skipped, never replayed. A tick that finds the previous
/// cycle still running is dropped. On cancellation no new cycle starts and
/// the in-flight one is awaited, so an alert hand-off is never cut short.
#[tracing::instrument(name = "rule", skip_all, fields(rule = %config.runner.rule().id))]
pub async fn run_rule_task(config: RuleTaskConfig) -> anyhow::Result<()> {
    let RuleTaskConfig {
        runner,
        interval,
        cancel,
        metrics,
    } = config;
    let rule_id = runner.rule().id.clone();

    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inflight: JoinSet<CycleReport> = JoinSet::new();

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if runner.is_running() {
                    if let Some(m) = &metrics {
                        m.inc_rule_dropped(&rule_id);
                    }
                    tf_debug!(pipe, rule = %rule_id, "previous cycle still running, tick dropped");
                    continue;
                }
                let runner = Arc::clone(&runner);
                let metrics = metrics.clone();
                inflight.spawn(async move {
                    let started = Instant::now();
                    let report = runner.run_cycle(now_epoch_millis()).await;
                    if let Some(m) = &metrics {
                        m.record_cycle(&report.rule_id, &report.outcome, started.elapsed());
                    }
                    report
                });
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                log_joined(&rule_id, joined);
            }
            _ = cancel.cancelled() => break,
        }
    }

    while let Some(joined) = inflight.join_next().await {
        log_joined(&rule_id, joined);
    }
    tf_debug!(pipe, rule = %rule_id, "rule task stopped");
    Ok(())
}

fn log_joined(rule_id: &str, joined: Result<CycleReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => match &report.outcome {
            CycleOutcome::Fired { alert_id } => {
                tf_debug!(pipe, rule = %rule_id, alert_id = %alert_id, "cycle fired");
            }
            CycleOutcome::Failed { stage, error } => {
                tf_debug!(pipe, rule = %rule_id, stage = %stage, error = %error, "cycle failed");
            }
            other => tf_trace!(pipe, rule = %rule_id, outcome = ?other, "cycle finished"),
        },
        Err(e) => tf_warn!(pipe, rule = %rule_id, error = %e, "rule cycle task panicked"),
    }
}

pub(crate) fn now_epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
