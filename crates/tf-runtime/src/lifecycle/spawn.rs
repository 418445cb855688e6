use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use orion_error::ErrorOweBase;
use orion_error::prelude::*;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tf_config::TelefuseConfig;
use tf_core::alert::{AlertSink, DerivedSink, GlobalAlert};
use tf_core::cache::RollingCache;
use tf_core::rule::RuleRunner;
use tf_core::synthetic::SyntheticVariableService;
use tf_core::{DerivedValue, TelemetryPoint};

use crate::alert_task;
use crate::derived_task;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::ingest::IngestDispatcher;
use crate::metrics::{RuntimeMetrics, run_metrics_task};
use crate::receiver::Receiver;
use crate::rule_task::{RuleTaskConfig, run_rule_task};

use super::types::TaskGroup;

// ---------------------------------------------------------------------------
// Phase 2: task spawn helpers: each creates its channel and spawns
// ---------------------------------------------------------------------------

/// Spawn the alert consumer. It finishes once every rule runner is gone.
pub(super) fn spawn_alert_task(
    alert_rx: mpsc::Receiver<GlobalAlert>,
    sink: Arc<dyn AlertSink>,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> TaskGroup {
    let mut group = TaskGroup::new("alert");
    group.push(tokio::spawn(async move {
        alert_task::run_alert_sink(alert_rx, sink, metrics).await;
        Ok(())
    }));
    group
}

/// Spawn the derived-value consumer. Returns (derived_tx, task_group).
pub(super) fn spawn_derived_task(
    capacity: usize,
    sink: Arc<dyn DerivedSink>,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> (mpsc::Sender<DerivedValue>, TaskGroup) {
    let (derived_tx, derived_rx) = mpsc::channel(capacity);
    let mut group = TaskGroup::new("derived");
    group.push(tokio::spawn(async move {
        derived_task::run_derived_sink(derived_rx, sink, metrics).await;
        Ok(())
    }));
    (derived_tx, group)
}

/// Spawn one scheduling task per enabled rule.
pub(super) fn spawn_rule_tasks(
    runners: &[Arc<RuleRunner>],
    metrics: Option<Arc<RuntimeMetrics>>,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("rules");
    for runner in runners {
        let task_config = RuleTaskConfig {
            interval: Duration::from_millis(runner.rule().interval_ms as u64),
            runner: Arc::clone(runner),
            cancel: cancel.child_token(),
            metrics: metrics.clone(),
        };
        group.push(tokio::spawn(run_rule_task(task_config)));
    }
    group
}

/// Spawn the ingest dispatcher. Returns (point_tx, task_group).
pub(super) fn spawn_ingest_task(
    config: &TelefuseConfig,
    service: Arc<SyntheticVariableService>,
    derived_tx: mpsc::Sender<DerivedValue>,
    metrics: Option<Arc<RuntimeMetrics>>,
    cancel: CancellationToken,
) -> (mpsc::Sender<TelemetryPoint>, TaskGroup) {
    let (point_tx, point_rx) = mpsc::channel(config.runtime.channel_capacity);
    let dispatcher = IngestDispatcher::new(
        point_rx,
        service,
        derived_tx,
        cancel,
        config.runtime.ingest_parallelism,
        config.runtime.eval_timeout.as_duration(),
    )
    .with_metrics(metrics);
    let mut group = TaskGroup::new("ingest");
    group.push(tokio::spawn(dispatcher.run()));
    (point_tx, group)
}

/// Bind the optional Prometheus listener and spawn the metrics task.
/// Returns (exporter_addr, task_group).
pub(super) async fn spawn_metrics_task(
    config: &TelefuseConfig,
    metrics: Arc<RuntimeMetrics>,
    cache: Arc<RollingCache>,
    cancel: CancellationToken,
) -> RuntimeResult<(Option<SocketAddr>, TaskGroup)> {
    let listener = match &config.metrics.prometheus_listen {
        Some(listen) => {
            let addr = listen.strip_prefix("tcp://").unwrap_or(listen);
            Some(
                TcpListener::bind(addr)
                    .await
                    .owe(RuntimeReason::Listen)
                    .position(listen.clone())?,
            )
        }
        None => None,
    };
    let exporter_addr = match &listener {
        Some(l) => Some(l.local_addr().owe(RuntimeReason::Listen)?),
        None => None,
    };
    let metrics_config = config.metrics.clone();
    let mut group = TaskGroup::new("metrics");
    group.push(tokio::spawn(run_metrics_task(
        metrics,
        metrics_config,
        listener,
        cache,
        cancel,
    )));
    Ok((exporter_addr, group))
}

/// Bind the receiver and spawn its task.
/// Returns (listen_addr, task_group).
pub(super) async fn spawn_receiver_task(
    config: &TelefuseConfig,
    point_tx: mpsc::Sender<TelemetryPoint>,
    metrics: Option<Arc<RuntimeMetrics>>,
    cancel: CancellationToken,
) -> RuntimeResult<(SocketAddr, TaskGroup)> {
    let receiver = Receiver::bind(&config.server.listen, point_tx)
        .await
        .owe(RuntimeReason::Listen)
        .position(config.server.listen.clone())?
        .with_metrics(metrics);
    let listen_addr = receiver.local_addr().owe(RuntimeReason::Listen)?;
    let receiver_cancel = receiver.cancel_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        receiver_cancel.cancel();
    });
    let mut group = TaskGroup::new("receiver");
    group.push(tokio::spawn(async move { receiver.run().await }));
    Ok((listen_addr, group))
}
