mod bootstrap;
mod signal;
mod spawn;
mod types;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use orion_error::ContextRecord;
use orion_error::op_context;
use tokio_util::sync::CancellationToken;

use tf_config::TelefuseConfig;
use tf_core::cache::RollingCache;
use tf_core::fleet::DeviceDirectory;
use tf_core::rule::{RuleRunner, RuleStatus};
use tf_core::store::{PointRecorder, SampleStore};
use tf_core::synthetic::SyntheticVariableService;

use crate::error::RuntimeResult;
use crate::metrics::{RuntimeMetrics, maybe_build_metrics};

// Re-export public API
pub use signal::wait_for_signal;

use bootstrap::build_components;
use spawn::{
    spawn_alert_task, spawn_derived_task, spawn_ingest_task, spawn_metrics_task,
    spawn_receiver_task, spawn_rule_tasks,
};
use types::TaskGroup;

// ---------------------------------------------------------------------------
// Backends: external collaborators, injectable for embedding and tests
// ---------------------------------------------------------------------------

/// Collaborators the engine does not own. Anything left `None` falls back
/// to the built-in behavior: no history beyond the cache, no recording,
/// and a device directory built from the `[[device]]` table.
#[derive(Default)]
pub struct Backends {
    pub store: Option<Arc<dyn SampleStore>>,
    pub recorder: Option<Arc<dyn PointRecorder>>,
    pub directory: Option<Arc<dyn DeviceDirectory>>,
}

// ---------------------------------------------------------------------------
// Engine: the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Manages the full lifecycle of the telemetry runtime: bootstrap, run, and
/// graceful shutdown.
///
/// Task groups are stored in start order and joined in reverse during
/// [`wait`](Self::wait): the receiver stops first, queued points are
/// evaluated, rule tasks finish their in-flight cycle, then the derived and
/// alert sinks drain.
pub struct Engine {
    cancel: CancellationToken,
    /// Cancelled once the receiver has stopped, so queued points still get
    /// evaluated.
    ingest_cancel: CancellationToken,
    /// Cancelled once ingest has drained.
    rule_cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    listen_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    cache: Arc<RollingCache>,
    service: Arc<SyntheticVariableService>,
    /// Released after the rule tasks finish; the alert channel closes with
    /// the last runner.
    runners: Vec<Arc<RuleRunner>>,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl Engine {
    /// Bootstrap the runtime from a [`TelefuseConfig`] and a base directory
    /// (for resolving relative sink paths).
    pub async fn start(config: TelefuseConfig, base_dir: &Path) -> RuntimeResult<Self> {
        Self::start_with(config, base_dir, Backends::default()).await
    }

    /// Like [`start`](Self::start), with injected collaborators.
    #[tracing::instrument(name = "engine.start", skip_all, fields(listen = %config.server.listen))]
    pub async fn start_with(
        config: TelefuseConfig,
        base_dir: &Path,
        backends: Backends,
    ) -> RuntimeResult<Self> {
        let mut op = op_context!("engine-bootstrap").with_auto_log();
        op.record("listen", config.server.listen.as_str());
        op.record("base_dir", base_dir.display().to_string().as_str());

        let cancel = CancellationToken::new();
        let ingest_cancel = CancellationToken::new();
        let rule_cancel = CancellationToken::new();

        // Phase 1: cache, definitions, rules, sinks
        let data = build_components(&config, base_dir, backends)?;
        let rule_ids: Vec<String> = data.runners.iter().map(|r| r.rule().id.clone()).collect();
        let metrics = maybe_build_metrics(&config.metrics, &rule_ids);
        tf_info!(
            sys,
            devices = config.devices.len(),
            synthetics = data.service.len(),
            rules = rule_ids.len(),
            "engine bootstrap complete"
        );

        // Phase 2: spawn task groups
        // (start order: alert → derived → rules → ingest → metrics → receiver)
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(6);

        groups.push(spawn_alert_task(
            data.alert_rx,
            data.alert_sink,
            metrics.clone(),
        ));

        let (derived_tx, derived_group) = spawn_derived_task(
            config.runtime.channel_capacity,
            data.derived_sink,
            metrics.clone(),
        );
        groups.push(derived_group);

        groups.push(spawn_rule_tasks(
            &data.runners,
            metrics.clone(),
            rule_cancel.child_token(),
        ));

        let (point_tx, ingest_group) = spawn_ingest_task(
            &config,
            Arc::clone(&data.service),
            derived_tx,
            metrics.clone(),
            ingest_cancel.child_token(),
        );
        groups.push(ingest_group);

        let mut metrics_addr = None;
        if let Some(m) = &metrics {
            let (addr, group) = spawn_metrics_task(
                &config,
                Arc::clone(m),
                Arc::clone(&data.cache),
                cancel.child_token(),
            )
            .await?;
            metrics_addr = addr;
            groups.push(group);
        }

        let (listen_addr, receiver_group) =
            spawn_receiver_task(&config, point_tx, metrics.clone(), cancel.clone()).await?;
        groups.push(receiver_group);

        op.record("listen_addr", listen_addr.to_string().as_str());
        op.mark_suc();
        Ok(Self {
            cancel,
            ingest_cancel,
            rule_cancel,
            groups,
            listen_addr,
            metrics_addr,
            cache: data.cache,
            service: data.service,
            runners: data.runners,
            metrics,
        })
    }

    /// Returns the local address the engine is listening on.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Address of the Prometheus exporter, when one is configured.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn cache(&self) -> &Arc<RollingCache> {
        &self.cache
    }

    /// The live synthetic variable service; definitions may be added or
    /// removed while the engine runs.
    pub fn synthetics(&self) -> &Arc<SyntheticVariableService> {
        &self.service
    }

    pub fn metrics(&self) -> Option<&Arc<RuntimeMetrics>> {
        self.metrics.as_ref()
    }

    /// Per-rule status, in rule id order.
    pub fn rule_statuses(&self) -> Vec<(String, RuleStatus)> {
        self.runners
            .iter()
            .map(|r| (r.rule().id.clone(), r.status()))
            .collect()
    }

    /// Request graceful shutdown of all tasks.
    pub fn shutdown(&self) {
        tf_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Wait for all task groups to complete after shutdown.
    ///
    /// Groups are joined in LIFO order (reverse of start order):
    /// receiver → metrics → ingest → rules → derived → alert.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            tf_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            tf_debug!(sys, task_group = name, "task group finished");

            match name {
                // Receiver fully stopped: every accepted point is queued.
                "receiver" => self.ingest_cancel.cancel(),
                // Queued points evaluated: the cache is final.
                "ingest" => self.rule_cancel.cancel(),
                "rules" => self.runners.clear(),
                _ => {}
            }
        }
        if let Some(m) = &self.metrics {
            m.sample_cache(&self.cache);
            tf_info!(res, summary = %m.summary_line(), "final metrics");
        }
        Ok(())
    }

    /// Returns a clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
