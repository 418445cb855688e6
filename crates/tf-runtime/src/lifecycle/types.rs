use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use orion_error::ErrorOweBase;
use orion_error::prelude::*;
use tf_core::alert::{AlertSink, DerivedSink, GlobalAlert};
use tf_core::cache::RollingCache;
use tf_core::rule::RuleRunner;
use tf_core::synthetic::SyntheticVariableService;

use crate::error::{RuntimeReason, RuntimeResult};

// ---------------------------------------------------------------------------
// TaskGroup: named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of async tasks that are shut down together.
///
/// Groups are assembled in *start order* and joined in *reverse order*:
///
///   start:  alert → derived → rules → ingest → metrics → receiver
///   join:   receiver → metrics → ingest → rules → derived → alert
///
/// Producers exit before the consumers they feed, so every accepted point
/// is evaluated and every fired alert is written before the engine stops.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join all tasks in this group, returning the first error.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        for handle in self.handles {
            handle
                .await
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("task join error: {e}"))
                })?
                .owe(RuntimeReason::Shutdown)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BootstrapData: built artifacts from the config-loading phase
// ---------------------------------------------------------------------------

/// Everything phase 1 builds, ready for task spawning.
pub(super) struct BootstrapData {
    pub cache: Arc<RollingCache>,
    pub service: Arc<SyntheticVariableService>,
    /// Every runner holds a sender of this channel; it closes once the
    /// last runner is dropped.
    pub runners: Vec<Arc<RuleRunner>>,
    pub alert_rx: mpsc::Receiver<GlobalAlert>,
    pub alert_sink: Arc<dyn AlertSink>,
    pub derived_sink: Arc<dyn DerivedSink>,
}
