use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use tf_core::cache::PushOutcome;
use tf_core::synthetic::SyntheticVariableService;
use tf_core::{DerivedValue, TelemetryPoint};

use crate::metrics::RuntimeMetrics;

/// Queue depth of one lane.
const LANE_CAPACITY: usize = 64;

/// Moves points from the ingest channel into the cache and the synthetic
/// variable service.
///
/// Points are routed to one of `parallelism` lanes by a hash of the device
/// id. Each lane is a task that evaluates its points one at a time, so the
/// points of one device are cached and evaluated in arrival order while
/// different devices proceed in parallel. A full lane stops the router,
/// and the bounded ingest channel pushes back on producers. A point that
/// exceeds `eval_timeout` is abandoned; its cache write has already
/// happened.
pub struct IngestDispatcher {
    point_rx: mpsc::Receiver<TelemetryPoint>,
    service: Arc<SyntheticVariableService>,
    derived_tx: mpsc::Sender<DerivedValue>,
    cancel: CancellationToken,
    lanes: usize,
    eval_timeout: Duration,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl IngestDispatcher {
    pub fn new(
        point_rx: mpsc::Receiver<TelemetryPoint>,
        service: Arc<SyntheticVariableService>,
        derived_tx: mpsc::Sender<DerivedValue>,
        cancel: CancellationToken,
        parallelism: usize,
        eval_timeout: Duration,
    ) -> Self {
        Self {
            point_rx,
            service,
            derived_tx,
            cancel,
            lanes: parallelism.max(1),
            eval_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<RuntimeMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run until cancelled or until every producer has dropped its sender.
    ///
    /// On cancellation the channel is closed to new points and the points
    /// already queued are still processed. When `run` returns, every lane
    /// has finished and the derived sender is dropped, which lets the
    /// derived sink task finish.
    #[tracing::instrument(name = "ingest", skip_all, fields(lanes = self.lanes))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut workers = JoinSet::new();
        let mut lanes = Vec::with_capacity(self.lanes);
        for lane in 0..self.lanes {
            let (lane_tx, lane_rx) = mpsc::channel(LANE_CAPACITY);
            workers.spawn(run_lane(
                lane,
                lane_rx,
                Arc::clone(&self.service),
                self.derived_tx.clone(),
                self.metrics.clone(),
                self.eval_timeout,
            ));
            lanes.push(lane_tx);
        }

        loop {
            tokio::select! {
                msg = self.point_rx.recv() => match msg {
                    Some(point) => route(&lanes, point).await,
                    None => break,
                },
                _ = self.cancel.cancelled() => {
                    self.point_rx.close();
                    let mut drained = 0usize;
                    while let Some(point) = self.point_rx.recv().await {
                        route(&lanes, point).await;
                        drained += 1;
                    }
                    tf_debug!(pipe, drained, "ingest channel drained");
                    break;
                }
            }
        }

        drop(lanes);
        while let Some(joined) = workers.join_next().await {
            on_joined(joined);
        }
        Ok(())
    }
}

/// Lane index for a device. Stable for the lifetime of the process.
fn lane_of(device_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

async fn route(lanes: &[mpsc::Sender<TelemetryPoint>], point: TelemetryPoint) {
    let lane = lane_of(&point.device_id, lanes.len());
    if let Err(mpsc::error::SendError(point)) = lanes[lane].send(point).await {
        tf_warn!(pipe, lane, device = %point.device_id, ts_ms = point.ts_ms, "ingest lane closed, point dropped");
    }
}

async fn run_lane(
    lane: usize,
    mut lane_rx: mpsc::Receiver<TelemetryPoint>,
    service: Arc<SyntheticVariableService>,
    derived_tx: mpsc::Sender<DerivedValue>,
    metrics: Option<Arc<RuntimeMetrics>>,
    eval_timeout: Duration,
) {
    let mut processed = 0u64;
    while let Some(point) = lane_rx.recv().await {
        ingest_point(&service, &derived_tx, metrics.as_deref(), eval_timeout, point).await;
        processed += 1;
    }
    tf_trace!(pipe, lane, processed, "ingest lane finished");
}

async fn ingest_point(
    service: &SyntheticVariableService,
    derived_tx: &mpsc::Sender<DerivedValue>,
    metrics: Option<&RuntimeMetrics>,
    eval_timeout: Duration,
    point: TelemetryPoint,
) {
    let started = Instant::now();
    let device = point.device_id.clone();
    let ts_ms = point.ts_ms;

    match tokio::time::timeout(eval_timeout, service.on_sample(point)).await {
        Ok(report) => {
            if let Some(m) = metrics {
                m.inc_point_ingested();
                if report.cache == PushOutcome::Late {
                    m.inc_point_late();
                }
                let failed = report.failures();
                m.add_evaluations(report.records.len() - failed, failed);
                m.observe_ingest(started.elapsed());
            }
            if report.cache == PushOutcome::Late {
                tf_debug!(pipe, device = %device, ts_ms, "point older than cache horizon");
            }
            for value in report.derived() {
                if derived_tx.send(value).await.is_err() {
                    tf_warn!(pipe, "derived channel closed");
                    break;
                }
            }
        }
        Err(_) => {
            if let Some(m) = metrics {
                m.inc_ingest_timeout();
            }
            tf_warn!(pipe, device = %device, ts_ms, timeout = ?eval_timeout, "point evaluation timed out");
        }
    }
}

fn on_joined(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tf_warn!(pipe, error = %e, "ingest lane panicked");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
