use std::sync::Arc;

use tokio::sync::mpsc;

use tf_core::DerivedValue;
use tf_core::alert::DerivedSink;

use crate::metrics::RuntimeMetrics;

/// Publish derived values until the ingest dispatcher drops its sender.
pub async fn run_derived_sink(
    mut rx: mpsc::Receiver<DerivedValue>,
    sink: Arc<dyn DerivedSink>,
    metrics: Option<Arc<RuntimeMetrics>>,
) {
    while let Some(value) = rx.recv().await {
        tf_trace!(
            pipe,
            device = %value.device_id,
            variable = %value.variable,
            value = value.value,
            ts_ms = value.ts_ms,
            "derived value"
        );
        match sink.publish(&value) {
            Ok(()) => {
                if let Some(m) = &metrics {
                    m.inc_derived_published();
                }
            }
            Err(e) => {
                if let Some(m) = &metrics {
                    m.inc_derived_sink_error();
                }
                tf_warn!(res, device = %value.device_id, variable = %value.variable, error = %e, "derived sink write failed");
            }
        }
    }
    tf_debug!(sys, "derived sink task finished");
}
