use std::sync::Arc;

use tokio::sync::mpsc;

use tf_core::alert::{AlertSink, GlobalAlert};

use crate::metrics::RuntimeMetrics;

/// Consume fired alerts and write them to the alert sinks.
///
/// Exits when every rule runner has dropped its sender, after the last
/// queued alert has been written.
pub async fn run_alert_sink(
    mut rx: mpsc::Receiver<GlobalAlert>,
    sink: Arc<dyn AlertSink>,
    metrics: Option<Arc<RuntimeMetrics>>,
) {
    while let Some(alert) = rx.recv().await {
        tf_info!(
            pipe,
            alert_id = %alert.alert_id,
            rule = %alert.rule_id,
            severity = %alert.severity,
            value = alert.value,
            "{}",
            alert.message
        );
        if let Some(m) = &metrics {
            m.inc_alert_dispatched();
        }
        if let Err(e) = sink.send(&alert) {
            if let Some(m) = &metrics {
                m.inc_alert_sink_error();
            }
            tf_warn!(res, alert_id = %alert.alert_id, error = %e, "alert sink write failed");
        }
    }
    tf_debug!(sys, "alert sink task finished");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use tf_core::alert::Severity;

    #[derive(Default)]
    struct Recorder {
        ids: Mutex<Vec<String>>,
        fail: bool,
    }

    impl AlertSink for Recorder {
        fn send(&self, alert: &GlobalAlert) -> anyhow::Result<()> {
            self.ids.lock().unwrap().push(alert.alert_id.clone());
            if self.fail {
                anyhow::bail!("disk full");
            }
            Ok(())
        }
    }

    fn alert(ms: i64) -> GlobalAlert {
        GlobalAlert {
            alert_id: tf_core::alert::alert_id("r1", ms),
            rule_id: "r1".into(),
            rule_name: "r1".into(),
            function: "AVG".into(),
            variable: "t".into(),
            operator: ">".into(),
            threshold: 1.0,
            value: 2.0,
            severity: Severity::Medium,
            member_count: 1,
            reporting_count: 1,
            affected_devices: vec!["d1".into()],
            report: BTreeMap::new(),
            message: "m".into(),
            fired_at: tf_core::alert::format_millis(ms),
            fired_at_ms: ms,
        }
    }

    #[tokio::test]
    async fn drains_queue_then_exits() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(Recorder::default());
        for ms in [1, 2, 3] {
            tx.send(alert(ms)).await.unwrap();
        }
        drop(tx);
        run_alert_sink(rx, sink.clone(), None).await;
        assert_eq!(*sink.ids.lock().unwrap(), vec!["r1|1", "r1|2", "r1|3"]);
    }

    #[tokio::test]
    async fn sink_failure_keeps_consuming() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let metrics = Arc::new(RuntimeMetrics::new(&[]));
        tx.send(alert(1)).await.unwrap();
        tx.send(alert(2)).await.unwrap();
        drop(tx);
        run_alert_sink(rx, sink.clone(), Some(Arc::clone(&metrics))).await;
        assert_eq!(sink.ids.lock().unwrap().len(), 2);
        assert!(metrics.render_prometheus().contains("tf_alert_sink_errors_total 2"));
    }
}
