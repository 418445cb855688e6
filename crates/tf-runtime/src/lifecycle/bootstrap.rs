use std::path::{Path, PathBuf};
use std::sync::Arc;

use orion_error::op_context;
use orion_error::{ErrorOwe, ErrorOweBase};
use orion_error::prelude::*;
use tokio::sync::mpsc;

use tf_config::{SinkUri, TelefuseConfig, parse_sink_uri};
use tf_core::alert::{AlertSink, DerivedSink, FanOutSink, JsonlFileSink};
use tf_core::cache::{CachePolicy, RollingCache};
use tf_core::fleet::{DeviceDirectory, FleetAggregator, StaticDirectory};
use tf_core::history::HistoryLoader;
use tf_core::rule::{GlobalRule, RuleRunner};
use tf_core::store::{MemoryStore, PointRecorder, RecorderSet, SampleStore};
use tf_core::synthetic::SyntheticVariableService;

use crate::error::{RuntimeReason, RuntimeResult};

use super::Backends;
use super::types::BootstrapData;

// ---------------------------------------------------------------------------
// Phase 1: build_components: cache, definitions, rules, sinks
// ---------------------------------------------------------------------------

/// Build the cache, register synthetic definitions, compile rules and open
/// the output sinks. Any invalid definition or rule aborts the start.
pub(super) fn build_components(
    config: &TelefuseConfig,
    base_dir: &Path,
    backends: Backends,
) -> RuntimeResult<BootstrapData> {
    let Backends {
        store,
        recorder,
        directory,
    } = backends;

    // 1. Rolling cache with per-class horizons
    let policy = CachePolicy::from_config(&config.cache, &config.devices);
    let cache = Arc::new(RollingCache::new(policy));

    // 2. History store and synthetic variables
    let (store, recorder) = history_backends(config, store, recorder);
    let history = HistoryLoader::new(
        Arc::clone(&cache),
        Some(store),
        config.store.query_timeout.as_duration(),
    );
    let service = Arc::new(SyntheticVariableService::new(history, recorder));
    service.define_all(&config.synthetics).err_conv()?;
    tf_debug!(conf, synthetics = service.len(), "synthetic variables registered");

    // 3. Fleet aggregation over the configured or injected directory
    let directory: Arc<dyn DeviceDirectory> = match directory {
        Some(d) => d,
        None => Arc::new(StaticDirectory::new(config.devices.clone())),
    };
    let aggregator = Arc::new(FleetAggregator::new(
        directory,
        Arc::clone(&cache),
        config.fleet.liveness_threshold.as_millis_i64(),
    ));

    // 4. Global rules; each runner dispatches into the alert channel
    let (alert_tx, alert_rx) = mpsc::channel(config.runtime.channel_capacity);
    let mut runners = Vec::with_capacity(config.rules.len());
    for cfg in &config.rules {
        let rule = GlobalRule::from_config(cfg).err_conv()?;
        if !rule.enabled {
            tf_info!(conf, rule = %rule.id, "rule disabled, not scheduled");
            continue;
        }
        runners.push(Arc::new(RuleRunner::new(
            rule,
            Arc::clone(&aggregator),
            Arc::new(alert_tx.clone()),
        )));
    }
    drop(alert_tx);

    // 5. Output sinks
    let alert_sink: Arc<dyn AlertSink> = Arc::new(FanOutSink::<dyn AlertSink>::new(
        open_sinks(&config.sinks.alerts, base_dir, "alert")?
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn AlertSink>)
            .collect(),
    ));
    let derived_sink: Arc<dyn DerivedSink> = Arc::new(FanOutSink::<dyn DerivedSink>::new(
        open_sinks(&config.sinks.derived, base_dir, "derived")?
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn DerivedSink>)
            .collect(),
    ));

    Ok(BootstrapData {
        cache,
        service,
        runners,
        alert_rx,
        alert_sink,
        derived_sink,
    })
}

/// Without an injected store, an in-memory store serves history reads. It
/// must see every point, so it is also a recorder, next to any injected one.
fn history_backends(
    config: &TelefuseConfig,
    store: Option<Arc<dyn SampleStore>>,
    recorder: Option<Arc<dyn PointRecorder>>,
) -> (Arc<dyn SampleStore>, Option<Arc<dyn PointRecorder>>) {
    if let Some(store) = store {
        return (store, recorder);
    }
    let retention = config.store.retention;
    tf_info!(conf, retention = %retention, "using in-memory history store");
    let memory = Arc::new(MemoryStore::with_retention(retention.as_millis_i64()));
    let recorder: Arc<dyn PointRecorder> = match recorder {
        Some(external) => Arc::new(RecorderSet::new(vec![
            Arc::clone(&memory) as Arc<dyn PointRecorder>,
            external,
        ])),
        None => Arc::clone(&memory) as Arc<dyn PointRecorder>,
    };
    (memory, Some(recorder))
}

/// Open one JSON-lines file per `file://` URI. Relative paths resolve
/// against `base_dir`; missing parent directories are created.
fn open_sinks(
    uris: &[String],
    base_dir: &Path,
    kind: &'static str,
) -> RuntimeResult<Vec<JsonlFileSink>> {
    let mut sinks = Vec::with_capacity(uris.len());
    for uri in uris {
        let mut op = op_context!("open-sink").with_auto_log();
        op.record("kind", kind);
        op.record("uri", uri.as_str());

        let SinkUri::File(path) = parse_sink_uri(uri).owe_conf()?;
        let path = resolve_path(&path, base_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .owe(RuntimeReason::Sink)
                .position(parent.display().to_string())?;
        }
        op.record("sink_path", path.display().to_string().as_str());
        let sink = JsonlFileSink::open(&path)
            .owe(RuntimeReason::Sink)
            .position(path.display().to_string())?;
        sinks.push(sink);
        op.mark_suc();
    }
    if sinks.is_empty() {
        tf_info!(conf, kind, "no sinks configured, records are only logged");
    }
    Ok(sinks)
}

fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[server]
listen = "tcp://127.0.0.1:0"

[runtime]
ingest_parallelism = 2
eval_timeout = "5s"

[cache]
horizon = "1h"
"#;

    fn config(extra: &str) -> TelefuseConfig {
        format!("{BASE}{extra}").parse().unwrap()
    }

    #[test]
    fn builds_with_relative_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"
[sinks]
derived = ["file://out/derived.jsonl"]
alerts = ["file://out/alerts.jsonl", "file://audit/alerts.jsonl"]

[[synthetic]]
name = "power_kw"
expression = "voltage * current / 1000"

[[rule]]
id = "hot"
selector = { mode = "group", value = "north" }
variable = "t"
function = "AVG"
operator = ">"
threshold = 50.0

[[rule]]
id = "off"
selector = { mode = "group", value = "north" }
variable = "t"
function = "AVG"
operator = ">"
threshold = 50.0
enabled = false
"#,
        );
        let data = build_components(&cfg, dir.path(), Backends::default()).unwrap();
        assert_eq!(data.service.len(), 1);
        assert_eq!(data.runners.len(), 1);
        assert_eq!(data.runners[0].rule().id, "hot");
        assert!(dir.path().join("out/derived.jsonl").exists());
        assert!(dir.path().join("out/alerts.jsonl").exists());
        assert!(dir.path().join("audit/alerts.jsonl").exists());
    }

    #[test]
    fn invalid_synthetic_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"
[[synthetic]]
name = "broken"
expression = "unknown_fn(voltage)"
"#,
        );
        assert!(build_components(&cfg, dir.path(), Backends::default()).is_err());
    }

    #[test]
    fn alert_channel_closes_with_runners() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"
[[rule]]
id = "hot"
selector = { mode = "group", value = "north" }
variable = "t"
function = "MAX"
operator = ">"
threshold = 1.0
"#,
        );
        let mut data = build_components(&cfg, dir.path(), Backends::default()).unwrap();
        data.runners.clear();
        assert!(matches!(
            data.alert_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn windowed_synthetics_read_past_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            r#"
[[synthetic]]
name = "t_avg_1h"
expression = 'avg("t", "1h")'

[[synthetic]]
name = "t_avg_24h"
expression = 'avg("t", "24h")'
"#,
        );
        let data = build_components(&cfg, dir.path(), Backends::default()).unwrap();

        // 21 points with alternating 5 and 9 minute gaps (140 minutes).
        const MIN: i64 = 60_000;
        let mut points = Vec::new();
        let mut ts = 1_700_000_000_000i64;
        for i in 0..21 {
            points.push((ts, i as f64));
            ts += if i % 2 == 0 { 5 * MIN } else { 9 * MIN };
        }
        let mut last = None;
        for &(ts, t) in &points {
            let point = tf_core::TelemetryPoint::new("d1", ts).with_value("t", t);
            last = Some(data.service.on_sample(point).await);
        }
        let report = last.unwrap();

        let now = points.last().unwrap().0;
        let mean = |from: i64| {
            let window: Vec<f64> = points
                .iter()
                .filter(|(ts, _)| *ts >= from)
                .map(|(_, t)| *t)
                .collect();
            window.iter().sum::<f64>() / window.len() as f64
        };
        let value_of = |name: &str| {
            let record = report.records.iter().find(|r| r.variable == name).unwrap();
            record.outcome.clone().unwrap()
        };
        assert!((value_of("t_avg_1h") - mean(now - 60 * MIN)).abs() < 1e-9);
        assert!((value_of("t_avg_24h") - mean(now - 24 * 60 * MIN)).abs() < 1e-9);
    }

    #[test]
    fn injected_store_is_used_as_is() {
        let cfg = config("");
        let external: Arc<dyn SampleStore> = Arc::new(MemoryStore::new());
        let (store, recorder) = history_backends(&cfg, Some(Arc::clone(&external)), None);
        assert!(Arc::ptr_eq(&store, &external));
        assert!(recorder.is_none());
    }
}
