use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tf_config::MetricsConfig;
use tf_core::cache::RollingCache;
use tf_core::rule::CycleOutcome;

const DEFAULT_HISTOGRAM_BUCKETS_SECONDS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0,
];

/// Fixed-bucket histogram; each observation lands in exactly one bucket.
struct Histogram {
    upper_bounds_nanos: Vec<u64>,
    bucket_counts: Vec<AtomicU64>,
    sum_nanos: AtomicU64,
}

impl Histogram {
    fn from_seconds_bounds(bounds: &[f64]) -> Self {
        let upper_bounds_nanos: Vec<u64> = bounds
            .iter()
            .map(|sec| (*sec * 1_000_000_000.0) as u64)
            .collect();
        let bucket_counts = (0..=upper_bounds_nanos.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            upper_bounds_nanos,
            bucket_counts,
            sum_nanos: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        let idx = self
            .upper_bounds_nanos
            .iter()
            .position(|bound| nanos <= *bound)
            .unwrap_or(self.upper_bounds_nanos.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.bucket_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

/// Per-rule cycle counters.
#[derive(Default)]
struct RuleCounters {
    cycles: AtomicU64,
    fired: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    suppressed: AtomicU64,
}

/// Shared runtime counters.
///
/// The rule label set is fixed at startup so hot-path updates never
/// allocate. Unknown rule ids are ignored.
pub struct RuntimeMetrics {
    receiver_connections_total: AtomicU64,
    receiver_lines_total: AtomicU64,
    receiver_decode_errors_total: AtomicU64,

    points_ingested_total: AtomicU64,
    points_late_total: AtomicU64,
    ingest_timeouts_total: AtomicU64,
    evaluations_ok_total: AtomicU64,
    evaluations_failed_total: AtomicU64,

    derived_published_total: AtomicU64,
    derived_sink_errors_total: AtomicU64,
    alerts_dispatched_total: AtomicU64,
    alert_sink_errors_total: AtomicU64,

    cache_devices: AtomicU64,
    cache_points: AtomicU64,

    rules: BTreeMap<String, RuleCounters>,

    ingest_seconds: Histogram,
    rule_cycle_seconds: BTreeMap<String, Histogram>,
}

impl RuntimeMetrics {
    pub fn new(rule_ids: &[String]) -> Self {
        Self {
            receiver_connections_total: AtomicU64::new(0),
            receiver_lines_total: AtomicU64::new(0),
            receiver_decode_errors_total: AtomicU64::new(0),
            points_ingested_total: AtomicU64::new(0),
            points_late_total: AtomicU64::new(0),
            ingest_timeouts_total: AtomicU64::new(0),
            evaluations_ok_total: AtomicU64::new(0),
            evaluations_failed_total: AtomicU64::new(0),
            derived_published_total: AtomicU64::new(0),
            derived_sink_errors_total: AtomicU64::new(0),
            alerts_dispatched_total: AtomicU64::new(0),
            alert_sink_errors_total: AtomicU64::new(0),
            cache_devices: AtomicU64::new(0),
            cache_points: AtomicU64::new(0),
            rules: rule_ids
                .iter()
                .map(|id| (id.clone(), RuleCounters::default()))
                .collect(),
            ingest_seconds: Histogram::from_seconds_bounds(DEFAULT_HISTOGRAM_BUCKETS_SECONDS),
            rule_cycle_seconds: rule_ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        Histogram::from_seconds_bounds(DEFAULT_HISTOGRAM_BUCKETS_SECONDS),
                    )
                })
                .collect(),
        }
    }

    pub fn inc_receiver_connection(&self) {
        self.receiver_connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_receiver_line(&self) {
        self.receiver_lines_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_receiver_decode_error(&self) {
        self.receiver_decode_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_point_ingested(&self) {
        self.points_ingested_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_point_late(&self) {
        self.points_late_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingest_timeout(&self) {
        self.ingest_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evaluations(&self, ok: usize, failed: usize) {
        self.evaluations_ok_total.fetch_add(ok as u64, Ordering::Relaxed);
        self.evaluations_failed_total
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn observe_ingest(&self, elapsed: Duration) {
        self.ingest_seconds.observe(elapsed);
    }

    pub fn inc_derived_published(&self) {
        self.derived_published_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_derived_sink_error(&self) {
        self.derived_sink_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alert_dispatched(&self) {
        self.alerts_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alert_sink_error(&self) {
        self.alert_sink_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one tick that was skipped because a cycle was still running.
    pub fn inc_rule_dropped(&self, rule: &str) {
        if let Some(c) = self.rules.get(rule) {
            c.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cycle(&self, rule: &str, outcome: &CycleOutcome, elapsed: Duration) {
        let Some(c) = self.rules.get(rule) else {
            return;
        };
        c.cycles.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            CycleOutcome::Fired { .. } => Some(&c.fired),
            CycleOutcome::Failed { .. } => Some(&c.failed),
            CycleOutcome::Dropped => Some(&c.dropped),
            CycleOutcome::Suppressed { .. } => Some(&c.suppressed),
            CycleOutcome::NotMet { .. } | CycleOutcome::Disabled => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(h) = self.rule_cycle_seconds.get(rule) {
            h.observe(elapsed);
        }
    }

    /// Refresh the cache gauges. Sampled on the report tick rather than on
    /// every insert.
    pub fn sample_cache(&self, cache: &RollingCache) {
        let stats = cache.stats();
        self.cache_devices
            .store(stats.devices as u64, Ordering::Relaxed);
        self.cache_points.store(stats.points as u64, Ordering::Relaxed);
    }

    pub fn points_ingested(&self) -> u64 {
        self.points_ingested_total.load(Ordering::Relaxed)
    }

    pub fn rule_fired(&self, rule: &str) -> u64 {
        self.rules
            .get(rule)
            .map_or(0, |c| c.fired.load(Ordering::Relaxed))
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(8 * 1024);
        let mut types = BTreeSet::new();

        let plain = [
            ("tf_receiver_connections_total", &self.receiver_connections_total),
            ("tf_receiver_lines_total", &self.receiver_lines_total),
            ("tf_receiver_decode_errors_total", &self.receiver_decode_errors_total),
            ("tf_points_ingested_total", &self.points_ingested_total),
            ("tf_points_late_total", &self.points_late_total),
            ("tf_ingest_timeouts_total", &self.ingest_timeouts_total),
            ("tf_evaluations_ok_total", &self.evaluations_ok_total),
            ("tf_evaluations_failed_total", &self.evaluations_failed_total),
            ("tf_derived_published_total", &self.derived_published_total),
            ("tf_derived_sink_errors_total", &self.derived_sink_errors_total),
            ("tf_alerts_dispatched_total", &self.alerts_dispatched_total),
            ("tf_alert_sink_errors_total", &self.alert_sink_errors_total),
        ];
        for (name, value) in plain {
            render_sample(&mut out, &mut types, name, "counter", &[], value.load(Ordering::Relaxed));
        }
        render_sample(
            &mut out,
            &mut types,
            "tf_cache_devices",
            "gauge",
            &[],
            self.cache_devices.load(Ordering::Relaxed),
        );
        render_sample(
            &mut out,
            &mut types,
            "tf_cache_points",
            "gauge",
            &[],
            self.cache_points.load(Ordering::Relaxed),
        );
        render_histogram(&mut out, &mut types, "tf_ingest_seconds", &[], &self.ingest_seconds);

        for (rule, c) in &self.rules {
            let labels = [("rule", rule.as_str())];
            for (name, value) in [
                ("tf_rule_cycles_total", &c.cycles),
                ("tf_rule_fired_total", &c.fired),
                ("tf_rule_failed_total", &c.failed),
                ("tf_rule_dropped_total", &c.dropped),
                ("tf_rule_suppressed_total", &c.suppressed),
            ] {
                render_sample(&mut out, &mut types, name, "counter", &labels, value.load(Ordering::Relaxed));
            }
        }
        for (rule, h) in &self.rule_cycle_seconds {
            render_histogram(&mut out, &mut types, "tf_rule_cycle_seconds", &[("rule", rule.as_str())], h);
        }
        out
    }

    fn rule_total(&self, counter: impl Fn(&RuleCounters) -> &AtomicU64) -> u64 {
        self.rules
            .values()
            .map(|c| counter(c).load(Ordering::Relaxed))
            .sum()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "rx_lines={} ingested={} late={} evals_ok={} evals_failed={} derived={} cycles={} fired={} rule_failed={} cache_points={}",
            self.receiver_lines_total.load(Ordering::Relaxed),
            self.points_ingested_total.load(Ordering::Relaxed),
            self.points_late_total.load(Ordering::Relaxed),
            self.evaluations_ok_total.load(Ordering::Relaxed),
            self.evaluations_failed_total.load(Ordering::Relaxed),
            self.derived_published_total.load(Ordering::Relaxed),
            self.rule_total(|c| &c.cycles),
            self.rule_total(|c| &c.fired),
            self.rule_total(|c| &c.failed),
            self.cache_points.load(Ordering::Relaxed),
        )
    }
}

fn render_type_once(out: &mut String, types: &mut BTreeSet<String>, name: &str, kind: &str) {
    if types.insert(name.to_string()) {
        let _ = writeln!(out, "# TYPE {name} {kind}");
    }
}

fn render_sample(
    out: &mut String,
    types: &mut BTreeSet<String>,
    name: &str,
    kind: &str,
    labels: &[(&str, &str)],
    value: u64,
) {
    render_type_once(out, types, name, kind);
    let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
}

fn render_histogram(
    out: &mut String,
    types: &mut BTreeSet<String>,
    name: &str,
    labels: &[(&str, &str)],
    histogram: &Histogram,
) {
    render_type_once(out, types, name, "histogram");
    let mut cumulative = 0u64;
    for (idx, bound) in histogram.upper_bounds_nanos.iter().enumerate() {
        cumulative += histogram.bucket_counts[idx].load(Ordering::Relaxed);
        let le = format!("{:.6}", *bound as f64 / 1_000_000_000.0);
        let mut all = labels.to_vec();
        all.push(("le", le.as_str()));
        let _ = writeln!(out, "{name}_bucket{} {cumulative}", format_labels(&all));
    }
    let total = histogram.count();
    let mut all = labels.to_vec();
    all.push(("le", "+Inf"));
    let _ = writeln!(out, "{name}_bucket{} {total}", format_labels(&all));
    let _ = writeln!(
        out,
        "{name}_sum{} {}",
        format_labels(labels),
        histogram.sum_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0
    );
    let _ = writeln!(out, "{name}_count{} {total}", format_labels(labels));
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push_str("=\"");
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}

/// Log a summary every `report_interval` and, when a listener is given,
/// serve `GET /metrics` in Prometheus text format until cancelled.
pub async fn run_metrics_task(
    metrics: Arc<RuntimeMetrics>,
    config: MetricsConfig,
    listener: Option<TcpListener>,
    cache: Arc<RollingCache>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tf_info!(
        sys,
        interval = %config.report_interval,
        exporter = listener.is_some(),
        "metrics task started"
    );

    metrics.sample_cache(&cache);
    let period = config.report_interval.as_duration();
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                metrics.sample_cache(&cache);
                tf_info!(res, summary = %metrics.summary_line(), "metrics snapshot");
            }
            result = accept(listener.as_ref()) => {
                let (stream, _) = result?;
                let metrics = Arc::clone(&metrics);
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    metrics.sample_cache(&cache);
                    if let Err(e) = serve_metrics_connection(stream, metrics).await {
                        tf_debug!(conn, error = %e, "metrics connection handling failed");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn accept(
    listener: Option<&TcpListener>,
) -> std::io::Result<(TcpStream, std::net::SocketAddr)> {
    match listener {
        Some(l) => l.accept().await,
        None => std::future::pending().await,
    }
}

async fn serve_metrics_connection(
    mut stream: TcpStream,
    metrics: Arc<RuntimeMetrics>,
) -> anyhow::Result<()> {
    let mut req_buf = [0u8; 512];
    let n = match timeout(Duration::from_secs(2), stream.read(&mut req_buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Ok(()),
    };
    let is_metrics = std::str::from_utf8(&req_buf[..n])
        .unwrap_or("")
        .starts_with("GET /metrics");

    if is_metrics {
        let body = metrics.render_prometheus();
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        timeout(Duration::from_secs(2), stream.write_all(header.as_bytes())).await??;
        timeout(Duration::from_secs(2), stream.write_all(body.as_bytes())).await??;
    } else {
        timeout(
            Duration::from_secs(2),
            stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
        )
        .await??;
    }
    let _ = timeout(Duration::from_secs(1), stream.shutdown()).await;
    Ok(())
}

pub fn maybe_build_metrics(config: &MetricsConfig, rule_ids: &[String]) -> Option<Arc<RuntimeMetrics>> {
    config
        .enabled
        .then(|| Arc::new(RuntimeMetrics::new(rule_ids)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_core::TelemetryPoint;
    use tf_core::cache::CachePolicy;
    use tf_core::rule::RuleState;

    fn rules() -> Vec<String> {
        vec!["r1".to_string(), "r2".to_string()]
    }

    #[test]
    fn type_line_once_per_family() {
        let text = RuntimeMetrics::new(&rules()).render_prometheus();
        assert_eq!(text.matches("# TYPE tf_rule_fired_total counter").count(), 1);
        assert_eq!(text.matches("# TYPE tf_rule_cycle_seconds histogram").count(), 1);
        assert!(text.contains("tf_rule_fired_total{rule=\"r2\"} 0"));
    }

    #[test]
    fn cycle_outcomes_counted_per_rule() {
        let m = RuntimeMetrics::new(&rules());
        let ms = Duration::from_millis(3);
        m.record_cycle("r1", &CycleOutcome::Fired { alert_id: "r1|1".into() }, ms);
        m.record_cycle("r1", &CycleOutcome::NotMet { value: 1.0 }, ms);
        m.record_cycle(
            "r2",
            &CycleOutcome::Failed {
                stage: RuleState::Aggregating,
                error: "no data".into(),
            },
            ms,
        );
        m.record_cycle("ghost", &CycleOutcome::Dropped, ms);
        m.inc_rule_dropped("r2");

        assert_eq!(m.rule_fired("r1"), 1);
        assert_eq!(m.rule_fired("ghost"), 0);
        let text = m.render_prometheus();
        assert!(text.contains("tf_rule_cycles_total{rule=\"r1\"} 2"));
        assert!(text.contains("tf_rule_failed_total{rule=\"r2\"} 1"));
        assert!(text.contains("tf_rule_dropped_total{rule=\"r2\"} 1"));
        assert!(text.contains("tf_rule_cycle_seconds_count{rule=\"r1\"} 2"));
        assert!(m.summary_line().contains("cycles=3 fired=1 rule_failed=1"));
    }

    #[test]
    fn histogram_count_matches_inf_bucket() {
        let m = RuntimeMetrics::new(&[]);
        m.observe_ingest(Duration::from_millis(3));
        m.observe_ingest(Duration::from_secs(30));
        let text = m.render_prometheus();
        assert!(text.contains("tf_ingest_seconds_bucket{le=\"5.000000\"} 1"));
        assert!(text.contains("tf_ingest_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(text.contains("tf_ingest_seconds_count 2"));
    }

    #[test]
    fn cache_gauges_sampled() {
        let cache = RollingCache::new(CachePolicy::new(60_000, None));
        cache.put(TelemetryPoint::new("a", 1).with_value("t", 1.0));
        cache.put(TelemetryPoint::new("b", 1).with_value("t", 1.0));
        cache.put(TelemetryPoint::new("b", 2).with_value("t", 1.0));
        let m = RuntimeMetrics::new(&[]);
        m.sample_cache(&cache);
        let text = m.render_prometheus();
        assert!(text.contains("tf_cache_devices 2"));
        assert!(text.contains("tf_cache_points 3"));
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let cfg = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(maybe_build_metrics(&cfg, &rules()).is_none());
        assert!(maybe_build_metrics(&MetricsConfig::default(), &rules()).is_some());
    }

    #[tokio::test]
    async fn exporter_serves_metrics() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(RuntimeMetrics::new(&rules()));
        metrics.inc_point_ingested();
        let cache = Arc::new(RollingCache::new(CachePolicy::new(60_000, None)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_metrics_task(
            Arc::clone(&metrics),
            MetricsConfig::default(),
            Some(listener),
            cache,
            cancel.clone(),
        ));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /metrics HTTP/1.1\r\n\r\n").await.unwrap();
        let mut body = String::new();
        conn.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("tf_points_ingested_total 1"));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
