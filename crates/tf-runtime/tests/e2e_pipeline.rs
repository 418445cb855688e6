//! End-to-end pipeline test.
//!
//! Proves the full path: TCP line protocol → Receiver → IngestDispatcher →
//! rolling cache + synthetic variables → derived sink, and rolling cache →
//! global rule → alert sink.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tf_config::TelefuseConfig;
use tf_runtime::lifecycle::Engine;
use tf_runtime::tracing_init::DomainFormat;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .event_format(DomainFormat::new())
                .with_test_writer()
                .with_filter(EnvFilter::try_new("info").unwrap()),
        )
        .try_init();
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn config(dir: &Path, extra: &str) -> TelefuseConfig {
    let toml_str = format!(
        r#"
[server]
listen = "tcp://127.0.0.1:0"

[runtime]
ingest_parallelism = 4
eval_timeout = "5s"
channel_capacity = 64

[cache]
horizon = "1h"

[fleet]
liveness_threshold = "5m"

[sinks]
derived = ["file://{dir}/out/derived.jsonl"]
alerts = ["file://{dir}/out/alerts.jsonl"]

[[device]]
id = "pump-1"
groups = ["north"]

[[device]]
id = "pump-2"
groups = ["north"]

[[synthetic]]
name = "power_kw"
expression = "voltage * current / 1000"

{extra}
"#,
        dir = dir.display()
    );
    toml_str.parse().unwrap()
}

fn line(device: &str, ts: i64, voltage: f64, current: f64) -> String {
    format!(
        "{{\"device_id\":\"{device}\",\"ts_ms\":{ts},\"values\":{{\"voltage\":{voltage},\"current\":{current}}}}}\n"
    )
}

fn read_lines(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn e2e_derived_values_and_fleet_alert() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"
[[rule]]
id = "north_overload"
name = "North pumps overloaded"
selector = { mode = "group", value = "north" }
variable = "power_kw"
function = "MAX"
operator = ">"
threshold = 2.0
interval = "1s"
cooldown = "1h"
report = ["AVG", "COUNT"]
"#,
    );

    let engine = Engine::start(cfg, dir.path()).await.unwrap();
    let addr = engine.listen_addr();

    let now = now_ms();
    let mut conn = TcpStream::connect(addr).await.unwrap();
    let payload = format!(
        "{}{}",
        line("pump-1", now - 1_000, 230.0, 10.0),
        line("pump-2", now - 1_000, 230.0, 5.0)
    );
    conn.write_all(payload.as_bytes()).await.unwrap();
    conn.flush().await.unwrap();

    // The rule runs every second; give it two chances.
    let alerts_path = dir.path().join("out/alerts.jsonl");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while read_lines(&alerts_path).is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let statuses = engine.rule_statuses();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].1.cycles >= 1);

    engine.shutdown();
    engine.wait().await.unwrap();

    let derived = read_lines(&dir.path().join("out/derived.jsonl"));
    assert_eq!(derived.len(), 2, "one power_kw value per point");
    let mut values: Vec<f64> = derived
        .iter()
        .map(|d| d["value"].as_f64().unwrap())
        .collect();
    values.sort_by(f64::total_cmp);
    assert!((values[0] - 1.15).abs() < 1e-9);
    assert!((values[1] - 2.3).abs() < 1e-9);

    let alerts = read_lines(&alerts_path);
    assert_eq!(alerts.len(), 1, "cooldown suppresses repeats");
    let alert = &alerts[0];
    assert_eq!(alert["rule_id"], "north_overload");
    assert_eq!(alert["function"], "MAX");
    assert_eq!(alert["member_count"], 2);
    assert!((alert["value"].as_f64().unwrap() - 2.3).abs() < 1e-9);
}

#[tokio::test]
async fn e2e_shutdown_flushes_derived_values() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::start(config(dir.path(), ""), dir.path())
        .await
        .unwrap();

    let now = now_ms();
    let mut conn = TcpStream::connect(engine.listen_addr()).await.unwrap();
    let mut payload = String::new();
    for i in 0..50 {
        payload.push_str(&line("pump-1", now - 50 + i, 200.0, 1.0));
    }
    conn.write_all(payload.as_bytes()).await.unwrap();
    conn.shutdown().await.unwrap();

    // Wait until the receiver has read every line into the cache or queue.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.metrics().unwrap().points_ingested() < 50
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    engine.shutdown();
    engine.wait().await.unwrap();

    let derived = read_lines(&dir.path().join("out/derived.jsonl"));
    assert_eq!(derived.len(), 50);
    assert!(derived.iter().all(|d| d["variable"] == "power_kw"));
}

#[tokio::test]
async fn e2e_windowed_synthetics_over_tcp() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"
[[synthetic]]
name = "voltage_avg_1h"
expression = 'avg("voltage", "1h")'

[[synthetic]]
name = "voltage_count_24h"
expression = 'count("voltage", "24h")'
"#,
    );
    let engine = Engine::start(cfg, dir.path()).await.unwrap();

    let now = now_ms();
    let minute = 60_000;
    let mut conn = TcpStream::connect(engine.listen_addr()).await.unwrap();
    let payload = format!(
        "{}{}{}",
        line("pump-1", now - 50 * minute, 200.0, 1.0),
        line("pump-1", now - 30 * minute, 220.0, 1.0),
        line("pump-1", now - 10 * minute, 240.0, 1.0)
    );
    conn.write_all(payload.as_bytes()).await.unwrap();
    conn.shutdown().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.metrics().unwrap().points_ingested() < 3
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine.shutdown();
    engine.wait().await.unwrap();

    let derived = read_lines(&dir.path().join("out/derived.jsonl"));
    let series = |name: &str| {
        let mut values: Vec<(i64, f64)> = derived
            .iter()
            .filter(|d| d["variable"] == name)
            .map(|d| (d["ts_ms"].as_i64().unwrap(), d["value"].as_f64().unwrap()))
            .collect();
        values.sort_by_key(|(ts, _)| *ts);
        values.into_iter().map(|(_, v)| v).collect::<Vec<f64>>()
    };
    assert_eq!(series("voltage_avg_1h"), vec![200.0, 210.0, 220.0]);
    assert_eq!(series("voltage_count_24h"), vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn e2e_prometheus_exporter() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"
[metrics]
enabled = true
prometheus_listen = "tcp://127.0.0.1:0"
"#,
    );
    let engine = Engine::start(cfg, dir.path()).await.unwrap();
    let metrics_addr = engine.metrics_addr().unwrap();

    let mut conn = TcpStream::connect(engine.listen_addr()).await.unwrap();
    conn.write_all(line("pump-2", now_ms(), 100.0, 2.0).as_bytes())
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.metrics().unwrap().points_ingested() < 1
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut http = TcpStream::connect(metrics_addr).await.unwrap();
    http.write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut body = String::new();
    http.read_to_string(&mut body).await.unwrap();
    assert!(body.starts_with("HTTP/1.1 200 OK"));
    assert!(body.contains("tf_points_ingested_total 1"));
    assert!(body.contains("tf_cache_devices 1"));

    engine.shutdown();
    engine.wait().await.unwrap();
}

#[tokio::test]
async fn e2e_invalid_definition_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        dir.path(),
        r#"
[[synthetic]]
name = "bogus"
expression = "no_such_function(voltage)"
"#,
    );
    assert!(Engine::start(cfg, dir.path()).await.is_err());
}
