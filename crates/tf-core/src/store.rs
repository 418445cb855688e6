//! Backing store seam.
//!
//! The long-term store is external; the engine only needs ordered range
//! reads of one variable and, optionally, a place to record what it has
//! seen. [`MemoryStore`] implements both for single-process deployments and
//! tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::telemetry::{Sample, TelemetryPoint};

/// Range reads over historical samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Samples of `variable` for `device_id` with `from_ms <= ts <= to_ms`,
    /// in ascending timestamp order.
    async fn fetch_samples(
        &self,
        device_id: &str,
        variable: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<Sample>>;
}

/// Write side: every accepted point (raw or derived) is offered here.
pub trait PointRecorder: Send + Sync {
    fn record(&self, point: &TelemetryPoint) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

type SeriesKey = (String, String);

/// In-process store keyed by `(device, variable)`. With a retention, each
/// series keeps only samples within `retention_ms` of its newest one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<SeriesKey, VecDeque<Sample>>>,
    retention_ms: Option<i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention_ms: i64) -> Self {
        Self {
            series: RwLock::default(),
            retention_ms: Some(retention_ms),
        }
    }

    pub fn insert(&self, device_id: &str, variable: &str, sample: Sample) {
        let mut series = self.series.write().expect("store lock poisoned");
        let samples = series
            .entry((device_id.to_string(), variable.to_string()))
            .or_default();
        let idx = samples.partition_point(|s| s.ts_ms <= sample.ts_ms);
        samples.insert(idx, sample);

        if let (Some(retention), Some(newest)) = (self.retention_ms, samples.back()) {
            let cutoff = newest.ts_ms.saturating_sub(retention);
            let expired = samples.partition_point(|s| s.ts_ms < cutoff);
            samples.drain(..expired);
        }
    }

    pub fn series_len(&self, device_id: &str, variable: &str) -> usize {
        self.series
            .read()
            .expect("store lock poisoned")
            .get(&(device_id.to_string(), variable.to_string()))
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn fetch_samples(
        &self,
        device_id: &str,
        variable: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<Sample>> {
        let series = self.series.read().expect("store lock poisoned");
        let Some(samples) = series.get(&(device_id.to_string(), variable.to_string())) else {
            return Ok(Vec::new());
        };
        let start = samples.partition_point(|s| s.ts_ms < from_ms);
        Ok(samples
            .range(start..)
            .take_while(|s| s.ts_ms <= to_ms)
            .copied()
            .collect())
    }
}

impl PointRecorder for MemoryStore {
    fn record(&self, point: &TelemetryPoint) -> anyhow::Result<()> {
        for (name, value) in &point.values {
            self.insert(&point.device_id, name, Sample::new(point.ts_ms, *value));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecorderSet
// ---------------------------------------------------------------------------

/// Offers each point to every recorder. All recorders run even when one
/// fails; the first error is returned.
pub struct RecorderSet {
    recorders: Vec<Arc<dyn PointRecorder>>,
}

impl RecorderSet {
    pub fn new(recorders: Vec<Arc<dyn PointRecorder>>) -> Self {
        Self { recorders }
    }
}

impl PointRecorder for RecorderSet {
    fn record(&self, point: &TelemetryPoint) -> anyhow::Result<()> {
        let mut first_err = None;
        for recorder in &self.recorders {
            if let Err(e) = recorder.record(point) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_is_ordered_and_inclusive() {
        let store = MemoryStore::new();
        for ts in [30, 10, 20, 40] {
            store
                .record(&TelemetryPoint::new("d1", ts).with_value("v", ts as f64))
                .unwrap();
        }
        let got = store.fetch_samples("d1", "v", 10, 30).await.unwrap();
        let ts: Vec<i64> = got.iter().map(|s| s.ts_ms).collect();
        assert_eq!(ts, vec![10, 20, 30]);
        assert_eq!(store.series_len("d1", "v"), 4);
    }

    #[tokio::test]
    async fn unknown_series_is_empty() {
        let store = MemoryStore::new();
        assert!(store.fetch_samples("d1", "v", 0, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retention_drops_samples_behind_newest() {
        let store = MemoryStore::with_retention(100);
        for ts in [0, 50, 120, 180] {
            store.insert("d1", "v", Sample::new(ts, 1.0));
        }
        let got = store.fetch_samples("d1", "v", 0, 200).await.unwrap();
        let ts: Vec<i64> = got.iter().map(|s| s.ts_ms).collect();
        assert_eq!(ts, vec![120, 180]);
        // A late sample older than the retention is dropped straight away.
        store.insert("d1", "v", Sample::new(10, 1.0));
        assert_eq!(store.series_len("d1", "v"), 2);
    }

    struct Failing;

    impl PointRecorder for Failing {
        fn record(&self, _point: &TelemetryPoint) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn recorder_set_reaches_every_recorder() {
        let store = Arc::new(MemoryStore::new());
        let set = RecorderSet::new(vec![Arc::new(Failing), Arc::clone(&store) as _]);
        let err = set
            .record(&TelemetryPoint::new("d1", 5).with_value("v", 1.0))
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(store.series_len("d1", "v"), 1);
    }
}
