//! Rolling in-memory telemetry cache.
//!
//! Each device owns an independently locked [`DeviceWindow`]. The outer map
//! lock is held only to look up or create a segment, never while a window
//! is read or written, so ingestion for one device does not wait on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tf_config::{CacheConfig, DeviceConfig};

use crate::telemetry::{Sample, TelemetryPoint};

mod device_window;

pub use device_window::{DeviceWindow, PushOutcome};


/// Result of a cache read. A `Miss` means the cache cannot vouch for the
/// whole requested range and the caller must go to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
    Hit(T),
    Miss,
}

impl<T> CacheRead<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            CacheRead::Hit(v) => Some(v),
            CacheRead::Miss => None,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheRead::Miss)
    }
}

// ---------------------------------------------------------------------------
// CachePolicy
// ---------------------------------------------------------------------------

/// Per-device retention, resolved once from the device directory.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    default_horizon_ms: i64,
    max_points: Option<usize>,
    device_horizons: HashMap<String, i64>,
}

impl CachePolicy {
    pub fn new(default_horizon_ms: i64, max_points: Option<usize>) -> Self {
        Self {
            default_horizon_ms,
            max_points,
            device_horizons: HashMap::new(),
        }
    }

    pub fn from_config(cache: &CacheConfig, devices: &[DeviceConfig]) -> Self {
        let device_horizons = devices
            .iter()
            .map(|d| {
                let horizon = cache.horizon_for(d.class.as_deref());
                (d.id.clone(), horizon.as_millis_i64())
            })
            .collect();
        Self {
            default_horizon_ms: cache.horizon.as_millis_i64(),
            max_points: cache.max_points,
            device_horizons,
        }
    }

    pub fn with_device_horizon(mut self, device_id: impl Into<String>, horizon_ms: i64) -> Self {
        self.device_horizons.insert(device_id.into(), horizon_ms);
        self
    }

    pub fn horizon_ms(&self, device_id: &str) -> i64 {
        self.device_horizons
            .get(device_id)
            .copied()
            .unwrap_or(self.default_horizon_ms)
    }
}

// ---------------------------------------------------------------------------
// RollingCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub devices: usize,
    pub points: usize,
    pub accepted: u64,
    pub late_dropped: u64,
    pub evicted: u64,
}

pub struct RollingCache {
    policy: CachePolicy,
    segments: RwLock<HashMap<String, Arc<RwLock<DeviceWindow>>>>,
    accepted: AtomicU64,
    late_dropped: AtomicU64,
    evicted: AtomicU64,
}

impl std::fmt::Debug for RollingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let devices = self.segments.read().expect("cache map lock poisoned").len();
        f.debug_struct("RollingCache")
            .field("policy", &self.policy)
            .field("devices", &devices)
            .finish()
    }
}

impl RollingCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            segments: RwLock::new(HashMap::new()),
            accepted: AtomicU64::new(0),
            late_dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn segment(&self, device_id: &str) -> Option<Arc<RwLock<DeviceWindow>>> {
        self.segments
            .read()
            .expect("cache map lock poisoned")
            .get(device_id)
            .cloned()
    }

    fn segment_or_create(&self, device_id: &str) -> Arc<RwLock<DeviceWindow>> {
        if let Some(seg) = self.segment(device_id) {
            return seg;
        }
        let mut map = self.segments.write().expect("cache map lock poisoned");
        map.entry(device_id.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(DeviceWindow::new(
                    self.policy.horizon_ms(device_id),
                    self.policy.max_points,
                )))
            })
            .clone()
    }

    /// Append a point to its device's window, evicting expired points.
    pub fn put(&self, point: impl Into<Arc<TelemetryPoint>>) -> PushOutcome {
        let point = point.into();
        let seg = self.segment_or_create(&point.device_id);
        let (outcome, evicted) = seg.write().expect("window lock poisoned").push(point);
        if outcome == PushOutcome::Late {
            self.late_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        }
        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        outcome
    }

    /// Ascending points of `device_id` within `[from_ms, to_ms]`.
    pub fn query(
        &self,
        device_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> CacheRead<Vec<Arc<TelemetryPoint>>> {
        match self.segment(device_id) {
            Some(seg) => seg.read().expect("window lock poisoned").query(from_ms, to_ms),
            None => CacheRead::Miss,
        }
    }

    /// Ascending samples of one variable within `[from_ms, to_ms]`.
    pub fn samples(
        &self,
        device_id: &str,
        variable: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> CacheRead<Vec<Sample>> {
        match self.segment(device_id) {
            Some(seg) => seg
                .read()
                .expect("window lock poisoned")
                .samples(variable, from_ms, to_ms),
            None => CacheRead::Miss,
        }
    }

    pub fn latest(&self, device_id: &str) -> Option<Arc<TelemetryPoint>> {
        let seg = self.segment(device_id)?;
        let win = seg.read().expect("window lock poisoned");
        win.latest().cloned()
    }

    pub fn latest_value(&self, device_id: &str, variable: &str) -> Option<Sample> {
        let seg = self.segment(device_id)?;
        let win = seg.read().expect("window lock poisoned");
        win.latest_value(variable)
    }

    /// Timestamp of the newest point ever accepted for the device.
    pub fn last_seen(&self, device_id: &str) -> Option<i64> {
        let seg = self.segment(device_id)?;
        let win = seg.read().expect("window lock poisoned");
        win.newest_ms()
    }

    pub fn horizon_ms(&self, device_id: &str) -> i64 {
        self.policy.horizon_ms(device_id)
    }

    /// Drop a device's window entirely.
    pub fn remove(&self, device_id: &str) -> bool {
        self.segments
            .write()
            .expect("cache map lock poisoned")
            .remove(device_id)
            .is_some()
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .segments
            .read()
            .expect("cache map lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> CacheStats {
        let segments: Vec<_> = self
            .segments
            .read()
            .expect("cache map lock poisoned")
            .values()
            .cloned()
            .collect();
        let points = segments
            .iter()
            .map(|s| s.read().expect("window lock poisoned").len())
            .sum();
        CacheStats {
            devices: segments.len(),
            points,
            accepted: self.accepted.load(Ordering::Relaxed),
            late_dropped: self.late_dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
