use std::collections::VecDeque;
use std::sync::Arc;

use crate::telemetry::{Sample, TelemetryPoint};

use super::CacheRead;

/// What happened to a point handed to [`DeviceWindow::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Newest point so far; appended at the back.
    Appended,
    /// Out of order but still inside the horizon; inserted in place.
    Inserted,
    /// Older than `newest - horizon`; discarded.
    Late,
}

/// Time-ordered points of one device, bounded to `[newest - horizon, newest]`.
///
/// Eviction is lazy: it happens on insert only, by popping from the front,
/// so the amortised cost of a push is O(1) for in-order data.
#[derive(Debug)]
pub struct DeviceWindow {
    points: VecDeque<Arc<TelemetryPoint>>,
    horizon_ms: i64,
    max_points: Option<usize>,
    newest_ms: Option<i64>,
}

impl DeviceWindow {
    pub fn new(horizon_ms: i64, max_points: Option<usize>) -> Self {
        Self {
            points: VecDeque::new(),
            horizon_ms,
            max_points,
            newest_ms: None,
        }
    }

    /// Insert a point and evict what fell out of the horizon. Returns the
    /// outcome and the number of evicted points.
    pub fn push(&mut self, point: Arc<TelemetryPoint>) -> (PushOutcome, usize) {
        let ts = point.ts_ms;
        let outcome = match self.newest_ms {
            Some(newest) if ts < newest => {
                if ts < newest.saturating_sub(self.horizon_ms) {
                    return (PushOutcome::Late, 0);
                }
                // Equal timestamps keep arrival order.
                let idx = self.points.partition_point(|p| p.ts_ms <= ts);
                self.points.insert(idx, point);
                PushOutcome::Inserted
            }
            _ => {
                self.newest_ms = Some(ts);
                self.points.push_back(point);
                PushOutcome::Appended
            }
        };
        (outcome, self.evict())
    }

    fn evict(&mut self) -> usize {
        let Some(newest) = self.newest_ms else {
            return 0;
        };
        let cutoff = newest.saturating_sub(self.horizon_ms);
        let mut evicted = 0;
        while let Some(front) = self.points.front() {
            let over_cap = self.max_points.is_some_and(|max| self.points.len() > max);
            if front.ts_ms < cutoff || over_cap {
                self.points.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// Points with `from <= ts <= to`, or a miss when `from` precedes the
    /// oldest retained point.
    pub fn query(&self, from_ms: i64, to_ms: i64) -> CacheRead<Vec<Arc<TelemetryPoint>>> {
        match self.points.front() {
            Some(front) if from_ms >= front.ts_ms => CacheRead::Hit(
                self.range(from_ms, to_ms).cloned().collect(),
            ),
            _ => CacheRead::Miss,
        }
    }

    /// Like [`query`](Self::query) but projected to one variable. Points
    /// that do not carry the variable are skipped.
    pub fn samples(&self, variable: &str, from_ms: i64, to_ms: i64) -> CacheRead<Vec<Sample>> {
        match self.points.front() {
            Some(front) if from_ms >= front.ts_ms => CacheRead::Hit(
                self.range(from_ms, to_ms)
                    .filter_map(|p| p.value(variable).map(|v| Sample::new(p.ts_ms, v)))
                    .collect(),
            ),
            _ => CacheRead::Miss,
        }
    }

    fn range(&self, from_ms: i64, to_ms: i64) -> impl Iterator<Item = &Arc<TelemetryPoint>> {
        let start = self.points.partition_point(|p| p.ts_ms < from_ms);
        self.points
            .range(start..)
            .take_while(move |p| p.ts_ms <= to_ms)
    }

    pub fn latest(&self) -> Option<&Arc<TelemetryPoint>> {
        self.points.back()
    }

    /// Most recent sample of `variable`, scanning back from the newest point.
    pub fn latest_value(&self, variable: &str) -> Option<Sample> {
        self.points
            .iter()
            .rev()
            .find_map(|p| p.value(variable).map(|v| Sample::new(p.ts_ms, v)))
    }

    pub fn newest_ms(&self) -> Option<i64> {
        self.newest_ms
    }

    pub fn oldest_ms(&self) -> Option<i64> {
        self.points.front().map(|p| p.ts_ms)
    }

    pub fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
