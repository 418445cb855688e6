//! Historical sample access for windowed functions.
//!
//! The evaluator is synchronous, while store reads are not. Windowed calls
//! are therefore loaded up front by [`HistoryLoader::prefetch`] and served
//! to the evaluator from a [`PrefetchedHistory`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheRead, RollingCache};
use crate::error::EvalError;
use crate::store::SampleStore;
use crate::telemetry::Sample;
use crate::time_window::TimeWindow;

/// Synchronous read of one variable's samples over `[now - window, now]`.
pub trait HistoryAccessor: Send + Sync {
    fn samples(
        &self,
        device_id: &str,
        variable: &str,
        window: TimeWindow,
        now_ms: i64,
    ) -> Result<Vec<Sample>, EvalError>;
}

/// Cache-only access: a miss cannot be served and is reported as an
/// unavailable store.
impl HistoryAccessor for RollingCache {
    fn samples(
        &self,
        device_id: &str,
        variable: &str,
        window: TimeWindow,
        now_ms: i64,
    ) -> Result<Vec<Sample>, EvalError> {
        let from = now_ms.saturating_sub(window.as_millis());
        match RollingCache::samples(self, device_id, variable, from, now_ms) {
            CacheRead::Hit(samples) => Ok(samples),
            CacheRead::Miss => Err(EvalError::StoreUnavailable(format!(
                "cache miss for {device_id}/{variable} over {window} and no store configured"
            ))),
        }
    }
}

/// One windowed read an expression will perform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryRequest {
    pub variable: String,
    pub window: TimeWindow,
}

// ---------------------------------------------------------------------------
// HistoryLoader
// ---------------------------------------------------------------------------

/// Read-through loader: cache first, backing store on a miss or when the
/// window is longer than the device's cache horizon.
#[derive(Clone)]
pub struct HistoryLoader {
    cache: Arc<RollingCache>,
    store: Option<Arc<dyn SampleStore>>,
    timeout: Duration,
}

impl HistoryLoader {
    pub fn new(
        cache: Arc<RollingCache>,
        store: Option<Arc<dyn SampleStore>>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<RollingCache> {
        &self.cache
    }

    pub async fn load(
        &self,
        device_id: &str,
        variable: &str,
        window: TimeWindow,
        now_ms: i64,
    ) -> Result<Vec<Sample>, EvalError> {
        let from = now_ms.saturating_sub(window.as_millis());
        if window.as_millis() <= self.cache.horizon_ms(device_id)
            && let CacheRead::Hit(samples) = self.cache.samples(device_id, variable, from, now_ms)
        {
            return Ok(samples);
        }

        let Some(store) = &self.store else {
            return Err(EvalError::StoreUnavailable(format!(
                "cache miss for {device_id}/{variable} over {window} and no store configured"
            )));
        };
        let fetched = tokio::time::timeout(
            self.timeout,
            store.fetch_samples(device_id, variable, from, now_ms),
        )
        .await;
        match fetched {
            Ok(Ok(mut samples)) => {
                samples.retain(|s| s.ts_ms >= from && s.ts_ms <= now_ms);
                samples.sort_by_key(|s| s.ts_ms);
                Ok(samples)
            }
            Ok(Err(e)) => Err(EvalError::StoreUnavailable(format!(
                "fetch {device_id}/{variable}: {e}"
            ))),
            Err(_) => Err(EvalError::StoreUnavailable(format!(
                "fetch {device_id}/{variable} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Load every requested range for one device at `now_ms`.
    pub async fn prefetch(
        &self,
        requests: &[HistoryRequest],
        device_id: &str,
        now_ms: i64,
    ) -> PrefetchedHistory {
        let mut entries = HashMap::with_capacity(requests.len());
        for req in requests {
            if entries.contains_key(req) {
                continue;
            }
            let loaded = self.load(device_id, &req.variable, req.window, now_ms).await;
            entries.insert(req.clone(), loaded);
        }
        PrefetchedHistory {
            device_id: device_id.to_string(),
            now_ms,
            entries,
            cache: Arc::clone(&self.cache),
        }
    }
}

// ---------------------------------------------------------------------------
// PrefetchedHistory
// ---------------------------------------------------------------------------

/// Results of a prefetch, keyed by request. Load failures are kept and
/// returned only when the corresponding call is evaluated.
pub struct PrefetchedHistory {
    device_id: String,
    now_ms: i64,
    entries: HashMap<HistoryRequest, Result<Vec<Sample>, EvalError>>,
    cache: Arc<RollingCache>,
}

impl PrefetchedHistory {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistoryAccessor for PrefetchedHistory {
    fn samples(
        &self,
        device_id: &str,
        variable: &str,
        window: TimeWindow,
        now_ms: i64,
    ) -> Result<Vec<Sample>, EvalError> {
        if device_id == self.device_id && now_ms == self.now_ms {
            let key = HistoryRequest {
                variable: variable.to_string(),
                window,
            };
            if let Some(entry) = self.entries.get(&key) {
                return entry.clone();
            }
        }
        HistoryAccessor::samples(self.cache.as_ref(), device_id, variable, window, now_ms)
    }
}
