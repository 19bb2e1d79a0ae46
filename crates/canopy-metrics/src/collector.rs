//! Metrics collector: tracks per-dimension invocation and error counts.
//!
//! Uses atomics for the counters so the serving path never waits on a
//! drain; the map of dimensions sits behind an async `RwLock` that is only
//! taken for writing when a dimension is seen for the first time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use canopy_core::AlarmDimension;

/// Counts for one dimension over some interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub invocations: u64,
    pub errors: u64,
}

impl WindowCounts {
    /// Errors as a fraction of invocations (0.0 when idle).
    pub fn error_rate(&self) -> f64 {
        if self.invocations == 0 {
            return 0.0;
        }
        self.errors as f64 / self.invocations as f64
    }
}

/// Per-dimension counter bucket.
struct DimensionCounters {
    /// Invocations since the last window drain.
    window_invocations: AtomicU64,
    /// Errors since the last window drain.
    window_errors: AtomicU64,
    total_invocations: AtomicU64,
    total_errors: AtomicU64,
}

impl DimensionCounters {
    fn new() -> Self {
        Self {
            window_invocations: AtomicU64::new(0),
            window_errors: AtomicU64::new(0),
            total_invocations: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    fn record(&self, is_error: bool) {
        self.window_invocations.fetch_add(1, Ordering::Relaxed);
        self.total_invocations.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.window_errors.fetch_add(1, Ordering::Relaxed);
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and reset the window counters.
    fn drain(&self) -> WindowCounts {
        WindowCounts {
            invocations: self.window_invocations.swap(0, Ordering::Relaxed),
            errors: self.window_errors.swap(0, Ordering::Relaxed),
        }
    }

    fn totals(&self) -> WindowCounts {
        WindowCounts {
            invocations: self.total_invocations.load(Ordering::Relaxed),
            errors: self.total_errors.load(Ordering::Relaxed),
        }
    }
}

/// Collects invocation metrics across every compute dimension.
///
/// Cloning shares the underlying counters.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<RwLock<HashMap<AlarmDimension, Arc<DimensionCounters>>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one compute invocation for the version that executed it.
    pub async fn record_invocation(&self, dimension: &AlarmDimension, is_error: bool) {
        {
            let counters = self.counters.read().await;
            if let Some(c) = counters.get(dimension) {
                c.record(is_error);
                return;
            }
        }

        let mut counters = self.counters.write().await;
        counters
            .entry(dimension.clone())
            .or_insert_with(|| {
                debug!(%dimension, "tracking new metrics dimension");
                Arc::new(DimensionCounters::new())
            })
            .record(is_error);
    }

    /// Counts since the previous drain of this dimension; resets the window.
    pub async fn drain_window(&self, dimension: &AlarmDimension) -> WindowCounts {
        let counters = self.counters.read().await;
        counters
            .get(dimension)
            .map(|c| c.drain())
            .unwrap_or_default()
    }

    /// Cumulative counts for one dimension.
    pub async fn totals(&self, dimension: &AlarmDimension) -> WindowCounts {
        let counters = self.counters.read().await;
        counters
            .get(dimension)
            .map(|c| c.totals())
            .unwrap_or_default()
    }

    /// Cumulative counts for every dimension seen so far, sorted.
    pub async fn all_totals(&self) -> Vec<(AlarmDimension, WindowCounts)> {
        let counters = self.counters.read().await;
        let mut all: Vec<_> = counters
            .iter()
            .map(|(d, c)| (d.clone(), c.totals()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
