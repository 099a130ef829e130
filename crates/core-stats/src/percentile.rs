//! Percentile tracking over a sliding time window
//!
//! [`PercentileTracker`] keeps recent observations in a
//! [`SlidingWindowStore`] and answers percentile queries over whatever is
//! still inside the window. Queries evict first, so a tracker that has not
//! seen an update for longer than its window reports "no data".
//!
//! Percentiles use linear interpolation between closest ranks: for `n`
//! sorted values the rank of percentile `p` is `p / 100 * (n - 1)`, and a
//! fractional rank blends the two neighbouring values.
//!
//! # Example
//!
//! ```
//! use orbit_core_stats::percentile::{percentile_of, PercentileTracker};
//! use std::time::Duration;
//!
//! let values: Vec<f64> = (0..=10).map(f64::from).collect();
//! assert_eq!(percentile_of(90.0, &values), Some(9.0));
//! assert_eq!(percentile_of(95.0, &values), Some(9.5));
//!
//! let tracker = PercentileTracker::new(Duration::from_secs(60));
//! assert_eq!(tracker.percentile(50.0), None); // no data yet
//! tracker.update(12.0);
//! assert_eq!(tracker.percentile(50.0), Some(12.0));
//! ```

use crate::sliding_window::SlidingWindowStore;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Compute the `p`-th percentile of `values`.
///
/// `p` is clamped to `[0, 100]`. Returns `None` for an empty slice. The
/// input does not need to be sorted and is not modified.
pub fn percentile_of(p: f64, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(interpolate(p, &sorted))
}

/// Percentile over an already sorted, non-empty slice
fn interpolate(p: f64, sorted: &[f64]) -> f64 {
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = p / 100.0 * (sorted.len() - 1) as f64;

    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }

    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Thread-safe percentile tracker over a time window.
#[derive(Debug)]
pub struct PercentileTracker {
    store: Mutex<SlidingWindowStore<f64>>,
}

impl PercentileTracker {
    /// Create a tracker retaining observations for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            store: Mutex::new(SlidingWindowStore::new(window)),
        }
    }

    /// Retention window
    pub fn window(&self) -> Duration {
        self.lock().window()
    }

    /// Record an observation now
    pub fn update(&self, value: f64) {
        self.update_at(value, Instant::now());
    }

    /// Record an observation at `now`, evicting expired ones
    pub fn update_at(&self, value: f64, now: Instant) {
        self.lock().update_at(value, now);
    }

    /// `p`-th percentile of the observations currently in the window
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentile_at(p, Instant::now())
    }

    /// Same as [`percentile`](Self::percentile) with an explicit clock reading
    pub fn percentile_at(&self, p: f64, now: Instant) -> Option<f64> {
        let sorted = self.sorted_values(now);
        (!sorted.is_empty()).then(|| interpolate(p, &sorted))
    }

    /// Several percentiles from one consistent view of the window.
    ///
    /// Returns an empty vector when there is no data.
    pub fn snapshot_at(&self, percentiles: &[f64], now: Instant) -> Vec<(f64, f64)> {
        let sorted = self.sorted_values(now);
        if sorted.is_empty() {
            return Vec::new();
        }
        percentiles
            .iter()
            .map(|&p| (p, interpolate(p, &sorted)))
            .collect()
    }

    /// Number of observations currently in the window
    pub fn count_at(&self, now: Instant) -> usize {
        let mut store = self.lock();
        store.evict(now);
        store.len()
    }

    /// Number of observations currently in the window
    pub fn count(&self) -> usize {
        self.count_at(Instant::now())
    }

    fn sorted_values(&self, now: Instant) -> Vec<f64> {
        let mut values: Vec<f64> = {
            let mut store = self.lock();
            store.evict(now);
            store.values().copied().collect()
        };
        values.sort_by(f64::total_cmp);
        values
    }

    fn lock(&self) -> MutexGuard<'_, SlidingWindowStore<f64>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
