//! Sliding Window Store: time-bounded retention of timestamped samples
//!
//! Every insertion evicts samples that fell out of the window, and readers
//! can call [`SlidingWindowStore::evict`] before looking at the data. A store
//! that stops receiving updates therefore reports on an empty set once the
//! window has passed, without any background sweeper.
//!
//! The store is a plain `&mut self` structure. Owners that share it between
//! threads put it behind their own lock (see `PercentileTracker`).
//!
//! # Example
//!
//! ```
//! use orbit_core_stats::sliding_window::SlidingWindowStore;
//! use std::time::{Duration, Instant};
//!
//! let mut store = SlidingWindowStore::new(Duration::from_secs(10));
//! let start = Instant::now();
//!
//! store.update_at(1.0, start);
//! store.update_at(2.0, start + Duration::from_secs(5));
//! assert_eq!(store.len(), 2);
//!
//! // Eleven seconds later the first sample has aged out
//! store.evict(start + Duration::from_secs(11));
//! assert_eq!(store.values().collect::<Vec<_>>(), vec![&2.0]);
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A single timestamped observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<T> {
    /// When the observation was recorded
    pub at: Instant,
    /// The observed value
    pub value: T,
}

/// Time-ordered store that retains samples for a fixed window.
#[derive(Debug, Clone)]
pub struct SlidingWindowStore<T> {
    window: Duration,
    samples: VecDeque<Sample<T>>,
}

impl<T> SlidingWindowStore<T> {
    /// Create an empty store retaining samples for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Retention window, fixed at construction
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `value` now and evict expired samples
    pub fn update(&mut self, value: T) {
        self.update_at(value, Instant::now());
    }

    /// Record `value` at `now` and evict samples older than `now - window`.
    ///
    /// Samples stay sorted by timestamp. A timestamp older than the newest
    /// retained sample is inserted in order rather than appended; equal
    /// timestamps keep no particular order.
    pub fn update_at(&mut self, value: T, now: Instant) {
        let sample = Sample { at: now, value };
        match self.samples.back() {
            Some(last) if last.at > now => {
                let idx = self.samples.partition_point(|s| s.at <= now);
                self.samples.insert(idx, sample);
            }
            _ => self.samples.push_back(sample),
        }
        self.evict(now);
    }

    /// Drop every sample older than `now - window`
    pub fn evict(&mut self, now: Instant) {
        // Before the window has fully elapsed since the clock origin there
        // is nothing old enough to drop.
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };

        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Retained values, oldest first
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.samples.iter().map(|s| &s.value)
    }

    /// Retained samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Sample<T>> + '_ {
        self.samples.iter()
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the newest retained sample
    pub fn newest(&self) -> Option<Instant> {
        self.samples.back().map(|s| s.at)
    }

    /// Drop all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
