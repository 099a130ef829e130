//! Time-decayed exponential moving average
//!
//! The decay is driven by wall-clock time between updates, not by the number
//! of samples. After an update separated from the previous one by `dt`:
//!
//! ```text
//! coeff   = exp(-dt / window)
//! average = (1 - coeff) * sample + coeff * average
//! ```
//!
//! A long gap makes the new sample dominate; back-to-back updates barely
//! move the average. Irregular sampling intervals are expected input.
//!
//! # Example
//!
//! ```
//! use orbit_core_stats::moving_average::MovingAverage;
//! use std::time::{Duration, Instant};
//!
//! let avg = MovingAverage::new(Duration::from_secs(60));
//! let t0 = Instant::now();
//!
//! avg.update_at(100.0, t0);
//! assert_eq!(avg.average(), 100.0);
//!
//! // One window later the old value keeps exp(-1) of its weight
//! avg.update_at(0.0, t0 + Duration::from_secs(60));
//! assert!((avg.average() - 100.0 * (-1.0f64).exp()).abs() < 1e-9);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct AverageState {
    average: f64,
    last_update: Option<Instant>,
}

/// Exponential moving average over time. Safe to share between threads.
#[derive(Debug)]
pub struct MovingAverage {
    window: Duration,
    state: Mutex<AverageState>,
}

impl MovingAverage {
    /// Create an average whose history decays by `1/e` every `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(AverageState::default()),
        }
    }

    /// Decay window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Fold in a sample observed now
    pub fn update(&self, sample: f64) {
        self.update_at(sample, Instant::now());
    }

    /// Fold in a sample observed at `now`.
    ///
    /// The first sample becomes the average verbatim. A timestamp earlier
    /// than the previous update counts as zero elapsed time and leaves the
    /// stored clock at the newest timestamp seen.
    pub fn update_at(&self, sample: f64, now: Instant) {
        let mut state = self.lock();

        let (average, newest) = match state.last_update {
            None => (sample, now),
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                let coeff = self.decay(elapsed);
                ((1.0 - coeff) * sample + coeff * state.average, last.max(now))
            }
        };
        state.average = average;
        state.last_update = Some(newest);
    }

    /// Last computed average, `0.0` before the first update
    pub fn average(&self) -> f64 {
        self.lock().average
    }

    /// When the average was last updated
    pub fn last_update(&self) -> Option<Instant> {
        self.lock().last_update
    }

    /// Weight kept by the previous average after `elapsed`
    fn decay(&self, elapsed: Duration) -> f64 {
        if self.window.is_zero() {
            // Zero window: history carries no weight at all
            return 0.0;
        }
        (-elapsed.as_secs_f64() / self.window.as_secs_f64()).exp()
    }

    fn lock(&self) -> MutexGuard<'_, AverageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
