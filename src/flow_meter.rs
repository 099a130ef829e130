//! Request rates derived from a [`RequestCounter`]
//!
//! Each call to [`FlowMeter::sample`] compares the counter against the
//! previous sample and reports events per second over the elapsed interval.
//! The very first sample has nothing to compare against and reports zeros.

use crate::request_counter::{RequestCounter, RequestCounts};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

/// Per-second rates between two samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowRates {
    /// Completed calls per second
    pub total: f64,
    /// Successful calls per second
    pub success: f64,
    /// Failed calls per second
    pub failure: f64,
}

#[derive(Debug)]
struct PreviousSample {
    counts: RequestCounts,
    at: Instant,
}

/// Turns counter deltas into rates.
///
/// Sampling is serialized internally: concurrent callers each see a unique
/// previous sample and advance it in turn.
#[derive(Debug)]
pub struct FlowMeter {
    counter: Arc<RequestCounter>,
    previous: Mutex<Option<PreviousSample>>,
}

impl FlowMeter {
    /// Create a meter over `counter`
    pub fn new(counter: Arc<RequestCounter>) -> Self {
        Self {
            counter,
            previous: Mutex::new(None),
        }
    }

    /// The counter being measured
    pub fn counter(&self) -> &Arc<RequestCounter> {
        &self.counter
    }

    /// Rates since the previous sample
    pub fn sample(&self) -> FlowRates {
        self.sample_at(Instant::now())
    }

    /// Rates since the previous sample, taking `now` as the current time.
    ///
    /// Returns zero rates on the first call and whenever no time has passed
    /// since the previous sample. A zero-elapsed sample keeps the previous
    /// snapshot, so its counts show up in the next rate instead.
    pub fn sample_at(&self, now: Instant) -> FlowRates {
        let mut previous = self
            .previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.counter.sample();

        let rates = match previous.as_ref() {
            Some(prev) => {
                let elapsed_ms = now.saturating_duration_since(prev.at).as_secs_f64() * 1000.0;
                if elapsed_ms <= 0.0 {
                    return FlowRates::default();
                }
                FlowRates {
                    total: per_second(current.total, prev.counts.total, elapsed_ms),
                    success: per_second(current.success, prev.counts.success, elapsed_ms),
                    failure: per_second(current.failure, prev.counts.failure, elapsed_ms),
                }
            }
            None => FlowRates::default(),
        };

        *previous = Some(PreviousSample {
            counts: current,
            at: now,
        });
        rates
    }
}

fn per_second(current: u64, previous: u64, elapsed_ms: f64) -> f64 {
    // Counters only go backwards after a reset; report that as no traffic
    current.saturating_sub(previous) as f64 / elapsed_ms * 1000.0
}
