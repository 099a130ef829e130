//! Latency and throughput observation for a single dependency
//!
//! A [`PerformanceMonitor`] never vetoes anything. It times every call it
//! wraps and feeds the outcome into a request counter, two moving averages
//! (successful and failed call latency), and a latency percentile tracker.

use crate::flow_meter::{FlowMeter, FlowRates};
use crate::request_counter::{RequestCounter, RequestCounts};
use crate::wrapper::{Call, CallResult, ServiceWrapper};
use async_trait::async_trait;
use orbit_core_stats::{MovingAverage, PercentileTracker};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Percentiles reported by [`PerformanceMonitor::snapshot`]
pub const SNAPSHOT_PERCENTILES: [f64; 3] = [50.0, 95.0, 99.0];

/// Windows used by a [`PerformanceMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceMonitorConfig {
    /// Decay window of the latency moving averages
    pub latency_window: Duration,
    /// Retention window of the latency percentile tracker
    pub percentile_window: Duration,
}

impl Default for PerformanceMonitorConfig {
    fn default() -> Self {
        Self {
            latency_window: Duration::from_secs(60),
            percentile_window: Duration::from_secs(300),
        }
    }
}

/// Point-in-time view of a monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub name: String,
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    /// Requests per second since the previous snapshot
    pub total_rate: f64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub avg_success_latency_ms: f64,
    pub avg_failure_latency_ms: f64,
    /// `(percentile, latency_ms)` pairs; empty when no call is retained
    pub latency_percentiles: Vec<(f64, f64)>,
    /// Time since the last successful call
    #[serde(skip)]
    pub since_last_success: Option<Duration>,
    /// Time since the last failed call
    #[serde(skip)]
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug, Default)]
struct LastOutcomes {
    success: Option<Instant>,
    failure: Option<Instant>,
}

/// Wrapper collecting latency and throughput statistics
#[derive(Debug)]
pub struct PerformanceMonitor {
    name: String,
    counter: Arc<RequestCounter>,
    flow: FlowMeter,
    success_latency: MovingAverage,
    failure_latency: MovingAverage,
    latencies: PercentileTracker,
    last: Mutex<LastOutcomes>,
}

impl PerformanceMonitor {
    pub fn new(name: impl Into<String>, config: PerformanceMonitorConfig) -> Self {
        let counter = Arc::new(RequestCounter::new());
        Self {
            name: name.into(),
            flow: FlowMeter::new(Arc::clone(&counter)),
            counter,
            success_latency: MovingAverage::new(config.latency_window),
            failure_latency: MovingAverage::new(config.latency_window),
            latencies: PercentileTracker::new(config.percentile_window),
            last: Mutex::new(LastOutcomes::default()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, PerformanceMonitorConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Success/failure counts
    pub fn request_counts(&self) -> RequestCounts {
        self.counter.sample()
    }

    /// Moving average of successful call latency, in milliseconds
    pub fn avg_success_latency_ms(&self) -> f64 {
        self.success_latency.average()
    }

    /// Moving average of failed call latency, in milliseconds
    pub fn avg_failure_latency_ms(&self) -> f64 {
        self.failure_latency.average()
    }

    /// Latency percentile over the retained window, in milliseconds
    pub fn latency_percentile(&self, p: f64) -> Option<f64> {
        self.latencies.percentile_at(p, Instant::now().into_std())
    }

    pub fn last_success_at(&self) -> Option<Instant> {
        self.lock().success
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.lock().failure
    }

    /// Request rates since the previous call to this method or [`Self::snapshot`]
    pub fn flow_rates(&self) -> FlowRates {
        self.flow.sample()
    }

    /// Collect every statistic at once. Advances the flow meter.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let now = Instant::now();
        let counts = self.counter.sample();
        let rates = self.flow.sample_at(now);
        let last = self.lock();

        PerformanceSnapshot {
            name: self.name.clone(),
            total: counts.total,
            success: counts.success,
            failure: counts.failure,
            total_rate: rates.total,
            success_rate: rates.success,
            failure_rate: rates.failure,
            avg_success_latency_ms: self.success_latency.average(),
            avg_failure_latency_ms: self.failure_latency.average(),
            latency_percentiles: self
                .latencies
                .snapshot_at(&SNAPSHOT_PERCENTILES, now.into_std()),
            since_last_success: last.success.map(|at| now.saturating_duration_since(at)),
            since_last_failure: last.failure.map(|at| now.saturating_duration_since(at)),
        }
    }

    fn record(&self, succeeded: bool, started: Instant, finished: Instant) {
        let latency_ms = finished.saturating_duration_since(started).as_secs_f64() * 1000.0;
        let at = finished.into_std();

        self.latencies.update_at(latency_ms, at);
        if succeeded {
            self.counter.record_success();
            self.success_latency.update_at(latency_ms, at);
            self.lock().success = Some(finished);
        } else {
            self.counter.record_failure();
            self.failure_latency.update_at(latency_ms, at);
            self.lock().failure = Some(finished);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LastOutcomes> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ServiceWrapper for PerformanceMonitor {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        let started = Instant::now();
        let result = call.await;
        self.record(result.is_ok(), started, Instant::now());
        result
    }
}
