//! Request counting wrapper
//!
//! Counts every call that passes through it as a success or a failure.
//! Increments and reads share one lock, so a [`RequestCounts`] sample always
//! satisfies `total == success + failure`.

use crate::wrapper::{Call, CallResult, ServiceWrapper};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Consistent snapshot of a [`RequestCounter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    /// Calls completed
    pub total: u64,
    /// Calls that returned normally
    pub success: u64,
    /// Calls that failed, including vetoes from inner wrappers
    pub failure: u64,
}

/// Thread-safe success/failure counter.
///
/// # Example
/// ```no_run
/// use orbit_guard::{RequestCounter, ServiceWrapperExt};
///
/// # async fn example() {
/// let counter = RequestCounter::new();
/// let _ = counter.invoke(|| async { Ok(1) }).await;
///
/// let counts = counter.sample();
/// assert_eq!(counts.total, counts.success + counts.failure);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RequestCounter {
    counts: Mutex<RequestCounts>,
}

impl RequestCounter {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counts
    pub fn sample(&self) -> RequestCounts {
        *self.lock()
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut counts = self.lock();
        counts.total += 1;
        counts.success += 1;
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut counts = self.lock();
        counts.total += 1;
        counts.failure += 1;
    }

    /// Zero all counters
    pub fn reset(&self) {
        *self.lock() = RequestCounts::default();
    }

    fn lock(&self) -> MutexGuard<'_, RequestCounts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ServiceWrapper for RequestCounter {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        let result = call.await;
        match result {
            Ok(()) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }
}
