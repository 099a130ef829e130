//! Admission control for preventing service overload
//!
//! [`ConstantFlowRegulator`] admits at most `max_requests` calls per fixed
//! window. The first admission opens a window; once `period` has elapsed the
//! next call opens a fresh one. Calls over the budget are vetoed with
//! [`FlowRateExceededError`] without running the operation.
//!
//! With the `governor-impl` feature, [`governor_impl::GovernorFlowRegulator`]
//! offers the same contract backed by governor's GCRA token bucket.

use crate::error::{FlowRateExceededError, ServiceError};
use crate::wrapper::{Call, CallResult, ErrorMapper, ServiceWrapper};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type RejectionMapper = Arc<dyn ErrorMapper<ConstantFlowRegulator, FlowRateExceededError>>;

#[derive(Debug, Default)]
struct WindowState {
    window_start: Option<Instant>,
    in_window: u32,
    admitted: u64,
    rejected: u64,
}

/// Fixed-window admission regulator
///
/// # Example
/// ```no_run
/// use orbit_guard::{ConstantFlowRegulator, ServiceError, ServiceWrapperExt};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ServiceError> {
///     // Allow 100 requests per second
///     let regulator = ConstantFlowRegulator::per_second("search", 100);
///
///     regulator.invoke(|| async {
///         // Your operation here
///         Ok(42)
///     }).await?;
///
///     Ok(())
/// }
/// ```
pub struct ConstantFlowRegulator {
    name: String,
    /// Maximum requests admitted per period, 0 for unlimited
    max_requests: u32,
    /// Length of one admission window
    period: Duration,
    state: Mutex<WindowState>,
    error_mapper: Option<RejectionMapper>,
}

impl ConstantFlowRegulator {
    /// Create a new regulator
    ///
    /// # Arguments
    /// * `name` - Identifies the regulator in vetoes and logs
    /// * `max_requests` - Maximum number of requests admitted per period (0 = unlimited)
    /// * `period` - Length of one admission window
    ///
    /// # Example
    /// ```
    /// use orbit_guard::ConstantFlowRegulator;
    /// use std::time::Duration;
    ///
    /// // 100 requests per second
    /// let regulator = ConstantFlowRegulator::new("search", 100, Duration::from_secs(1));
    /// ```
    pub fn new(name: impl Into<String>, max_requests: u32, period: Duration) -> Self {
        Self {
            name: name.into(),
            max_requests,
            period,
            state: Mutex::new(WindowState::default()),
            error_mapper: None,
        }
    }

    /// Create a regulator with requests per second
    pub fn per_second(name: impl Into<String>, requests_per_second: u32) -> Self {
        Self::new(name, requests_per_second, Duration::from_secs(1))
    }

    /// Create a regulator with requests per minute
    pub fn per_minute(name: impl Into<String>, requests_per_minute: u32) -> Self {
        Self::new(name, requests_per_minute, Duration::from_secs(60))
    }

    /// Create a regulator with requests per hour
    pub fn per_hour(name: impl Into<String>, requests_per_hour: u32) -> Self {
        Self::new(name, requests_per_hour, Duration::from_secs(3600))
    }

    /// Translate rejections with `mapper`
    #[must_use]
    pub fn with_error_mapper<M>(mut self, mapper: M) -> Self
    where
        M: ErrorMapper<ConstantFlowRegulator, FlowRateExceededError> + 'static,
    {
        self.error_mapper = Some(Arc::new(mapper));
        self
    }

    /// Get the regulator name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the maximum requests per period
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Get the admission period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Calls admitted since construction
    pub fn admitted(&self) -> u64 {
        self.lock().admitted
    }

    /// Calls rejected since construction
    pub fn rejected(&self) -> u64 {
        self.lock().rejected
    }

    /// Claim an admission slot, if one is left in the current window
    fn try_admit(&self, now: Instant) -> bool {
        let mut state = self.lock();

        if self.max_requests == 0 {
            state.admitted += 1;
            return true;
        }

        let expired = state
            .window_start
            .map_or(true, |start| now.saturating_duration_since(start) >= self.period);
        if expired {
            state.window_start = Some(now);
            state.in_window = 0;
        }

        if state.in_window < self.max_requests {
            state.in_window += 1;
            state.admitted += 1;
            true
        } else {
            state.rejected += 1;
            false
        }
    }

    fn reject(&self) -> ServiceError {
        debug!(
            name = %self.name,
            max_requests = self.max_requests,
            period_ms = self.period.as_millis() as u64,
            "Flow regulator rejected call"
        );
        let error = FlowRateExceededError {
            regulator: self.name.clone(),
            max_requests: self.max_requests,
            period: self.period,
        };
        match &self.error_mapper {
            Some(mapper) => mapper.map(self, error),
            None => error.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConstantFlowRegulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstantFlowRegulator")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceWrapper for ConstantFlowRegulator {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        if !self.try_admit(Instant::now()) {
            return Err(self.reject());
        }
        call.await
    }
}

/// Advanced regulator using governor crate (when feature is enabled)
///
/// This provides GCRA token bucket admission with a burst of `max_requests`.
#[cfg(feature = "governor-impl")]
pub mod governor_impl {
    use super::*;
    use crate::config::ConfigError;
    use governor::{
        clock::DefaultClock,
        state::{InMemoryState, NotKeyed},
        Quota, RateLimiter,
    };
    use std::num::NonZeroU32;

    /// Regulator wrapper using governor
    pub struct GovernorFlowRegulator {
        name: String,
        max_requests: u32,
        period: Duration,
        limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    }

    impl GovernorFlowRegulator {
        /// Create a new governor-based regulator
        pub fn new(
            name: impl Into<String>,
            max_requests: u32,
            period: Duration,
        ) -> Result<Self, ConfigError> {
            let name = name.into();
            let burst = NonZeroU32::new(max_requests).ok_or_else(|| {
                ConfigError::Invalid(format!("flow regulator '{}': max_requests must be > 0", name))
            })?;

            let quota = Quota::with_period(period / max_requests)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("flow regulator '{}': invalid period", name))
                })?
                .allow_burst(burst);

            Ok(Self {
                name,
                max_requests,
                period,
                limiter: RateLimiter::direct(quota),
            })
        }

        /// Get the regulator name
        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl fmt::Debug for GovernorFlowRegulator {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("GovernorFlowRegulator")
                .field("name", &self.name)
                .field("max_requests", &self.max_requests)
                .field("period", &self.period)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl ServiceWrapper for GovernorFlowRegulator {
        async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
            if self.limiter.check().is_err() {
                debug!(name = %self.name, "Flow regulator rejected call");
                return Err(FlowRateExceededError {
                    regulator: self.name.clone(),
                    max_requests: self.max_requests,
                    period: self.period,
                }
                .into());
            }
            call.await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::wrapper::ServiceWrapperExt;

        #[tokio::test]
        async fn test_governor_regulator_enforces_burst() {
            let regulator =
                GovernorFlowRegulator::new("gov", 3, Duration::from_secs(3600)).unwrap();

            for _ in 0..3 {
                regulator.invoke_void(|| async { Ok(()) }).await.unwrap();
            }
            let err = regulator.invoke_void(|| async { Ok(()) }).await.unwrap_err();
            assert!(err.is_flow_rate_exceeded());
        }

        #[test]
        fn test_governor_regulator_rejects_zero() {
            assert!(GovernorFlowRegulator::new("gov", 0, Duration::from_secs(1)).is_err());
        }
    }
}
