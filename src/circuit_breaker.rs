//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! dependency keeps failing. It has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Dependency is unhealthy, calls fail immediately
//! - HalfOpen: One trial call checks whether the dependency recovered
//!
//! ```text
//!            failures in period reach the trip policy
//!   Closed ─────────────────────────────────────────────▶ Open
//!     ▲                                                   │  ▲
//!     │ trial succeeds            first call after reset  │  │ trial fails
//!     │                                                   ▼  │
//!     └──────────────────────────────────────────────── HalfOpen
//! ```
//!
//! The Open → HalfOpen transition has no timer behind it: it happens inside
//! the admission check of the first call that arrives after `reset` has
//! elapsed. Admission runs under the breaker's lock, so only one caller can
//! win the trial; everyone else keeps getting the open-circuit veto.

use crate::error::{CircuitOpenError, OpenReason, ServiceError};
use crate::status::{Monitorable, Status};
use crate::wrapper::{Call, CallResult, ErrorMapper, ServiceWrapper};
use async_trait::async_trait;
use orbit_core_stats::SlidingWindowStore;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately
    Open,
    /// A single trial call is testing the dependency
    HalfOpen,
}

impl CircuitState {
    /// Health reported for this state
    pub fn status(&self) -> Status {
        match self {
            CircuitState::Closed => Status::Up,
            CircuitState::HalfOpen => Status::Degraded,
            CircuitState::Open => Status::Down,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// When counted failures trip the circuit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TripPolicy {
    /// Trip once `threshold` failures fall within the period
    Count { threshold: u32 },
    /// Trip once at least `min_requests` calls fall within the period and
    /// `percent` or more of them failed
    Rate { percent: f64, min_requests: u32 },
}

impl TripPolicy {
    fn needs_successes(&self) -> bool {
        matches!(self, TripPolicy::Rate { .. })
    }

    fn should_trip(&self, failures: usize, calls: usize) -> bool {
        match *self {
            TripPolicy::Count { threshold } => failures >= threshold as usize,
            TripPolicy::Rate {
                percent,
                min_requests,
            } => {
                calls > 0
                    && calls >= min_requests as usize
                    && failures as f64 * 100.0 >= percent * calls as f64
            }
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Condition on failures within `period` that opens the circuit
    pub trip_policy: TripPolicy,
    /// Trailing window in which failures are counted
    pub period: Duration,
    /// Time an open circuit waits before letting a trial call through
    pub reset: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_policy: TripPolicy::Count { threshold: 5 },
            period: Duration::from_secs(60),
            reset: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip after `threshold` failures within the period
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.trip_policy = TripPolicy::Count { threshold };
        self
    }

    /// Trip when `percent` of at least `min_requests` calls failed within the period
    #[must_use]
    pub fn with_failure_rate(mut self, percent: f64, min_requests: u32) -> Self {
        self.trip_policy = TripPolicy::Rate {
            percent,
            min_requests,
        };
        self
    }

    /// Set the failure counting window
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the open → half-open delay
    #[must_use]
    pub fn with_reset(mut self, reset: Duration) -> Self {
        self.reset = reset;
        self
    }
}

/// Decides which failures count towards tripping the circuit.
///
/// Failures that do not count are still returned to the caller; they just
/// leave the breaker alone.
#[derive(Clone)]
pub struct FailureFilter {
    predicate: Arc<dyn Fn(&ServiceError) -> bool + Send + Sync>,
}

impl FailureFilter {
    /// Count every failure, including vetoes from inner wrappers
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Count only operation failures whose underlying error is an `E`
    pub fn only<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(|error| error.downcast_ref::<E>().is_some())
    }

    /// Count failures matching `predicate`
    pub fn new(predicate: impl Fn(&ServiceError) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Check whether `error` counts as a failure
    pub fn counts(&self, error: &ServiceError) -> bool {
        (self.predicate)(error)
    }
}

impl Default for FailureFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for FailureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureFilter").finish_non_exhaustive()
    }
}

type StateListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;
type OpenErrorMapper = Arc<dyn ErrorMapper<CircuitBreaker, CircuitOpenError>>;

/// How a call got past the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    /// Trial call, tagged with the half-open generation that admitted it
    Trial(u64),
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    forced_open: bool,
    /// Call outcomes within the period, `true` for a counted failure
    outcomes: SlidingWindowStore<bool>,
    trip_count: u64,
    last_tripped_at: Option<Instant>,
    /// Bumped each time a trial is admitted
    trial_generation: u64,
}

impl BreakerState {
    fn is_current_trial(&self, generation: u64) -> bool {
        self.state == CircuitState::HalfOpen && self.trial_generation == generation
    }
}

type Transition = Option<(CircuitState, CircuitState)>;

/// Circuit breaker for protecting against cascading failures
///
/// # Example
/// ```no_run
/// use orbit_guard::{CircuitBreaker, CircuitBreakerConfig, ServiceError, ServiceWrapperExt};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), ServiceError> {
///     let config = CircuitBreakerConfig::new()
///         .with_failure_threshold(5)
///         .with_period(Duration::from_secs(60))
///         .with_reset(Duration::from_secs(30));
///     let breaker = CircuitBreaker::new("payments", config);
///
///     let result = breaker.invoke(|| async {
///         // Your operation here
///         Ok(42)
///     }).await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    failure_filter: FailureFilter,
    error_mapper: Option<OpenErrorMapper>,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let outcomes = SlidingWindowStore::new(config.period);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                forced_open: false,
                outcomes,
                trip_count: 0,
                last_tripped_at: None,
                trial_generation: 0,
            }),
            failure_filter: FailureFilter::default(),
            error_mapper: None,
            listener: None,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Only count failures accepted by `filter`
    #[must_use]
    pub fn with_failure_filter(mut self, filter: FailureFilter) -> Self {
        self.failure_filter = filter;
        self
    }

    /// Translate open-circuit vetoes with `mapper`
    #[must_use]
    pub fn with_error_mapper<M>(mut self, mapper: M) -> Self
    where
        M: ErrorMapper<CircuitBreaker, CircuitOpenError> + 'static,
    {
        self.error_mapper = Some(Arc::new(mapper));
        self
    }

    /// Call `listener(from, to)` after every state change
    #[must_use]
    pub fn with_state_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Get the circuit breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Counted failures currently inside the period
    pub fn failure_count(&self) -> usize {
        let mut state = self.lock();
        state.outcomes.evict(Instant::now().into_std());
        state.outcomes.values().filter(|failed| **failed).count()
    }

    /// How many times the circuit has opened
    pub fn trip_count(&self) -> u64 {
        self.lock().trip_count
    }

    /// When the circuit last opened
    pub fn last_tripped_at(&self) -> Option<Instant> {
        self.lock().last_tripped_at
    }

    /// Check whether the breaker is held open manually
    pub fn is_forced_open(&self) -> bool {
        self.lock().forced_open
    }

    /// Open the circuit now, as if the trip policy had fired.
    ///
    /// Does nothing if the circuit is already open; the reset timer keeps
    /// running from the original trip.
    pub fn trip(&self) {
        let transition = {
            let mut state = self.lock();
            if state.state == CircuitState::Open {
                return;
            }
            self.open(&mut state, Instant::now())
        };
        self.notify(transition);
    }

    /// Close the circuit and forget recorded failures
    pub fn reset(&self) {
        let transition = {
            let mut state = self.lock();
            state.forced_open = false;
            self.close(&mut state)
        };
        self.notify(transition);
    }

    /// Hold the circuit open (`true`) or release it (`false`).
    ///
    /// While forced open every call is vetoed, including would-be trials.
    pub fn force_open(&self, forced: bool) {
        let mut state = self.lock();
        if state.forced_open != forced {
            info!(name = %self.name, forced, "Circuit breaker force-open changed");
            state.forced_open = forced;
        }
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen when due
    fn admit(&self) -> Result<Admission, OpenReason> {
        let now = Instant::now();
        let (admission, transition) = {
            let mut state = self.lock();
            if state.forced_open {
                return Err(OpenReason::ForcedOpen);
            }

            match state.state {
                CircuitState::Closed => (Admission::Normal, None),
                CircuitState::HalfOpen => return Err(OpenReason::TrialInProgress),
                CircuitState::Open => {
                    let opened_at = state.opened_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(opened_at);
                    if elapsed < self.config.reset {
                        return Err(OpenReason::Tripped {
                            retry_in: self.config.reset - elapsed,
                        });
                    }
                    let transition = self.half_open(&mut state);
                    (Admission::Trial(state.trial_generation), transition)
                }
            }
        };

        self.notify(transition);
        Ok(admission)
    }

    /// Fold the outcome of an admitted call into the state machine
    fn record(&self, admission: Admission, error: Option<&ServiceError>) {
        let now = Instant::now();
        let counted = error.is_some_and(|e| self.failure_filter.counts(e));

        let transition = {
            let mut state = self.lock();
            match admission {
                Admission::Trial(generation) => {
                    if !state.is_current_trial(generation) {
                        // Superseded by a manual reset or trip, or by a later trial
                        None
                    } else if counted {
                        warn!(
                            name = %self.name,
                            "Circuit breaker trial call failed, reopening"
                        );
                        self.open(&mut state, now)
                    } else {
                        self.close(&mut state)
                    }
                }
                Admission::Normal => {
                    if state.state != CircuitState::Closed {
                        // Admitted before the circuit opened; too late to matter
                        None
                    } else if counted || self.config.trip_policy.needs_successes() {
                        state.outcomes.update_at(counted, now.into_std());
                        let calls = state.outcomes.len();
                        let failures = state.outcomes.values().filter(|f| **f).count();

                        if counted {
                            debug!(
                                name = %self.name,
                                failures,
                                calls,
                                "Circuit breaker failure recorded"
                            );
                        }

                        if counted && self.config.trip_policy.should_trip(failures, calls) {
                            self.open(&mut state, now)
                        } else {
                            None
                        }
                    } else {
                        None
                    }
                }
            }
        };

        self.notify(transition);
    }

    /// A trial call was dropped before it finished
    fn abandon_trial(&self, generation: u64) {
        let transition = {
            let mut state = self.lock();
            if state.is_current_trial(generation) {
                warn!(name = %self.name, "Circuit breaker trial call abandoned, reopening");
                self.open(&mut state, Instant::now())
            } else {
                None
            }
        };
        self.notify(transition);
    }

    /// Transition to open state
    fn open(&self, state: &mut BreakerState, now: Instant) -> Transition {
        let from = state.state;
        state.state = CircuitState::Open;
        state.opened_at = Some(now);
        state.outcomes.clear();
        state.trip_count += 1;
        state.last_tripped_at = Some(now);

        info!(
            name = %self.name,
            from = %from,
            trips = state.trip_count,
            "Circuit breaker opened"
        );
        (from != CircuitState::Open).then_some((from, CircuitState::Open))
    }

    /// Transition to half-open state
    fn half_open(&self, state: &mut BreakerState) -> Transition {
        info!(name = %self.name, "Circuit breaker entering half-open state");
        state.state = CircuitState::HalfOpen;
        state.trial_generation += 1;
        Some((CircuitState::Open, CircuitState::HalfOpen))
    }

    /// Transition to closed state
    fn close(&self, state: &mut BreakerState) -> Transition {
        let from = state.state;
        state.state = CircuitState::Closed;
        state.opened_at = None;
        state.outcomes.clear();

        if from == CircuitState::Closed {
            return None;
        }
        info!(name = %self.name, "Circuit breaker closed");
        Some((from, CircuitState::Closed))
    }

    fn notify(&self, transition: Transition) {
        if let (Some(listener), Some((from, to))) = (&self.listener, transition) {
            listener(from, to);
        }
    }

    fn veto(&self, reason: OpenReason) -> ServiceError {
        debug!(name = %self.name, reason = %reason, "Circuit breaker rejected call");
        let error = CircuitOpenError {
            breaker: self.name.clone(),
            reason,
        };
        match &self.error_mapper {
            Some(mapper) => mapper.map(self, error),
            None => error.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Settles an admitted call; a trial dropped before settling reopens the circuit
struct Settlement<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Settlement<'_> {
    fn settle(mut self, error: Option<&ServiceError>) {
        self.settled = true;
        self.breaker.record(self.admission, error);
    }
}

impl Drop for Settlement<'_> {
    fn drop(&mut self) {
        if let (false, Admission::Trial(generation)) = (self.settled, self.admission) {
            self.breaker.abandon_trial(generation);
        }
    }
}

#[async_trait]
impl ServiceWrapper for CircuitBreaker {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        let admission = self.admit().map_err(|reason| self.veto(reason))?;
        let settlement = Settlement {
            breaker: self,
            admission,
            settled: false,
        };

        let result = call.await;
        settlement.settle(result.as_ref().err());
        result
    }
}

impl Monitorable for CircuitBreaker {
    fn status(&self) -> Status {
        let state = self.lock();
        if state.forced_open {
            Status::Down
        } else {
            state.state.status()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::ServiceWrapperExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("upstream timed out")]
    struct Timeout;

    #[derive(Debug, Error)]
    #[error("invalid input")]
    struct Validation;

    async fn fail(breaker: &CircuitBreaker) -> CallResult {
        breaker
            .invoke_void(|| async { Err(ServiceError::operation(Timeout)) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> CallResult {
        breaker.invoke_void(|| async { Ok(()) }).await
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_period(Duration::from_secs(10))
                .with_reset(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.trip_policy, TripPolicy::Count { threshold: 5 });
        assert_eq!(config.period, Duration::from_secs(60));
        assert_eq!(config.reset, Duration::from_secs(30));
    }

    #[test]
    fn test_circuit_breaker_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_rate(50.0, 20)
            .with_period(Duration::from_secs(120))
            .with_reset(Duration::from_secs(15));

        assert_eq!(
            config.trip_policy,
            TripPolicy::Rate {
                percent: 50.0,
                min_requests: 20
            }
        );
        assert_eq!(config.period, Duration::from_secs(120));
        assert_eq!(config.reset, Duration::from_secs(15));
    }

    #[test]
    fn test_circuit_state_display_and_status() {
        assert_eq!(format!("{}", CircuitState::Closed), "Closed");
        assert_eq!(format!("{}", CircuitState::Open), "Open");
        assert_eq!(format!("{}", CircuitState::HalfOpen), "HalfOpen");
        assert_eq!(CircuitState::Closed.status(), Status::Up);
        assert_eq!(CircuitState::HalfOpen.status(), Status::Degraded);
        assert_eq!(CircuitState::Open.status(), Status::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let breaker = breaker(3);

        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.status(), Status::Down);
        assert_eq!(breaker.trip_count(), 1);

        // Next call is vetoed without running the operation
        let ran = AtomicUsize::new(0);
        let result = breaker
            .invoke_void(|| async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_period_do_not_trip() {
        let breaker = breaker(3);

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_veto_carries_breaker_and_retry_time() {
        let breaker = breaker(1);
        fail(&breaker).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(2)).await;
        match succeed(&breaker).await {
            Err(ServiceError::CircuitOpen(err)) => {
                assert_eq!(err.breaker, "test");
                assert_eq!(
                    err.reason,
                    OpenReason::Tripped {
                        retry_in: Duration::from_secs(3)
                    }
                );
            }
            other => panic!("expected circuit-open veto, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let breaker = breaker(2);
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        succeed(&breaker).await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status(), Status::Up);
        // Fresh count after closing
        assert_eq!(breaker.failure_count(), 0);
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens_and_restarts_timer() {
        let breaker = breaker(1);
        fail(&breaker).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(5)).await;
        let trial = fail(&breaker).await.unwrap_err();
        assert!(!trial.is_veto(), "the trial itself runs the operation");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.trip_count(), 2);

        // Reset timer restarted at the failed trial
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());

        tokio::time::advance(Duration::from_secs(1)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_while_half_open() {
        let breaker = Arc::new(breaker(1));
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(5)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .invoke_void(|| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };

        // Let the trial get admitted
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.status(), Status::Degraded);

        for _ in 0..5 {
            match succeed(&breaker).await {
                Err(ServiceError::CircuitOpen(err)) => {
                    assert_eq!(err.reason, OpenReason::TrialInProgress)
                }
                other => panic!("expected veto, got {:?}", other),
            }
        }

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens() {
        let breaker = breaker(1);
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(5)).await;

        {
            let pending = breaker.invoke_void(|| futures::future::pending::<CallResult>());
            tokio::pin!(pending);
            let polled = futures::poll!(pending.as_mut());
            assert!(polled.is_pending());
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
        }

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_filter_ignores_other_errors() {
        let breaker = breaker(2).with_failure_filter(FailureFilter::only::<Timeout>());

        for _ in 0..5 {
            let err = breaker
                .invoke_void(|| async { Err(ServiceError::operation(Validation)) })
                .await
                .unwrap_err();
            assert!(err.downcast_ref::<Validation>().is_some());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_policy_needs_minimum_volume() {
        let breaker = CircuitBreaker::new(
            "rate",
            CircuitBreakerConfig::new()
                .with_failure_rate(50.0, 4)
                .with_period(Duration::from_secs(10)),
        );

        // 2 of 3 failed, but below the minimum volume
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // 3 of 4 failed
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_mapper_runs_once_per_veto() {
        #[derive(Debug, Error)]
        #[error("payments unavailable ({0})")]
        struct PaymentsDown(CircuitOpenError);

        let mapped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&mapped);
        let breaker = breaker(1).with_error_mapper(
            move |breaker: &CircuitBreaker, error: CircuitOpenError| {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(breaker.name(), error.breaker);
                ServiceError::operation(PaymentsDown(error))
            },
        );

        fail(&breaker).await.unwrap_err();
        assert_eq!(mapped.load(Ordering::SeqCst), 0);

        let err = succeed(&breaker).await.unwrap_err();
        let domain = err.downcast_ref::<PaymentsDown>().expect("mapped error");
        assert_eq!(domain.0.breaker, "test");
        assert_eq!(mapped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trip_reset_and_force_open() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&transitions);
        let breaker = breaker(5).with_state_listener(move |from, to| {
            log.lock().unwrap().push((from, to));
        });

        breaker.trip();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.last_tripped_at().is_some());

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.force_open(true);
        assert!(breaker.is_forced_open());
        assert_eq!(breaker.status(), Status::Down);
        match succeed(&breaker).await {
            Err(ServiceError::CircuitOpen(err)) => assert_eq!(err.reason, OpenReason::ForcedOpen),
            other => panic!("expected forced veto, got {:?}", other),
        }

        breaker.force_open(false);
        succeed(&breaker).await.unwrap();

        assert_eq!(
            *transitions.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_trial_does_not_settle_newer_trial() {
        let breaker = Arc::new(breaker(1));
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(5)).await;

        // First trial parks until released
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let stale = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .invoke_void(|| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Reset, re-trip, and admit a second trial that also parks
        breaker.reset();
        breaker.trip();
        tokio::time::advance(Duration::from_secs(5)).await;
        let (second_tx, second_rx) = tokio::sync::oneshot::channel::<()>();
        let current = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .invoke_void(|| async move {
                        let _ = second_rx.await;
                        Err(ServiceError::operation(Timeout))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The old trial succeeding must not close the circuit
        release_tx.send(()).unwrap();
        stale.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        second_tx.send(()).unwrap();
        current.await.unwrap().unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_while_open_keeps_original_trip() {
        let breaker = breaker(1);
        breaker.trip();
        let first = breaker.last_tripped_at();

        tokio::time::advance(Duration::from_secs(3)).await;
        breaker.trip();
        assert_eq!(breaker.trip_count(), 1);
        assert_eq!(breaker.last_tripped_at(), first);

        // Reset timer still runs from the first trip
        tokio::time::advance(Duration::from_secs(2)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_from_before_trip_is_ignored() {
        let breaker = Arc::new(breaker(1));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .invoke_void(|| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        release_tx.send(()).unwrap();
        slow.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
