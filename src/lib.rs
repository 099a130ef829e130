/*!
 * Orbit Guard - Resilience wrappers for calls to external services
 *
 * Composable wrappers that sit between an application and a dependency:
 * - Circuit breaking with count or failure-rate trip policies
 * - Fixed-window admission control
 * - Request counting, flow rates, and latency statistics
 * - Health status rollup across many components
 *
 * Every wrapper implements [`ServiceWrapper`]; callers run operations
 * through the [`ServiceWrapperExt`] methods and stack wrappers with a
 * [`ServiceWrapperChain`].
 *
 * ```no_run
 * use orbit_guard::prelude::*;
 * use std::sync::Arc;
 *
 * # async fn example() -> orbit_guard::Result<()> {
 * let counter = Arc::new(RequestCounter::new());
 * let breaker = Arc::new(CircuitBreaker::with_defaults("payments"));
 * let regulator = Arc::new(ConstantFlowRegulator::per_second("payments", 50));
 *
 * let guard = ServiceWrapperChain::default()
 *     .push(counter.clone())
 *     .push(breaker.clone())
 *     .push(regulator);
 * let receipt = guard.invoke(|| async { Ok("charged") }).await?;
 *
 * let health = RolledUpStatus::new().with_critical(breaker);
 * println!("{} -> {}", receipt, health.status());
 * # Ok(())
 * # }
 * ```
 */

pub mod chain;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod flow_meter;
pub mod flow_regulator;
pub mod logging;
pub mod performance_monitor;
pub mod request_counter;
pub mod rolled_up;
pub mod status;
pub mod wrapper;

// Re-export commonly used types
pub use chain::ServiceWrapperChain;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureFilter, TripPolicy,
};
pub use config::{ConfigError, GuardConfig, LogLevel, LoggingConfig};
pub use error::{CircuitOpenError, FlowRateExceededError, OpenReason, Result, ServiceError};
pub use flow_meter::{FlowMeter, FlowRates};
pub use flow_regulator::ConstantFlowRegulator;
pub use performance_monitor::{PerformanceMonitor, PerformanceMonitorConfig, PerformanceSnapshot};
pub use request_counter::{RequestCounter, RequestCounts};
pub use rolled_up::RolledUpStatus;
pub use status::{Monitorable, Status};
pub use wrapper::{Call, CallResult, ErrorMapper, ServiceWrapper, ServiceWrapperExt};

#[cfg(feature = "governor-impl")]
pub use flow_regulator::governor_impl::GovernorFlowRegulator;

pub use orbit_core_stats::{MovingAverage, PercentileTracker, SlidingWindowStore};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::chain::ServiceWrapperChain;
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::error::ServiceError;
    pub use crate::flow_regulator::ConstantFlowRegulator;
    pub use crate::performance_monitor::PerformanceMonitor;
    pub use crate::request_counter::RequestCounter;
    pub use crate::rolled_up::RolledUpStatus;
    pub use crate::status::{Monitorable, Status};
    pub use crate::wrapper::{ServiceWrapper, ServiceWrapperExt};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
