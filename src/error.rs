/*!
 * Error types for Orbit Guard
 */

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Why a circuit breaker refused a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    /// The breaker tripped and the reset period has not elapsed yet
    Tripped { retry_in: Duration },
    /// A trial call is already probing the dependency
    TrialInProgress,
    /// The breaker is held open manually
    ForcedOpen,
}

impl std::fmt::Display for OpenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tripped { retry_in } => write!(f, "tripped, next trial in {:?}", retry_in),
            Self::TrialInProgress => write!(f, "trial call in progress"),
            Self::ForcedOpen => write!(f, "forced open"),
        }
    }
}

/// Veto raised by a circuit breaker that is not letting calls through
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker '{breaker}' is open: {reason}")]
pub struct CircuitOpenError {
    /// Name of the breaker that vetoed the call
    pub breaker: String,
    /// Why the call was refused
    pub reason: OpenReason,
}

/// Veto raised by a flow regulator whose admission budget is spent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Flow rate exceeded on '{regulator}': more than {max_requests} requests per {period:?}")]
pub struct FlowRateExceededError {
    /// Name of the regulator that vetoed the call
    pub regulator: String,
    /// Configured admissions per period
    pub max_requests: u32,
    /// Configured period
    pub period: Duration,
}

/// Failure of a wrapped call.
///
/// Wrappers only ever originate the veto variants; everything else comes
/// from the wrapped operation and is passed through untouched.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The wrapped operation failed (or an error mapper produced an
    /// application-level error)
    #[error(transparent)]
    Operation(#[from] anyhow::Error),

    /// A circuit breaker refused to run the operation
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// A flow regulator refused to admit the operation
    #[error(transparent)]
    FlowRateExceeded(#[from] FlowRateExceededError),

    /// A wrapper reported success without running the operation
    #[error("Wrapped call completed without running the operation")]
    NotRun,
}

impl ServiceError {
    /// Wrap an operation failure
    pub fn operation<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ServiceError::Operation(anyhow::Error::new(error))
    }

    /// Operation failure from a plain message
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        ServiceError::Operation(anyhow::Error::msg(message))
    }

    /// Check if this error was raised by a wrapper rather than the operation
    pub fn is_veto(&self) -> bool {
        matches!(
            self,
            ServiceError::CircuitOpen(_) | ServiceError::FlowRateExceeded(_)
        )
    }

    /// Check if this is a circuit-open veto
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ServiceError::CircuitOpen(_))
    }

    /// Check if this is a flow-rate veto
    pub fn is_flow_rate_exceeded(&self) -> bool {
        matches!(self, ServiceError::FlowRateExceeded(_))
    }

    /// Downcast an operation failure to a concrete error type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            ServiceError::Operation(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}
