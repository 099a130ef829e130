//! Composition of several wrappers into one
//!
//! The first wrapper of a chain is the outermost layer and the last one sits
//! closest to the operation, so `[A, B, C]` behaves like
//! `A.invoke(|| B.invoke(|| C.invoke(op)))`. A failure raised by the
//! operation is seen by C, then B, then A, and reaches the caller unchanged.
//!
//! ```text
//!   caller
//!     │
//!     ▼
//!   ┌───────────────────────────┐
//!   │ A (e.g. RequestCounter)   │  sees the aggregate outcome
//!   │  ┌─────────────────────┐  │
//!   │  │ B (CircuitBreaker)  │  │
//!   │  │  ┌───────────────┐  │  │
//!   │  │  │ C (regulator) │  │  │
//!   │  │  │   operation   │  │  │
//!   │  │  └───────────────┘  │  │
//!   │  └─────────────────────┘  │
//!   └───────────────────────────┘
//! ```

use crate::wrapper::{Call, CallResult, ServiceWrapper};
use async_trait::async_trait;
use std::sync::Arc;

/// An ordered list of wrappers acting as a single wrapper
#[derive(Clone, Default)]
pub struct ServiceWrapperChain {
    wrappers: Vec<Arc<dyn ServiceWrapper>>,
}

impl ServiceWrapperChain {
    /// Create a chain; the first wrapper is the outermost layer
    pub fn new(wrappers: Vec<Arc<dyn ServiceWrapper>>) -> Self {
        Self { wrappers }
    }

    /// Append a wrapper as the new innermost layer
    pub fn push(mut self, wrapper: Arc<dyn ServiceWrapper>) -> Self {
        self.wrappers.push(wrapper);
        self
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    /// True when the chain has no layers and runs operations directly
    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

impl std::fmt::Debug for ServiceWrapperChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWrapperChain")
            .field("layers", &self.wrappers.len())
            .finish()
    }
}

#[async_trait]
impl ServiceWrapper for ServiceWrapperChain {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        // Nest from the innermost layer outward so the first wrapper ends up
        // on the outside. Nothing runs until the outer future is awaited.
        let nested = self
            .wrappers
            .iter()
            .rev()
            .fold(call, |inner, wrapper| wrapper.wrap(inner));
        nested.await
    }
}
