//! The service wrapper contract
//!
//! A [`ServiceWrapper`] does bookkeeping around a call to a downstream
//! dependency: it may veto the call outright, and it observes the outcome of
//! the calls it lets through. The contract is object safe, so wrappers of
//! different kinds can be stored side by side and composed (see
//! [`ServiceWrapperChain`](crate::chain::ServiceWrapperChain)).
//!
//! Callers use the [`ServiceWrapperExt`] methods, available on every
//! wrapper including `dyn ServiceWrapper`:
//!
//! ```no_run
//! use orbit_guard::prelude::*;
//!
//! # async fn example() -> orbit_guard::Result<()> {
//! let counter = RequestCounter::new();
//!
//! // Value-producing operation
//! let answer = counter.invoke(|| async { Ok(42) }).await?;
//!
//! // Side effect only
//! counter.invoke_void(|| async { Ok(()) }).await?;
//!
//! // Side effect with a caller-supplied result
//! let done = counter.invoke_returning(|| async { Ok(()) }, "done").await?;
//! # let _ = (answer, done);
//! # Ok(())
//! # }
//! ```

use crate::error::ServiceError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a type-erased wrapped call
pub type CallResult = Result<(), ServiceError>;

/// A type-erased call, not yet started. Awaiting it runs the operation
/// (and every wrapper nested inside the current one).
pub type Call<'a> = BoxFuture<'a, CallResult>;

/// Bookkeeping around a call to a downstream dependency.
///
/// Implementations must either await `call` exactly once and return its
/// outcome, or refuse to run it and return their own veto error. Operation
/// failures are never swallowed.
#[async_trait]
pub trait ServiceWrapper: Send + Sync {
    /// Run `call` under this wrapper's control
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult;
}

#[async_trait]
impl<W: ServiceWrapper + ?Sized> ServiceWrapper for Arc<W> {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        (**self).wrap(call).await
    }
}

#[async_trait]
impl<'r, W: ServiceWrapper + ?Sized> ServiceWrapper for &'r W {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        (**self).wrap(call).await
    }
}

#[async_trait]
impl<W: ServiceWrapper + ?Sized> ServiceWrapper for Box<W> {
    async fn wrap<'a>(&'a self, call: Call<'a>) -> CallResult {
        (**self).wrap(call).await
    }
}

/// Typed entry points for invoking operations through a wrapper
#[async_trait]
pub trait ServiceWrapperExt: ServiceWrapper {
    /// Run an operation that produces a value
    async fn invoke<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ServiceError>> + Send;

    /// Run an operation that produces no value
    async fn invoke_void<F, Fut>(&self, op: F) -> Result<(), ServiceError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), ServiceError>> + Send;

    /// Run an operation that produces no value and return `value` on success
    async fn invoke_returning<T, F, Fut>(&self, op: F, value: T) -> Result<T, ServiceError>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), ServiceError>> + Send;
}

#[async_trait]
impl<W: ServiceWrapper + ?Sized> ServiceWrapperExt for W {
    async fn invoke<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ServiceError>> + Send,
    {
        let mut output = None;
        let slot = &mut output;

        // The operation only starts when the innermost layer awaits the call
        self.wrap(Box::pin(async move {
            *slot = Some(op().await?);
            Ok(())
        }))
        .await?;

        output.ok_or(ServiceError::NotRun)
    }

    async fn invoke_void<F, Fut>(&self, op: F) -> Result<(), ServiceError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), ServiceError>> + Send,
    {
        self.wrap(Box::pin(async move { op().await })).await
    }

    async fn invoke_returning<T, F, Fut>(&self, op: F, value: T) -> Result<T, ServiceError>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), ServiceError>> + Send,
    {
        self.invoke_void(op).await?;
        Ok(value)
    }
}

/// Translates a wrapper's veto into an application-specific error.
///
/// Called once per veto with the wrapper that raised it, so the mapped
/// error can keep the wrapper's identity and the original reason. Any
/// `Fn(&W, E) -> ServiceError` closure is a mapper.
pub trait ErrorMapper<W: ?Sized, E>: Send + Sync {
    /// Produce the error returned to the caller instead of `error`
    fn map(&self, wrapper: &W, error: E) -> ServiceError;
}

impl<W: ?Sized, E, F> ErrorMapper<W, E> for F
where
    F: Fn(&W, E) -> ServiceError + Send + Sync,
{
    fn map(&self, wrapper: &W, error: E) -> ServiceError {
        self(wrapper, error)
    }
}
