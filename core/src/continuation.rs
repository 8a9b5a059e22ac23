//! Continuations
//!
//! A continuation is an opaque, resumable unit of work handed to the engine
//! by the interpreter. The engine stores continuations on stacks and in
//! scope handler tables and runs them through the scheduler; it never looks
//! inside one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::engine::ExecutionContext;
use crate::fault::Fault;

/// Future returned by [`Continuation::run`]
///
/// Boxed so continuations can be stored as trait objects and awaited from
/// the drive loop.
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Fault>> + Send + 'a>>;

pub trait Continuation: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run this unit of work against its owning context.
    ///
    /// Returning `Err(fault)` raises the fault in the context.
    fn run<'a>(&'a self, ctx: &'a Arc<ExecutionContext>) -> RunFuture<'a>;
}

pub type ContinuationRef = Arc<dyn Continuation>;

impl fmt::Debug for dyn Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Continuation").field(&self.name()).finish()
    }
}

/* ===================== Adapters ===================== */

struct FnContinuation<F> {
    name: String,
    f: F,
}

impl<F> Continuation for FnContinuation<F>
where
    F: Fn(&Arc<ExecutionContext>) -> Result<(), Fault> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a Arc<ExecutionContext>) -> RunFuture<'a> {
        let result = (self.f)(ctx);
        Box::pin(std::future::ready(result))
    }
}

/// Build a continuation from a synchronous step
pub fn from_fn<F>(name: impl Into<String>, f: F) -> ContinuationRef
where
    F: Fn(&Arc<ExecutionContext>) -> Result<(), Fault> + Send + Sync + 'static,
{
    Arc::new(FnContinuation {
        name: name.into(),
        f,
    })
}

struct AsyncFnContinuation<F> {
    name: String,
    f: F,
}

impl<F, Fut> Continuation for AsyncFnContinuation<F>
where
    F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Fault>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a Arc<ExecutionContext>) -> RunFuture<'a> {
        Box::pin((self.f)(Arc::clone(ctx)))
    }
}

/// Build a continuation from a step that awaits (message receipt, timers)
pub fn from_async<F, Fut>(name: impl Into<String>, f: F) -> ContinuationRef
where
    F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Fault>> + Send + 'static,
{
    Arc::new(AsyncFnContinuation {
        name: name.into(),
        f,
    })
}

/// A continuation that does nothing. Handy as a placeholder handler.
pub fn noop(name: impl Into<String>) -> ContinuationRef {
    from_fn(name, |_| Ok(()))
}
