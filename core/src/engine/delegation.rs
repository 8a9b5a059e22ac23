//! Context tree delegation
//!
//! Code running outside any explicit scope of its own context inherits the
//! scope of the nearest ancestor that has one, the same way an exception
//! thrown outside a try block reaches the caller's handler. The walk is an
//! explicit loop over the ancestor chain. Only one context lock is held at a
//! time, always child before parent.

use std::iter;

use tracing::trace;

use super::context::ExecutionContext;
use super::scope::Scope;
use crate::error::{EngineError, EngineResult};

impl ExecutionContext {
    /// This context followed by its ancestors, nearest first
    pub fn lineage(&self) -> impl Iterator<Item = &ExecutionContext> {
        iter::successors(Some(self), |ctx| ctx.parent.as_deref())
    }

    /// Number of ancestors above this context
    pub fn depth(&self) -> usize {
        self.lineage().count() - 1
    }

    /// Apply `f` to the top scope of the nearest context in the lineage that
    /// has one.
    pub(crate) fn with_nearest_scope<R>(&self, f: impl FnOnce(&mut Scope) -> R) -> EngineResult<R> {
        for (hops, ctx) in self.lineage().enumerate() {
            let mut state = ctx.state.lock();
            if let Some(scope) = state.scopes.last_mut() {
                if hops > 0 {
                    trace!(from = %self.id(), to = %ctx.id(), hops, "Delegated scope operation");
                }
                return Ok(f(scope));
            }
        }
        Err(EngineError::NoScope { context: self.id() })
    }

    /// Hand the compensations of a scope popped off an empty local stack to
    /// the nearest ancestor scope. Dropped if no ancestor has a scope.
    pub(super) fn merge_into_ancestors(&self, scope: Scope) {
        let Some(parent) = self.parent.as_deref() else {
            trace!(context = %self.id(), scope = %scope.id(), "No ancestor scope, compensations dropped");
            return;
        };
        if let Err(err) = parent.with_nearest_scope(move |outer| outer.absorb_compensations(scope)) {
            trace!(context = %self.id(), error = %err, "Compensations dropped");
        }
    }
}
