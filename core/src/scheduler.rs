//! Context scheduler
//!
//! Drives execution contexts on the tokio runtime. One task per context; the
//! task pops continuations off the context's stack and runs them until the
//! stack empties, the context is killed, or a fault goes unhandled.
//!
//! Scheduling is cooperative: a context yields back to the runtime when it
//! asks to pause and after every `slice_budget` continuations.
//!
//! A context whose continuations ran out stays alive while children it
//! started are still running, so faults they escalate can still be raised
//! in it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::engine::{ExecutionContext, RunState};
use crate::error::{EngineError, EngineResult};
use crate::fault::Fault;

/// How a context finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// Ran out of continuations
    Completed,
    /// Killed with this fault while running
    Killed(Fault),
    /// A raised fault found no handler in this context and was handed to
    /// the parent context, which raises it in turn
    Escalated(Fault),
    /// A raised fault found no handler anywhere up the context tree
    Failed(Fault),
}

impl SessionOutcome {
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            SessionOutcome::Completed => None,
            SessionOutcome::Killed(f) | SessionOutcome::Escalated(f) | SessionOutcome::Failed(f) => {
                Some(f)
            }
        }
    }
}

#[derive(Debug)]
struct SchedulerInner {
    runtime: Handle,
    config: EngineConfig,
}

/// Cheap to clone; every context of a session tree shares one.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Scheduler on the runtime of the calling task
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        Ok(Self::with_handle(runtime, config))
    }

    pub fn with_handle(runtime: Handle, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner { runtime, config }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Spawn the drive loop for `ctx`
    pub fn start(&self, ctx: Arc<ExecutionContext>) -> JoinHandle<SessionOutcome> {
        let span = info_span!(
            "context",
            id = %ctx.id(),
            session = %ctx.session_id(),
            depth = ctx.depth()
        );
        let budget = self.inner.config.slice_budget;
        let guard = ChildGuard::new(&ctx);
        self.inner.runtime.spawn(
            async move {
                let outcome = drive(ctx, budget).await;
                drop(guard);
                outcome
            }
            .instrument(span),
        )
    }
}

/// Counts a started child against its parent until the child's task ends,
/// including when the task is dropped or panics
struct ChildGuard {
    parent: Option<Arc<ExecutionContext>>,
}

impl ChildGuard {
    fn new(ctx: &ExecutionContext) -> Self {
        let parent = ctx.parent().cloned();
        if let Some(parent) = &parent {
            parent.child_started();
        }
        Self { parent }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            parent.child_finished();
        }
    }
}

/// Run `ctx` to completion on the current task.
///
/// Exposed so a host can drive a context inline instead of spawning it.
pub async fn drive(ctx: Arc<ExecutionContext>, slice_budget: usize) -> SessionOutcome {
    let slice_budget = slice_budget.max(1);
    let mut slice = 0usize;
    ctx.set_run_state(RunState::Running);

    loop {
        if let Some(fault) = ctx.killer_fault() {
            return finish_killed(&ctx, fault);
        }

        if let Some(fault) = ctx.take_escalated() {
            if let Some(outcome) = raise(&ctx, fault) {
                return outcome;
            }
            continue;
        }

        if ctx.take_pause_request() {
            ctx.set_run_state(RunState::Paused);
            tokio::task::yield_now().await;
            ctx.set_run_state(RunState::Running);
            slice = 0;
            continue;
        }

        let Some(next) = ctx.next_continuation() else {
            if ctx.active_children() > 0 {
                debug!(children = ctx.active_children(), "Waiting for children");
                ctx.wait_for_activity().await;
                continue;
            }
            // A child escalates before it stops counting as active
            if ctx.escalated_fault().is_some() {
                continue;
            }
            debug!("Context completed");
            ctx.set_run_state(RunState::Completed);
            return SessionOutcome::Completed;
        };

        debug!(continuation = next.name(), "Running continuation");
        if let Err(fault) = next.run(&ctx).await {
            if let Some(killer) = ctx.killer_fault() {
                return finish_killed(&ctx, killer);
            }
            // A wait interrupted by an escalation surfaces the escalated fault
            let fault = ctx.take_escalated().unwrap_or(fault);
            if let Some(outcome) = raise(&ctx, fault) {
                return outcome;
            }
        }

        slice += 1;
        if slice >= slice_budget {
            slice = 0;
            tokio::task::yield_now().await;
        }
    }
}

/// Resolve the handler for a raised fault and queue it.
///
/// Handlers run in the context that owns the scope they were installed in,
/// so only this context's own scopes are searched. The nearest scope
/// without a matching (or default) handler is abandoned: its compensations
/// are discarded and lookup moves to the enclosing scope. The implicit scope
/// of a root context is never popped. Pending work of the abandoned levels
/// is dropped before the handler is queued.
///
/// A child with no scope left hands the fault to its parent, which raises
/// it against its own scopes. A root with no handler fails.
///
/// Returns the final outcome when the fault was not handled here.
fn raise(ctx: &ExecutionContext, fault: Fault) -> Option<SessionOutcome> {
    while ctx.has_scope() {
        match ctx.get_fault_handler(&fault.name, true) {
            Ok(Some(handler)) => {
                let dropped = ctx.discard_pending();
                debug!(fault = %fault, handler = handler.name(), dropped, "Fault handled");
                ctx.execute_next([handler]);
                return None;
            }
            Ok(None) if can_unwind(ctx) => {
                debug!(fault = %fault, "No handler in scope, unwinding");
                if let Err(err) = ctx.pop_scope(false, None) {
                    warn!(fault = %fault, error = %err, "Unwinding failed");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(fault = %fault, error = %err, "Fault handler lookup failed");
                break;
            }
        }
    }

    ctx.kill(fault.clone());
    ctx.set_run_state(RunState::Failed);

    match ctx.parent() {
        Some(parent) if !ctx.has_scope() => {
            debug!(fault = %fault, parent = %parent.id(), "Escalating fault to parent");
            parent.escalate(fault.clone());
            Some(SessionOutcome::Escalated(fault))
        }
        _ => {
            warn!(fault = %fault, "Uncaught fault, terminating context");
            Some(SessionOutcome::Failed(fault))
        }
    }
}

fn can_unwind(ctx: &ExecutionContext) -> bool {
    let floor = if ctx.parent().is_some() { 0 } else { 1 };
    ctx.scope_depth() > floor
}

fn finish_killed(ctx: &ExecutionContext, fault: Fault) -> SessionOutcome {
    debug!(fault = %fault, "Context killed");
    ctx.set_run_state(RunState::Killed);
    SessionOutcome::Killed(fault)
}
