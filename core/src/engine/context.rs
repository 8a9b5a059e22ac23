//! Execution contexts
//!
//! One context per session and per spawned activity. A context owns:
//! - a stack of fault handling scopes
//! - a stack of pending continuations for the current scope level, with the
//!   outer levels saved while a scope is active
//! - kill state and the cancellation registry
//!
//! Contexts form a tree through their parent link. Scope operations on a
//! context with no scope of its own are forwarded up the tree (see
//! `delegation.rs`).
//!
//! All mutable state sits behind a single mutex. Within a context, scope and
//! continuation operations come from one logical thread; the lock exists for
//! `kill` and fault escalation, which may come from a watchdog or a child.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cancel::{CancelHandle, CancellationRegistry};
use super::scope::Scope;
use crate::continuation::ContinuationRef;
use crate::error::{EngineError, EngineResult};
use crate::fault::Fault;
use crate::scheduler::{Scheduler, SessionOutcome};
use crate::session::{InputOperation, PendingMessage, Session, SessionData, SessionMessage};

/* ===================== Identifiers ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        ContextId(Uuid::new_v4())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marker for the activity currently standing in for a scope body (for
/// instance a fault handler running in place of the normal body).
///
/// Opaque to the engine: it is stored on scope push and handed back so the
/// interpreter can restore it on scope exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeExecution(u64);

impl ScopeExecution {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ScopeExecution(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/* ===================== Run state ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Paused,
    Completed,
    Killed,
    /// Killed by a fault no scope handled
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Killed | RunState::Failed)
    }
}

#[derive(Debug, Clone)]
struct KillRecord {
    fault: Fault,
    at: DateTime<Utc>,
}

/* ===================== Context ===================== */

pub(super) struct ContextState {
    pub(super) scopes: Vec<Scope>,
    continuations: Vec<ContinuationRef>,
    saved_continuations: Vec<Vec<ContinuationRef>>,
    kill: Option<KillRecord>,
    cancellables: CancellationRegistry,
    pause_requested: bool,
    scope_execution: Option<ScopeExecution>,
    run_state: RunState,
    /// Fault handed up by a child that had no scope left to handle it
    escalated: Option<Fault>,
    /// Children started on the scheduler and not yet finished
    active_children: usize,
}

impl ContextState {
    fn new(initial: Option<ContinuationRef>) -> Self {
        Self {
            scopes: Vec::new(),
            continuations: initial.into_iter().collect(),
            saved_continuations: Vec::new(),
            kill: None,
            cancellables: CancellationRegistry::new(),
            pause_requested: false,
            scope_execution: None,
            run_state: RunState::Created,
            escalated: None,
            active_children: 0,
        }
    }
}

pub struct ExecutionContext {
    id: ContextId,
    pub(super) parent: Option<Arc<ExecutionContext>>,
    session: Arc<dyn Session>,
    scheduler: Scheduler,
    pub(super) state: Mutex<ContextState>,
    /// Wakes the drive loop when a child finishes, a fault is escalated or
    /// the context is killed
    activity: Notify,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("session", &self.session.session_id())
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Create the root context of a session.
    ///
    /// The root carries an implicit top-level scope (named by
    /// `engine.implicit_scope_id`) so that code outside any explicit scope
    /// always has somewhere to install handlers.
    pub fn root(
        session: Arc<dyn Session>,
        scheduler: Scheduler,
        initial: Option<ContinuationRef>,
    ) -> Arc<Self> {
        let mut state = ContextState::new(initial);
        state
            .scopes
            .push(Scope::new(scheduler.config().implicit_scope_id.clone()));

        Arc::new(Self {
            id: ContextId::new(),
            parent: None,
            session,
            scheduler,
            state: Mutex::new(state),
            activity: Notify::new(),
        })
    }

    /// Create a context for an activity nested under `parent`.
    ///
    /// The child starts with no scope of its own, so its scope operations
    /// land in the parent's current scope until it pushes one.
    pub fn child(parent: &Arc<Self>, initial: Option<ContinuationRef>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
            parent: Some(Arc::clone(parent)),
            session: Arc::clone(&parent.session),
            scheduler: parent.scheduler.clone(),
            state: Mutex::new(ContextState::new(initial)),
            activity: Notify::new(),
        })
    }

    /// Create a child context and hand it to the scheduler.
    ///
    /// This context does not complete while the child runs. A fault the
    /// child cannot handle in its own scopes is escalated here.
    pub fn spawn_child(self: &Arc<Self>, initial: ContinuationRef) -> JoinHandle<SessionOutcome> {
        let child = Self::child(self, Some(initial));
        debug!(parent = %self.id, child = %child.id, "Spawning child context");
        child.start()
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn parent(&self) -> Option<&Arc<ExecutionContext>> {
        self.parent.as_ref()
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// Session-wide data store, shared by every context of the session
    pub fn state(&self) -> &SessionData {
        self.session.state()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /* ===================== Scheduling ===================== */

    /// Hand this context to its scheduler for execution
    pub fn start(self: &Arc<Self>) -> JoinHandle<SessionOutcome> {
        self.scheduler.start(Arc::clone(self))
    }

    /// Queue continuations to run next, in the given order
    pub fn execute_next<I>(&self, continuations: I)
    where
        I: IntoIterator<Item = ContinuationRef>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut state = self.state.lock();
        state.continuations.extend(continuations.into_iter().rev());
    }

    /// Pop the next continuation to run at the current scope level
    pub fn next_continuation(&self) -> Option<ContinuationRef> {
        self.state.lock().continuations.pop()
    }

    /// Drop the pending continuations of the current scope level, returning
    /// how many were dropped
    pub fn discard_pending(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.continuations.len();
        state.continuations.clear();
        dropped
    }

    pub fn pending_continuations(&self) -> usize {
        self.state.lock().continuations.len()
    }

    /// Ask the scheduler to requeue this context before running the next
    /// continuation
    pub fn pause_execution(&self) {
        self.state.lock().pause_requested = true;
    }

    pub fn is_pause_requested(&self) -> bool {
        self.state.lock().pause_requested
    }

    /// Clear and return the pause request
    pub fn take_pause_request(&self) -> bool {
        std::mem::take(&mut self.state.lock().pause_requested)
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().run_state
    }

    pub(crate) fn set_run_state(&self, run_state: RunState) {
        self.state.lock().run_state = run_state;
    }

    /* ===================== Children ===================== */

    pub(crate) fn child_started(&self) {
        self.state.lock().active_children += 1;
    }

    pub(crate) fn child_finished(&self) {
        {
            let mut state = self.state.lock();
            state.active_children = state.active_children.saturating_sub(1);
        }
        self.activity.notify_one();
    }

    /// Children started on the scheduler that have not finished yet
    pub fn active_children(&self) -> usize {
        self.state.lock().active_children
    }

    /// Wait until a child finishes, a fault is escalated or the context is
    /// killed. May return spuriously.
    pub(crate) async fn wait_for_activity(&self) {
        self.activity.notified().await;
    }

    /// Hand a fault that a child could not handle to this context.
    ///
    /// The fault is raised here on the next step of the drive loop, and
    /// registered waits are interrupted so a blocked continuation gives way.
    /// The first pending escalation wins. A context that already finished
    /// cannot raise any more, so it is killed with the fault instead.
    pub(crate) fn escalate(&self, fault: Fault) {
        let terminal = {
            let mut state = self.state.lock();
            if state.run_state.is_terminal() {
                true
            } else {
                if state.escalated.is_none() {
                    debug!(context = %self.id, fault = %fault, "Fault escalated from child");
                    state.escalated = Some(fault.clone());
                }
                state.cancellables.cancel_all();
                false
            }
        };

        if terminal {
            warn!(context = %self.id, fault = %fault, "Fault escalated into finished context");
            self.kill(fault);
        }
        self.activity.notify_one();
    }

    pub(crate) fn take_escalated(&self) -> Option<Fault> {
        self.state.lock().escalated.take()
    }

    /// Fault escalated from a child and not yet raised here
    pub fn escalated_fault(&self) -> Option<Fault> {
        self.state.lock().escalated.clone()
    }

    /* ===================== Kill ===================== */

    /// Kill this context and interrupt its registered operations.
    ///
    /// The first fault wins: killing an already killed context keeps the
    /// original fault, but still drains the registry.
    pub fn kill(&self, fault: Fault) {
        let mut state = self.state.lock();
        if state.kill.is_none() {
            info!(context = %self.id, fault = %fault, "Killing context");
            state.kill = Some(KillRecord {
                fault,
                at: Utc::now(),
            });
        }
        let interrupted = state.cancellables.cancel_all();
        if interrupted > 0 {
            debug!(context = %self.id, interrupted, "Cancelled pending operations");
        }
        drop(state);
        self.activity.notify_one();
    }

    pub fn killer_fault(&self) -> Option<Fault> {
        self.state.lock().kill.as_ref().map(|k| k.fault.clone())
    }

    pub fn killed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().kill.as_ref().map(|k| k.at)
    }

    pub fn is_killed(&self) -> bool {
        self.state.lock().kill.is_some()
    }

    /// Return to normal execution after a recoverable interruption
    pub fn clear_kill(&self) {
        self.state.lock().kill = None;
    }

    /// Run `action` unless this context is killed.
    ///
    /// Every continuation goes through this check before touching session
    /// state. The lock is not held while `action` runs.
    pub fn if_not_killed<R>(&self, action: impl FnOnce() -> R) -> Option<R> {
        if self.is_killed() {
            None
        } else {
            Some(action())
        }
    }

    /// Register `handle` to be cancelled when this context is killed.
    ///
    /// If the context is already killed the handle is cancelled right away.
    pub fn cancel_if_killed(&self, handle: &CancelHandle) {
        let mut state = self.state.lock();
        state.cancellables.prune();
        if state.kill.is_some() {
            handle.cancel();
        } else {
            state.cancellables.register(handle);
        }
    }

    /// Registry entries currently held (live or awaiting pruning)
    pub fn registered_cancellables(&self) -> usize {
        self.state.lock().cancellables.len()
    }

    pub fn live_cancellables(&self) -> usize {
        self.state.lock().cancellables.live_count()
    }

    /* ===================== Scopes ===================== */

    /// Enter scope `id`.
    ///
    /// The pending continuations of the enclosing level are set aside until
    /// the scope is popped. Returns the replaced scope execution marker so the
    /// caller can hand it back to `pop_scope`.
    pub fn push_scope(
        &self,
        id: impl Into<String>,
        replacing: Option<ScopeExecution>,
    ) -> Option<ScopeExecution> {
        let id = id.into();
        let mut state = self.state.lock();
        debug!(context = %self.id, scope = %id, depth = state.scopes.len() + 1, "Push scope");

        state.scopes.push(Scope::new(id));
        let outer = std::mem::take(&mut state.continuations);
        state.saved_continuations.push(outer);
        std::mem::replace(&mut state.scope_execution, replacing)
    }

    /// Leave the current scope of this context.
    ///
    /// With `merge` the popped scope's compensations move to the enclosing
    /// scope, which may live in an ancestor context. Without it they are
    /// discarded.
    pub fn pop_scope(&self, merge: bool, replacing: Option<ScopeExecution>) -> EngineResult<()> {
        let orphan = {
            let mut state = self.state.lock();
            let scope = state
                .scopes
                .pop()
                .ok_or(EngineError::ScopeUnderflow { context: self.id })?;
            debug!(context = %self.id, scope = %scope.id(), merge, "Pop scope");

            if let Some(saved) = state.saved_continuations.pop() {
                state.continuations = saved;
            }
            state.scope_execution = replacing;

            match (merge, state.scopes.last_mut()) {
                (false, _) => None,
                (true, Some(outer)) => {
                    outer.absorb_compensations(scope);
                    None
                }
                (true, None) => Some(scope),
            }
        };

        if let Some(scope) = orphan {
            self.merge_into_ancestors(scope);
        }
        Ok(())
    }

    /// `pop_scope(true, replacing)`
    pub fn pop_scope_merged(&self, replacing: Option<ScopeExecution>) -> EngineResult<()> {
        self.pop_scope(true, replacing)
    }

    /// Whether this context has a scope of its own, i.e. whether a
    /// `pop_scope` is safe
    pub fn has_scope(&self) -> bool {
        !self.state.lock().scopes.is_empty()
    }

    pub fn scope_depth(&self) -> usize {
        self.state.lock().scopes.len()
    }

    pub fn current_scope_execution(&self) -> Option<ScopeExecution> {
        self.state.lock().scope_execution
    }

    pub fn install_compensation(&self, handler: ContinuationRef) -> EngineResult<()> {
        self.with_nearest_scope(|scope| scope.install_compensation(handler))
    }

    pub fn install_fault_handler(
        &self,
        fault_name: impl Into<String>,
        handler: ContinuationRef,
    ) -> EngineResult<()> {
        let fault_name = fault_name.into();
        self.with_nearest_scope(|scope| scope.install_fault_handler(fault_name, handler))
    }

    /// Resolve the handler for `fault_name` in the nearest scope.
    ///
    /// `Ok(None)` means the scope has neither a specific nor a default
    /// handler, i.e. the fault is uncaught there.
    pub fn get_fault_handler(
        &self,
        fault_name: &str,
        erase: bool,
    ) -> EngineResult<Option<ContinuationRef>> {
        self.with_nearest_scope(|scope| {
            let handler = scope.get_fault_handler(fault_name, erase);
            debug!(
                scope = %scope.id(),
                fault = fault_name,
                found = handler.is_some(),
                erase,
                "Fault handler lookup"
            );
            handler
        })
    }

    /// Compensation handler of the nearest scope itself (not consumed)
    pub fn get_current_scope_compensation(&self) -> EngineResult<Option<ContinuationRef>> {
        self.with_nearest_scope(|scope| scope.get_self_compensation())
    }

    /// Take the compensation of completed scope `id` from the nearest scope
    pub fn get_compensation(&self, id: &str) -> EngineResult<Option<ContinuationRef>> {
        self.with_nearest_scope(|scope| scope.get_compensation(id))
    }

    pub fn current_scope_id(&self) -> EngineResult<String> {
        self.with_nearest_scope(|scope| scope.id().to_string())
    }

    /// Copy of the nearest scope
    pub fn snapshot_scope(&self) -> EngineResult<Scope> {
        self.with_nearest_scope(|scope| scope.clone())
    }

    /* ===================== Messages ===================== */

    /// Wait for a message on `operation`.
    ///
    /// The wait is registered for cancellation: killing the context
    /// interrupts it and the killer fault is returned.
    pub async fn receive(&self, operation: &InputOperation) -> Result<SessionMessage, Fault> {
        self.check_interrupted()?;
        let pending = self.session.request_message(operation, self);
        self.await_message(pending).await
    }

    /// Wait for a message on any of `operations`
    pub async fn receive_any(&self, operations: &[InputOperation]) -> Result<SessionMessage, Fault> {
        self.check_interrupted()?;
        let pending = self.session.request_any_message(operations, self);
        self.await_message(pending).await
    }

    /// A killed context, or one with an escalated fault pending, must not
    /// take messages off the session
    fn check_interrupted(&self) -> Result<(), Fault> {
        let state = self.state.lock();
        match state.kill.as_ref().map(|k| &k.fault).or(state.escalated.as_ref()) {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    async fn await_message(&self, pending: PendingMessage) -> Result<SessionMessage, Fault> {
        self.cancel_if_killed(pending.handle());
        match pending.wait().await {
            Ok(message) => Ok(message),
            Err(interrupted) => {
                if let Some(message) = interrupted.unread {
                    debug!(context = %self.id, operation = %message.operation, "Returning unread message");
                    self.session.requeue_message(message);
                }
                Err(self
                    .check_interrupted()
                    .err()
                    .unwrap_or_else(Fault::interrupted))
            }
        }
    }
}
