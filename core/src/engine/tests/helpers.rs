//! Test helpers for engine tests
//!
//! Context construction and continuations that record what ran

use std::sync::{Arc, OnceLock};

use serde_json::json;
use tokio::runtime::Runtime;

use crate::config::EngineConfig;
use crate::continuation::{from_fn, noop, ContinuationRef};
use crate::engine::ExecutionContext;
use crate::fault::Fault;
use crate::scheduler::Scheduler;
use crate::session::MailboxSession;

/// Runtime backing schedulers built in synchronous tests
fn shared_runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build test runtime")
    })
}

/// Scheduler usable from plain `#[test]` functions
pub fn test_scheduler() -> Scheduler {
    Scheduler::with_handle(shared_runtime().handle().clone(), EngineConfig::default())
}

/// Root context with the implicit `main` scope and a fresh mailbox session
pub fn root_context() -> Arc<ExecutionContext> {
    ExecutionContext::root(Arc::new(MailboxSession::with_id("test-session")), test_scheduler(), None)
}

/// Root context on the current runtime, sharing `session` with the test
pub fn async_root(session: &Arc<MailboxSession>, initial: ContinuationRef) -> Arc<ExecutionContext> {
    async_root_with_config(session, initial, EngineConfig::default())
}

pub fn async_root_with_config(
    session: &Arc<MailboxSession>,
    initial: ContinuationRef,
    config: EngineConfig,
) -> Arc<ExecutionContext> {
    let scheduler = Scheduler::new(config).expect("Tests run inside a tokio runtime");
    ExecutionContext::root(session.clone(), scheduler, Some(initial))
}

/// A do-nothing continuation identified by name
pub fn named(name: &str) -> ContinuationRef {
    noop(name.to_string())
}

pub fn name_of(c: Option<ContinuationRef>) -> Option<String> {
    c.map(|c| c.name().to_string())
}

/// Continuation that appends `name` to the session's `log`
pub fn record(name: &'static str) -> ContinuationRef {
    from_fn(name, move |ctx| {
        ctx.state().push("log", json!(name));
        Ok(())
    })
}

/// Continuation that raises `fault_name`
pub fn raise(fault_name: &'static str) -> ContinuationRef {
    from_fn(format!("raise_{}", fault_name), move |_| Err(Fault::new(fault_name)))
}

/// Entries of the session `log`, in order
pub fn log_of(ctx: &ExecutionContext) -> Vec<String> {
    ctx.state()
        .get("log")
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
