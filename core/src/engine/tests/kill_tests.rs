//! Tests for kill state and cancellation of registered operations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::helpers::*;
use crate::engine::CancelHandle;
use crate::fault::Fault;

#[test]
fn test_first_kill_fault_wins() {
    let ctx = root_context();
    assert!(!ctx.is_killed());
    assert!(ctx.killed_at().is_none());

    ctx.kill(Fault::new("Timeout"));
    ctx.kill(Fault::new("ParentFault"));

    assert!(ctx.is_killed());
    assert_eq!(ctx.killer_fault(), Some(Fault::new("Timeout")));
    assert!(ctx.killed_at().is_some());
}

#[test]
fn test_if_not_killed_is_suppressed_until_cleared() {
    let ctx = root_context();
    let runs = AtomicUsize::new(0);

    assert_eq!(ctx.if_not_killed(|| runs.fetch_add(1, Ordering::SeqCst)), Some(0));

    ctx.kill(Fault::new("Timeout"));
    for _ in 0..3 {
        assert_eq!(ctx.if_not_killed(|| runs.fetch_add(1, Ordering::SeqCst)), None);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    ctx.clear_kill();
    assert!(!ctx.is_killed());
    assert!(ctx.if_not_killed(|| runs.fetch_add(1, Ordering::SeqCst)).is_some());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_kill_cancels_live_handles_only() {
    let ctx = root_context();
    let waiting = CancelHandle::new();
    let finished = CancelHandle::new();
    ctx.cancel_if_killed(&waiting);
    ctx.cancel_if_killed(&finished);
    assert_eq!(ctx.live_cancellables(), 2);

    finished.complete();
    ctx.kill(Fault::new("Timeout"));

    assert!(waiting.is_cancelled());
    assert_eq!(ctx.registered_cancellables(), 0);
}

#[test]
fn test_registering_on_killed_context_cancels_immediately() {
    let ctx = root_context();
    ctx.kill(Fault::new("Timeout"));

    let handle = CancelHandle::new();
    ctx.cancel_if_killed(&handle);

    assert!(handle.is_cancelled());
    assert_eq!(ctx.registered_cancellables(), 0);
}

#[test]
fn test_registry_stays_bounded_when_handles_complete() {
    let ctx = root_context();

    for _ in 0..500 {
        let handle = CancelHandle::new();
        ctx.cancel_if_killed(&handle);
        handle.complete();
    }

    assert!(ctx.registered_cancellables() <= 1);
    assert_eq!(ctx.live_cancellables(), 0);
}

#[test]
fn test_concurrent_kills_keep_one_fault_and_cancel_everything() {
    let ctx = root_context();
    let handles: Vec<_> = (0..32).map(|_| CancelHandle::new()).collect();
    for handle in &handles {
        ctx.cancel_if_killed(handle);
    }

    let faults: Vec<_> = (0..8).map(|i| Fault::new(format!("Fault{}", i))).collect();
    std::thread::scope(|s| {
        for fault in &faults {
            let ctx = Arc::clone(&ctx);
            let fault = fault.clone();
            s.spawn(move || ctx.kill(fault));
        }
    });

    let killer = ctx.killer_fault().unwrap();
    assert!(faults.contains(&killer));
    assert!(handles.iter().all(CancelHandle::is_cancelled));
    assert_eq!(ctx.registered_cancellables(), 0);
}

#[test]
fn test_kill_does_not_touch_scopes() {
    let ctx = root_context();
    ctx.push_scope("A", None);
    ctx.install_fault_handler("f", named("h")).unwrap();

    ctx.kill(Fault::new("Timeout"));

    assert_eq!(ctx.current_scope_id().unwrap(), "A");
    assert_eq!(name_of(ctx.get_fault_handler("f", false).unwrap()), Some("h".to_string()));
}
