//! Tests for scope operations forwarded up the context tree

use super::helpers::*;
use crate::engine::ExecutionContext;
use crate::error::EngineError;

#[test]
fn test_child_installs_into_parent_scope() {
    let root = root_context();
    root.push_scope("A", None);
    let child = ExecutionContext::child(&root, None);

    child.install_fault_handler("f", named("h")).unwrap();

    // Same underlying scope: the parent consumes what the child installed
    assert_eq!(name_of(root.get_fault_handler("f", true).unwrap()), Some("h".to_string()));
    assert_eq!(name_of(child.get_fault_handler("f", true).unwrap()), None);
}

#[test]
fn test_delegation_walks_the_whole_chain() {
    let root = root_context();
    let mid = ExecutionContext::child(&root, None);
    mid.push_scope("mid", None);
    let inner = ExecutionContext::child(&mid, None);
    let leaf = ExecutionContext::child(&inner, None);

    assert_eq!(leaf.depth(), 3);
    assert_eq!(leaf.current_scope_id().unwrap(), "mid");

    leaf.install_compensation(named("undo")).unwrap();
    assert_eq!(
        name_of(mid.get_current_scope_compensation().unwrap()),
        Some("undo".to_string())
    );
    // The root's implicit scope is not involved
    assert_eq!(name_of(root.get_current_scope_compensation().unwrap()), None);
}

#[test]
fn test_own_scope_shadows_parent() {
    let root = root_context();
    root.install_fault_handler("f", named("outer")).unwrap();
    let child = ExecutionContext::child(&root, None);
    child.push_scope("local", None);
    child.install_fault_handler("f", named("inner")).unwrap();

    assert_eq!(name_of(child.get_fault_handler("f", false).unwrap()), Some("inner".to_string()));

    child.pop_scope(false, None).unwrap();
    assert_eq!(name_of(child.get_fault_handler("f", false).unwrap()), Some("outer".to_string()));
}

#[test]
fn test_child_pop_merges_into_parent_scope() {
    let root = root_context();
    root.push_scope("order", None);
    let child = ExecutionContext::child(&root, None);

    child.push_scope("ship", None);
    child.install_compensation(named("recall")).unwrap();
    child.pop_scope_merged(None).unwrap();

    assert_eq!(name_of(root.get_compensation("ship").unwrap()), Some("recall".to_string()));
}

#[test]
fn test_no_scope_anywhere_is_explicit() {
    let root = root_context();
    // Drop the implicit scope to get a chain with no scope at all
    root.pop_scope(false, None).unwrap();
    let child = ExecutionContext::child(&root, None);

    assert!(matches!(
        child.current_scope_id(),
        Err(EngineError::NoScope { context }) if context == child.id()
    ));
    assert!(matches!(
        child.install_fault_handler("f", named("h")),
        Err(EngineError::NoScope { .. })
    ));
    assert!(matches!(root.get_fault_handler("f", true), Err(EngineError::NoScope { .. })));

    // Merging with nowhere to go drops the compensations quietly
    child.push_scope("orphan", None);
    child.install_compensation(named("lost")).unwrap();
    child.pop_scope_merged(None).unwrap();
    assert!(matches!(child.get_compensation("orphan"), Err(EngineError::NoScope { .. })));
}

#[test]
fn test_lineage_lists_nearest_first() {
    let root = root_context();
    let child = ExecutionContext::child(&root, None);
    let grandchild = ExecutionContext::child(&child, None);

    let ids: Vec<_> = grandchild.lineage().map(|c| c.id()).collect();
    assert_eq!(ids, vec![grandchild.id(), child.id(), root.id()]);
    assert_eq!(root.depth(), 0);
    assert_eq!(grandchild.session_id(), "test-session");
}
