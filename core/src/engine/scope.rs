//! Fault handling scopes
//!
//! A scope maps fault names to fault handlers and scope names to
//! compensation handlers. A scope's own compensation lives under its own id;
//! compensations of completed inner scopes are merged in alongside it so an
//! ancestor can roll them back later.

use std::collections::HashMap;

use crate::continuation::ContinuationRef;
use crate::fault::DEFAULT_HANDLER;

/// Cloning a scope duplicates both handler tables. The handlers themselves
/// are shared, immutable continuations.
#[derive(Debug, Clone)]
pub struct Scope {
    id: String,
    fault_handlers: HashMap<String, ContinuationRef>,
    compensations: HashMap<String, ContinuationRef>,
}

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fault_handlers: HashMap::new(),
            compensations: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Install (or replace) this scope's own compensation handler
    pub fn install_compensation(&mut self, handler: ContinuationRef) {
        self.compensations.insert(self.id.clone(), handler);
    }

    /// Install (or replace) the handler for `fault_name`
    pub fn install_fault_handler(&mut self, fault_name: impl Into<String>, handler: ContinuationRef) {
        self.fault_handlers.insert(fault_name.into(), handler);
    }

    /// Look up the handler for `fault_name`, falling back to the default
    /// handler.
    ///
    /// With `erase` the handler that was found is uninstalled, so it fires
    /// at most once per raise. Without `erase` the table is left untouched.
    pub fn get_fault_handler(&mut self, fault_name: &str, erase: bool) -> Option<ContinuationRef> {
        let key = if self.fault_handlers.contains_key(fault_name) {
            fault_name
        } else if self.fault_handlers.contains_key(DEFAULT_HANDLER) {
            DEFAULT_HANDLER
        } else {
            return None;
        };

        if erase {
            self.fault_handlers.remove(key)
        } else {
            self.fault_handlers.get(key).cloned()
        }
    }

    /// This scope's own compensation handler. Not uninstalled.
    pub fn get_self_compensation(&self) -> Option<ContinuationRef> {
        self.compensations.get(&self.id).cloned()
    }

    /// Take the compensation handler installed for `scope_name`.
    ///
    /// The handler is uninstalled so a compensation runs at most once.
    pub fn get_compensation(&mut self, scope_name: &str) -> Option<ContinuationRef> {
        self.compensations.remove(scope_name)
    }

    /// Adopt every compensation handler of `other`, overwriting on id clash
    pub fn merge_compensations(&mut self, other: &Scope) {
        self.compensations.extend(
            other
                .compensations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    /// Same as [`merge_compensations`](Self::merge_compensations) for a
    /// scope that is no longer needed
    pub(crate) fn absorb_compensations(&mut self, other: Scope) {
        self.compensations.extend(other.compensations);
    }

    pub fn has_compensation(&self, scope_name: &str) -> bool {
        self.compensations.contains_key(scope_name)
    }

    pub fn fault_handler_count(&self) -> usize {
        self.fault_handlers.len()
    }
}
