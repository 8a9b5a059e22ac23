//! # Session execution engine
//!
//! Per-session run state for the service interpreter:
//!
//! 1. **Scopes** (`scope.rs`): fault handler and compensation tables
//! 2. **Cancellation** (`cancel.rs`): handles for in-flight operations,
//!    interrupted when a context is killed
//! 3. **Contexts** (`context.rs`): scope stack, continuation stacks,
//!    kill and pause state
//! 4. **Delegation** (`delegation.rs`): scope lookups walking up the
//!    context tree

pub mod cancel;
mod context;
mod delegation;
pub mod scope;

#[cfg(test)]
mod tests;

pub use cancel::{CancelHandle, CancellationRegistry};
pub use context::{ContextId, ExecutionContext, RunState, ScopeExecution};
pub use scope::Scope;
