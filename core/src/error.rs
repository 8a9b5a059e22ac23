//! Engine errors
//!
//! Faults are values the running program handles; these are failures of the
//! engine protocol itself.

use thiserror::Error;

use crate::engine::ContextId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Neither the context nor any of its ancestors has an active scope
    #[error("no scope is active in context {context} or any of its ancestors")]
    NoScope { context: ContextId },

    /// `pop_scope` was called on a context whose own scope stack is empty
    #[error("cannot pop scope: context {context} has no scope of its own")]
    ScopeUnderflow { context: ContextId },

    #[error("no tokio runtime is available to schedule contexts on")]
    NoRuntime,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type EngineResult<T> = Result<T, EngineError>;
