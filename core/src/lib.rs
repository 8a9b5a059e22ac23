pub mod arith;
pub mod cli;
pub mod config;
pub mod continuation;
pub mod demo;
pub mod engine;
pub mod error;
pub mod fault;
pub mod logging;
pub mod scheduler;
pub mod session;

// Re-export main types
pub use config::{Config, EngineConfig, LoggingConfig};
pub use continuation::{from_async, from_fn, Continuation, ContinuationRef};
pub use engine::{CancelHandle, ContextId, ExecutionContext, RunState, Scope, ScopeExecution};
pub use error::{EngineError, EngineResult};
pub use fault::{EvalError, Fault};
pub use scheduler::{Scheduler, SessionOutcome};
pub use session::{InputOperation, MailboxSession, Session, SessionData, SessionMessage};
