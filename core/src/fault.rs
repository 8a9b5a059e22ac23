//! Fault values
//!
//! A fault is a named value raised by executing code. Handlers are looked up
//! by fault name against the nearest enclosing scope. Evaluation errors
//! (bad casts, division by zero) are converted into faults with fixed names so
//! they go through the same handler lookup as any user fault.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/* ===================== Well-known fault names ===================== */

/// Handler name used when no handler is installed for a specific fault
pub const DEFAULT_HANDLER: &str = "default";

/// Raised when an operand cannot be converted to the required type
pub const CASTING_EXCEPTION: &str = "CastingException";

/// Raised on arithmetic errors such as division by zero
pub const ARITHMETIC_EXCEPTION: &str = "ArithmeticException";

/// Raised into a wait that was cancelled without a killer fault
pub const INTERRUPTED: &str = "Interrupted";

/* ===================== Fault ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}

impl Fault {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
            payload: JsonValue::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    pub fn interrupted() -> Self {
        Fault::new(INTERRUPTED).with_message("Wait interrupted by cancellation")
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.name, msg),
            None => write!(f, "{}", self.name),
        }
    }
}

impl std::error::Error for Fault {}

/* ===================== Evaluation errors ===================== */

/// Errors produced while evaluating expressions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("type casting failed: {0}")]
    TypeCasting(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

impl From<EvalError> for Fault {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::TypeCasting(msg) => Fault::new(CASTING_EXCEPTION).with_message(msg),
            EvalError::Arithmetic(msg) => Fault::new(ARITHMETIC_EXCEPTION).with_message(msg),
        }
    }
}
