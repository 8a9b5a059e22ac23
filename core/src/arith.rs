//! Arithmetic over session values
//!
//! Helpers for continuations that compute on values stored in session data.
//! Errors come back as [`EvalError`] so callers can raise them as faults with
//! `?` (via `From<EvalError> for Fault`) instead of aborting the session.

use serde_json::{Number, Value as JsonValue};

use crate::fault::EvalError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Cast a value to a number.
///
/// Undefined (null) counts as zero and booleans as 0/1. Strings must parse as
/// a number; anything else is a casting error.
fn to_num(value: &JsonValue) -> Result<Num, EvalError> {
    match value {
        JsonValue::Null => Ok(Num::Int(0)),
        JsonValue::Bool(b) => Ok(Num::Int(i64::from(*b))),
        JsonValue::Number(n) => number_to_num(n),
        JsonValue::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(Num::Int(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(Num::Float(f))
            } else {
                Err(EvalError::TypeCasting(format!(
                    "Could not cast string '{}' to a number",
                    s
                )))
            }
        }
        JsonValue::Array(_) | JsonValue::Object(_) => Err(EvalError::TypeCasting(
            "Could not cast a structured value to a number".to_string(),
        )),
    }
}

fn number_to_num(n: &Number) -> Result<Num, EvalError> {
    if let Some(i) = n.as_i64() {
        Ok(Num::Int(i))
    } else if let Some(f) = n.as_f64() {
        Ok(Num::Float(f))
    } else {
        Err(EvalError::TypeCasting(format!("Number {} is out of range", n)))
    }
}

fn from_num(num: Num) -> Result<JsonValue, EvalError> {
    match num {
        Num::Int(i) => Ok(JsonValue::from(i)),
        Num::Float(f) => Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| EvalError::Arithmetic(format!("Result {} is not a finite number", f))),
    }
}

fn overflow(op: &str) -> EvalError {
    EvalError::Arithmetic(format!("Integer overflow in {}", op))
}

pub fn multiply(lhs: &JsonValue, rhs: &JsonValue) -> Result<JsonValue, EvalError> {
    let result = match (to_num(lhs)?, to_num(rhs)?) {
        (Num::Int(a), Num::Int(b)) => Num::Int(a.checked_mul(b).ok_or_else(|| overflow("multiply"))?),
        (a, b) => Num::Float(a.as_f64() * b.as_f64()),
    };
    from_num(result)
}

/// Divide `lhs` by `rhs`. Division by zero is an arithmetic error for both
/// integers and floats.
pub fn divide(lhs: &JsonValue, rhs: &JsonValue) -> Result<JsonValue, EvalError> {
    let (a, b) = (to_num(lhs)?, to_num(rhs)?);
    if b.as_f64() == 0.0 {
        return Err(EvalError::Arithmetic("Division by zero".to_string()));
    }
    let result = match (a, b) {
        (Num::Int(a), Num::Int(b)) => Num::Int(a.checked_div(b).ok_or_else(|| overflow("divide"))?),
        (a, b) => Num::Float(a.as_f64() / b.as_f64()),
    };
    from_num(result)
}

pub fn modulo(lhs: &JsonValue, rhs: &JsonValue) -> Result<JsonValue, EvalError> {
    let (a, b) = (to_num(lhs)?, to_num(rhs)?);
    if b.as_f64() == 0.0 {
        return Err(EvalError::Arithmetic("Modulo by zero".to_string()));
    }
    let result = match (a, b) {
        (Num::Int(a), Num::Int(b)) => Num::Int(a.checked_rem(b).ok_or_else(|| overflow("modulo"))?),
        (a, b) => Num::Float(a.as_f64() % b.as_f64()),
    };
    from_num(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{Fault, ARITHMETIC_EXCEPTION, CASTING_EXCEPTION};
    use serde_json::json;

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(multiply(&json!(6), &json!(7)).unwrap(), json!(42));
        assert_eq!(divide(&json!(7), &json!(2)).unwrap(), json!(3));
        assert_eq!(modulo(&json!(7), &json!(2)).unwrap(), json!(1));
    }

    #[test]
    fn test_mixed_operands_promote_to_float() {
        assert_eq!(divide(&json!(7.0), &json!(2)).unwrap(), json!(3.5));
        assert_eq!(multiply(&json!("1.5"), &json!(2)).unwrap(), json!(3.0));
    }

    #[test]
    fn test_division_by_zero_is_arithmetic_fault() {
        let err = divide(&json!(10), &json!(0)).unwrap_err();
        let fault: Fault = err.into();
        assert_eq!(fault.name, ARITHMETIC_EXCEPTION);

        // Undefined counts as zero
        assert!(matches!(
            modulo(&json!(10), &JsonValue::Null),
            Err(EvalError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_non_numeric_operand_is_casting_fault() {
        let err = multiply(&json!("abc"), &json!(2)).unwrap_err();
        let fault: Fault = err.into();
        assert_eq!(fault.name, CASTING_EXCEPTION);

        assert!(matches!(
            divide(&json!({ "a": 1 }), &json!(2)),
            Err(EvalError::TypeCasting(_))
        ));
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        assert!(matches!(
            multiply(&json!(i64::MAX), &json!(2)),
            Err(EvalError::Arithmetic(_))
        ));
        assert!(matches!(
            divide(&json!(i64::MIN), &json!(-1)),
            Err(EvalError::Arithmetic(_))
        ));
    }
}
