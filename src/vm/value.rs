use std::cmp::Ordering;
use std::fmt;

use super::VmError;

/// Register and memory cell content. Behaviour is decided by the live tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

type Result<T> = std::result::Result<T, VmError>;

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }

    pub fn from_bool(b: bool) -> Self {
        Value::Int(b as i64)
    }

    /// Integer view used by `jne` and `exit`. Floats truncate toward zero.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(n) => Ok(*n as i64),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            other => Err(mismatch("number", other)),
        }
    }

    /// `self + rhs`. Strings concatenate in operand order; Null adopts the other side.
    pub fn add(&self, rhs: &Value) -> Result<Value> {
        Ok(match (self, rhs) {
            (Value::Null, other) | (other, Value::Null) => other.clone(),
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{self}{rhs}")),
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (a, b) => Value::Float(a.as_float()? + b.as_float()?),
        })
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value> {
        self.numeric("subtract", rhs, i64::wrapping_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value> {
        self.numeric("multiply", rhs, i64::wrapping_mul, |a, b| a * b)
    }

    pub fn div(&self, rhs: &Value) -> Result<Value> {
        match rhs {
            Value::Int(0) => return Err(VmError::DivisionByZero),
            Value::Float(n) if *n == 0.0 => return Err(VmError::DivisionByZero),
            _ => {}
        }
        self.numeric("divide", rhs, i64::wrapping_div, |a, b| a / b)
    }

    fn numeric(
        &self,
        verb: &str,
        rhs: &Value,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                Ok(Value::Float(float_op(self.as_float()?, rhs.as_float()?)))
            }
            _ => Err(VmError::TypeMismatch(format!(
                "cannot {verb} {} and {}",
                self.type_name(),
                rhs.type_name()
            ))),
        }
    }

    /// Equality across tags: numbers compare by value, mismatched kinds are unequal.
    pub fn equals(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float().ok() == rhs.as_float().ok()
            }
            _ => false,
        }
    }

    /// Ordering for `< > <= >=`. Null and mixed string/number operands are errors.
    pub fn order(&self, rhs: &Value) -> Result<Ordering> {
        let ordering = match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&rhs.as_float()?)
            }
            _ => {
                return Err(VmError::TypeMismatch(format!(
                    "cannot order {} against {}",
                    self.type_name(),
                    rhs.type_name()
                )));
            }
        };
        // NaN has no ordering.
        ordering.ok_or_else(|| VmError::TypeMismatch("cannot order NaN".into()))
    }
}

fn mismatch(expected: &str, found: &Value) -> VmError {
    VmError::TypeMismatch(format!("expected {expected}, got {}", found.type_name()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}
