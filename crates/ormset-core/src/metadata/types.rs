//! Scalar storage types of entity properties.

use ormset_proto::Value;

use crate::error::{Error, Result};

/// Scalar type of a stored property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    /// Microseconds since Unix epoch.
    Timestamp,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Float | ScalarType::Bool)
    }

    /// Coerce a value into this type.
    ///
    /// Storage drivers hand back integers for booleans and timestamps and
    /// callers may pass numeric strings; both are normalized here. Lists are
    /// coerced element-wise. Null passes through.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        let coerced = match (self, value) {
            (_, Value::Null) => Value::Null,
            (_, Value::List(items)) => Value::List(
                items
                    .iter()
                    .map(|item| self.coerce(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            (ScalarType::Bool, Value::Bool(b)) => Value::Bool(*b),
            (ScalarType::Bool, Value::Int(i)) => Value::Bool(*i != 0),
            (ScalarType::Int, Value::Int(i)) => Value::Int(*i),
            (ScalarType::Int, Value::Bool(b)) => Value::Int(*b as i64),
            (ScalarType::Int, Value::Float(f)) if f.fract() == 0.0 => Value::Int(*f as i64),
            (ScalarType::Int, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| mismatch(self, value))?,
            (ScalarType::Float, Value::Float(f)) => Value::Float(*f),
            (ScalarType::Float, Value::Int(i)) => Value::Float(*i as f64),
            (ScalarType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch(self, value))?,
            (ScalarType::String, Value::String(s)) => Value::String(s.clone()),
            (ScalarType::String, Value::Int(_) | Value::Float(_)) => {
                Value::String(value.to_string())
            }
            (ScalarType::Bytes, Value::Bytes(b)) => Value::Bytes(b.clone()),
            (ScalarType::Bytes, Value::String(s)) => Value::Bytes(s.as_bytes().to_vec()),
            (ScalarType::Timestamp, Value::Timestamp(t)) => Value::Timestamp(*t),
            (ScalarType::Timestamp, Value::Int(t)) => Value::Timestamp(*t),
            _ => return Err(mismatch(self, value)),
        };
        Ok(coerced)
    }
}

fn mismatch(ty: &ScalarType, value: &Value) -> Error {
    Error::invalid_argument(format!(
        "cannot use {} value '{}' as {:?}",
        value.type_name(),
        value,
        ty
    ))
}
