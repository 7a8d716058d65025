//! ormset IR types.
//!
//! This crate defines the values and filter trees exchanged between callers,
//! the collection engine and the storage layer.
//!
//! # Modules
//!
//! - [`value`] - Runtime value type for properties, arguments and columns
//! - [`condition`] - Filter conditions, function calls, aggregators and ordering
//! - [`error`] - IR error types
//!
//! # Serialization
//!
//! All types derive `serde::Serialize` and `serde::Deserialize`, so conditions
//! can be stored or hashed as JSON:
//!
//! ```
//! use ormset_proto::{Condition, Value};
//!
//! let condition = Condition::property("books->year>", 2000);
//! let json = ormset_proto::to_json(&condition).unwrap();
//! assert!(json.contains("books->year>"));
//! # let _ = Value::Null;
//! ```

pub mod condition;
pub mod error;
pub mod value;

pub use condition::{
    Aggregator, Arg, Condition, Direction, FunctionCall, LikeExpression, LikeMode, OrderExpr, AND,
    OR,
};
pub use error::Error;
pub use value::Value;

/// Serialize any IR type as JSON.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_json_roundtrip() {
        let condition = Condition::or(vec![
            Condition::property("name", "Alice"),
            Condition::none(Condition::property("books->year<", 2000)),
        ]);
        let json = to_json(&condition).unwrap();
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(condition, back);
    }
}
