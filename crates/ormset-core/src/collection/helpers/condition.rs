//! Normalization of conditions into function call trees.

use ormset_lang::{parse_property_expr, parse_property_operator, Operator};
use ormset_proto::{Aggregator, Arg, Condition, FunctionCall, LikeExpression, OrderExpr, Value, AND, OR};

use crate::collection::functions::{
    COMPARE_EQUALS, COMPARE_GREATER_THAN, COMPARE_GREATER_THAN_EQUALS, COMPARE_NOT_EQUALS,
    COMPARE_SMALLER_THAN, COMPARE_SMALLER_THAN_EQUALS, FETCH_PROPERTY, LIKE,
};
use crate::error::{Error, Result};

/// Turn a condition into the function call evaluated by both backends.
///
/// `"path(op)" => value` pairs become comparison calls, junctions become
/// `and` / `or` calls carrying their aggregator. Paths are parsed here so
/// malformed expressions fail before any query runs.
pub fn normalize(condition: &Condition) -> Result<FunctionCall> {
    match condition {
        Condition::Property { expr, value } => normalize_property(expr, value),
        Condition::And { aggregator, items } => junction(AND, aggregator, items),
        Condition::Or { aggregator, items } => junction(OR, aggregator, items),
        Condition::Call(call) => normalize_call(call),
    }
}

/// Turn an ordering expression into a function call.
pub fn normalize_order(expr: &OrderExpr) -> Result<FunctionCall> {
    match expr {
        OrderExpr::Path(path) => {
            parse_property_expr(path)?;
            Ok(FunctionCall::new(FETCH_PROPERTY, vec![Arg::Expr(path.clone())]))
        }
        OrderExpr::Call(call) => normalize_call(call),
    }
}

fn normalize_property(expr: &str, value: &Arg) -> Result<FunctionCall> {
    let (operator, path) = parse_property_operator(expr)?;
    let function = match operator {
        Operator::Equals => COMPARE_EQUALS,
        Operator::NotEquals => COMPARE_NOT_EQUALS,
        Operator::GreaterThan => COMPARE_GREATER_THAN,
        Operator::GreaterThanOrEqual => COMPARE_GREATER_THAN_EQUALS,
        Operator::LessThan => COMPARE_SMALLER_THAN,
        Operator::LessThanOrEqual => COMPARE_SMALLER_THAN_EQUALS,
        Operator::Like => LIKE,
    };
    let rhs = match (operator, value) {
        (Operator::Like, Arg::Like(like)) => Arg::Like(like.clone()),
        (Operator::Like, Arg::Value(Value::String(pattern))) => {
            Arg::Like(LikeExpression::raw(pattern.clone()))
        }
        (Operator::Like, other) => {
            return Err(Error::invalid_argument(format!(
                "'{}' needs a LIKE pattern, got {:?}",
                expr, other
            )))
        }
        (_, Arg::Like(_)) => {
            return Err(Error::invalid_argument(format!(
                "LIKE pattern used with a non-LIKE operator in '{}'",
                expr
            )))
        }
        (_, Arg::Value(value)) => Arg::Value(value.clone()),
        (_, Arg::Expr(_) | Arg::Call(_)) => {
            return Err(Error::invalid_argument(format!(
                "'{}' must be compared with a value",
                expr
            )))
        }
    };
    Ok(FunctionCall::new(function, vec![Arg::Expr(path), rhs]))
}

fn junction(
    function: &str,
    aggregator: &Option<Aggregator>,
    items: &[Condition],
) -> Result<FunctionCall> {
    let args = items
        .iter()
        .map(|item| normalize(item).map(Arg::Call))
        .collect::<Result<Vec<_>>>()?;
    let call = FunctionCall::new(function, args);
    Ok(match aggregator {
        Some(aggregator) => call.with_aggregator(aggregator.clone()),
        None => call,
    })
}

fn normalize_call(call: &FunctionCall) -> Result<FunctionCall> {
    let args = call
        .args
        .iter()
        .map(|arg| match arg {
            Arg::Expr(path) => {
                parse_property_expr(path)?;
                Ok(arg.clone())
            }
            Arg::Call(nested) => normalize_call(nested).map(Arg::Call),
            Arg::Value(_) | Arg::Like(_) => Ok(arg.clone()),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FunctionCall {
        function: call.function.clone(),
        args,
        aggregator: call.aggregator.clone(),
    })
}
