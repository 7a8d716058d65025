//! Comparison functions.

use std::cmp::Ordering;
use std::sync::Arc;

use ormset_proto::{Aggregator, Arg, Value};

use crate::collection::helpers::{
    ArrayCollectionHelper, ArrayExpressionResult, DbalExpressionResult, DbalQueryBuilderHelper,
};
use crate::dbal::{Fragment, QueryBuilder, SqlArg};
use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::metadata::PropertyMetadata;

use super::{binary_args, CollectionFunction};

/// Comparison applied by a [`CompareFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEquals,
    SmallerThan,
    SmallerThanEquals,
}

impl CompareOperator {
    fn name(self) -> &'static str {
        match self {
            CompareOperator::Equals => "compare_equals",
            CompareOperator::NotEquals => "compare_not_equals",
            CompareOperator::GreaterThan => "compare_greater_than",
            CompareOperator::GreaterThanEquals => "compare_greater_than_equals",
            CompareOperator::SmallerThan => "compare_smaller_than",
            CompareOperator::SmallerThanEquals => "compare_smaller_than_equals",
        }
    }

    fn sql(self) -> &'static str {
        match self {
            CompareOperator::Equals => "=",
            CompareOperator::NotEquals => "!=",
            CompareOperator::GreaterThan => ">",
            CompareOperator::GreaterThanEquals => ">=",
            CompareOperator::SmallerThan => "<",
            CompareOperator::SmallerThanEquals => "<=",
        }
    }

    fn is_ordering(self) -> bool {
        !matches!(self, CompareOperator::Equals | CompareOperator::NotEquals)
    }
}

/// `lhs <op> value` where `lhs` is a property path or a function call.
///
/// Equality accepts a list (`IN`) and NULL (`IS NULL`). For a composite
/// primary key the value is a tuple or a list of tuples.
#[derive(Debug, Clone, Copy)]
pub struct CompareFunction {
    operator: CompareOperator,
}

impl CompareFunction {
    pub fn new(operator: CompareOperator) -> Self {
        Self { operator }
    }

    fn value(&self, rhs: &Arg, property: Option<&Arc<PropertyMetadata>>) -> Result<Value> {
        let Arg::Value(value) = rhs else {
            return Err(Error::invalid_argument(format!(
                "'{}' expects a value as its second argument",
                self.operator.name()
            )));
        };
        if self.operator.is_ordering() && (value.is_null() || value.is_list()) {
            return Err(Error::invalid_argument(format!(
                "'{}' cannot compare with {}",
                self.operator.name(),
                value.type_name()
            )));
        }
        match property {
            Some(property) if !property.is_primary_proxy() => property.scalar_type.coerce(value),
            _ => Ok(value.clone()),
        }
    }

    /// Evaluate the comparison for one in-memory value.
    pub fn matches(&self, value: &Value, rhs: &Value, arity: usize) -> Result<bool> {
        Ok(match self.operator {
            CompareOperator::Equals => equals(value, rhs, arity)?,
            CompareOperator::NotEquals => !equals(value, rhs, arity)?,
            CompareOperator::GreaterThan => value.compare(rhs) == Some(Ordering::Greater),
            CompareOperator::GreaterThanEquals => {
                matches!(value.compare(rhs), Some(Ordering::Greater | Ordering::Equal))
            }
            CompareOperator::SmallerThan => value.compare(rhs) == Some(Ordering::Less),
            CompareOperator::SmallerThanEquals => {
                matches!(value.compare(rhs), Some(Ordering::Less | Ordering::Equal))
            }
        })
    }

    fn predicate(&self, left: &DbalExpressionResult, value: Value) -> Result<Fragment> {
        if left.columns.len() > 1 {
            let tuples = tuples(&value, left.columns.len())?;
            let rows: Vec<Vec<(String, Value)>> = tuples
                .into_iter()
                .map(|tuple| left.columns.iter().cloned().zip(tuple).collect())
                .collect();
            return Ok(match (self.operator, rows.is_empty()) {
                (CompareOperator::Equals, true) => Fragment::raw("1=0"),
                (CompareOperator::NotEquals, true) => Fragment::raw("1=1"),
                (CompareOperator::Equals, false) => {
                    Fragment::new("%multiOr", vec![SqlArg::MultiOr(rows)])
                }
                (CompareOperator::NotEquals, false) => {
                    Fragment::new("NOT (%multiOr)", vec![SqlArg::MultiOr(rows)])
                }
                _ => {
                    return Err(Error::invalid_argument(format!(
                        "'{}' is not defined for composite keys",
                        self.operator.name()
                    )))
                }
            });
        }

        let expr = left.operand();
        let is_null = Fragment::new("%ex IS NULL", vec![SqlArg::Expr(expr.clone())]);
        let is_not_null = Fragment::new("%ex IS NOT NULL", vec![SqlArg::Expr(expr.clone())]);
        Ok(match (self.operator, value) {
            (CompareOperator::Equals, Value::Null) => is_null,
            (CompareOperator::NotEquals, Value::Null) => is_not_null,
            (CompareOperator::Equals, Value::List(items)) => {
                let (values, has_null) = split_nulls(items);
                let within = Fragment::new(
                    "%ex IN %any[]",
                    vec![SqlArg::Expr(expr), SqlArg::Values(values.clone())],
                );
                match (values.is_empty(), has_null) {
                    (true, false) => Fragment::raw("1=0"),
                    (true, true) => is_null,
                    (false, false) => within,
                    (false, true) => Fragment::or(vec![within, is_null]),
                }
            }
            (CompareOperator::NotEquals, Value::List(items)) => {
                let (values, has_null) = split_nulls(items);
                let outside = Fragment::new(
                    "%ex NOT IN %any[]",
                    vec![SqlArg::Expr(expr), SqlArg::Values(values.clone())],
                );
                match (values.is_empty(), has_null) {
                    (true, false) => Fragment::raw("1=1"),
                    (true, true) => is_not_null,
                    (false, true) => Fragment::and(vec![outside, is_not_null]),
                    (false, false) if left.nullable => Fragment::or(vec![outside, is_null]),
                    (false, false) => outside,
                }
            }
            (CompareOperator::NotEquals, value) if left.nullable => Fragment::or(vec![
                Fragment::new(
                    "%ex != %any",
                    vec![SqlArg::Expr(expr), SqlArg::Value(value)],
                ),
                is_null,
            ]),
            (operator, value) => Fragment::new(
                format!("%ex {} %any", operator.sql()),
                vec![SqlArg::Expr(expr), SqlArg::Value(value)],
            ),
        })
    }
}

impl CollectionFunction for CompareFunction {
    fn process_array_expression(
        &self,
        helper: &ArrayCollectionHelper<'_>,
        entity: &EntityRef,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        let (lhs, rhs) = binary_args(self.operator.name(), args)?;
        let left = helper.resolve_operand(entity, lhs, aggregator)?;
        let value = self.value(rhs, left.property())?;
        let composite = left.property().is_some_and(|p| p.is_primary_proxy());
        left.map(|item| {
            let arity = match item {
                Value::List(parts) if composite => parts.len(),
                _ => 1,
            };
            Ok(Value::Bool(self.matches(item, &value, arity)?))
        })
    }

    fn process_query_builder_expression(
        &self,
        helper: &DbalQueryBuilderHelper<'_>,
        builder: &QueryBuilder,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        let (lhs, rhs) = binary_args(self.operator.name(), args)?;
        let left = helper.resolve_operand(builder, lhs, aggregator)?;
        let value = self.value(rhs, left.property.as_ref())?;
        let predicate = self.predicate(&left, value)?;
        Ok(left.into_predicate(predicate))
    }
}

fn split_nulls(items: Vec<Value>) -> (Vec<Value>, bool) {
    let has_null = items.iter().any(Value::is_null);
    (items.into_iter().filter(|v| !v.is_null()).collect(), has_null)
}

/// Key tuples of a composite key comparison value.
///
/// A list of scalars is a single tuple, a list of lists is a set of tuples.
fn tuples(value: &Value, arity: usize) -> Result<Vec<Vec<Value>>> {
    let Value::List(items) = value else {
        return Err(Error::invalid_argument(format!(
            "a composite key needs {} values, got {}",
            arity,
            value.type_name()
        )));
    };
    let tuples: Vec<Vec<Value>> = if items.iter().all(Value::is_list) && !items.is_empty() {
        items
            .iter()
            .filter_map(|item| item.as_list().map(<[Value]>::to_vec))
            .collect()
    } else if items.is_empty() {
        Vec::new()
    } else {
        vec![items.clone()]
    };
    for tuple in &tuples {
        if tuple.len() != arity {
            return Err(Error::invalid_argument(format!(
                "a composite key needs {} values, got {}",
                arity,
                tuple.len()
            )));
        }
    }
    Ok(tuples)
}

fn equals(value: &Value, rhs: &Value, arity: usize) -> Result<bool> {
    if arity > 1 {
        return Ok(tuples(rhs, arity)?
            .iter()
            .any(|tuple| value.loose_eq(&Value::List(tuple.clone()))));
    }
    Ok(match rhs {
        Value::Null => value.is_null(),
        Value::List(items) => items.iter().any(|item| match (item.is_null(), value.is_null()) {
            (true, true) => true,
            (false, false) => value.loose_eq(item),
            _ => false,
        }),
        rhs => !value.is_null() && value.loose_eq(rhs),
    })
}
