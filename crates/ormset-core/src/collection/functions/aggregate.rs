//! Aggregate functions over to-many paths.
//!
//! `count`, `sum`, `avg`, `min` and `max` reduce the values reached through a
//! to-many path to one value per entity. NULL inputs are ignored, as SQL
//! aggregates do; over no input `count` is 0 and the others are NULL.

use std::cmp::Ordering;

use ormset_proto::{Aggregator, Arg, Value};

use crate::collection::helpers::{
    ArrayCollectionHelper, ArrayExpressionResult, DbalExpressionResult, DbalQueryBuilderHelper,
};
use crate::dbal::QueryBuilder;
use crate::entity::EntityRef;
use crate::error::{Error, Result};

use super::CollectionFunction;

/// Reduction applied by an [`AggregateFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    fn name(self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
        }
    }

    fn sql(self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }

    /// Reduce non-null values.
    pub fn reduce(self, values: &[Value]) -> Value {
        match self {
            AggregateKind::Count => Value::Int(values.len() as i64),
            _ if values.is_empty() => Value::Null,
            AggregateKind::Sum if values.iter().all(|v| matches!(v, Value::Int(_))) => {
                Value::Int(values.iter().filter_map(Value::as_i64).sum())
            }
            AggregateKind::Sum => Value::Float(values.iter().filter_map(Value::as_f64).sum()),
            AggregateKind::Avg => {
                let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                Value::Float(sum / values.len() as f64)
            }
            AggregateKind::Min => extreme(values, Ordering::Less),
            AggregateKind::Max => extreme(values, Ordering::Greater),
        }
    }
}

fn extreme(values: &[Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            Some(current) if value.compare(current) != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

/// `count(path)`, `sum(path)`, `avg(path)`, `min(path)`, `max(path)`.
///
/// The result is a value, not a condition; compare it to filter, for example
/// `compare_greater_than(count("books"), 2)`, or order by it.
#[derive(Debug, Clone, Copy)]
pub struct AggregateFunction {
    kind: AggregateKind,
}

impl AggregateFunction {
    pub fn new(kind: AggregateKind) -> Self {
        Self { kind }
    }

    fn path<'a>(&self, args: &'a [Arg], aggregator: Option<&Aggregator>) -> Result<&'a str> {
        if aggregator.is_some() {
            return Err(Error::invalid_state(format!(
                "'{}' cannot be used inside an aggregated condition",
                self.kind.name()
            )));
        }
        match args {
            [Arg::Expr(path)] => Ok(path),
            [Arg::Call(_)] => Err(Error::invalid_state(format!(
                "'{}' cannot aggregate the result of another function",
                self.kind.name()
            ))),
            _ => Err(Error::invalid_argument(format!(
                "'{}' expects one property path argument",
                self.kind.name()
            ))),
        }
    }
}

impl CollectionFunction for AggregateFunction {
    fn is_predicate(&self) -> bool {
        false
    }

    fn process_array_expression(
        &self,
        helper: &ArrayCollectionHelper<'_>,
        entity: &EntityRef,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        let path = self.path(args, aggregator)?;
        let ArrayExpressionResult::Multi { items, .. } = helper.get_value(entity, path, None)?
        else {
            return Err(Error::invalid_argument(format!(
                "'{}' over '{}' needs a to-many relationship path",
                self.kind.name(),
                path
            )));
        };
        let values: Vec<Value> = items
            .into_iter()
            .map(|(_, value)| value)
            .filter(|value| !value.is_null())
            .collect();
        Ok(ArrayExpressionResult::single(self.kind.reduce(&values)))
    }

    fn process_query_builder_expression(
        &self,
        helper: &DbalQueryBuilderHelper<'_>,
        builder: &QueryBuilder,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        let path = self.path(args, aggregator)?;
        let mut result = helper.aggregate_subquery(builder, path, self.kind.sql())?;
        result.nullable = self.kind != AggregateKind::Count;
        Ok(result)
    }
}
