//! Collection functions.
//!
//! A collection function evaluates one [`FunctionCall`] in both backends: over
//! an in-memory entity through [`ArrayCollectionHelper`] and as a SQL
//! expression through [`DbalQueryBuilderHelper`]. Both evaluations must agree
//! on which entities match.
//!
//! Functions are looked up by name in a [`FunctionRegistry`] built with the
//! model. The built-in names are the constants of this module; custom
//! functions can be registered under any other name.

mod aggregate;
mod compare;
mod fetch_property;
mod junction;
mod like;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ormset_proto::{Aggregator, Arg, FunctionCall, AND, OR};

use crate::collection::helpers::{
    ArrayCollectionHelper, ArrayExpressionResult, DbalExpressionResult, DbalQueryBuilderHelper,
};
use crate::dbal::QueryBuilder;
use crate::entity::EntityRef;
use crate::error::{Error, Result};

pub use aggregate::{AggregateFunction, AggregateKind};
pub use compare::{CompareFunction, CompareOperator};
pub use fetch_property::FetchPropertyFunction;
pub use junction::{Junction, JunctionFunction};
pub use like::LikeFunction;

pub const COMPARE_EQUALS: &str = "compare_equals";
pub const COMPARE_NOT_EQUALS: &str = "compare_not_equals";
pub const COMPARE_GREATER_THAN: &str = "compare_greater_than";
pub const COMPARE_GREATER_THAN_EQUALS: &str = "compare_greater_than_equals";
pub const COMPARE_SMALLER_THAN: &str = "compare_smaller_than";
pub const COMPARE_SMALLER_THAN_EQUALS: &str = "compare_smaller_than_equals";
pub const LIKE: &str = "like";
pub const COUNT: &str = "count";
pub const SUM: &str = "sum";
pub const AVG: &str = "avg";
pub const MIN: &str = "min";
pub const MAX: &str = "max";
pub const FETCH_PROPERTY: &str = "fetch_property";

/// A function usable in `find_by` conditions and `order_by` expressions.
pub trait CollectionFunction: Send + Sync {
    /// Whether the function produces a boolean usable as a filter.
    fn is_predicate(&self) -> bool {
        true
    }

    /// Evaluate against an in-memory entity.
    fn process_array_expression(
        &self,
        helper: &ArrayCollectionHelper<'_>,
        entity: &EntityRef,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult>;

    /// Build the SQL expression for a query rooted at `builder`'s FROM alias.
    fn process_query_builder_expression(
        &self,
        helper: &DbalQueryBuilderHelper<'_>,
        builder: &QueryBuilder,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult>;
}

/// Functions by name.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn CollectionFunction>>,
}

impl FunctionRegistry {
    /// A registry without any function.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register a function, replacing one with the same name.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn CollectionFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Look up a function.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn CollectionFunction>> {
        self.functions
            .get(name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown collection function '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Check that `call` and every nested call name a registered function.
    pub fn validate(&self, call: &FunctionCall) -> Result<()> {
        self.get(&call.function)?;
        for arg in &call.args {
            if let Arg::Call(nested) = arg {
                self.validate(nested)?;
            }
        }
        Ok(())
    }

    /// Check that `call` can be used as a filter.
    pub fn validate_predicate(&self, call: &FunctionCall) -> Result<()> {
        self.validate(call)?;
        if !self.get(&call.function)?.is_predicate() {
            return Err(Error::invalid_argument(format!(
                "'{}' does not produce a condition",
                call.function
            )));
        }
        Ok(())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (name, operator) in [
            (COMPARE_EQUALS, CompareOperator::Equals),
            (COMPARE_NOT_EQUALS, CompareOperator::NotEquals),
            (COMPARE_GREATER_THAN, CompareOperator::GreaterThan),
            (COMPARE_GREATER_THAN_EQUALS, CompareOperator::GreaterThanEquals),
            (COMPARE_SMALLER_THAN, CompareOperator::SmallerThan),
            (COMPARE_SMALLER_THAN_EQUALS, CompareOperator::SmallerThanEquals),
        ] {
            registry.register(name, Arc::new(CompareFunction::new(operator)));
        }
        registry.register(LIKE, Arc::new(LikeFunction::new()));
        registry.register(AND, Arc::new(JunctionFunction::new(Junction::And)));
        registry.register(OR, Arc::new(JunctionFunction::new(Junction::Or)));
        for (name, kind) in [
            (COUNT, AggregateKind::Count),
            (SUM, AggregateKind::Sum),
            (AVG, AggregateKind::Avg),
            (MIN, AggregateKind::Min),
            (MAX, AggregateKind::Max),
        ] {
            registry.register(name, Arc::new(AggregateFunction::new(kind)));
        }
        registry.register(FETCH_PROPERTY, Arc::new(FetchPropertyFunction));
        registry
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

/// Split `[lhs, rhs]` arguments of a binary function.
pub(crate) fn binary_args<'a>(function: &str, args: &'a [Arg]) -> Result<(&'a Arg, &'a Arg)> {
    match args {
        [lhs, rhs] => Ok((lhs, rhs)),
        _ => Err(Error::invalid_argument(format!(
            "'{}' expects 2 arguments, got {}",
            function,
            args.len()
        ))),
    }
}
