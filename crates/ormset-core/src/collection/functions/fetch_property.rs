//! Plain property access, used for ordering by a path.

use ormset_proto::{Aggregator, Arg};

use crate::collection::helpers::{
    ArrayCollectionHelper, ArrayExpressionResult, DbalExpressionResult, DbalQueryBuilderHelper,
    PathMode,
};
use crate::dbal::QueryBuilder;
use crate::entity::EntityRef;
use crate::error::{Error, Result};

use super::{CollectionFunction, FETCH_PROPERTY};

/// `fetch_property(path)`: the value of a property path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchPropertyFunction;

fn path(args: &[Arg]) -> Result<&str> {
    match args {
        [Arg::Expr(path)] => Ok(path),
        _ => Err(Error::invalid_argument(format!(
            "'{}' expects one property path argument",
            FETCH_PROPERTY
        ))),
    }
}

impl CollectionFunction for FetchPropertyFunction {
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
        helper.get_value(entity, path(args)?, aggregator)
    }

    fn process_query_builder_expression(
        &self,
        helper: &DbalQueryBuilderHelper<'_>,
        builder: &QueryBuilder,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        helper.fetch_path(builder, path(args)?, aggregator, PathMode::Predicate)
    }
}
