//! Evaluation helpers shared by the collection functions.

mod array;
mod condition;
mod dbal;

use ormset_proto::Aggregator;

use crate::error::{Error, Result};

pub use array::{compare_sort_values, ArrayCollectionHelper, ArrayExpressionResult};
pub(crate) use array::truthy;
pub use condition::{normalize, normalize_order};
pub use dbal::{
    DbalExpressionResult, DbalQueryBuilderHelper, PathMode, PendingAggregation, TableJoin,
};

/// Aggregator in effect for a call nested under `inherited`.
///
/// Aggregators do not nest: a call declaring one inside another aggregated
/// call is rejected.
pub(crate) fn merge_aggregator(
    own: Option<&Aggregator>,
    inherited: Option<&Aggregator>,
) -> Result<Option<Aggregator>> {
    match (own, inherited) {
        (Some(_), Some(_)) => Err(Error::invalid_state(
            "aggregated conditions cannot be nested in another aggregation",
        )),
        (Some(a), None) | (None, Some(a)) => Ok(Some(a.clone())),
        (None, None) => Ok(None),
    }
}
