//! Conjunction and disjunction.

use ormset_proto::{Aggregator, Arg, Value, AND, OR};

use crate::collection::helpers::{
    truthy, ArrayCollectionHelper, ArrayExpressionResult, DbalExpressionResult,
    DbalQueryBuilderHelper,
};
use crate::dbal::{Fragment, QueryBuilder};
use crate::entity::EntityRef;
use crate::error::{Error, Result};

use super::CollectionFunction;

/// Boolean operator of a [`JunctionFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junction {
    And,
    Or,
}

impl Junction {
    fn name(self) -> &'static str {
        match self {
            Junction::And => AND,
            Junction::Or => OR,
        }
    }

    /// Value of the junction over no operands.
    fn identity(self) -> bool {
        self == Junction::And
    }

    /// Combine two booleans.
    fn apply(self, a: bool, b: bool) -> bool {
        match self {
            Junction::And => a && b,
            Junction::Or => a || b,
        }
    }

    /// Join SQL predicates.
    pub fn fragment(self, parts: Vec<Fragment>) -> Fragment {
        match self {
            Junction::And => Fragment::and(parts),
            Junction::Or => Fragment::or(parts),
        }
    }
}

/// `and(...)` / `or(...)` over nested calls.
///
/// Operands over the same to-many path and aggregator are evaluated against
/// the same related entity: `books->year > 2000 AND books->title ~ 'R%'`
/// needs one book satisfying both. Operands over different paths are
/// aggregated independently.
#[derive(Debug, Clone, Copy)]
pub struct JunctionFunction {
    junction: Junction,
}

impl JunctionFunction {
    pub fn new(junction: Junction) -> Self {
        Self { junction }
    }
}

impl CollectionFunction for JunctionFunction {
    fn process_array_expression(
        &self,
        helper: &ArrayCollectionHelper<'_>,
        entity: &EntityRef,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        let junction = self.junction;
        let mut singles = 0;
        let mut groups: Vec<(String, Vec<ArrayExpressionResult>)> = Vec::new();

        for arg in args {
            let Arg::Call(call) = arg else {
                return Err(Error::invalid_argument(format!(
                    "'{}' expects conditions as arguments, got {:?}",
                    junction.name(),
                    arg
                )));
            };
            let result = helper.evaluate(entity, call, aggregator)?;
            match result.key().map(str::to_string) {
                Some(key) => match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, group)) => group.push(result),
                    None => groups.push((key, vec![result])),
                },
                None => {
                    singles += 1;
                    let value = truthy(result.value())?;
                    // The outcome is decided once one operand equals the absorbing value.
                    if value != junction.identity() {
                        return Ok(ArrayExpressionResult::single(value));
                    }
                }
            }
        }

        if singles == 0 && groups.len() == 1 {
            let (_, group) = groups.remove(0);
            return merge(junction, group);
        }
        let mut outcome = junction.identity();
        for (_, group) in groups {
            let sealed = merge(junction, group)?.seal()?;
            let ArrayExpressionResult::Single { value, .. } = sealed else {
                return Err(Error::invalid_state("sealed expression is still pending"));
            };
            outcome = junction.apply(outcome, truthy(&value)?);
        }
        Ok(ArrayExpressionResult::single(outcome))
    }

    fn process_query_builder_expression(
        &self,
        helper: &DbalQueryBuilderHelper<'_>,
        builder: &QueryBuilder,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        let operands = args
            .iter()
            .map(|arg| match arg {
                Arg::Call(call) => helper.evaluate(builder, call, aggregator),
                other => Err(Error::invalid_argument(format!(
                    "'{}' expects conditions as arguments, got {:?}",
                    self.junction.name(),
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        helper.combine(self.junction, operands, false)
    }
}

/// Combine pending results of one group item by item.
fn merge(junction: Junction, group: Vec<ArrayExpressionResult>) -> Result<ArrayExpressionResult> {
    let mut iter = group.into_iter();
    let Some(ArrayExpressionResult::Multi {
        mut items,
        key,
        aggregator,
        ..
    }) = iter.next()
    else {
        return Err(Error::invalid_state("empty aggregation group"));
    };
    for next in iter {
        let ArrayExpressionResult::Multi { items: other, .. } = next else {
            return Err(Error::invalid_state("aggregation group holds a single value"));
        };
        if other.len() != items.len() {
            return Err(Error::invalid_state(format!(
                "operands over '{}' reached a different number of entities",
                key
            )));
        }
        for ((_, value), (_, other)) in items.iter_mut().zip(other) {
            *value = Value::Bool(junction.apply(truthy(value)?, truthy(&other)?));
        }
    }
    Ok(ArrayExpressionResult::Multi {
        items,
        key,
        aggregator,
        property: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi(key: &str, values: &[bool]) -> ArrayExpressionResult {
        ArrayExpressionResult::Multi {
            items: values
                .iter()
                .enumerate()
                .map(|(i, v)| (i + 1, Value::Bool(*v)))
                .collect(),
            key: key.into(),
            aggregator: Aggregator::Any,
            property: None,
        }
    }

    #[test]
    fn test_merge_is_per_item() {
        let merged = merge(
            Junction::And,
            vec![multi("books|any", &[true, false]), multi("books|any", &[false, true])],
        )
        .unwrap();
        assert_eq!(merged.seal().unwrap(), ArrayExpressionResult::single(false));

        let merged = merge(
            Junction::Or,
            vec![multi("books|any", &[true, false]), multi("books|any", &[false, false])],
        )
        .unwrap();
        assert_eq!(merged.seal().unwrap(), ArrayExpressionResult::single(true));
    }

    #[test]
    fn test_merge_length_mismatch() {
        let err = merge(
            Junction::And,
            vec![multi("books|any", &[true]), multi("books|any", &[true, true])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_identity() {
        assert!(Junction::And.identity());
        assert!(!Junction::Or.identity());
        assert!(Junction::Or.apply(false, true));
    }
}
