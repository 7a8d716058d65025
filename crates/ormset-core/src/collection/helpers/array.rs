//! In-memory evaluation of function calls.

use std::cmp::Ordering;
use std::sync::Arc;

use ormset_lang::parse_property_expr;
use ormset_proto::{Aggregator, Arg, Direction, FunctionCall, Value};

use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::metadata::{EntityMetadata, PropertyMetadata, RelationshipType};
use crate::model::Model;

use super::merge_aggregator;

static NULL: Value = Value::Null;

/// Value of an expression for one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayExpressionResult {
    /// One value.
    Single {
        value: Value,
        property: Option<Arc<PropertyMetadata>>,
    },
    /// One value per entity reached through a to-many path, still waiting for
    /// its aggregator.
    Multi {
        /// `(leaf entity identity, value)` pairs.
        items: Vec<(usize, Value)>,
        /// Groups results sharing the to-many path and aggregator.
        key: String,
        aggregator: Aggregator,
        property: Option<Arc<PropertyMetadata>>,
    },
}

impl ArrayExpressionResult {
    pub fn single(value: impl Into<Value>) -> Self {
        ArrayExpressionResult::Single {
            value: value.into(),
            property: None,
        }
    }

    /// Property the value was read from.
    pub fn property(&self) -> Option<&Arc<PropertyMetadata>> {
        match self {
            ArrayExpressionResult::Single { property, .. }
            | ArrayExpressionResult::Multi { property, .. } => property.as_ref(),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, ArrayExpressionResult::Multi { .. })
    }

    /// Aggregation group of a pending result.
    pub fn key(&self) -> Option<&str> {
        match self {
            ArrayExpressionResult::Multi { key, .. } => Some(key),
            ArrayExpressionResult::Single { .. } => None,
        }
    }

    /// The value of a single result; NULL for a pending one.
    pub fn value(&self) -> &Value {
        match self {
            ArrayExpressionResult::Single { value, .. } => value,
            ArrayExpressionResult::Multi { .. } => &NULL,
        }
    }

    /// Apply `f` to every value; the result no longer carries a property.
    pub fn map(self, mut f: impl FnMut(&Value) -> Result<Value>) -> Result<Self> {
        Ok(match self {
            ArrayExpressionResult::Single { value, .. } => ArrayExpressionResult::Single {
                value: f(&value)?,
                property: None,
            },
            ArrayExpressionResult::Multi {
                items,
                key,
                aggregator,
                ..
            } => ArrayExpressionResult::Multi {
                items: items
                    .into_iter()
                    .map(|(leaf, value)| Ok((leaf, f(&value)?)))
                    .collect::<Result<Vec<_>>>()?,
                key,
                aggregator,
                property: None,
            },
        })
    }

    /// Resolve a pending aggregation into a single boolean.
    ///
    /// Counts the distinct leaf entities whose value is true and asks the
    /// aggregator whether that count is acceptable.
    pub fn seal(self) -> Result<Self> {
        match self {
            ArrayExpressionResult::Multi {
                items, aggregator, ..
            } => {
                let mut matching: Vec<usize> = Vec::new();
                for (leaf, value) in items {
                    if truthy(&value)? && !matching.contains(&leaf) {
                        matching.push(leaf);
                    }
                }
                Ok(ArrayExpressionResult::single(aggregator.accepts(matching.len())))
            }
            single => Ok(single),
        }
    }
}

/// Whether a predicate value is true. Only booleans are predicate values.
pub(crate) fn truthy(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(Error::invalid_argument(format!(
            "expected a boolean condition result, got {}",
            other.type_name()
        ))),
    }
}

/// Evaluates function calls against entities of one entity type.
pub struct ArrayCollectionHelper<'a> {
    model: &'a Model,
    metadata: &'a Arc<EntityMetadata>,
}

/// Entity reached while walking a path, with the to-many leaf it hangs from.
type Frontier = Vec<(usize, Option<EntityRef>)>;

impl<'a> ArrayCollectionHelper<'a> {
    pub fn new(model: &'a Model, metadata: &'a Arc<EntityMetadata>) -> Self {
        Self { model, metadata }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        self.metadata
    }

    /// Evaluate `call` for `entity`.
    ///
    /// A call carrying its own aggregator is sealed before returning.
    pub fn evaluate(
        &self,
        entity: &EntityRef,
        call: &FunctionCall,
        inherited: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        let aggregator = merge_aggregator(call.aggregator.as_ref(), inherited)?;
        let function = self.model.functions().get(&call.function)?;
        let result =
            function.process_array_expression(self, entity, &call.args, aggregator.as_ref())?;
        if call.aggregator.is_some() {
            result.seal()
        } else {
            Ok(result)
        }
    }

    /// Evaluate a filter for `entity`.
    pub fn is_true(&self, entity: &EntityRef, call: &FunctionCall) -> Result<bool> {
        match self.evaluate(entity, call, None)?.seal()? {
            ArrayExpressionResult::Single { value, .. } => truthy(&value),
            ArrayExpressionResult::Multi { .. } => {
                Err(Error::invalid_state("sealed expression is still pending"))
            }
        }
    }

    /// Evaluate an ordering expression for `entity`.
    pub fn sort_value(&self, entity: &EntityRef, call: &FunctionCall) -> Result<Value> {
        match self.evaluate(entity, call, None)? {
            ArrayExpressionResult::Single { value, .. } => Ok(value),
            ArrayExpressionResult::Multi { key, .. } => Err(Error::invalid_argument(format!(
                "cannot order by to-many path '{}' without an aggregate function",
                key.split('|').next().unwrap_or_default()
            ))),
        }
    }

    /// Value of a path argument or nested call.
    pub fn resolve_operand(
        &self,
        entity: &EntityRef,
        arg: &Arg,
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        match arg {
            Arg::Expr(path) => self.get_value(entity, path, aggregator),
            Arg::Call(call) => self.evaluate(entity, call, aggregator),
            other => Err(Error::invalid_argument(format!(
                "expected a property path or a function call, got {:?}",
                other
            ))),
        }
    }

    /// Read `path` from `entity`, following relationships.
    ///
    /// To-one hops to a missing entity yield NULL. To-many hops fan out into a
    /// [`ArrayExpressionResult::Multi`] with one item per reached entity.
    pub fn get_value(
        &self,
        entity: &EntityRef,
        path: &str,
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        let expr = parse_property_expr(path)?;
        if let Some(source) = &expr.source {
            if source != &self.metadata.name {
                return Err(Error::invalid_argument(format!(
                    "expression '{}' is qualified with '{}', the collection holds '{}' entities",
                    path, source, self.metadata.name
                )));
            }
        }
        let tokens = &expr.tokens;

        let mut frontier: Frontier = vec![(0, Some(entity.clone()))];
        let mut metadata = self.metadata.clone();
        let mut last_to_many: Option<usize> = None;

        for (i, token) in tokens.iter().enumerate() {
            let property = metadata.property_checked(token)?.clone();
            if let Some(embeddable) = property.embeddable_metadata() {
                let Some(inner) = tokens.get(i + 1).filter(|_| i + 2 == tokens.len()) else {
                    return Err(Error::invalid_argument(format!(
                        "embeddable '{}' in '{}' must be followed by exactly one property",
                        token, path
                    )));
                };
                let inner_property = embeddable.get_property(inner).cloned().ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "undefined property '{}' on embeddable '{}'",
                        inner, embeddable.name
                    ))
                })?;
                let key = format!("{}.{}", token, inner);
                let values = frontier
                    .into_iter()
                    .map(|(leaf, e)| (leaf, e.map_or(Value::Null, |e| e.get_raw(&key))))
                    .collect();
                return Ok(self.finish(
                    tokens,
                    last_to_many,
                    values,
                    Some(inner_property),
                    aggregator,
                ));
            }

            if i + 1 == tokens.len() {
                let (values, property) =
                    self.final_values(&frontier, &property, token, &mut last_to_many, i)?;
                return Ok(self.finish(tokens, last_to_many, values, property, aggregator));
            }

            let Some(kind) = property.relationship_type() else {
                return Err(Error::invalid_state(format!(
                    "'{}' in '{}' is not a relationship",
                    token, path
                )));
            };
            let target = self.model.registry().target_of(&property)?.clone();
            let mut next: Frontier = Vec::new();
            if kind.is_to_many() {
                last_to_many = Some(i);
                for (_, current) in &frontier {
                    let Some(current) = current else { continue };
                    for child in current.has_many(token)?.fetch_all()? {
                        next.push((leaf_id(&child), Some(child)));
                    }
                }
            } else {
                for (leaf, current) in frontier {
                    let related = match current {
                        Some(current) => current.has_one(token)?.get()?,
                        None => None,
                    };
                    next.push((leaf, related));
                }
            }
            frontier = next;
            metadata = target;
        }
        Err(Error::invalid_argument(format!("empty property path '{}'", path)))
    }

    fn final_values(
        &self,
        frontier: &Frontier,
        property: &Arc<PropertyMetadata>,
        token: &str,
        last_to_many: &mut Option<usize>,
        index: usize,
    ) -> Result<(Vec<(usize, Value)>, Option<Arc<PropertyMetadata>>)> {
        let mut values = Vec::with_capacity(frontier.len());
        match property.relationship.as_ref() {
            _ if property.is_primary_proxy() => {
                for (leaf, e) in frontier {
                    values.push((*leaf, e.as_ref().map_or(Value::Null, |e| e.id())));
                }
                Ok((values, Some(property.clone())))
            }
            None => {
                for (leaf, e) in frontier {
                    values.push((*leaf, e.as_ref().map_or(Value::Null, |e| e.get_raw(token))));
                }
                Ok((values, Some(property.clone())))
            }
            Some(r) if r.kind == RelationshipType::ManyHasOne || r.is_main && !r.kind.is_to_many() => {
                for (leaf, e) in frontier {
                    values.push((*leaf, e.as_ref().map_or(Value::Null, |e| e.get_raw(token))));
                }
                Ok((values, Some(property.clone())))
            }
            Some(r) => {
                let target = self.model.registry().target_of(property)?;
                let id_property = target.get_property(target.id_property()).cloned();
                if r.kind == RelationshipType::OneHasOne {
                    for (leaf, e) in frontier {
                        let id = match e {
                            Some(e) => e.has_one(token)?.get()?.map_or(Value::Null, |t| t.id()),
                            None => Value::Null,
                        };
                        values.push((*leaf, id));
                    }
                    return Ok((values, id_property));
                }
                *last_to_many = Some(index);
                for (_, e) in frontier {
                    let Some(e) = e else { continue };
                    for child in e.has_many(token)?.fetch_all()? {
                        values.push((leaf_id(&child), child.id()));
                    }
                }
                Ok((values, id_property))
            }
        }
    }

    fn finish(
        &self,
        tokens: &[String],
        last_to_many: Option<usize>,
        mut values: Vec<(usize, Value)>,
        property: Option<Arc<PropertyMetadata>>,
        aggregator: Option<&Aggregator>,
    ) -> ArrayExpressionResult {
        match last_to_many {
            Some(index) => {
                let aggregator = aggregator.cloned().unwrap_or(Aggregator::Any);
                ArrayExpressionResult::Multi {
                    items: values,
                    key: format!("{}|{}", tokens[..=index].join("->"), aggregator.key()),
                    aggregator,
                    property,
                }
            }
            None => ArrayExpressionResult::Single {
                value: values.pop().map_or(Value::Null, |(_, value)| value),
                property,
            },
        }
    }
}

fn leaf_id(entity: &EntityRef) -> usize {
    Arc::as_ptr(entity) as usize
}

/// Order two sort values.
///
/// NULL placement follows [`Direction::nulls_first`] regardless of the sort
/// direction; incomparable values fall back to their string form.
pub fn compare_sort_values(a: &Value, b: &Value, direction: Direction) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if direction.nulls_first() => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if direction.nulls_first() => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = a
                .compare(b)
                .unwrap_or_else(|| a.to_string().cmp(&b.to_string()));
            if direction.is_descending() {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_counts_distinct_leaves() {
        let multi = ArrayExpressionResult::Multi {
            items: vec![(1, true.into()), (1, true.into()), (2, false.into())],
            key: "books|count_2_".into(),
            aggregator: Aggregator::Count {
                at_least: Some(2),
                at_most: None,
            },
            property: None,
        };
        assert_eq!(multi.seal().unwrap(), ArrayExpressionResult::single(false));
    }

    #[test]
    fn test_seal_none_over_empty() {
        let multi = ArrayExpressionResult::Multi {
            items: vec![],
            key: "books|none".into(),
            aggregator: Aggregator::None,
            property: None,
        };
        assert_eq!(multi.seal().unwrap(), ArrayExpressionResult::single(true));
    }

    #[test]
    fn test_seal_rejects_non_boolean() {
        let multi = ArrayExpressionResult::Multi {
            items: vec![(1, Value::Int(3))],
            key: "books|any".into(),
            aggregator: Aggregator::Any,
            property: None,
        };
        assert!(matches!(multi.seal(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_sort_values() {
        use Direction::*;
        let (one, two, null) = (Value::Int(1), Value::Int(2), Value::Null);
        assert_eq!(compare_sort_values(&one, &two, Asc), Ordering::Less);
        assert_eq!(compare_sort_values(&one, &two, Desc), Ordering::Greater);
        assert_eq!(compare_sort_values(&null, &one, Asc), Ordering::Less);
        assert_eq!(compare_sort_values(&null, &one, Desc), Ordering::Greater);
        assert_eq!(compare_sort_values(&null, &one, DescNullsFirst), Ordering::Less);
        assert_eq!(compare_sort_values(&null, &one, AscNullsLast), Ordering::Greater);
        assert_eq!(
            compare_sort_values(&Value::from("b"), &Value::from("a"), Asc),
            Ordering::Greater
        );
    }
}
