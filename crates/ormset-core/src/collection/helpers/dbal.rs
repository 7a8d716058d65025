//! SQL generation for function calls.
//!
//! Property paths turn into LEFT JOINs off the query's FROM alias. To-one hops
//! join `{alias}_{property}`; to-many hops join
//! `{alias}_{property}_{aggregator}` and leave the result pending until its
//! aggregator is applied. Sealing a pending result turns it into a `HAVING`
//! condition over `COUNT(DISTINCT leaf key)` and gives the joins of the
//! aggregated chain unique aliases, so two aggregations over the same path
//! never share rows.
//!
//! Aggregate functions are not joined into the outer query at all. Each one
//! is a correlated scalar subquery over its own copy of the root table, so
//! joins added by other filters cannot change the rows it reduces.

use std::sync::Arc;

use ormset_lang::parse_property_expr;
use ormset_proto::{Aggregator, Arg, Direction, FunctionCall, Value};

use crate::collection::functions::Junction;
use crate::dbal::{Fragment, Platform, QueryBuilder, SqlArg};
use crate::error::{Error, Result};
use crate::mapper::Conventions;
use crate::metadata::{EntityMetadata, PropertyMetadata, RelationshipType};
use crate::model::Model;

use super::merge_aggregator;

/// A LEFT JOIN required by an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct TableJoin {
    pub table: String,
    pub alias: String,
    pub on: Fragment,
}

/// A predicate over a to-many path that has not been aggregated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAggregation {
    /// Path up to the last to-many hop plus the aggregator key.
    pub key: String,
    pub aggregator: Aggregator,
    /// Aliases of the joins from the first to-many hop on.
    pub chain: Vec<String>,
    /// Alias of the entity counted by the aggregation.
    pub leaf_alias: String,
    /// Qualified primary key columns of the counted entity.
    pub leaf_primary_key: Vec<String>,
}

/// SQL form of an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct DbalExpressionResult {
    pub expression: Fragment,
    /// Qualified columns the value is read from; empty for computed values.
    pub columns: Vec<String>,
    pub joins: Vec<TableJoin>,
    /// The expression aggregates and belongs to HAVING.
    pub is_having: bool,
    /// The query must be grouped by the root primary key.
    pub group_by_root: bool,
    pub pending: Option<PendingAggregation>,
    pub property: Option<Arc<PropertyMetadata>>,
    /// The value may be NULL.
    pub nullable: bool,
}

impl DbalExpressionResult {
    /// A plain column value.
    pub fn column(
        column: impl Into<String>,
        property: Option<Arc<PropertyMetadata>>,
        nullable: bool,
    ) -> Self {
        Self::columns(vec![column.into()], property).with_nullable(nullable)
    }

    /// A value spread over several columns, such as a composite key.
    pub fn columns(columns: Vec<String>, property: Option<Arc<PropertyMetadata>>) -> Self {
        Self {
            expression: Fragment::column(columns.first().cloned().unwrap_or_default()),
            columns,
            joins: Vec::new(),
            is_having: false,
            group_by_root: false,
            pending: None,
            property,
            nullable: false,
        }
    }

    /// A computed expression.
    pub fn expression(expression: Fragment) -> Self {
        Self {
            expression,
            columns: Vec::new(),
            joins: Vec::new(),
            is_having: false,
            group_by_root: false,
            pending: None,
            property: None,
            nullable: false,
        }
    }

    fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// The value as an operand of a comparison.
    pub fn operand(&self) -> Fragment {
        self.expression.clone()
    }

    /// Replace the value with a predicate over it, keeping joins and grouping.
    pub fn into_predicate(self, predicate: Fragment) -> Self {
        Self {
            expression: predicate,
            columns: Vec::new(),
            property: None,
            nullable: false,
            ..self
        }
    }
}

/// How a path is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Compared per row; to-many paths stay pending until aggregated.
    Predicate,
    /// Fed to an aggregate function; the path must cross a to-many hop.
    Aggregate,
}

/// Builds SQL expressions for queries over one entity type.
pub struct DbalQueryBuilderHelper<'a> {
    model: &'a Model,
    metadata: &'a Arc<EntityMetadata>,
}

impl<'a> DbalQueryBuilderHelper<'a> {
    pub fn new(model: &'a Model, metadata: &'a Arc<EntityMetadata>) -> Self {
        Self { model, metadata }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        self.metadata
    }

    pub fn platform(&self) -> Platform {
        self.model.platform()
    }

    /// Build `call` for the query rooted at `builder`.
    ///
    /// A call carrying its own aggregator is sealed before returning.
    pub fn evaluate(
        &self,
        builder: &QueryBuilder,
        call: &FunctionCall,
        inherited: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        let aggregator = merge_aggregator(call.aggregator.as_ref(), inherited)?;
        let function = self.model.functions().get(&call.function)?;
        let result = function.process_query_builder_expression(
            self,
            builder,
            &call.args,
            aggregator.as_ref(),
        )?;
        if call.aggregator.is_some() {
            self.seal(result)
        } else {
            Ok(result)
        }
    }

    /// SQL for a path argument or nested call.
    pub fn resolve_operand(
        &self,
        builder: &QueryBuilder,
        arg: &Arg,
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        match arg {
            Arg::Expr(path) => self.fetch_path(builder, path, aggregator, PathMode::Predicate),
            Arg::Call(call) => self.evaluate(builder, call, aggregator),
            other => Err(Error::invalid_argument(format!(
                "expected a property path or a function call, got {:?}",
                other
            ))),
        }
    }

    /// Add `call` as a filter to `builder`.
    pub fn filter(&self, builder: &mut QueryBuilder, call: &FunctionCall) -> Result<()> {
        let result = self.evaluate(builder, call, None)?;
        let result = self.seal(result)?;
        self.add_joins(builder, &result.joins);
        if result.is_having {
            builder.and_having(result.expression);
        } else {
            builder.and_where(result.expression);
        }
        if result.group_by_root {
            self.group_by_root(builder)?;
        }
        Ok(())
    }

    /// Add `call` as an ORDER BY expression to `builder`.
    ///
    /// Returns the plain columns ordered by, which a grouped query has to
    /// group by as well.
    pub fn order(
        &self,
        builder: &mut QueryBuilder,
        call: &FunctionCall,
        direction: Direction,
    ) -> Result<Vec<Fragment>> {
        let result = self.evaluate(builder, call, None)?;
        if let Some(pending) = &result.pending {
            return Err(Error::invalid_argument(format!(
                "cannot order by to-many path '{}' without an aggregate function",
                pending.key.split('|').next().unwrap_or_default()
            )));
        }
        self.add_joins(builder, &result.joins);
        for fragment in self.model.platform().order_by(result.operand(), direction) {
            builder.add_order_by(fragment);
        }
        if result.group_by_root {
            self.group_by_root(builder)?;
        }
        Ok(result.columns.iter().map(Fragment::column).collect())
    }

    /// `(SELECT function(leaf) FROM root ... WHERE root key = outer key)` for
    /// an aggregate over the to-many `path`.
    pub fn aggregate_subquery(
        &self,
        builder: &QueryBuilder,
        path: &str,
        function: &str,
    ) -> Result<DbalExpressionResult> {
        let outer = builder.get_from_alias()?.to_string();
        let conventions = self.model.conventions(&self.metadata.name)?;
        let inner = format!("{}_agg", outer);
        let mut subquery = QueryBuilder::new().from(conventions.table(), inner.clone());

        let fetched = self.fetch_path(&subquery, path, None, PathMode::Aggregate)?;
        let column = fetched
            .columns
            .first()
            .cloned()
            .ok_or_else(|| Error::invalid_state(format!("'{}' resolved to no column", path)))?;
        self.add_joins(&mut subquery, &fetched.joins);
        subquery.select(Fragment::new(
            format!("{}(%column)", function),
            vec![SqlArg::Column(column)],
        ));
        for key in conventions.storage_primary_key()? {
            subquery.and_where(equal_columns(
                format!("{}.{}", inner, key),
                format!("{}.{}", outer, key),
            ));
        }
        Ok(DbalExpressionResult::expression(Fragment::new(
            "%query",
            vec![SqlArg::Query(Box::new(subquery))],
        )))
    }

    fn add_joins(&self, builder: &mut QueryBuilder, joins: &[TableJoin]) {
        for join in joins {
            builder.left_join(join.table.clone(), join.alias.clone(), join.on.clone());
        }
    }

    /// Group by the root entity so aggregates are computed per entity.
    pub fn group_by_root(&self, builder: &mut QueryBuilder) -> Result<()> {
        let alias = builder.get_from_alias()?.to_string();
        let conventions = self.model.conventions(&self.metadata.name)?;
        let columns: Vec<String> = if self.model.platform().groups_by_all_columns() {
            conventions
                .storage_columns()
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            conventions.storage_primary_key()?
        };
        for column in columns {
            builder.add_group_by(Fragment::column(format!("{}.{}", alias, column)));
        }
        Ok(())
    }

    /// Resolve `path` to columns, adding the joins it needs.
    pub fn fetch_path(
        &self,
        builder: &QueryBuilder,
        path: &str,
        aggregator: Option<&Aggregator>,
        mode: PathMode,
    ) -> Result<DbalExpressionResult> {
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
        let alias_key = match mode {
            PathMode::Predicate => aggregator.map_or_else(|| Aggregator::Any.key(), Aggregator::key),
            PathMode::Aggregate => "agg".to_string(),
        };

        let mut walk = PathWalk {
            alias: builder.get_from_alias()?.to_string(),
            conventions: self.model.conventions(&self.metadata.name)?,
            joins: Vec::new(),
            chain_start: None,
            leaf: None,
            last_to_many: None,
            nullable: false,
        };

        for (i, token) in tokens.iter().enumerate() {
            let property = walk.conventions.metadata().property_checked(token)?.clone();
            let is_last = i + 1 == tokens.len();

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
                let column = walk
                    .conventions
                    .convert_entity_to_storage_key(&format!("{}.{}", token, inner))?
                    .to_string();
                walk.nullable |= inner_property.nullable;
                let columns = vec![format!("{}.{}", walk.alias, column)];
                return self.finish(walk, tokens, columns, Some(inner_property), aggregator, mode);
            }

            let holds_key = property.relationship.as_ref().map_or(true, |r| {
                r.kind == RelationshipType::ManyHasOne
                    || r.kind == RelationshipType::OneHasOne && r.is_main
            });
            if is_last && property.is_primary_proxy() {
                let columns = walk
                    .conventions
                    .storage_primary_key()?
                    .into_iter()
                    .map(|column| format!("{}.{}", walk.alias, column))
                    .collect();
                return self.finish(walk, tokens, columns, Some(property), aggregator, mode);
            }
            if is_last && holds_key {
                let column = walk.conventions.convert_entity_to_storage_key(token)?;
                let columns = vec![format!("{}.{}", walk.alias, column)];
                walk.nullable |= property.nullable;
                return self.finish(walk, tokens, columns, Some(property), aggregator, mode);
            }

            let Some(relationship) = property.relationship.as_ref() else {
                return Err(Error::invalid_state(format!(
                    "'{}' in '{}' is not a relationship",
                    token, path
                )));
            };
            self.join(&mut walk, &property, token, &alias_key, i)?;
            if !relationship.kind.is_to_many() {
                walk.nullable |= property.nullable;
            }

            if is_last {
                let target = walk.conventions.metadata().clone();
                let columns = walk
                    .conventions
                    .storage_primary_key()?
                    .into_iter()
                    .map(|column| format!("{}.{}", walk.alias, column))
                    .collect();
                let id_property = target.get_property(target.id_property()).cloned();
                return self.finish(walk, tokens, columns, id_property, aggregator, mode);
            }
        }
        Err(Error::invalid_argument(format!("empty property path '{}'", path)))
    }

    fn join(
        &self,
        walk: &mut PathWalk,
        property: &Arc<PropertyMetadata>,
        token: &str,
        alias_key: &str,
        index: usize,
    ) -> Result<()> {
        let relationship = property.relationship.as_ref().ok_or_else(|| {
            Error::invalid_state(format!("'{}' is not a relationship", property.name))
        })?;
        let target = self.model.conventions(&relationship.entity)?;
        let from = walk.alias.clone();
        let alias = if relationship.kind.is_to_many() {
            format!("{}_{}_{}", from, token, alias_key)
        } else {
            format!("{}_{}", from, token)
        };
        if relationship.kind.is_to_many() && walk.chain_start.is_none() {
            walk.chain_start = Some(walk.joins.len());
        }

        let holds_key = relationship.kind == RelationshipType::ManyHasOne
            || relationship.kind == RelationshipType::OneHasOne && relationship.is_main;
        match relationship.kind {
            _ if holds_key => {
                let fk = walk.conventions.convert_entity_to_storage_key(token)?;
                walk.joins.push(TableJoin {
                    table: target.table().to_string(),
                    alias: alias.clone(),
                    on: equal_columns(
                        format!("{}.{}", alias, single_key(&target)?),
                        format!("{}.{}", from, fk),
                    ),
                });
            }
            RelationshipType::ManyHasOne
            | RelationshipType::OneHasOne
            | RelationshipType::OneHasMany => {
                let reverse = relationship.reverse.as_deref().ok_or_else(|| {
                    Error::invalid_state(format!("'{}' has no reverse property", property.name))
                })?;
                let fk = target.convert_entity_to_storage_key(reverse)?;
                walk.joins.push(TableJoin {
                    table: target.table().to_string(),
                    alias: alias.clone(),
                    on: equal_columns(
                        format!("{}.{}", alias, fk),
                        format!("{}.{}", from, single_key(&walk.conventions)?),
                    ),
                });
            }
            RelationshipType::ManyHasMany => {
                let table = walk.conventions.many_has_many_storage_name(property, &target)?;
                let (own, other) = walk.conventions.many_has_many_storage_keys(property, &target)?;
                let link = format!("{}_x", alias);
                walk.joins.push(TableJoin {
                    table,
                    alias: link.clone(),
                    on: equal_columns(
                        format!("{}.{}", link, own),
                        format!("{}.{}", from, single_key(&walk.conventions)?),
                    ),
                });
                walk.joins.push(TableJoin {
                    table: target.table().to_string(),
                    alias: alias.clone(),
                    on: equal_columns(
                        format!("{}.{}", alias, single_key(&target)?),
                        format!("{}.{}", link, other),
                    ),
                });
            }
        }

        if relationship.kind.is_to_many() {
            walk.last_to_many = Some(index);
            walk.leaf = Some((
                alias.clone(),
                target
                    .storage_primary_key()?
                    .into_iter()
                    .map(|column| format!("{}.{}", alias, column))
                    .collect(),
            ));
        }
        walk.alias = alias;
        walk.conventions = target;
        Ok(())
    }

    fn finish(
        &self,
        walk: PathWalk,
        tokens: &[String],
        columns: Vec<String>,
        property: Option<Arc<PropertyMetadata>>,
        aggregator: Option<&Aggregator>,
        mode: PathMode,
    ) -> Result<DbalExpressionResult> {
        let mut result = DbalExpressionResult::columns(columns, property);
        result.nullable = walk.nullable;
        result.joins = walk.joins;

        let (Some(index), Some((leaf_alias, leaf_primary_key))) = (walk.last_to_many, walk.leaf)
        else {
            if mode == PathMode::Aggregate {
                return Err(Error::invalid_argument(format!(
                    "aggregate over '{}' needs a to-many relationship path",
                    tokens.join("->")
                )));
            }
            return Ok(result);
        };

        match mode {
            PathMode::Aggregate => {}
            PathMode::Predicate => {
                let aggregator = aggregator.cloned().unwrap_or(Aggregator::Any);
                let chain = result.joins[walk.chain_start.unwrap_or(0)..]
                    .iter()
                    .map(|join| join.alias.clone())
                    .collect();
                result.pending = Some(PendingAggregation {
                    key: format!("{}|{}", tokens[..=index].join("->"), aggregator.key()),
                    aggregator,
                    chain,
                    leaf_alias,
                    leaf_primary_key,
                });
            }
        }
        Ok(result)
    }

    /// Apply the aggregator of a pending result.
    pub fn seal(&self, mut result: DbalExpressionResult) -> Result<DbalExpressionResult> {
        let Some(pending) = result.pending.take() else {
            return Ok(result);
        };
        let leaf_key = pending.leaf_primary_key.first().cloned().ok_or_else(|| {
            Error::invalid_state(format!("'{}' has no primary key", pending.leaf_alias))
        })?;
        let predicate = result.expression;
        let mut joins = result.joins;

        let folds_into_join = joins
            .last()
            .is_some_and(|join| join.alias == pending.leaf_alias);
        let mut count = match joins.last_mut() {
            Some(join) if folds_into_join => {
                join.on = Fragment::and(vec![join.on.clone(), predicate]);
                Fragment::new("COUNT(DISTINCT %column)", vec![SqlArg::Column(leaf_key)])
            }
            _ => Fragment::new(
                "COUNT(DISTINCT CASE WHEN %ex THEN %column END)",
                vec![SqlArg::Expr(predicate), SqlArg::Column(leaf_key)],
            ),
        };

        let chained: Vec<&TableJoin> = joins
            .iter()
            .filter(|join| pending.chain.contains(&join.alias))
            .collect();
        let hash = blake3::hash(
            format!("{:?}|{:?}|{}", chained, count, pending.aggregator.key()).as_bytes(),
        );
        let suffix = &hash.to_hex()[..8];
        for alias in &pending.chain {
            let renamed = format!("{}_{}", alias, suffix);
            for join in joins.iter_mut() {
                join.on.rename_alias(alias, &renamed);
                if &join.alias == alias {
                    join.alias = renamed.clone();
                }
            }
            count.rename_alias(alias, &renamed);
        }

        let having = match &pending.aggregator {
            Aggregator::Any => Fragment::new("%ex > 0", vec![SqlArg::Expr(count)]),
            Aggregator::None => Fragment::new("%ex = 0", vec![SqlArg::Expr(count)]),
            Aggregator::Count { at_least, at_most } => {
                let mut bounds = Vec::new();
                if let Some(min) = at_least {
                    bounds.push(Fragment::new(
                        "%ex >= %any",
                        vec![SqlArg::Expr(count.clone()), SqlArg::Value(Value::Int(*min as i64))],
                    ));
                }
                if let Some(max) = at_most {
                    bounds.push(Fragment::new(
                        "%ex <= %any",
                        vec![SqlArg::Expr(count.clone()), SqlArg::Value(Value::Int(*max as i64))],
                    ));
                }
                Fragment::and(bounds)
            }
        };

        let mut sealed = DbalExpressionResult::expression(having);
        sealed.joins = joins;
        sealed.is_having = true;
        sealed.group_by_root = true;
        Ok(sealed)
    }

    /// Combine operands of a junction.
    ///
    /// Operands pending over the same path and aggregator are merged so they
    /// are checked against the same related row. When that single group is
    /// all there is, the merged result stays pending for the caller, unless
    /// `explicit` asks for it to be sealed here.
    pub fn combine(
        &self,
        junction: Junction,
        operands: Vec<DbalExpressionResult>,
        explicit: bool,
    ) -> Result<DbalExpressionResult> {
        let mut groups: Vec<Vec<DbalExpressionResult>> = Vec::new();
        let mut others: Vec<DbalExpressionResult> = Vec::new();
        for operand in operands {
            let Some(key) = operand.pending.as_ref().map(|p| p.key.clone()) else {
                others.push(operand);
                continue;
            };
            match groups
                .iter_mut()
                .find(|g| g[0].pending.as_ref().is_some_and(|p| p.key == key))
            {
                Some(group) => group.push(operand),
                None => groups.push(vec![operand]),
            }
        }

        if others.is_empty() && groups.len() == 1 {
            let merged = merge_pending(junction, groups.remove(0))?;
            return if explicit { self.seal(merged) } else { Ok(merged) };
        }

        for group in groups {
            others.push(self.seal(merge_pending(junction, group)?)?);
        }
        let mut joins = Vec::new();
        let mut expressions = Vec::new();
        let mut is_having = false;
        let mut group_by_root = false;
        for operand in others {
            merge_joins(junction, &mut joins, operand.joins);
            expressions.push(operand.expression);
            is_having |= operand.is_having;
            group_by_root |= operand.group_by_root;
        }
        let mut combined = DbalExpressionResult::expression(junction.fragment(expressions));
        combined.joins = joins;
        combined.is_having = is_having;
        combined.group_by_root = group_by_root;
        Ok(combined)
    }
}

struct PathWalk {
    alias: String,
    conventions: Arc<Conventions>,
    joins: Vec<TableJoin>,
    /// Index in `joins` of the first to-many join.
    chain_start: Option<usize>,
    /// Alias and qualified key of the last to-many target.
    leaf: Option<(String, Vec<String>)>,
    last_to_many: Option<usize>,
    nullable: bool,
}

fn merge_pending(
    junction: Junction,
    group: Vec<DbalExpressionResult>,
) -> Result<DbalExpressionResult> {
    let mut iter = group.into_iter();
    let mut merged = iter
        .next()
        .ok_or_else(|| Error::invalid_state("empty aggregation group"))?;
    let rest: Vec<DbalExpressionResult> = iter.collect();
    if rest.is_empty() {
        return Ok(merged);
    }
    let mut expressions = vec![merged.expression.clone()];
    for operand in rest {
        merge_joins(junction, &mut merged.joins, operand.joins);
        if let (Some(pending), Some(other)) = (merged.pending.as_mut(), operand.pending) {
            for alias in other.chain {
                if !pending.chain.contains(&alias) {
                    pending.chain.push(alias);
                }
            }
        }
        expressions.push(operand.expression);
        merged.is_having |= operand.is_having;
        merged.group_by_root |= operand.group_by_root;
    }
    merged.expression = junction.fragment(expressions);
    merged.columns = Vec::new();
    merged.property = None;
    merged.nullable = false;
    Ok(merged)
}

/// Add `incoming` joins to `joins`, dropping duplicates.
///
/// Two joins sharing an alias with different conditions are merged into one
/// join whose condition combines both.
pub(crate) fn merge_joins(junction: Junction, joins: &mut Vec<TableJoin>, incoming: Vec<TableJoin>) {
    for join in incoming {
        match joins.iter_mut().find(|j| j.alias == join.alias) {
            Some(existing) if existing.on == join.on => {}
            Some(existing) => {
                existing.on = junction.fragment(vec![existing.on.clone(), join.on]);
            }
            None => joins.push(join),
        }
    }
}

fn single_key(conventions: &Conventions) -> Result<String> {
    let mut key = conventions.storage_primary_key()?;
    if key.len() != 1 {
        return Err(Error::not_supported(format!(
            "joining through the composite primary key of '{}'",
            conventions.metadata().name
        )));
    }
    Ok(key.remove(0))
}

fn equal_columns(left: String, right: String) -> Fragment {
    Fragment::new(
        "%column = %column",
        vec![SqlArg::Column(left), SqlArg::Column(right)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(key: &str, alias: &str) -> DbalExpressionResult {
        let mut result = DbalExpressionResult::expression(Fragment::new(
            "%column > %any",
            vec![SqlArg::Column(format!("{}.year", alias)), SqlArg::Value(2000.into())],
        ));
        result.joins = vec![TableJoin {
            table: "books".into(),
            alias: alias.into(),
            on: equal_columns(format!("{}.author_id", alias), "authors.id".into()),
        }];
        result.pending = Some(PendingAggregation {
            key: key.into(),
            aggregator: Aggregator::Any,
            chain: vec![alias.into()],
            leaf_alias: alias.into(),
            leaf_primary_key: vec![format!("{}.id", alias)],
        });
        result
    }

    #[test]
    fn test_merge_joins() {
        let join = TableJoin {
            table: "books".into(),
            alias: "a_books".into(),
            on: Fragment::raw("x"),
        };
        let mut joins = vec![join.clone()];
        merge_joins(Junction::And, &mut joins, vec![join.clone()]);
        assert_eq!(joins.len(), 1);

        let other = TableJoin {
            on: Fragment::raw("y"),
            ..join
        };
        merge_joins(Junction::Or, &mut joins, vec![other]);
        assert_eq!(joins.len(), 1);
        let (sql, _) = joins[0].on.render(Platform::Sqlite).unwrap();
        assert_eq!(sql, "((x) OR (y))");
    }

    #[test]
    fn test_merge_pending_shares_chain() {
        let merged = merge_pending(
            Junction::And,
            vec![pending("books|any", "authors_books_any"), pending("books|any", "authors_books_any")],
        )
        .unwrap();
        assert_eq!(merged.joins.len(), 1);
        assert_eq!(merged.pending.unwrap().chain, vec!["authors_books_any".to_string()]);
        let (sql, params) = merged.expression.render(Platform::Sqlite).unwrap();
        assert!(sql.contains(" AND "));
        assert_eq!(params.len(), 2);
    }
}
