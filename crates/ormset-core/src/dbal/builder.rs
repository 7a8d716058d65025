//! SELECT query builder.
//!
//! Builders are plain values: cloning one yields an isolated copy, which is
//! how collections derive new queries without touching the original.

use ormset_proto::Value;

use crate::error::{Error, Result};

use super::fragment::Fragment;
use super::platform::Platform;

/// Kind of a JOIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

/// A joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: Fragment,
}

/// Introspectable query clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Select,
    Where,
    Group,
    Having,
    Order,
}

/// A SELECT statement under construction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryBuilder {
    from: Option<(String, String)>,
    select: Vec<Fragment>,
    joins: Vec<Join>,
    wheres: Vec<Fragment>,
    group_by: Vec<Fragment>,
    having: Vec<Fragment>,
    order_by: Vec<Fragment>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the FROM table and its alias.
    pub fn from(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.from = Some((table.into(), alias.into()));
        self
    }

    /// Replace the SELECT list.
    pub fn select(&mut self, fragment: Fragment) -> &mut Self {
        self.select = vec![fragment];
        self
    }

    pub fn add_select(&mut self, fragment: Fragment) -> &mut Self {
        self.select.push(fragment);
        self
    }

    pub fn left_join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: Fragment,
    ) -> &mut Self {
        self.push_join(JoinKind::Left, table.into(), alias.into(), on)
    }

    pub fn inner_join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: Fragment,
    ) -> &mut Self {
        self.push_join(JoinKind::Inner, table.into(), alias.into(), on)
    }

    fn push_join(&mut self, kind: JoinKind, table: String, alias: String, on: Fragment) -> &mut Self {
        // An identical join is only added once.
        let duplicate = self
            .joins
            .iter()
            .any(|j| j.alias == alias && j.table == table && j.on == on && j.kind == kind);
        if !duplicate {
            self.joins.push(Join {
                kind,
                table,
                alias,
                on,
            });
        }
        self
    }

    pub fn and_where(&mut self, fragment: Fragment) -> &mut Self {
        self.wheres.push(fragment);
        self
    }

    pub fn and_having(&mut self, fragment: Fragment) -> &mut Self {
        self.having.push(fragment);
        self
    }

    /// Replace the GROUP BY list.
    pub fn group_by(&mut self, fragments: Vec<Fragment>) -> &mut Self {
        self.group_by = fragments;
        self
    }

    /// Append to GROUP BY unless already present.
    pub fn add_group_by(&mut self, fragment: Fragment) -> &mut Self {
        if !self.group_by.contains(&fragment) {
            self.group_by.push(fragment);
        }
        self
    }

    /// Replace the ORDER BY list.
    pub fn order_by(&mut self, fragments: Vec<Fragment>) -> &mut Self {
        self.order_by = fragments;
        self
    }

    pub fn add_order_by(&mut self, fragment: Fragment) -> &mut Self {
        self.order_by.push(fragment);
        self
    }

    pub fn reset_order_by(&mut self) -> &mut Self {
        self.order_by.clear();
        self
    }

    /// Set LIMIT and OFFSET; `None` removes them.
    pub fn limit_by(&mut self, limit: Option<usize>, offset: Option<usize>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn get_from_alias(&self) -> Result<&str> {
        self.from
            .as_ref()
            .map(|(_, alias)| alias.as_str())
            .ok_or_else(|| Error::invalid_state("query builder has no FROM clause"))
    }

    pub fn get_from_table(&self) -> Result<&str> {
        self.from
            .as_ref()
            .map(|(table, _)| table.as_str())
            .ok_or_else(|| Error::invalid_state("query builder has no FROM clause"))
    }

    pub fn has_limit_offset_clause(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Fragments of a clause.
    pub fn clause(&self, clause: Clause) -> &[Fragment] {
        match clause {
            Clause::Select => &self.select,
            Clause::Where => &self.wheres,
            Clause::Group => &self.group_by,
            Clause::Having => &self.having,
            Clause::Order => &self.order_by,
        }
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Rewrite column references qualified with `from` in every clause.
    ///
    /// Table aliases declared by the builder itself are left alone.
    pub fn rename_alias(&mut self, from: &str, to: &str) {
        let clauses = [
            &mut self.select,
            &mut self.wheres,
            &mut self.group_by,
            &mut self.having,
            &mut self.order_by,
        ];
        for fragments in clauses {
            fragments.iter_mut().for_each(|f| f.rename_alias(from, to));
        }
        for join in &mut self.joins {
            join.on.rename_alias(from, to);
        }
    }

    /// Render the statement.
    pub fn build(&self, platform: Platform) -> Result<(String, Vec<Value>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.build_into(platform, &mut sql, &mut params)?;
        Ok((sql, params))
    }

    /// Render into an existing buffer; parameter numbering continues from `params`.
    pub fn build_into(
        &self,
        platform: Platform,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        let (table, alias) = self
            .from
            .as_ref()
            .ok_or_else(|| Error::invalid_state("query builder has no FROM clause"))?;

        sql.push_str("SELECT ");
        if self.select.is_empty() {
            sql.push('*');
        } else {
            render_list(&self.select, ", ", platform, sql, params)?;
        }
        sql.push_str(&format!(
            " FROM {} AS {}",
            platform.quote_identifier(table),
            platform.quote_identifier(alias)
        ));

        for join in &self.joins {
            sql.push_str(match join.kind {
                JoinKind::Left => " LEFT JOIN ",
                JoinKind::Inner => " INNER JOIN ",
            });
            sql.push_str(&format!(
                "{} AS {} ON ",
                platform.quote_identifier(&join.table),
                platform.quote_identifier(&join.alias)
            ));
            Fragment::and(vec![join.on.clone()]).render_into(platform, sql, params)?;
        }

        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            Fragment::and(self.wheres.clone()).render_into(platform, sql, params)?;
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            render_list(&self.group_by, ", ", platform, sql, params)?;
        }
        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            Fragment::and(self.having.clone()).render_into(platform, sql, params)?;
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            render_list(&self.order_by, ", ", platform, sql, params)?;
        } else if self.has_limit_offset_clause() && platform.requires_order_for_offset() {
            sql.push_str(" ORDER BY (SELECT NULL)");
        }
        sql.push_str(&platform.limit_clause(self.limit, self.offset));
        Ok(())
    }
}

fn render_list(
    fragments: &[Fragment],
    separator: &str,
    platform: Platform,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<()> {
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 {
            sql.push_str(separator);
        }
        fragment.render_into(platform, sql, params)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbal::SqlArg;

    fn books() -> QueryBuilder {
        let mut builder = QueryBuilder::new().from("books", "books");
        builder.select(Fragment::column("books.*"));
        builder
    }

    #[test]
    fn test_full_statement() {
        let mut builder = books();
        builder
            .left_join(
                "authors",
                "author",
                Fragment::new(
                    "%column = %column",
                    vec![
                        SqlArg::Column("author.id".into()),
                        SqlArg::Column("books.author_id".into()),
                    ],
                ),
            )
            .and_where(Fragment::new(
                "%column = %any",
                vec![SqlArg::Column("author.name".into()), SqlArg::Value("Alice".into())],
            ))
            .add_order_by(Fragment::raw("\"books\".\"year\" ASC"))
            .limit_by(Some(10), Some(5));

        let (sql, params) = builder.build(Platform::Sqlite).unwrap();
        assert_eq!(
            sql,
            "SELECT \"books\".* FROM \"books\" AS \"books\" \
             LEFT JOIN \"authors\" AS \"author\" ON \"author\".\"id\" = \"books\".\"author_id\" \
             WHERE \"author\".\"name\" = ? ORDER BY \"books\".\"year\" ASC LIMIT 10 OFFSET 5"
        );
        assert_eq!(params, vec![Value::String("Alice".into())]);
    }

    #[test]
    fn test_clone_isolation() {
        let base = books();
        let mut derived = base.clone();
        derived.and_where(Fragment::raw("1=0")).limit_by(Some(1), None);
        assert!(base.clause(Clause::Where).is_empty());
        assert!(!base.has_limit_offset_clause());
        assert!(derived.has_limit_offset_clause());
    }

    #[test]
    fn test_identical_join_added_once() {
        let mut builder = books();
        let on = Fragment::raw("1=1");
        builder.left_join("authors", "author", on.clone());
        builder.left_join("authors", "author", on);
        assert_eq!(builder.joins().len(), 1);
    }

    #[test]
    fn test_sql_server_offset_needs_order() {
        let mut builder = books();
        builder.limit_by(Some(3), None);
        let (sql, _) = builder.build(Platform::SqlServer).unwrap();
        assert!(sql.ends_with("ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 3 ROWS ONLY"));
    }

    #[test]
    fn test_subquery_argument() {
        let mut count = QueryBuilder::new().from("books", "inner_books");
        count
            .select(Fragment::raw("COUNT(*)"))
            .and_where(Fragment::new(
                "%column = %column AND %column > %any",
                vec![
                    SqlArg::Column("inner_books.author_id".into()),
                    SqlArg::Column("authors.id".into()),
                    SqlArg::Column("inner_books.year".into()),
                    SqlArg::Value(Value::Int(2000)),
                ],
            ));
        let mut builder = QueryBuilder::new().from("authors", "authors");
        builder
            .and_where(Fragment::new(
                "%column = %any",
                vec![SqlArg::Column("authors.name".into()), SqlArg::Value("Alice".into())],
            ))
            .and_where(Fragment::new(
                "%query > %any",
                vec![SqlArg::Query(Box::new(count)), SqlArg::Value(Value::Int(1))],
            ));

        let (sql, params) = builder.build(Platform::Postgres).unwrap();
        assert!(sql.contains(
            "(SELECT COUNT(*) FROM \"books\" AS \"inner_books\" \
             WHERE \"inner_books\".\"author_id\" = \"authors\".\"id\" AND \"inner_books\".\"year\" > $2) > $3"
        ), "{}", sql);
        assert_eq!(params, vec![Value::from("Alice"), Value::Int(2000), Value::Int(1)]);

        builder.rename_alias("authors", "a");
        let (sql, _) = builder.build(Platform::Sqlite).unwrap();
        assert!(sql.contains("\"inner_books\".\"author_id\" = \"a\".\"id\""), "{}", sql);
    }

    #[test]
    fn test_missing_from() {
        assert!(matches!(
            QueryBuilder::new().build(Platform::Sqlite),
            Err(Error::InvalidState(_))
        ));
    }
}
