//! SQL dialect differences.

use ormset_proto::Direction;
use serde::Deserialize;

use super::fragment::{Fragment, SqlArg};

/// Supported SQL platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Sqlite,
    MySql,
    Postgres,
    SqlServer,
}

impl Platform {
    /// Quote a single identifier.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Platform::MySql => format!("`{}`", name.replace('`', "``")),
            Platform::SqlServer => format!("[{}]", name.replace(']', "]]")),
            Platform::Sqlite | Platform::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quote a possibly qualified column (`alias.column`, `alias.*`).
    pub fn quote_column(&self, column: &str) -> String {
        column
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    self.quote_identifier(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Bound parameter marker for the `n`-th parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Platform::Postgres => format!("${}", n),
            _ => "?".to_string(),
        }
    }

    /// LIMIT/OFFSET clause, empty when neither is set.
    pub fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> String {
        match self {
            Platform::SqlServer => match (limit, offset) {
                (None, None) => String::new(),
                (limit, offset) => {
                    let mut clause = format!(" OFFSET {} ROWS", offset.unwrap_or(0));
                    if let Some(limit) = limit {
                        clause.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                    }
                    clause
                }
            },
            Platform::Sqlite | Platform::MySql => match (limit, offset) {
                (None, None) => String::new(),
                (Some(limit), None) => format!(" LIMIT {}", limit),
                // Both dialects need a LIMIT before OFFSET.
                (None, Some(offset)) if *self == Platform::Sqlite => {
                    format!(" LIMIT -1 OFFSET {}", offset)
                }
                (None, Some(offset)) => format!(" LIMIT {} OFFSET {}", u64::MAX, offset),
                (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            },
            Platform::Postgres => {
                let mut clause = String::new();
                if let Some(limit) = limit {
                    clause.push_str(&format!(" LIMIT {}", limit));
                }
                if let Some(offset) = offset {
                    clause.push_str(&format!(" OFFSET {}", offset));
                }
                clause
            }
        }
    }

    /// Whether OFFSET requires an ORDER BY clause.
    pub fn requires_order_for_offset(&self) -> bool {
        matches!(self, Platform::SqlServer)
    }

    /// ORDER BY items for `expr` in `direction`.
    ///
    /// Plain ASC/DESC are emitted as is. Explicit NULL placement is native on
    /// PostgreSQL and SQLite, emulated with an `IS NULL` key on MySQL and a
    /// `CASE` key on SQL Server.
    pub fn order_by(&self, expr: Fragment, direction: Direction) -> Vec<Fragment> {
        let keyword = if direction.is_descending() { "DESC" } else { "ASC" };
        if !direction.has_explicit_nulls() {
            return vec![Fragment::new(format!("%ex {}", keyword), vec![SqlArg::Expr(expr)])];
        }
        let nulls_first = direction.nulls_first();
        match self {
            Platform::Postgres | Platform::Sqlite => vec![Fragment::new(
                format!(
                    "%ex {} NULLS {}",
                    keyword,
                    if nulls_first { "FIRST" } else { "LAST" }
                ),
                vec![SqlArg::Expr(expr)],
            )],
            Platform::MySql => vec![
                Fragment::new(
                    if nulls_first { "%ex IS NULL DESC" } else { "%ex IS NULL" },
                    vec![SqlArg::Expr(expr.clone())],
                ),
                Fragment::new(format!("%ex {}", keyword), vec![SqlArg::Expr(expr)]),
            ],
            Platform::SqlServer => vec![
                Fragment::new(
                    if nulls_first {
                        "CASE WHEN %ex IS NULL THEN 0 ELSE 1 END"
                    } else {
                        "CASE WHEN %ex IS NULL THEN 1 ELSE 0 END"
                    },
                    vec![SqlArg::Expr(expr.clone())],
                ),
                Fragment::new(format!("%ex {}", keyword), vec![SqlArg::Expr(expr)]),
            ],
        }
    }

    /// Suffix making `\` the LIKE escape character.
    pub fn like_escape(&self) -> &'static str {
        match self {
            Platform::MySql | Platform::Postgres => "",
            Platform::Sqlite | Platform::SqlServer => " ESCAPE '\\'",
        }
    }

    /// Whether limited SELECTs can be composed with UNION ALL.
    pub fn supports_union_with_limit(&self) -> bool {
        !matches!(self, Platform::SqlServer)
    }

    /// Join rendered SELECTs with UNION ALL, wrapping each part as the platform needs.
    pub fn union_all(&self, parts: &[String]) -> String {
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| match self {
                Platform::Sqlite => format!(
                    "SELECT * FROM ({}) AS {}",
                    part,
                    self.quote_identifier(&format!("t{}", i))
                ),
                _ => format!("({})", part),
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ")
    }

    /// Whether distinct rows are produced by grouping by every selected column.
    pub fn groups_by_all_columns(&self) -> bool {
        matches!(self, Platform::SqlServer)
    }
}
