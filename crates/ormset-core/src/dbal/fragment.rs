//! SQL fragments with typed placeholders.
//!
//! Placeholders:
//!
//! | placeholder | argument | rendering |
//! |-------------|----------|-----------|
//! | `%table` | [`SqlArg::Table`] | quoted table name |
//! | `%column` | [`SqlArg::Column`] | quoted `alias.column` |
//! | `%column[]` | [`SqlArg::Columns`] | comma separated quoted columns |
//! | `%any` | [`SqlArg::Value`] | bound parameter |
//! | `%any[]` | [`SqlArg::Values`] | parenthesised parameter list |
//! | `%ex` | [`SqlArg::Expr`] | nested fragment |
//! | `%and` / `%or` | [`SqlArg::And`] / [`SqlArg::Or`] | nested fragments joined by the operator |
//! | `%multiOr` | [`SqlArg::MultiOr`] | rows of `column = value` pairs joined by OR |
//! | `%query` | [`SqlArg::Query`] | parenthesised subquery |
//! | `%%` | none | a literal `%` |

use ormset_proto::Value;

use crate::error::{Error, Result};

use super::builder::QueryBuilder;
use super::platform::Platform;

/// A fragment argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Table(String),
    Column(String),
    Columns(Vec<String>),
    Value(Value),
    Values(Vec<Value>),
    Expr(Fragment),
    And(Vec<Fragment>),
    Or(Vec<Fragment>),
    MultiOr(Vec<Vec<(String, Value)>>),
    Query(Box<QueryBuilder>),
}

/// A SQL template plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, args: Vec<SqlArg>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// A fragment without arguments.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// A single column reference.
    pub fn column(column: impl Into<String>) -> Self {
        Self::new("%column", vec![SqlArg::Column(column.into())])
    }

    /// `%and` over `parts`.
    pub fn and(parts: Vec<Fragment>) -> Self {
        Self::new("%and", vec![SqlArg::And(parts)])
    }

    /// `%or` over `parts`.
    pub fn or(parts: Vec<Fragment>) -> Self {
        Self::new("%or", vec![SqlArg::Or(parts)])
    }

    /// Rewrite column references qualified with `from` to use `to`.
    pub fn rename_alias(&mut self, from: &str, to: &str) {
        for arg in &mut self.args {
            match arg {
                SqlArg::Column(column) => rename_column(column, from, to),
                SqlArg::Columns(columns) => {
                    columns.iter_mut().for_each(|c| rename_column(c, from, to))
                }
                SqlArg::MultiOr(rows) => rows
                    .iter_mut()
                    .flat_map(|row| row.iter_mut())
                    .for_each(|(c, _)| rename_column(c, from, to)),
                SqlArg::Expr(fragment) => fragment.rename_alias(from, to),
                SqlArg::And(parts) | SqlArg::Or(parts) => {
                    parts.iter_mut().for_each(|p| p.rename_alias(from, to))
                }
                SqlArg::Query(query) => query.rename_alias(from, to),
                SqlArg::Table(_) | SqlArg::Value(_) | SqlArg::Values(_) => {}
            }
        }
    }

    /// Render the fragment and collect its parameters.
    pub fn render(&self, platform: Platform) -> Result<(String, Vec<Value>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render_into(platform, &mut sql, &mut params)?;
        Ok((sql, params))
    }

    /// Render into an existing buffer; placeholder numbering continues from `params`.
    pub fn render_into(
        &self,
        platform: Platform,
        out: &mut String,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        let mut args = self.args.iter();
        let mut rest = self.sql.as_str();

        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];
            if let Some(stripped) = rest.strip_prefix('%') {
                out.push('%');
                rest = stripped;
                continue;
            }
            let name_len = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            let mut name = &rest[..name_len];
            rest = &rest[name_len..];
            let is_list = rest.starts_with("[]");
            if is_list {
                rest = &rest[2..];
            }
            if name.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "dangling '%' in SQL fragment '{}'",
                    self.sql
                )));
            }
            let arg = args.next().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "missing argument for %{} in '{}'",
                    name, self.sql
                ))
            })?;
            if is_list {
                name = match name {
                    "column" => "column[]",
                    "any" => "any[]",
                    other => other,
                };
            }
            render_placeholder(name, arg, platform, out, params, &self.sql)?;
        }
        out.push_str(rest);

        if args.next().is_some() {
            return Err(Error::invalid_argument(format!(
                "too many arguments for '{}'",
                self.sql
            )));
        }
        Ok(())
    }
}

fn rename_column(column: &mut String, from: &str, to: &str) {
    if let Some(rest) = column.strip_prefix(from).and_then(|r| r.strip_prefix('.')) {
        *column = format!("{}.{}", to, rest);
    }
}

fn render_placeholder(
    name: &str,
    arg: &SqlArg,
    platform: Platform,
    out: &mut String,
    params: &mut Vec<Value>,
    template: &str,
) -> Result<()> {
    match (name, arg) {
        ("table", SqlArg::Table(table)) => out.push_str(&platform.quote_identifier(table)),
        ("column", SqlArg::Column(column)) => out.push_str(&platform.quote_column(column)),
        ("column[]", SqlArg::Columns(columns)) => {
            let quoted: Vec<String> = columns.iter().map(|c| platform.quote_column(c)).collect();
            out.push_str(&quoted.join(", "));
        }
        ("any", SqlArg::Value(Value::List(_))) => {
            return Err(Error::invalid_argument(format!(
                "%any received a list in '{}', use %any[]",
                template
            )))
        }
        ("any", SqlArg::Value(value)) => push_param(platform, value.clone(), out, params),
        ("any[]", SqlArg::Values(values)) => {
            if values.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "%any[] received an empty list in '{}'",
                    template
                )));
            }
            out.push('(');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_param(platform, value.clone(), out, params);
            }
            out.push(')');
        }
        ("ex", SqlArg::Expr(fragment)) => fragment.render_into(platform, out, params)?,
        ("query", SqlArg::Query(query)) => {
            out.push('(');
            query.build_into(platform, out, params)?;
            out.push(')');
        }
        ("and", SqlArg::And(parts)) => render_junction("AND", "1=1", parts, platform, out, params)?,
        ("or", SqlArg::Or(parts)) => render_junction("OR", "1=0", parts, platform, out, params)?,
        ("multiOr", SqlArg::MultiOr(rows)) => {
            let parts: Vec<Fragment> = rows
                .iter()
                .map(|row| {
                    Fragment::and(
                        row.iter()
                            .map(|(column, value)| match value {
                                Value::Null => Fragment::new(
                                    "%column IS NULL",
                                    vec![SqlArg::Column(column.clone())],
                                ),
                                value => Fragment::new(
                                    "%column = %any",
                                    vec![
                                        SqlArg::Column(column.clone()),
                                        SqlArg::Value(value.clone()),
                                    ],
                                ),
                            })
                            .collect(),
                    )
                })
                .collect();
            render_junction("OR", "1=0", &parts, platform, out, params)?;
        }
        (name, arg) => {
            return Err(Error::invalid_argument(format!(
                "placeholder %{} cannot take {:?} in '{}'",
                name, arg, template
            )))
        }
    }
    Ok(())
}

fn push_param(platform: Platform, value: Value, out: &mut String, params: &mut Vec<Value>) {
    params.push(value);
    out.push_str(&platform.placeholder(params.len()));
}

fn render_junction(
    operator: &str,
    empty: &str,
    parts: &[Fragment],
    platform: Platform,
    out: &mut String,
    params: &mut Vec<Value>,
) -> Result<()> {
    match parts {
        [] => out.push_str(empty),
        [single] => single.render_into(platform, out, params)?,
        many => {
            out.push('(');
            for (i, part) in many.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                    out.push_str(operator);
                    out.push(' ');
                }
                out.push('(');
                part.render_into(platform, out, params)?;
                out.push(')');
            }
            out.push(')');
        }
    }
    Ok(())
}
