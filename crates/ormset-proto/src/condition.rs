//! Filter and ordering IR accepted by collections.
//!
//! A [`Condition`] is what callers hand to `find_by`. Before evaluation every
//! condition is normalized into a [`FunctionCall`] tree whose function names
//! are looked up in the collection function registry.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Registry key of the conjunction function.
pub const AND: &str = "and";
/// Registry key of the disjunction function.
pub const OR: &str = "or";

/// A filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `"path(op)" => value`, for example `"books->year>" => 2000`.
    Property { expr: String, value: Arg },
    /// Conjunction of sub-conditions, optionally aggregated over a to-many path.
    And {
        aggregator: Option<Aggregator>,
        items: Vec<Condition>,
    },
    /// Disjunction of sub-conditions, optionally aggregated over a to-many path.
    Or {
        aggregator: Option<Aggregator>,
        items: Vec<Condition>,
    },
    /// Explicit function call with positional arguments.
    Call(FunctionCall),
}

impl Condition {
    /// Create a property condition.
    pub fn property(expr: impl Into<String>, value: impl Into<Arg>) -> Self {
        Condition::Property {
            expr: expr.into(),
            value: value.into(),
        }
    }

    /// Create a conjunction from a flat map of `"path(op)" => value` pairs.
    pub fn pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Arg>,
        I: IntoIterator<Item = (K, V)>,
    {
        Condition::And {
            aggregator: None,
            items: pairs
                .into_iter()
                .map(|(k, v)| Condition::property(k, v))
                .collect(),
        }
    }

    /// Create a conjunction.
    pub fn and(items: Vec<Condition>) -> Self {
        Condition::And {
            aggregator: None,
            items,
        }
    }

    /// Create a disjunction.
    pub fn or(items: Vec<Condition>) -> Self {
        Condition::Or {
            aggregator: None,
            items,
        }
    }

    /// Matches when at least one related row satisfies `condition`.
    pub fn any(condition: Condition) -> Self {
        Self::aggregated(Aggregator::Any, condition)
    }

    /// Matches when no related row satisfies `condition`.
    pub fn none(condition: Condition) -> Self {
        Self::aggregated(Aggregator::None, condition)
    }

    /// Matches when the number of related rows satisfying `condition` is within bounds.
    pub fn count_between(
        at_least: Option<usize>,
        at_most: Option<usize>,
        condition: Condition,
    ) -> Self {
        Self::aggregated(Aggregator::Count { at_least, at_most }, condition)
    }

    /// Wrap a condition in an aggregating conjunction.
    pub fn aggregated(aggregator: Aggregator, condition: Condition) -> Self {
        Condition::And {
            aggregator: Some(aggregator),
            items: vec![condition],
        }
    }

    /// Create an explicit function call condition.
    pub fn call(function: impl Into<String>, args: Vec<Arg>) -> Self {
        Condition::Call(FunctionCall::new(function, args))
    }
}

impl From<FunctionCall> for Condition {
    fn from(call: FunctionCall) -> Self {
        Condition::Call(call)
    }
}

/// A function invocation resolved through the function registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Registry key of the function.
    pub function: String,
    /// Positional arguments.
    pub args: Vec<Arg>,
    /// Aggregator applied to to-many paths inside this call.
    pub aggregator: Option<Aggregator>,
}

impl FunctionCall {
    /// Create a call without an aggregator.
    pub fn new(function: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            function: function.into(),
            args,
            aggregator: None,
        }
    }

    /// Attach an aggregator.
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// `COUNT(path)`.
    pub fn count(path: impl Into<String>) -> Self {
        Self::new("count", vec![Arg::Expr(path.into())])
    }

    /// `SUM(path)`.
    pub fn sum(path: impl Into<String>) -> Self {
        Self::new("sum", vec![Arg::Expr(path.into())])
    }

    /// `AVG(path)`.
    pub fn avg(path: impl Into<String>) -> Self {
        Self::new("avg", vec![Arg::Expr(path.into())])
    }

    /// `MIN(path)`.
    pub fn min(path: impl Into<String>) -> Self {
        Self::new("min", vec![Arg::Expr(path.into())])
    }

    /// `MAX(path)`.
    pub fn max(path: impl Into<String>) -> Self {
        Self::new("max", vec![Arg::Expr(path.into())])
    }
}

/// A positional function argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    /// A property path expression such as `author->name`.
    Expr(String),
    /// A nested function call (boolean sub-condition or aggregate).
    Call(FunctionCall),
    /// A literal value.
    Value(Value),
    /// A LIKE pattern.
    Like(LikeExpression),
}

impl Arg {
    /// Create a property path argument.
    pub fn expr(path: impl Into<String>) -> Self {
        Arg::Expr(path.into())
    }
}

macro_rules! arg_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Value(Value::from(v))
                }
            }
        )*
    };
}

arg_from_value!(bool, i32, i64, u32, f64, &str, String, Vec<Value>);

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<Option<i64>> for Arg {
    fn from(v: Option<i64>) -> Self {
        Arg::Value(Value::from(v))
    }
}

impl From<LikeExpression> for Arg {
    fn from(v: LikeExpression) -> Self {
        Arg::Like(v)
    }
}

impl From<FunctionCall> for Arg {
    fn from(v: FunctionCall) -> Self {
        Arg::Call(v)
    }
}

/// How a LIKE input is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikeMode {
    /// Input is a raw pattern; `%` and `_` are wildcards.
    Raw,
    /// Input is a literal prefix.
    StartsWith,
    /// Input is a literal suffix.
    EndsWith,
    /// Input is a literal infix.
    Contains,
}

/// A LIKE comparison operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeExpression {
    pub input: String,
    pub mode: LikeMode,
}

impl LikeExpression {
    /// Raw pattern, wildcards are honored.
    pub fn raw(pattern: impl Into<String>) -> Self {
        Self {
            input: pattern.into(),
            mode: LikeMode::Raw,
        }
    }

    pub fn starts_with(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            mode: LikeMode::StartsWith,
        }
    }

    pub fn ends_with(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            mode: LikeMode::EndsWith,
        }
    }

    pub fn contains(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            mode: LikeMode::Contains,
        }
    }

    /// Build the SQL LIKE pattern, escaping literal input with backslashes.
    pub fn to_pattern(&self) -> String {
        match self.mode {
            LikeMode::Raw => self.input.clone(),
            LikeMode::StartsWith => format!("{}%", escape_like(&self.input)),
            LikeMode::EndsWith => format!("%{}", escape_like(&self.input)),
            LikeMode::Contains => format!("%{}%", escape_like(&self.input)),
        }
    }
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Aggregation of a predicate over the rows reached through a to-many path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    /// At least one related row matches.
    Any,
    /// No related row matches.
    None,
    /// The number of matching related rows is within the inclusive bounds.
    Count {
        at_least: Option<usize>,
        at_most: Option<usize>,
    },
}

impl Aggregator {
    /// Stable key used to group predicates sharing the same aggregation.
    pub fn key(&self) -> String {
        match self {
            Aggregator::Any => "any".to_string(),
            Aggregator::None => "none".to_string(),
            Aggregator::Count { at_least, at_most } => format!(
                "count_{}_{}",
                at_least.map(|v| v.to_string()).unwrap_or_default(),
                at_most.map(|v| v.to_string()).unwrap_or_default()
            ),
        }
    }

    /// Decide the aggregate outcome given the number of matching rows.
    pub fn accepts(&self, matching: usize) -> bool {
        match self {
            Aggregator::Any => matching > 0,
            Aggregator::None => matching == 0,
            Aggregator::Count { at_least, at_most } => {
                at_least.map_or(true, |min| matching >= min)
                    && at_most.map_or(true, |max| matching <= max)
            }
        }
    }
}

/// Sort direction with explicit NULL placement variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Direction {
    /// Ascending; NULL sorts first.
    #[default]
    Asc,
    /// Descending; NULL sorts last.
    Desc,
    AscNullsFirst,
    AscNullsLast,
    DescNullsFirst,
    DescNullsLast,
}

impl Direction {
    /// Whether values sort descending.
    pub fn is_descending(self) -> bool {
        matches!(
            self,
            Direction::Desc | Direction::DescNullsFirst | Direction::DescNullsLast
        )
    }

    /// Whether NULL values are placed before non-NULL values.
    pub fn nulls_first(self) -> bool {
        matches!(
            self,
            Direction::Asc | Direction::AscNullsFirst | Direction::DescNullsFirst
        )
    }

    /// Whether the direction names its NULL placement explicitly.
    pub fn has_explicit_nulls(self) -> bool {
        !matches!(self, Direction::Asc | Direction::Desc)
    }
}

/// Expression a collection is ordered by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderExpr {
    /// Property path.
    Path(String),
    /// Function result, e.g. an aggregate over a to-many path.
    Call(FunctionCall),
}

impl From<&str> for OrderExpr {
    fn from(v: &str) -> Self {
        OrderExpr::Path(v.to_string())
    }
}

impl From<String> for OrderExpr {
    fn from(v: String) -> Self {
        OrderExpr::Path(v)
    }
}

impl From<FunctionCall> for OrderExpr {
    fn from(v: FunctionCall) -> Self {
        OrderExpr::Call(v)
    }
}
