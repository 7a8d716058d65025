//! LIKE matching.

use std::collections::HashMap;

use ormset_proto::{Aggregator, Arg, LikeExpression, Value};
use parking_lot::Mutex;
use regex::Regex;

use crate::collection::helpers::{
    ArrayCollectionHelper, ArrayExpressionResult, DbalExpressionResult, DbalQueryBuilderHelper,
};
use crate::dbal::{Fragment, QueryBuilder, SqlArg};
use crate::entity::EntityRef;
use crate::error::{Error, Result};

use super::{binary_args, CollectionFunction, LIKE};

/// Compiled patterns kept by one [`LikeFunction`].
const PATTERN_CACHE_CAPACITY: usize = 128;

#[derive(Debug)]
struct CachedPattern {
    regex: Regex,
    hits: u64,
}

/// `lhs LIKE pattern`.
///
/// `%` matches any run of characters, `_` one character and `\` escapes the
/// next character. Matching is case sensitive. NULL never matches.
#[derive(Debug)]
pub struct LikeFunction {
    patterns: Mutex<HashMap<String, CachedPattern>>,
    capacity: usize,
}

impl Default for LikeFunction {
    fn default() -> Self {
        Self::with_capacity(PATTERN_CACHE_CAPACITY)
    }
}

impl LikeFunction {
    pub fn new() -> Self {
        Self::default()
    }

    /// A function caching at most `capacity` compiled patterns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            patterns: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of cached patterns.
    pub fn cached_patterns(&self) -> usize {
        self.patterns.lock().len()
    }

    fn like(rhs: &Arg) -> Result<&LikeExpression> {
        match rhs {
            Arg::Like(like) => Ok(like),
            other => Err(Error::invalid_argument(format!(
                "'{}' expects a LIKE expression, got {:?}",
                LIKE, other
            ))),
        }
    }

    /// Whether `value` matches the LIKE `pattern`.
    pub fn matches(&self, value: &Value, pattern: &str) -> Result<bool> {
        let text = match value {
            Value::Null => return Ok(false),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut patterns = self.patterns.lock();
        if let Some(cached) = patterns.get_mut(pattern) {
            cached.hits += 1;
            return Ok(cached.regex.is_match(&text));
        }
        let regex = Regex::new(&to_regex(pattern)).map_err(|e| {
            Error::invalid_argument(format!("invalid LIKE pattern '{}': {}", pattern, e))
        })?;
        let matched = regex.is_match(&text);
        if patterns.len() >= self.capacity {
            evict_least_used(&mut patterns);
        }
        patterns.insert(pattern.to_string(), CachedPattern { regex, hits: 0 });
        Ok(matched)
    }
}

fn evict_least_used(patterns: &mut HashMap<String, CachedPattern>) {
    let least_used = patterns
        .iter()
        .min_by_key(|(_, cached)| cached.hits)
        .map(|(pattern, _)| pattern.clone());
    if let Some(pattern) = least_used {
        patterns.remove(&pattern);
    }
}

/// Translate a LIKE pattern into an anchored regular expression.
fn to_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
                }
            }
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

impl CollectionFunction for LikeFunction {
    fn process_array_expression(
        &self,
        helper: &ArrayCollectionHelper<'_>,
        entity: &EntityRef,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<ArrayExpressionResult> {
        let (lhs, rhs) = binary_args(LIKE, args)?;
        let pattern = Self::like(rhs)?.to_pattern();
        let left = helper.resolve_operand(entity, lhs, aggregator)?;
        left.map(|value| Ok(Value::Bool(self.matches(value, &pattern)?)))
    }

    fn process_query_builder_expression(
        &self,
        helper: &DbalQueryBuilderHelper<'_>,
        builder: &QueryBuilder,
        args: &[Arg],
        aggregator: Option<&Aggregator>,
    ) -> Result<DbalExpressionResult> {
        let (lhs, rhs) = binary_args(LIKE, args)?;
        let pattern = Self::like(rhs)?.to_pattern();
        let left = helper.resolve_operand(builder, lhs, aggregator)?;
        let escape = helper.platform().like_escape();
        let predicate = Fragment::new(
            format!("%ex LIKE %any{}", escape),
            vec![SqlArg::Expr(left.operand()), SqlArg::Value(Value::String(pattern))],
        );
        Ok(left.into_predicate(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(value: &str, like: LikeExpression) -> bool {
        LikeFunction::new()
            .matches(&Value::from(value), &like.to_pattern())
            .unwrap()
    }

    #[test]
    fn test_like_modes() {
        assert!(matches("Rust in Action", LikeExpression::starts_with("Rust")));
        assert!(!matches("Trust", LikeExpression::starts_with("Rust")));
        assert!(matches("Programming Rust", LikeExpression::ends_with("Rust")));
        assert!(matches("The Rust Book", LikeExpression::contains("Rust")));
        assert!(!matches("The rust book", LikeExpression::contains("Rust")));
    }

    #[test]
    fn test_like_wildcards() {
        assert!(matches("abc", LikeExpression::raw("a_c")));
        assert!(!matches("abbc", LikeExpression::raw("a_c")));
        assert!(matches("a\nb", LikeExpression::raw("a%b")));
        assert!(matches("a.b", LikeExpression::raw("a.b")));
        assert!(!matches("axb", LikeExpression::raw("a.b")));
    }

    #[test]
    fn test_like_literal_wildcards() {
        assert!(matches("100% sure", LikeExpression::starts_with("100%")));
        assert!(!matches("1000 sure", LikeExpression::starts_with("100%")));
        assert!(matches("snake_case", LikeExpression::ends_with("_case")));
        assert!(!matches("snakeXcase", LikeExpression::ends_with("_case")));
    }

    #[test]
    fn test_pattern_cache_is_bounded() {
        let like = LikeFunction::with_capacity(2);
        let value = Value::from("abc");
        assert!(like.matches(&value, "a%").unwrap());
        assert!(like.matches(&value, "a%").unwrap());
        assert!(!like.matches(&value, "x%").unwrap());
        assert!(like.matches(&value, "%c").unwrap());
        assert_eq!(like.cached_patterns(), 2);

        // The frequently used pattern survives eviction.
        assert!(like.patterns.lock().contains_key("a%"));
        for i in 0..10 {
            like.matches(&value, &format!("{}%", i)).unwrap();
        }
        assert_eq!(like.cached_patterns(), 2);
        assert!(like.patterns.lock().contains_key("a%"));
    }

    #[test]
    fn test_like_null_and_numbers() {
        let like = LikeFunction::new();
        assert!(!like.matches(&Value::Null, "%").unwrap());
        assert!(like.matches(&Value::Int(2024), "20%").unwrap());
    }

    #[test]
    fn test_regex_translation() {
        assert_eq!(to_regex("a%b_c"), "(?s)^a.*b.c$");
        assert_eq!(to_regex("\\%x"), "(?s)^%x$");
    }
}
