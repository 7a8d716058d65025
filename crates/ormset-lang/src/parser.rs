//! Recursive descent parser for property path expressions.
//!
//! Grammar:
//!
//! ```text
//! condition := path operator?
//! path      := (IDENT '::')? IDENT ('->' IDENT)*
//! operator  := '!=' | '<=' | '>=' | '=' | '>' | '<' | '~'
//! ```

use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::Span;

/// Comparison requested by the trailing operator of a condition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
}

impl Operator {
    fn from_token(token: &Token) -> Option<Self> {
        match token {
            Token::Eq => Some(Operator::Equals),
            Token::Ne => Some(Operator::NotEquals),
            Token::Gt => Some(Operator::GreaterThan),
            Token::Ge => Some(Operator::GreaterThanOrEqual),
            Token::Lt => Some(Operator::LessThan),
            Token::Le => Some(Operator::LessThanOrEqual),
            Token::Tilde => Some(Operator::Like),
            _ => None,
        }
    }

    /// The textual operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::Like => "~",
        }
    }
}

/// A parsed property path.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyExpr {
    /// Explicit owning entity given with `Entity::`.
    pub source: Option<String>,
    /// Property names from the owning entity to the target property.
    pub tokens: Vec<String>,
    pub span: Span,
}

/// Parser over a single expression.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
        }
    }

    /// Parse `path operator?` and require end of input.
    pub fn parse_condition(&mut self) -> Result<(Operator, PropertyExpr), ParseError> {
        let path = self.parse_path()?;
        let operator = match self.lexer.next_token()? {
            None => return Ok((Operator::Equals, path)),
            Some(tok) => Operator::from_token(&tok.token).ok_or_else(|| {
                ParseError::new(
                    format!("expected operator, found {}", tok.token.describe()),
                    tok.span,
                )
                .with_hint("supported operators are !=, <=, >=, =, >, <, ~")
            })?,
        };
        self.expect_end()?;
        Ok((operator, path))
    }

    /// Parse a bare path and require end of input.
    pub fn parse_expression(&mut self) -> Result<PropertyExpr, ParseError> {
        let path = self.parse_path()?;
        self.expect_end()?;
        Ok(path)
    }

    fn parse_path(&mut self) -> Result<PropertyExpr, ParseError> {
        let (first, start) = self.expect_ident()?;
        let mut source = None;
        let mut tokens = Vec::new();
        let mut end = start;

        let qualified = matches!(
            self.lexer.peek()?,
            Some(SpannedToken {
                token: Token::PathSep,
                ..
            })
        );
        if qualified {
            self.lexer.next_token()?;
            source = Some(first);
            let (name, span) = self.expect_ident()?;
            tokens.push(name);
            end = span;
        } else {
            tokens.push(first);
        }

        while let Some(tok) = self.lexer.peek()? {
            if tok.token != Token::Arrow {
                break;
            }
            self.lexer.next_token()?;
            let (name, span) = self.expect_ident()?;
            tokens.push(name);
            end = span;
        }

        Ok(PropertyExpr {
            source,
            tokens,
            span: start.merge(end),
        })
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.lexer.next_token()? {
            Some(SpannedToken {
                token: Token::Ident(name),
                span,
            }) => Ok((name, span)),
            Some(tok) => Err(ParseError::new(
                format!("expected property name, found {}", tok.token.describe()),
                tok.span,
            )),
            None => Err(ParseError::new(
                "expected property name, found end of expression",
                Span::eof(self.source),
            )),
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        match self.lexer.next_token()? {
            None => Ok(()),
            Some(tok) => Err(ParseError::new(
                format!("unexpected {} after expression", tok.token.describe()),
                tok.span,
            )
            .with_hint("separate relationship hops with '->'")),
        }
    }
}

/// Split a condition key such as `author->name!=` into its operator and path.
///
/// The operator defaults to [`Operator::Equals`] when absent. The returned
/// path is the original text without the operator.
pub fn parse_property_operator(condition: &str) -> Result<(Operator, String), ParseError> {
    let (operator, path) = Parser::new(condition).parse_condition()?;
    let text = condition[path.span.start..path.span.end].to_string();
    Ok((operator, text))
}

/// Parse an arrow separated property path with an optional `Entity::` qualifier.
pub fn parse_property_expr(path: &str) -> Result<PropertyExpr, ParseError> {
    Parser::new(path).parse_expression()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_operator() {
        let (op, path) = parse_property_operator("name").unwrap();
        assert_eq!(op, Operator::Equals);
        assert_eq!(path, "name");
    }

    #[test]
    fn test_all_operators() {
        let cases = [
            ("year!=", Operator::NotEquals),
            ("year<=", Operator::LessThanOrEqual),
            ("year>=", Operator::GreaterThanOrEqual),
            ("year=", Operator::Equals),
            ("year>", Operator::GreaterThan),
            ("year<", Operator::LessThan),
            ("title~", Operator::Like),
        ];
        for (source, expected) in cases {
            let (op, _) = parse_property_operator(source).unwrap();
            assert_eq!(op, expected, "operator of {}", source);
            assert!(source.ends_with(op.symbol()));
        }
    }

    #[test]
    fn test_operator_after_whitespace() {
        let (op, path) = parse_property_operator("books->year >").unwrap();
        assert_eq!(op, Operator::GreaterThan);
        assert_eq!(path, "books->year");
    }

    #[test]
    fn test_path_with_qualifier() {
        let (op, path) = parse_property_operator("Book::author->name!=").unwrap();
        assert_eq!(op, Operator::NotEquals);
        assert_eq!(path, "Book::author->name");

        let expr = parse_property_expr(&path).unwrap();
        assert_eq!(expr.source, Some("Book".to_string()));
        assert_eq!(expr.tokens, vec!["author".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_unqualified_path() {
        let expr = parse_property_expr("author->address->city").unwrap();
        assert_eq!(expr.source, None);
        assert_eq!(
            expr.tokens,
            vec!["author".to_string(), "address".to_string(), "city".to_string()]
        );
        assert_eq!(expr.span, Span::new(0, 21));
    }

    #[test]
    fn test_rejects_operator_in_expression() {
        assert!(parse_property_expr("year>").is_err());
    }

    #[test]
    fn test_rejects_double_operator() {
        let err = parse_property_operator("year>>").unwrap_err();
        assert_eq!(err.span, Span::new(5, 6));
    }

    #[test]
    fn test_rejects_dangling_arrow() {
        let err = parse_property_operator("author->").unwrap_err();
        assert!(err.message.contains("end of expression"));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(parse_property_operator("").is_err());
        assert!(parse_property_operator("->name").is_err());
    }
}
