//! ormset expression language
//!
//! This crate parses the property path expressions used as filter keys and
//! ordering expressions by ormset collections.
//!
//! # Syntax
//!
//! ```text
//! name                     # property of the collection entity, compared with '='
//! books->year>             # relationship traversal with a trailing operator
//! author->address->city~   # embeddable hop, LIKE comparison
//! Book::author->name!=     # explicit owning entity
//! ```
//!
//! # Usage
//!
//! ```rust
//! use ormset_lang::{parse_property_operator, parse_property_expr, Operator};
//!
//! let (op, path) = parse_property_operator("books->year>").unwrap();
//! assert_eq!(op, Operator::GreaterThan);
//!
//! let expr = parse_property_expr(&path).unwrap();
//! assert_eq!(expr.tokens, vec!["books", "year"]);
//! ```

pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

pub use error::ParseError;
pub use parser::{parse_property_expr, parse_property_operator, Operator, PropertyExpr};
pub use span::Span;

/// Tokenize an expression (for debugging/testing).
pub fn tokenize(source: &str) -> Result<Vec<lexer::SpannedToken>, ParseError> {
    lexer::tokenize(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_source_context() {
        let source = "author->->name";
        let err = parse_property_operator(source).unwrap_err();
        let formatted = err.format_with_source(source);
        assert!(formatted.contains("column 9"));
        assert!(formatted.contains("error"));
    }

    #[test]
    fn test_parse_then_split() {
        let (op, path) = parse_property_operator("Author::books->title~").unwrap();
        assert_eq!(op, Operator::Like);
        let expr = parse_property_expr(&path).unwrap();
        assert_eq!(expr.source.as_deref(), Some("Author"));
        assert_eq!(expr.tokens.len(), 2);
    }
}
