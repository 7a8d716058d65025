//! Parse error type.

use crate::span::Span;
use thiserror::Error;

/// Error raised when an expression does not match the property path grammar.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with the offending expression underlined.
    pub fn format_with_source(&self, source: &str) -> String {
        let col = source
            .get(..self.span.start.min(source.len()))
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0);
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> column {}\n", col + 1));
        result.push_str(&format!("   | {}\n   | ", source));
        for _ in 0..col {
            result.push(' ');
        }
        result.push('^');
        let width = self.span.len().min(source.len().saturating_sub(self.span.start));
        for _ in 1..width {
            result.push('~');
        }
        result.push('\n');

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}
