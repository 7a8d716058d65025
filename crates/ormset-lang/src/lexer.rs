//! Lexer for property path expressions using logos.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types of the property path grammar.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+")]
pub enum Token {
    // Path separators
    #[token("->")]
    Arrow,
    #[token("::")]
    PathSep,

    // Comparison operators
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("=")]
    Eq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("~")]
    Tilde,

    // Identifier
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Human readable form used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::Arrow => "'->'".to_string(),
            Token::PathSep => "'::'".to_string(),
            Token::Ne => "'!='".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::Eq => "'='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Tilde => "'~'".to_string(),
            Token::Ident(name) => format!("identifier '{}'", name),
        }
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens and reports invalid input.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<SpannedToken>>,
    error: Option<ParseError>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
            error: None,
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Result<Option<&SpannedToken>, ParseError> {
        if self.peeked.is_none() {
            let next = self.next_inner()?;
            self.peeked = Some(next);
        }
        Ok(self.peeked.as_ref().and_then(|o| o.as_ref()))
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Option<SpannedToken>, ParseError> {
        match self.peeked.take() {
            Some(peeked) => Ok(peeked),
            None => self.next_inner(),
        }
    }

    fn next_inner(&mut self) -> Result<Option<SpannedToken>, ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        match self.inner.next() {
            Some(Ok(token)) => Ok(Some(SpannedToken {
                token,
                span: self.inner.span().into(),
            })),
            Some(Err(())) => {
                let span: Span = self.inner.span().into();
                let err = ParseError::new(
                    format!("unexpected character '{}'", span.slice(self.inner.source())),
                    span,
                );
                self.error = Some(err.clone());
                Err(err)
            }
            None => Ok(None),
        }
    }

    /// Get the source string.
    pub fn source(&self) -> &'source str {
        self.inner.source()
    }
}

/// Tokenize an expression into spanned tokens.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}
