//! Core error types.

use ormset_lang::ParseError;
use thiserror::Error;

/// Collection engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed expression, wrong argument count or type, key arity mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Programming or configuration error such as double aggregation or a
    /// path segment that is not a relationship.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A feature combination that is deliberately unsupported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A checked accessor matched no rows.
    #[error("no result: {0}")]
    NoResult(String),

    /// Unknown proxy method on a repository or collection.
    #[error("undefined method '{method}' on {target}")]
    MemberAccess { target: String, method: String },

    /// Expression parse error.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Database driver error.
    #[error("driver error: {0}")]
    Driver(#[from] rusqlite::Error),

    /// Configuration decode error.
    #[error("config error: {0}")]
    Config(String),

    /// IR error.
    #[error("protocol error: {0}")]
    Proto(#[from] ormset_proto::Error),
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        Error::NotSupported(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
