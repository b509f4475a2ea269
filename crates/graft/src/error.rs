//! Errors surfaced by the binding.

use crate::native::NativeError;

/// Construction-time errors in a query's predicate descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    #[error("Predicates must begin with a literal value")]
    MustBeginWithLiteral,

    #[error("Wrong number of arguments to `#eq?` predicate. Expected 2, got {0}")]
    EqArity(usize),

    #[error("First argument of `#eq?` predicate must be a capture. Got \"{0}\"")]
    EqFirstArgument(String),

    #[error("Wrong number of arguments to `#match?` predicate. Expected 2, got {0}.")]
    MatchArity(usize),

    #[error("First argument of `#match?` predicate must be a capture. Got \"{0}\".")]
    MatchFirstArgument(String),

    #[error("Second argument of `#match?` predicate must be a string. Got @{0}.")]
    MatchSecondArgument(String),

    #[error("Invalid regex `{pattern}` in `#match?` predicate: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("Wrong number of arguments to `#{operator}` predicate. Expected 1 or 2. Got {got}.")]
    PropertyArity { operator: String, got: usize },

    #[error("Arguments to `#{0}` predicate must be strings.")]
    PropertyArguments(String),

    #[error("Unknown query predicate `#{0}`")]
    UnknownOperator(String),
}

/// Errors that can occur when driving the native engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("parser has no language")]
    NoLanguage,

    #[error("node belongs to a different engine")]
    ForeignNode,

    #[error("tree belongs to a different engine")]
    ForeignTree,

    #[error("language belongs to a different engine")]
    ForeignLanguage,

    #[error("malformed native stream: {0}")]
    MalformedStream(&'static str),
}

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, Error>;
