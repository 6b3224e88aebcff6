//! Error types for expression parsing and evaluation.

use thiserror::Error;

/// Result type for expression evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Result type for parsing expressions.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Errors raised while turning source text into an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// A character that cannot start any token.
    #[error("Syntax error at {line}:{column}: unexpected character '{found}'")]
    UnexpectedChar {
        line: usize,
        column: usize,
        found: char,
    },

    /// A token that does not fit the grammar at this position.
    #[error("Syntax error at {line}:{column}: unexpected {found}, expected {expected}")]
    UnexpectedToken {
        line: usize,
        column: usize,
        found: String,
        expected: String,
    },

    /// A quoted string without its closing quote.
    #[error("Syntax error at {line}:{column}: unterminated string")]
    UnterminatedString { line: usize, column: usize },

    /// A number literal that cannot be represented.
    #[error("Syntax error at {line}:{column}: malformed literal '{text}'")]
    MalformedLiteral {
        line: usize,
        column: usize,
        text: String,
    },

    /// A function call naming neither a registered nor a built-in function.
    #[error("Function '{name}' is not defined")]
    UnknownFunction { name: String },

    /// A function called with the wrong number of arguments.
    #[error("Function '{name}' expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: String,
        actual: usize,
    },

    /// The compiler ended up in an inconsistent state.
    #[error("There was an error parsing the expression: {0}")]
    Internal(String),
}

impl ParseError {
    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ParseError::Internal(message.into())
    }
}

/// Errors raised while evaluating an expression against an entity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Operand types the operator cannot handle.
    #[error("Type error in {op}: {message}")]
    Type { op: String, message: String },

    /// Unknown unit passed to `TimeSince`.
    #[error("Invalid unit '{0}'")]
    InvalidUnit(String),

    /// Pattern passed to `Matches` does not compile.
    #[error("Invalid regular expression '{pattern}': {message}")]
    Regex { pattern: String, message: String },

    /// A field kept producing callables.
    #[error("max functor resolution depth reached")]
    ResolutionDepth,

    /// A functor field or custom operator failed.
    #[error("Functor error: {0}")]
    Functor(String),
}

impl EvalError {
    /// Create a type mismatch error for the named operator.
    pub fn type_error(op: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Type {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Create a functor error.
    pub fn functor(message: impl Into<String>) -> Self {
        EvalError::Functor(message.into())
    }
}
