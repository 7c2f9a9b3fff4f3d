//! minischeme - a small lexically scoped Scheme-family interpreter
//!
//! This crate provides a lexer, a recursive-descent parser, a frame-based
//! environment model and a tree-walking evaluator over cons-pair lists.
//! It is meant to be embedded: a REPL or service keeps a session frame and
//! threads it through repeated calls to [`Evaluator::evaluate`].
//!
//! ```scheme
//! (define (square x) (* x x))   ; procedure definition sugar
//! (square 4)                    ; => 16
//! (let ((a 1) (b 2)) (+ a b))   ; => 3
//! (list-ref (list 1 2 3) 1)     ; => 2
//! (append (list 1 2) (list 3))  ; => (cons 1 (cons 2 (cons 3 nil)))
//! ```
//!
//! ## Sessions
//!
//! Builtins live in a root frame owned by the [`Evaluator`]. Each session
//! gets a working frame whose parent is that root, and every definition made
//! during the session lands in the working frame:
//!
//! ```
//! use minischeme::Evaluator;
//!
//! let evaluator = Evaluator::new();
//! let (_, frame) = evaluator.evaluate_source("(define x 10)", None).unwrap();
//! let (value, _) = evaluator.evaluate_source("x", Some(frame)).unwrap();
//! assert_eq!(value.unwrap().to_string(), "10");
//! ```
//!
//! ## Semantics worth knowing
//!
//! - `#f`, `0` and `0.0` are falsy; everything else (including `nil`) is truthy
//! - `(< x)` is `#f` while `(<= x)`, `(> x)` and `(>= x)` are `#t`
//! - errors abort the current evaluation but never roll back earlier bindings
//! - recursion is bounded by [`EvalConfig::max_depth`]
//!
//! ## Modules
//!
//! - `lexer`: source text to tokens
//! - `parser`: tokens to [`Expr`] trees
//! - `environment`: frames and the scope chain
//! - `value`: runtime values, pairs and procedures
//! - `evaluator`: special forms and procedure application
//! - `builtinops`: the builtin procedure registry

use std::fmt;

/// Maximum nesting depth accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default ceiling for nested evaluation, see [`EvalConfig`]
pub const MAX_EVAL_DEPTH: usize = 512;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed source or malformed special form
    Syntax,
    /// Unbound name
    Name,
    /// Arity, type and other runtime failures
    Evaluation,
    /// The evaluation depth ceiling was exceeded
    RecursionTooDeep,
    /// Reading a source file failed
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::RecursionTooDeep => "RecursionError",
            ErrorKind::Io => "IoError",
        };
        f.write_str(name)
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    SyntaxError(String),
    NameError(String),
    EvalError(String),
    TypeError(String),
    ArityError {
        expected: builtinops::Arity,
        got: usize,
        expression: Option<String>, // Optional expression context
    },
    RecursionLimit {
        limit: usize,
    },
    Io(String),
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: builtinops::Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(
        expected: builtinops::Arity,
        got: usize,
        expression: String,
    ) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SyntaxError(_) => ErrorKind::Syntax,
            Error::NameError(_) => ErrorKind::Name,
            Error::EvalError(_) | Error::TypeError(_) | Error::ArityError { .. } => {
                ErrorKind::Evaluation
            }
            Error::RecursionLimit { .. } => ErrorKind::RecursionTooDeep,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SyntaxError(msg) => write!(f, "SyntaxError: {msg}"),
            Error::NameError(msg) => write!(f, "NameError: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "EvaluationError: type error: {msg}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "EvaluationError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "EvaluationError: expected {expected} arguments, got {got}"
                ),
            },
            Error::RecursionLimit { limit } => {
                write!(f, "RecursionError: recursion too deep (max depth: {limit})")
            }
            Error::Io(msg) => write!(f, "IoError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{Expr, Number};
pub use builtinops::{Arity, SpecialForm};
pub use environment::{Frame, FrameRef, Session};
pub use evaluator::{EvalConfig, Evaluator};
pub use value::Value;
