//! Source-level syntax tree and the numeric type shared with runtime values.
//!
//! The parser produces [`Expr`] trees: numbers, symbols and (possibly empty)
//! lists. Helper functions [`num`], [`sym`] and [`list`] make trees easy to
//! build by hand in code and tests.

use std::cmp::Ordering;
use std::fmt;

use crate::Error;

/// Type alias for integer values in the interpreter
pub(crate) type IntType = i64;

/// Numeric literal or result.
///
/// Integer arithmetic stays integral; any float operand promotes the result
/// to a float. Division always produces a float.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(IntType),
    Float(f64),
}

impl Number {
    /// Read an atom as a number: integer syntax first, then float syntax.
    pub fn from_atom(atom: &str) -> Option<Number> {
        if let Ok(n) = atom.parse::<IntType>() {
            return Some(Number::Int(n));
        }
        atom.parse::<f64>().ok().map(Number::Float)
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::Float(x) => x == 0.0,
        }
    }

    pub fn checked_add(self, other: Number) -> Result<Number, Error> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .ok_or_else(|| Error::EvalError("integer overflow in addition".into())),
            (a, b) => Ok(Number::Float(a.as_f64() + b.as_f64())),
        }
    }

    pub fn checked_sub(self, other: Number) -> Result<Number, Error> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_sub(b)
                .map(Number::Int)
                .ok_or_else(|| Error::EvalError("integer overflow in subtraction".into())),
            (a, b) => Ok(Number::Float(a.as_f64() - b.as_f64())),
        }
    }

    pub fn checked_mul(self, other: Number) -> Result<Number, Error> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map(Number::Int)
                .ok_or_else(|| Error::EvalError("integer overflow in multiplication".into())),
            (a, b) => Ok(Number::Float(a.as_f64() * b.as_f64())),
        }
    }

    pub fn checked_neg(self) -> Result<Number, Error> {
        match self {
            Number::Int(n) => n
                .checked_neg()
                .map(Number::Int)
                .ok_or_else(|| Error::EvalError("integer overflow in negation".into())),
            Number::Float(x) => Ok(Number::Float(-x)),
        }
    }

    /// True division; the quotient is always a float.
    pub fn checked_div(self, other: Number) -> Result<Number, Error> {
        if other.is_zero() {
            return Err(Error::EvalError("division by zero".into()));
        }
        Ok(Number::Float(self.as_f64() / other.as_f64()))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.partial_cmp(b),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{n}"),
            // Debug keeps the fractional part visible ("2.0", not "2")
            Number::Float(x) => write!(f, "{x:?}"),
        }
    }
}

impl From<IntType> for Number {
    fn from(n: IntType) -> Self {
        Number::Int(n)
    }
}

impl From<i32> for Number {
    fn from(n: i32) -> Self {
        Number::Int(IntType::from(n))
    }
}

impl From<f64> for Number {
    fn from(x: f64) -> Self {
        Number::Float(x)
    }
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Number),
    Symbol(String),
    List(Vec<Expr>),
}

impl Expr {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Symbol(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Build a numeric literal
pub fn num<N: Into<Number>>(n: N) -> Expr {
    Expr::Number(n.into())
}

/// Build a symbol
pub fn sym<S: AsRef<str>>(name: S) -> Expr {
    Expr::Symbol(name.as_ref().to_owned())
}

/// Build a list expression
pub fn list<I: IntoIterator<Item = Expr>>(elements: I) -> Expr {
    Expr::List(elements.into_iter().collect())
}
