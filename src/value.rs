//! Runtime values produced by the evaluator.
//!
//! Lists are chains of [`Pair`]s ending in [`Value::Nil`]. That shape is a
//! convention only: a pair may hold anything in either slot, so improper
//! chains are representable and the list helpers here report them rather
//! than assume them away. Circular chains are not supported by any helper.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Expr, Number};
use crate::builtinops::{Arity, OpKind, SpecialForm};
use crate::environment::FrameRef;

/// A mutable cons cell
pub struct Pair {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.cdr.borrow_mut() = value;
    }
}

impl Drop for Pair {
    // Unlink the cdr chain in a loop so long lists do not recurse on drop
    fn drop(&mut self) {
        let mut next = std::mem::replace(self.cdr.get_mut(), Value::Nil);
        while let Value::Pair(pair) = next {
            next = match Rc::try_unwrap(pair) {
                Ok(mut pair) => std::mem::replace(pair.cdr.get_mut(), Value::Nil),
                Err(_shared) => break,
            };
        }
    }
}

/// User-defined procedure (params, body, defining frame)
pub struct Closure {
    pub params: Vec<String>,
    pub body: Expr,
    pub frame: FrameRef,
}

/// Builtin procedure bound in the root frame
pub struct Primitive {
    pub id: String,
    pub arity: Arity,
    pub kind: OpKind,
}

/// Core runtime value
#[derive(Clone)]
pub enum Value {
    Number(Number),
    Bool(bool),
    /// A special-form keyword; evaluating `if`, `define`, ... yields one
    Keyword(SpecialForm),
    Pair(Rc<Pair>),
    Closure(Rc<Closure>),
    Primitive(Rc<Primitive>),
    /// The empty list and list terminator
    Nil,
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair::new(car, cdr)))
    }

    /// Build a proper list from `values`, sharing nothing with any existing chain
    pub fn list<I>(values: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        values
            .into_iter()
            .rev()
            .fold(Value::Nil, |tail, head| Value::cons(head, tail))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Falsy values are `#f`, integer zero and float zero
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => !n.is_zero(),
            Value::Keyword(_)
            | Value::Pair(_)
            | Value::Closure(_)
            | Value::Primitive(_)
            | Value::Nil => true,
        }
    }

    /// True for nil and for pair chains whose final cdr is nil.
    /// Does not terminate on circular chains.
    pub fn is_list(&self) -> bool {
        let mut current = self.clone();
        loop {
            match current {
                Value::Nil => return true,
                Value::Pair(pair) => current = pair.cdr(),
                _ => return false,
            }
        }
    }

    /// Collect the elements of a proper list
    pub fn to_vec(&self) -> Result<Vec<Value>, Error> {
        let mut elements = Vec::new();
        let mut current = self.clone();
        loop {
            match current {
                Value::Nil => return Ok(elements),
                Value::Pair(pair) => {
                    elements.push(pair.car());
                    current = pair.cdr();
                }
                _ => {
                    return Err(Error::TypeError(format!(
                        "the provided argument is not a list: {self}"
                    )));
                }
            }
        }
    }

    pub fn as_number(&self) -> Result<Number, Error> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(Error::TypeError(format!("expected a number, got {other}"))),
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::Int(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(Number::Float(x))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Equality as seen by `equal?`.
///
/// Numbers compare by value across int/float. Pairs and procedures compare
/// by identity, so two separately built lists are never equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Primitive(a), Value::Primitive(b)) => Rc::ptr_eq(a, b),
            (Value::Nil, Value::Nil) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Keyword(form) => write!(f, "{}", form.name()),
            Value::Pair(pair) => {
                // Walk the cdr chain instead of recursing into it
                let mut current = Rc::clone(pair);
                let mut closing = 1;
                loop {
                    write!(f, "(cons {} ", current.car())?;
                    match current.cdr() {
                        Value::Pair(next) => {
                            current = next;
                            closing += 1;
                        }
                        tail => {
                            write!(f, "{tail}")?;
                            break;
                        }
                    }
                }
                (0..closing).try_for_each(|_| f.write_str(")"))
            }
            Value::Closure(_) => write!(f, "#<function>"),
            Value::Primitive(primitive) => write!(f, "#<builtin-function:{}>", primitive.id),
            Value::Nil => write!(f, "nil"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Keyword(form) => write!(f, "Keyword({})", form.name()),
            Value::Pair(pair) => {
                let mut current = Rc::clone(pair);
                let mut closing = 1;
                loop {
                    write!(f, "Pair({:?}, ", current.car())?;
                    match current.cdr() {
                        Value::Pair(next) => {
                            current = next;
                            closing += 1;
                        }
                        tail => {
                            write!(f, "{tail:?}")?;
                            break;
                        }
                    }
                }
                (0..closing).try_for_each(|_| f.write_str(")"))
            }
            // The captured frame is omitted: it may contain this very closure
            Value::Closure(closure) => write!(
                f,
                "Closure(params={:?}, body={})",
                closure.params, closure.body
            ),
            Value::Primitive(primitive) => write!(f, "Primitive({})", primitive.id),
            Value::Nil => write!(f, "Nil"),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    #[test]
    fn test_list_construction_and_display() {
        let lst = Value::list([Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(lst.to_string(), "(cons 1 (cons 2 (cons 3 nil)))");
        assert!(lst.is_list());
        assert_eq!(lst.to_vec().unwrap().len(), 3);
        assert_eq!(Value::list(Vec::<Value>::new()).to_string(), "nil");
    }

    #[test]
    fn test_improper_chains() {
        let dotted = Value::cons(Value::from(1), Value::from(2));
        assert_eq!(dotted.to_string(), "(cons 1 2)");
        assert!(!dotted.is_list());
        assert!(dotted.to_vec().is_err());
        assert!(!Value::from(5).is_list());
        assert!(Value::Nil.is_list());
    }

    #[test]
    fn test_truthiness() {
        let cases = vec![
            (Value::Bool(false), false),
            (Value::from(0), false),
            (Value::from(0.0), false),
            (Value::Bool(true), true),
            (Value::from(-1), true),
            (Value::from(0.5), true),
            (Value::Nil, true),
            (Value::cons(Value::Nil, Value::Nil), true),
            (Value::Keyword(SpecialForm::If), true),
        ];
        for (value, truthy) in cases {
            assert_eq!(value.is_truthy(), truthy, "{value:?}");
        }
    }

    #[test]
    fn test_equality() {
        let a = Value::list([Value::from(1)]);
        let b = Value::list([Value::from(1)]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_ne!(Value::from(1), Value::Bool(true));
        assert_eq!(Value::Nil, Value::Nil);
    }

    #[test]
    fn test_long_chains_render_and_drop() {
        let len = 200_000;
        let long = Value::list((0..len).map(Value::from).collect::<Vec<_>>());

        let rendered = long.to_string();
        assert!(rendered.starts_with("(cons 0 (cons 1 (cons 2 "));
        let body = rendered.trim_end_matches(')');
        assert!(body.ends_with("(cons 199999 nil"), "{}", &body[body.len() - 30..]);
        assert_eq!(rendered.len() - body.len(), 200_000);

        let debugged = format!("{long:?}");
        assert!(debugged.starts_with("Pair(Number(0), Pair(Number(1), "));
        assert!(debugged.trim_end_matches(')').ends_with("Pair(Number(199999), Nil"));

        drop(long);
    }

    #[test]
    fn test_drop_stops_at_shared_tail() {
        let tail = Value::list([Value::from(2), Value::from(3)]);
        let head = Value::cons(Value::from(1), tail.clone());
        drop(head);
        assert_eq!(tail.to_string(), "(cons 2 (cons 3 nil))");
    }

    #[test]
    fn test_pair_mutation() {
        let lst = Value::list([Value::from(1), Value::from(2)]);
        let Value::Pair(pair) = &lst else {
            panic!("expected a pair")
        };
        pair.set_car(Value::from(10));
        assert_eq!(lst.to_string(), "(cons 10 (cons 2 nil))");
        pair.set_cdr(Value::Nil);
        assert_eq!(lst.to_string(), "(cons 10 nil)");
    }
}
