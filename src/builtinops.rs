//! Built-in operations registry and special-form keywords.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: evaluate all arguments before application (e.g. `+`, `not`, `length`)
//! - **Connectives**: `and`/`or`, evaluated operand by operand with short-circuiting
//! - **Special Forms**: keywords (`define`, `if`, `let`, ...) whose operands are
//!   handed to the evaluator unevaluated
//!
//! Functions and connectives live in [`BUILTIN_OPS`] and are installed into the
//! root frame as [`Value::Primitive`]s. Special forms are not bound in any frame:
//! the evaluator recognizes their names directly and evaluates them to
//! [`Value::Keyword`].
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the signature
//!    `fn(args: &[Value]) -> Result<Value, Error>`
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::Number;
use crate::environment::Frame;
use crate::value::{Primitive, Value};

/// Canonical erased builtin function type used by the evaluator.
pub type OperationFn = dyn Fn(&[Value]) -> Result<Value, Error>;

/// Accepted argument counts of a procedure or special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn validate(self, got: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Short-circuiting boolean connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

/// Represents the implementation of a primitive procedure
#[derive(Clone)]
pub enum OpKind {
    /// Receives fully evaluated arguments
    Function(Rc<OperationFn>),
    /// Driven by the evaluator one operand at a time
    Connective(Connective),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::Connective(c) => write!(f, "Connective({c:?})"),
        }
    }
}

/// Reserved special-form keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Define,
    Lambda,
    If,
    Cons,
    Car,
    Cdr,
    List,
    Begin,
    Del,
    Let,
    Set,
}

impl SpecialForm {
    pub const ALL: [SpecialForm; 11] = [
        SpecialForm::Define,
        SpecialForm::Lambda,
        SpecialForm::If,
        SpecialForm::Cons,
        SpecialForm::Car,
        SpecialForm::Cdr,
        SpecialForm::List,
        SpecialForm::Begin,
        SpecialForm::Del,
        SpecialForm::Let,
        SpecialForm::Set,
    ];

    pub fn from_name(name: &str) -> Option<SpecialForm> {
        let form = match name {
            "define" => SpecialForm::Define,
            "lambda" => SpecialForm::Lambda,
            "if" => SpecialForm::If,
            "cons" => SpecialForm::Cons,
            "car" => SpecialForm::Car,
            "cdr" => SpecialForm::Cdr,
            "list" => SpecialForm::List,
            "begin" => SpecialForm::Begin,
            "del" => SpecialForm::Del,
            "let" => SpecialForm::Let,
            "set!" => SpecialForm::Set,
            _ => return None,
        };
        Some(form)
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Define => "define",
            SpecialForm::Lambda => "lambda",
            SpecialForm::If => "if",
            SpecialForm::Cons => "cons",
            SpecialForm::Car => "car",
            SpecialForm::Cdr => "cdr",
            SpecialForm::List => "list",
            SpecialForm::Begin => "begin",
            SpecialForm::Del => "del",
            SpecialForm::Let => "let",
            SpecialForm::Set => "set!",
        }
    }

    /// Operand count accepted by the form (the keyword itself excluded)
    pub fn arity(self) -> Arity {
        match self {
            SpecialForm::Define | SpecialForm::Lambda | SpecialForm::Let => Arity::AtLeast(2),
            SpecialForm::If => Arity::Exact(3),
            SpecialForm::Cons | SpecialForm::Set => Arity::Exact(2),
            SpecialForm::Car | SpecialForm::Cdr | SpecialForm::Del => Arity::Exact(1),
            SpecialForm::List => Arity::Any,
            SpecialForm::Begin => Arity::AtLeast(1),
        }
    }
}

/// How a registry entry is implemented
#[derive(Debug, Clone, Copy)]
pub enum BuiltinKind {
    Function(fn(&[Value]) -> Result<Value, Error>),
    Connective(Connective),
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// Name the operation is bound to in the root frame
    pub id: &'static str,
    pub kind: BuiltinKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl BuiltinOp {
    /// Wrap this operation as a runtime primitive value
    pub fn to_value(&self) -> Value {
        let kind = match self.kind {
            BuiltinKind::Function(f) => OpKind::Function(Rc::new(f)),
            BuiltinKind::Connective(c) => OpKind::Connective(c),
        };
        Value::Primitive(Rc::new(Primitive {
            id: self.id.to_owned(),
            arity: self.arity,
            kind,
        }))
    }
}

//
// Builtin Function Implementations
//

fn numbers(args: &[Value]) -> Result<Vec<Number>, Error> {
    args.iter().map(Value::as_number).collect()
}

fn sum(nums: &[Number]) -> Result<Number, Error> {
    nums.iter()
        .try_fold(Number::Int(0), |acc, n| acc.checked_add(*n))
}

fn builtin_add(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Number(sum(&numbers(args)?)?))
}

fn builtin_sub(args: &[Value]) -> Result<Value, Error> {
    match numbers(args)?.as_slice() {
        [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
        [only] => Ok(Value::Number(only.checked_neg()?)),
        [first, rest @ ..] => Ok(Value::Number(first.checked_sub(sum(rest)?)?)),
    }
}

fn builtin_mul(args: &[Value]) -> Result<Value, Error> {
    match numbers(args)?.as_slice() {
        [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
        [first, rest @ ..] => {
            let product = rest.iter().try_fold(*first, |acc, n| acc.checked_mul(*n))?;
            Ok(Value::Number(product))
        }
    }
}

fn builtin_div(args: &[Value]) -> Result<Value, Error> {
    match numbers(args)?.as_slice() {
        [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
        [first, rest @ ..] => {
            let quotient = rest.iter().try_fold(*first, |acc, n| acc.checked_div(*n))?;
            Ok(Value::Number(quotient))
        }
    }
}

// Chained numeric comparison over consecutive pairs; `$single` is the result
// for a lone operand (only `<` answers #f there).
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $single:literal) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            if args.len() == 1 {
                return Ok(Value::Bool($single));
            }
            for window in args.windows(2) {
                let (a, b) = (window[0].as_number()?, window[1].as_number()?);
                if !(a $op b) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
    };
}

numeric_comparison!(builtin_gt, >, true);
numeric_comparison!(builtin_ge, >=, true);
numeric_comparison!(builtin_lt, <, false);
numeric_comparison!(builtin_le, <=, true);

fn builtin_equal(args: &[Value]) -> Result<Value, Error> {
    let all_equal = args.windows(2).all(|window| window[0] == window[1]);
    Ok(Value::Bool(all_equal))
}

fn builtin_not(args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => Ok(Value::Bool(!value.is_truthy())),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

fn builtin_is_list(args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => Ok(Value::Bool(value.is_list())),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

fn builtin_length(args: &[Value]) -> Result<Value, Error> {
    match args {
        [value] => {
            let len = value.to_vec()?.len();
            let len = i64::try_from(len)
                .map_err(|_| Error::EvalError("list too long".to_owned()))?;
            Ok(Value::from(len))
        }
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

fn builtin_list_ref(args: &[Value]) -> Result<Value, Error> {
    let [list, index] = args else {
        return Err(Error::arity_error(Arity::Exact(2), args.len()));
    };
    let index = match index {
        Value::Number(Number::Int(n)) if *n >= 0 => *n,
        other => {
            return Err(Error::TypeError(format!(
                "list-ref index must be a non-negative integer, got {other}"
            )));
        }
    };

    if !list.is_list() {
        // A lone value indexed at 0 is returned as-is
        return match (index, list) {
            (0, Value::Pair(pair)) => Ok(pair.car()),
            (0, other) => Ok(other.clone()),
            _ => Err(Error::TypeError(format!(
                "the provided argument is not a list: {list}"
            ))),
        };
    }

    let mut current = list.clone();
    for _ in 0..index {
        current = match current {
            Value::Pair(pair) => pair.cdr(),
            _ => Value::Nil,
        };
        if current.is_nil() {
            return Err(Error::EvalError(format!(
                "list index {index} is out of range"
            )));
        }
    }

    match current {
        Value::Pair(pair) => Ok(pair.car()),
        _ => Err(Error::EvalError(
            "cannot index inside an empty list".to_owned(),
        )),
    }
}

fn builtin_append(args: &[Value]) -> Result<Value, Error> {
    let mut elements = Vec::new();
    for arg in args.iter().filter(|arg| !arg.is_nil()) {
        elements.extend(arg.to_vec()?);
    }
    Ok(Value::list(elements))
}

/// Global registry of all built-in operations.
pub static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        kind: BuiltinKind::Function(builtin_add),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "-",
        kind: BuiltinKind::Function(builtin_sub),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "*",
        kind: BuiltinKind::Function(builtin_mul),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "/",
        kind: BuiltinKind::Function(builtin_div),
        arity: Arity::AtLeast(1),
    },
    // Comparison operations
    BuiltinOp {
        id: "equal?",
        kind: BuiltinKind::Function(builtin_equal),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: ">",
        kind: BuiltinKind::Function(builtin_gt),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: ">=",
        kind: BuiltinKind::Function(builtin_ge),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "<",
        kind: BuiltinKind::Function(builtin_lt),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "<=",
        kind: BuiltinKind::Function(builtin_le),
        arity: Arity::Any,
    },
    // Logical operations
    BuiltinOp {
        id: "and",
        kind: BuiltinKind::Connective(Connective::And),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "or",
        kind: BuiltinKind::Connective(Connective::Or),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "not",
        kind: BuiltinKind::Function(builtin_not),
        arity: Arity::Exact(1),
    },
    // List operations
    BuiltinOp {
        id: "list?",
        kind: BuiltinKind::Function(builtin_is_list),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "length",
        kind: BuiltinKind::Function(builtin_length),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "list-ref",
        kind: BuiltinKind::Function(builtin_list_ref),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "append",
        kind: BuiltinKind::Function(builtin_append),
        arity: Arity::Any,
    },
];

/// Lazy static map from id to BuiltinOp
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// Find a builtin operation by its identifier
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}

/// Install every builtin plus the `#t`, `#f` and `nil` constants into `frame`
pub(crate) fn install_builtins(frame: &Frame) {
    for op in BUILTIN_OPS {
        frame.define(op.id, op.to_value());
    }
    frame.define("#t", Value::Bool(true));
    frame.define("#f", Value::Bool(false));
    frame.define("nil", Value::Nil);
}

#[cfg(test)]
#[expect(clippy::unwrap_used, clippy::expect_used)] // test code OK
mod tests {
    use super::*;

    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin_op(name).expect("builtin not found");
        op.arity.validate(args.len())?;
        match op.kind {
            BuiltinKind::Function(func) => func(args),
            BuiltinKind::Connective(_) => {
                panic!("expected function builtin in tests, got connective: {name}")
            }
        }
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::from).collect::<Vec<_>>())
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_builtin_op("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));
        assert!(matches!(
            find_builtin_op("and").unwrap().kind,
            BuiltinKind::Connective(Connective::And)
        ));
        assert!(find_builtin_op("define").is_none());
        assert!(find_builtin_op("unknown").is_none());

        let mut ids: Vec<_> = BUILTIN_OPS.iter().map(|op| op.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), BUILTIN_OPS.len(), "duplicate builtin ids");
    }

    #[test]
    fn test_special_form_names_round_trip() {
        for form in SpecialForm::ALL {
            assert_eq!(SpecialForm::from_name(form.name()), Some(form));
            assert!(find_builtin_op(form.name()).is_none());
        }
        assert_eq!(SpecialForm::from_name("and"), None);
    }

    #[test]
    fn test_arity_validation() {
        assert!(Arity::Exact(2).validate(2).is_ok());
        assert!(Arity::Exact(2).validate(3).is_err());
        assert!(Arity::AtLeast(1).validate(0).is_err());
        assert!(Arity::AtLeast(1).validate(5).is_ok());
        assert!(Arity::Any.validate(0).is_ok());
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        let v = Value::from;
        let test_cases: Vec<(&str, Vec<Value>, Option<&str>)> = vec![
            // Arithmetic
            ("+", vec![], Some("0")),
            ("+", vec![v(1), v(2), v(3)], Some("6")),
            ("+", vec![v(1), Value::from(0.5)], Some("1.5")),
            ("+", vec![v(i64::MAX), v(1)], None),
            ("+", vec![Value::Bool(true)], None),
            ("-", vec![v(5)], Some("-5")),
            ("-", vec![v(10), v(3), v(2)], Some("5")),
            ("-", vec![Value::from(1.5), v(1)], Some("0.5")),
            ("-", vec![], None),
            ("*", vec![v(7)], Some("7")),
            ("*", vec![v(2), v(3), v(4)], Some("24")),
            ("*", vec![v(2), Value::from(0.5)], Some("1.0")),
            ("*", vec![], None),
            ("/", vec![v(6)], Some("6")),
            ("/", vec![v(6), v(3)], Some("2.0")),
            ("/", vec![v(1), v(2), v(2)], Some("0.25")),
            ("/", vec![v(1), v(0)], None),
            // Comparison
            (">", vec![v(5)], Some("#t")),
            (">=", vec![v(5)], Some("#t")),
            ("<", vec![v(5)], Some("#f")),
            ("<=", vec![v(5)], Some("#t")),
            (">", vec![], Some("#t")),
            (">", vec![v(3), v(2), v(1)], Some("#t")),
            (">", vec![v(3), v(3), v(1)], Some("#f")),
            (">=", vec![v(3), v(3), v(1)], Some("#t")),
            ("<", vec![v(1), v(2), Value::from(2.5)], Some("#t")),
            ("<", vec![v(1), v(3), v(2)], Some("#f")),
            ("<=", vec![v(1), v(1), v(2)], Some("#t")),
            ("<", vec![v(1), Value::Nil], None),
            // a failing pair stops before later operands are inspected
            ("<", vec![v(2), v(1), Value::Nil], Some("#f")),
            ("equal?", vec![v(1)], Some("#t")),
            ("equal?", vec![v(1), v(1), Value::from(1.0)], Some("#t")),
            ("equal?", vec![v(1), v(2)], Some("#f")),
            ("equal?", vec![Value::Nil, Value::Nil], Some("#t")),
            ("equal?", vec![Value::Bool(true), v(1)], Some("#f")),
            // Logic
            ("not", vec![Value::Bool(false)], Some("#t")),
            ("not", vec![v(0)], Some("#t")),
            ("not", vec![v(3)], Some("#f")),
            ("not", vec![Value::Nil], Some("#f")),
            ("not", vec![v(1), v(2)], None),
            ("not", vec![], None),
            // Lists
            ("list?", vec![Value::Nil], Some("#t")),
            ("list?", vec![ints(&[1, 2])], Some("#t")),
            ("list?", vec![Value::cons(v(1), v(2))], Some("#f")),
            ("list?", vec![v(1)], Some("#f")),
            ("length", vec![Value::Nil], Some("0")),
            ("length", vec![ints(&[1, 2, 3])], Some("3")),
            ("length", vec![v(1)], None),
            ("length", vec![Value::cons(v(1), v(2))], None),
            ("list-ref", vec![ints(&[1, 2, 3]), v(0)], Some("1")),
            ("list-ref", vec![ints(&[1, 2, 3]), v(2)], Some("3")),
            ("list-ref", vec![ints(&[1, 2, 3]), v(3)], None),
            ("list-ref", vec![ints(&[1, 2, 3]), v(5)], None),
            ("list-ref", vec![ints(&[1, 2, 3]), v(-1)], None),
            ("list-ref", vec![ints(&[1, 2, 3]), Value::from(1.0)], None),
            ("list-ref", vec![Value::Nil, v(0)], None),
            ("list-ref", vec![v(42), v(0)], Some("42")),
            ("list-ref", vec![v(42), v(1)], None),
            ("list-ref", vec![Value::cons(v(1), v(2)), v(0)], Some("1")),
            ("append", vec![], Some("nil")),
            ("append", vec![Value::Nil, Value::Nil], Some("nil")),
            (
                "append",
                vec![ints(&[1, 2]), Value::Nil, ints(&[3, 4])],
                Some("(cons 1 (cons 2 (cons 3 (cons 4 nil))))"),
            ),
            ("append", vec![ints(&[1]), v(2)], None),
        ];

        for (i, (name, args, expected)) in test_cases.into_iter().enumerate() {
            let result = call_builtin(name, &args);
            match (result, expected) {
                (Ok(actual), Some(expected)) => assert_eq!(
                    actual.to_string(),
                    expected,
                    "case #{} ({name})",
                    i + 1
                ),
                (Err(_), None) => {}
                (actual, expected) => panic!(
                    "case #{} ({name}): expected {expected:?}, got {actual:?}",
                    i + 1
                ),
            }
        }
    }

    #[test]
    fn test_append_copies_every_pair() {
        let first = ints(&[1, 2]);
        let second = ints(&[3, 4]);
        let joined = call_builtin("append", &[first.clone(), second.clone()]).unwrap();

        let mut current = joined.clone();
        while let Value::Pair(pair) = current {
            pair.set_car(Value::from(0));
            current = pair.cdr();
        }
        assert_eq!(joined.to_string(), "(cons 0 (cons 0 (cons 0 (cons 0 nil))))");
        assert_eq!(first.to_string(), "(cons 1 (cons 2 nil))");
        assert_eq!(second.to_string(), "(cons 3 (cons 4 nil))");
    }

    #[test]
    fn test_install_builtins() {
        let root = Frame::root();
        install_builtins(&root);
        for op in BUILTIN_OPS {
            assert!(root.contains_local(op.id), "{} missing", op.id);
        }
        assert_eq!(root.lookup("#t").unwrap(), Value::Bool(true));
        assert_eq!(root.lookup("#f").unwrap(), Value::Bool(false));
        assert_eq!(root.lookup("nil").unwrap(), Value::Nil);
    }
}
