//! Tree-walking evaluator: special forms, procedure application and sessions.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::Expr;
use crate::builtinops::{Arity, Connective, OpKind, SpecialForm, install_builtins};
use crate::environment::{Frame, FrameRef, Session, release};
use crate::parser::parse_source;
use crate::value::{Closure, Primitive, Value};

/// Evaluator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Deepest nested evaluation allowed before failing with
    /// [`Error::RecursionLimit`]
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// Owns the builtin root frame and evaluates expressions against session frames.
///
/// Sessions are plain [`FrameRef`]s whose parent is the root. The evaluator
/// never keeps them: callers thread the frame returned by
/// [`Evaluator::evaluate`] back into the next call.
#[derive(Debug)]
pub struct Evaluator {
    root: FrameRef,
    config: EvalConfig,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(EvalConfig::default())
    }

    pub fn with_config(config: EvalConfig) -> Self {
        let root = Frame::root();
        install_builtins(&root);
        Evaluator { root, config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// The frame holding the builtins
    pub fn root(&self) -> &FrameRef {
        &self.root
    }

    /// Create a fresh working frame whose parent is the builtin root
    pub fn new_session(&self) -> FrameRef {
        debug!("creating session frame");
        Frame::with_parent(&self.root)
    }

    /// Create a session frame owned by a [`Session`].
    ///
    /// Procedures defined in a session capture its frame, so a bare
    /// [`FrameRef`] from [`Evaluator::new_session`] is never freed once one
    /// is defined. Dropping the `Session` clears the frames and frees them.
    pub fn open_session(&self) -> Session {
        Session::new(self.new_session())
    }

    /// Register a host function in the builtin root.
    ///
    /// The function receives fully evaluated arguments after `arity` has been
    /// checked. Sessions created earlier see the new binding too, since they
    /// share the root.
    ///
    /// # Example
    /// ```
    /// use minischeme::{Arity, Evaluator, Value};
    ///
    /// let evaluator = Evaluator::new();
    /// evaluator.register_builtin_function("double", Arity::Exact(1), |args| {
    ///     let n = args[0].as_number()?;
    ///     Ok(Value::Number(n.checked_add(n)?))
    /// });
    /// let (value, _) = evaluator.evaluate_source("(double 21)", None).unwrap();
    /// assert_eq!(value.unwrap().to_string(), "42");
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + 'static,
    {
        debug!("registering builtin '{name}' ({arity} arguments)");
        self.root.define(
            name,
            Value::Primitive(Rc::new(Primitive {
                id: name.to_owned(),
                arity,
                kind: OpKind::Function(Rc::new(func)),
            })),
        );
    }

    /// Evaluate `expr` in `frame`, or in a fresh session frame when `None`.
    ///
    /// Returns the value together with the frame it was evaluated in.
    /// Bindings made before an error are kept.
    pub fn evaluate(
        &self,
        expr: &Expr,
        frame: Option<FrameRef>,
    ) -> Result<(Value, FrameRef), Error> {
        let frame = frame.unwrap_or_else(|| self.new_session());
        let value = self.eval_expr(expr, &frame, 0)?;
        Ok((value, frame))
    }

    /// Lex, parse and evaluate the first expression in `source`.
    ///
    /// Source without any tokens evaluates to `None`.
    pub fn evaluate_source(
        &self,
        source: &str,
        frame: Option<FrameRef>,
    ) -> Result<(Option<Value>, FrameRef), Error> {
        let frame = frame.unwrap_or_else(|| self.new_session());
        match parse_source(source)? {
            Some(expr) => {
                let value = self.eval_expr(&expr, &frame, 0)?;
                Ok((Some(value), frame))
            }
            None => Ok((None, frame)),
        }
    }

    /// Read the whole file at `path` as one expression and evaluate it
    pub fn evaluate_file(
        &self,
        path: impl AsRef<Path>,
        frame: Option<FrameRef>,
    ) -> Result<(Option<Value>, FrameRef), Error> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|err| Error::Io(format!("cannot read {}: {err}", path.display())))?;
        debug!("evaluating file {}", path.display());
        self.evaluate_source(&source, frame)
    }

    /// Evaluate an expression with depth tracking to keep recursion bounded
    fn eval_expr(&self, expr: &Expr, frame: &FrameRef, depth: usize) -> Result<Value, Error> {
        if depth >= self.config.max_depth {
            warn!(
                "evaluation depth limit reached (max: {})",
                self.config.max_depth
            );
            return Err(Error::RecursionLimit {
                limit: self.config.max_depth,
            });
        }

        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Symbol(name) => match SpecialForm::from_name(name) {
                Some(form) => Ok(Value::Keyword(form)),
                None => frame.lookup(name),
            },
            Expr::List(elements) => self
                .eval_list(elements, frame, depth)
                .map_err(|err| add_context(err, expr)),
        }
    }

    fn eval_args(
        &self,
        exprs: &[Expr],
        frame: &FrameRef,
        depth: usize,
    ) -> Result<Vec<Value>, Error> {
        exprs
            .iter()
            .map(|expr| self.eval_expr(expr, frame, depth + 1))
            .collect()
    }

    /// Evaluate the head, then dispatch on what it turned out to be
    fn eval_list(&self, elements: &[Expr], frame: &FrameRef, depth: usize) -> Result<Value, Error> {
        let [head, operands @ ..] = elements else {
            return Err(Error::EvalError("not a correct expression: ()".to_owned()));
        };

        match self.eval_expr(head, frame, depth + 1)? {
            Value::Keyword(form) => self.eval_special_form(form, operands, frame, depth),
            Value::Primitive(primitive) => self.apply_primitive(&primitive, operands, frame, depth),
            Value::Closure(closure) => {
                let args = self.eval_args(operands, frame, depth)?;
                self.apply_closure(&closure, args, depth)
            }
            other => Err(Error::TypeError(format!(
                "operator is not a function: {other}"
            ))),
        }
    }

    fn eval_special_form(
        &self,
        form: SpecialForm,
        operands: &[Expr],
        frame: &FrameRef,
        depth: usize,
    ) -> Result<Value, Error> {
        trace!("special form '{}' with {} operands", form.name(), operands.len());
        form.arity().validate(operands.len())?;

        match form {
            SpecialForm::Define => self.eval_define(operands, frame, depth),
            SpecialForm::Lambda => eval_lambda(operands, frame),
            SpecialForm::If => self.eval_if(operands, frame, depth),
            SpecialForm::Cons => {
                let [car, cdr] = operands else {
                    return Err(Error::arity_error(form.arity(), operands.len()));
                };
                let car = self.eval_expr(car, frame, depth + 1)?;
                let cdr = self.eval_expr(cdr, frame, depth + 1)?;
                Ok(Value::cons(car, cdr))
            }
            SpecialForm::Car | SpecialForm::Cdr => {
                let [operand] = operands else {
                    return Err(Error::arity_error(form.arity(), operands.len()));
                };
                match self.eval_expr(operand, frame, depth + 1)? {
                    Value::Pair(pair) if form == SpecialForm::Car => Ok(pair.car()),
                    Value::Pair(pair) => Ok(pair.cdr()),
                    other => Err(Error::TypeError(format!(
                        "{}: not a pair: {other}",
                        form.name()
                    ))),
                }
            }
            SpecialForm::List => Ok(Value::list(self.eval_args(operands, frame, depth)?)),
            SpecialForm::Begin => self.eval_sequence(operands, frame, depth),
            SpecialForm::Del => {
                let [target] = operands else {
                    return Err(Error::arity_error(form.arity(), operands.len()));
                };
                let name = target.as_symbol().ok_or_else(|| {
                    Error::SyntaxError(format!("del expects a symbol, got {target}"))
                })?;
                debug!("del '{name}'");
                frame.remove_local(name)
            }
            SpecialForm::Let => self.eval_let(operands, frame, depth),
            SpecialForm::Set => {
                let [target, value_expr] = operands else {
                    return Err(Error::arity_error(form.arity(), operands.len()));
                };
                let name = target.as_symbol().ok_or_else(|| {
                    Error::SyntaxError(format!("set! expects a symbol, got {target}"))
                })?;
                let value = self.eval_expr(value_expr, frame, depth + 1)?;
                frame.assign(name, value.clone())?;
                debug!("set! '{name}'");
                Ok(value)
            }
        }
    }

    /// `(define name expr)` or `(define (name params...) body...)`
    fn eval_define(
        &self,
        operands: &[Expr],
        frame: &FrameRef,
        depth: usize,
    ) -> Result<Value, Error> {
        match operands {
            [Expr::List(signature), bodies @ ..] => {
                let [name, params @ ..] = signature.as_slice() else {
                    return Err(Error::SyntaxError(
                        "procedure definition needs a name: ()".to_owned(),
                    ));
                };
                if name.as_symbol().is_none() {
                    return Err(Error::SyntaxError(format!(
                        "procedure name must be a symbol, got {name}"
                    )));
                }
                // (define (f p...) body...) => (define f (lambda (p...) body...))
                let mut lambda = vec![
                    Expr::Symbol(SpecialForm::Lambda.name().to_owned()),
                    Expr::List(params.to_vec()),
                ];
                lambda.extend(bodies.iter().cloned());
                let rewritten = Expr::List(vec![
                    Expr::Symbol(SpecialForm::Define.name().to_owned()),
                    name.clone(),
                    Expr::List(lambda),
                ]);
                self.eval_expr(&rewritten, frame, depth + 1)
            }
            [target, value_expr] => {
                let value = self.eval_expr(value_expr, frame, depth + 1)?;
                frame.create_binding(target, value.clone())?;
                debug!("define '{target}'");
                Ok(value)
            }
            _ => Err(Error::arity_error(Arity::Exact(2), operands.len())),
        }
    }

    fn eval_if(&self, operands: &[Expr], frame: &FrameRef, depth: usize) -> Result<Value, Error> {
        let [condition, then_branch, else_branch] = operands else {
            return Err(Error::arity_error(Arity::Exact(3), operands.len()));
        };
        if self.eval_expr(condition, frame, depth + 1)?.is_truthy() {
            self.eval_expr(then_branch, frame, depth + 1)
        } else {
            self.eval_expr(else_branch, frame, depth + 1)
        }
    }

    /// Evaluate every expression in order and return the last result
    fn eval_sequence(
        &self,
        exprs: &[Expr],
        frame: &FrameRef,
        depth: usize,
    ) -> Result<Value, Error> {
        let mut result = Value::Nil;
        for expr in exprs {
            result = self.eval_expr(expr, frame, depth + 1)?;
        }
        Ok(result)
    }

    /// `(let ((name expr)...) body...)`: all exprs see the outer frame
    fn eval_let(&self, operands: &[Expr], frame: &FrameRef, depth: usize) -> Result<Value, Error> {
        let [Expr::List(bindings), bodies @ ..] = operands else {
            return Err(Error::SyntaxError(format!(
                "let expects a list of bindings, got {}",
                operands.first().map(ToString::to_string).unwrap_or_default()
            )));
        };

        let mut values = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let (name, value_expr) = match binding {
                Expr::List(pair) => match pair.as_slice() {
                    [Expr::Symbol(name), value_expr] => (name, value_expr),
                    _ => {
                        return Err(Error::SyntaxError(format!(
                            "malformed let binding: {binding}"
                        )));
                    }
                },
                _ => {
                    return Err(Error::SyntaxError(format!(
                        "malformed let binding: {binding}"
                    )));
                }
            };
            values.push((name, self.eval_expr(value_expr, frame, depth + 1)?));
        }

        let scope = Frame::with_parent(frame);
        debug!("let frame with {} bindings", values.len());
        for (name, value) in values {
            scope.define(name.as_str(), value);
        }
        let result = self.eval_expr(&body_of(bodies), &scope, depth + 1);
        release(scope);
        result
    }

    fn apply_primitive(
        &self,
        primitive: &Primitive,
        operands: &[Expr],
        frame: &FrameRef,
        depth: usize,
    ) -> Result<Value, Error> {
        match &primitive.kind {
            OpKind::Connective(connective) => {
                self.eval_connective(*connective, operands, frame, depth)
            }
            OpKind::Function(func) => {
                primitive.arity.validate(operands.len())?;
                let args = self.eval_args(operands, frame, depth)?;
                func(&args)
            }
        }
    }

    /// `and`/`or`: evaluate operands one at a time and stop at the deciding one
    fn eval_connective(
        &self,
        connective: Connective,
        operands: &[Expr],
        frame: &FrameRef,
        depth: usize,
    ) -> Result<Value, Error> {
        // `and` stops on the first falsy value, `or` on the first truthy one
        let stop_when_truthy = connective == Connective::Or;
        for operand in operands {
            let value = self.eval_expr(operand, frame, depth + 1)?;
            if value.is_truthy() == stop_when_truthy {
                return Ok(value);
            }
        }
        Ok(Value::Bool(!stop_when_truthy))
    }

    fn apply_closure(
        &self,
        closure: &Closure,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, Error> {
        Arity::Exact(closure.params.len()).validate(args.len())?;

        let scope = Frame::with_parent(&closure.frame);
        for (param, arg) in closure.params.iter().zip(args) {
            scope.define(param.as_str(), arg);
        }
        let result = self.eval_expr(&closure.body, &scope, depth + 1);
        release(scope);
        result
    }
}

/// `(lambda (params...) body...)`: capture the current frame, evaluate nothing
fn eval_lambda(operands: &[Expr], frame: &FrameRef) -> Result<Value, Error> {
    let [params_expr, bodies @ ..] = operands else {
        return Err(Error::arity_error(Arity::AtLeast(2), operands.len()));
    };
    let Expr::List(param_exprs) = params_expr else {
        return Err(Error::SyntaxError(format!(
            "lambda parameters must be a list, got {params_expr}"
        )));
    };

    let params = param_exprs
        .iter()
        .map(|param| {
            param.as_symbol().map(str::to_owned).ok_or_else(|| {
                Error::SyntaxError(format!("lambda parameter must be a symbol, got {param}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::Closure(Rc::new(Closure {
        params,
        body: body_of(bodies),
        frame: Rc::clone(frame),
    })))
}

/// A single body as-is, several wrapped in an implicit `begin`
fn body_of(bodies: &[Expr]) -> Expr {
    match bodies {
        [single] => single.clone(),
        _ => {
            let mut sequence = vec![Expr::Symbol(SpecialForm::Begin.name().to_owned())];
            sequence.extend(bodies.iter().cloned());
            Expr::List(sequence)
        }
    }
}

/// Attach the failing expression to runtime errors, innermost expression only
fn add_context(error: Error, expr: &Expr) -> Error {
    const MARKER: &str = "\n  Context: ";
    let context = format!("{MARKER}while evaluating: {expr}");
    match error {
        Error::EvalError(msg) if !msg.contains(MARKER) => {
            Error::EvalError(format!("{msg}{context}"))
        }
        Error::TypeError(msg) if !msg.contains(MARKER) => {
            Error::TypeError(format!("{msg}{context}"))
        }
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, expr.to_string()),
        // Name, syntax and depth errors carry enough on their own
        other => other,
    }
}
