//! Frames and the lexical scope chain.
//!
//! A [`Frame`] owns its bindings and holds a shared reference to its
//! enclosing frame. Parent links only ever point toward the root, so the
//! chain itself cannot form a cycle.
//!
//! Closures do form cycles: a procedure bound in a frame captures that same
//! frame. Two hooks break them. When a call or `let` scope ends, [`release`]
//! checks whether anything outside the scope's own bindings still refers to
//! it and clears the bindings if not. When a [`Session`] is dropped, every
//! frame created under it is cleared.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::rc::Rc;

use log::debug;

use crate::Error;
use crate::ast::Expr;
use crate::value::{Closure, Pair, Value};

/// Shared handle to a frame
pub type FrameRef = Rc<Frame>;

/// Environment for variable bindings
#[derive(Default)]
pub struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<FrameRef>,
}

impl Frame {
    /// Create a frame without an enclosing frame
    pub fn root() -> FrameRef {
        Rc::new(Frame::default())
    }

    pub fn with_parent(parent: &FrameRef) -> FrameRef {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of frames from this one up to and including the root
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.parent.as_ref();
        while let Some(frame) = current {
            depth += 1;
            current = frame.parent.as_ref();
        }
        depth
    }

    /// Bind `name` in this frame, overwriting any local binding
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Bind a parsed binding target in this frame.
    ///
    /// Only a single symbol is a valid target.
    pub fn create_binding(&self, target: &Expr, value: Value) -> Result<(), Error> {
        match target {
            Expr::Symbol(name) => {
                self.define(name.as_str(), value);
                Ok(())
            }
            Expr::List(_) => Err(Error::SyntaxError(format!(
                "cannot bind to a list: {target}"
            ))),
            Expr::Number(_) => Err(Error::SyntaxError(format!(
                "cannot bind to a number: {target}"
            ))),
        }
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    /// Resolve `name` through this frame and its ancestors
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.get_local(name) {
                return Ok(value);
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => {
                    return Err(Error::NameError(format!(
                        "there is no variable with this name: {name}"
                    )));
                }
            }
        }
    }

    /// Overwrite an existing binding in the nearest frame that owns `name`
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut frame = self;
        loop {
            if frame.contains_local(name) {
                frame.define(name, value);
                return Ok(());
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => {
                    return Err(Error::NameError(format!(
                        "cannot set! unbound variable: {name}"
                    )));
                }
            }
        }
    }

    /// Remove `name` from this frame only and return its value
    pub fn remove_local(&self, name: &str) -> Result<Value, Error> {
        let removed = self.bindings.borrow_mut().remove(name);
        match removed {
            Some(value) => {
                debug!("removed local binding '{name}'");
                Ok(value)
            }
            None => Err(Error::NameError(format!(
                "cannot delete '{name}': not bound in the current frame"
            ))),
        }
    }

    /// All visible bindings, inner frames shadowing outer ones, sorted by name
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let mut visible = match &self.parent {
            Some(parent) => parent.bindings().into_iter().collect::<HashMap<_, _>>(),
            None => HashMap::new(),
        };

        for (name, value) in self.bindings.borrow().iter() {
            visible.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// True if `ancestor` is this frame or one of its enclosing frames
    pub fn descends_from(&self, ancestor: &FrameRef) -> bool {
        let mut current = Some(self);
        while let Some(frame) = current {
            if ptr::eq(frame, Rc::as_ptr(ancestor)) {
                return true;
            }
            current = frame.parent.as_deref();
        }
        false
    }

    /// Drop every local binding
    fn clear(&self) {
        let bindings = std::mem::take(&mut *self.bindings.borrow_mut());
        drop(bindings);
    }

    /// Names bound directly in this frame, sorted
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.bindings.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("names", &self.local_names())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Reference-counted node reachable from a scope
enum Node {
    Frame(FrameRef),
    Pair(Rc<Pair>),
    Closure(Rc<Closure>),
}

impl Node {
    fn from_value(value: Value) -> Option<Node> {
        match value {
            Value::Pair(pair) => Some(Node::Pair(pair)),
            Value::Closure(closure) => Some(Node::Closure(closure)),
            _ => None,
        }
    }

    fn address(&self) -> *const () {
        match self {
            Node::Frame(frame) => Rc::as_ptr(frame).cast(),
            Node::Pair(pair) => Rc::as_ptr(pair).cast(),
            Node::Closure(closure) => Rc::as_ptr(closure).cast(),
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Node::Frame(frame) => Rc::strong_count(frame),
            Node::Pair(pair) => Rc::strong_count(pair),
            Node::Closure(closure) => Rc::strong_count(closure),
        }
    }
}

/// Everything reachable from the bindings of `scope` and the frames nested
/// under it, with one edge per strong reference between nodes.
///
/// Frames that are not nested under `scope` are never entered. Node 0 is
/// `scope` itself. Each node is held exactly once by the graph.
struct ScopeGraph {
    nodes: Vec<Node>,
    edges: Vec<Vec<usize>>,
    index: HashMap<*const (), usize>,
}

impl ScopeGraph {
    fn scan(scope: &FrameRef) -> Self {
        let mut graph = ScopeGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            index: HashMap::new(),
        };
        let mut pending = Vec::new();
        graph.insert(Node::Frame(Rc::clone(scope)), &mut pending);

        while let Some(at) = pending.pop() {
            for target in graph.successors(at, scope) {
                let to = graph.insert(target, &mut pending);
                graph.edges[at].push(to);
            }
        }
        graph
    }

    fn insert(&mut self, node: Node, pending: &mut Vec<usize>) -> usize {
        let address = node.address();
        if let Some(&existing) = self.index.get(&address) {
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(node);
        self.edges.push(Vec::new());
        self.index.insert(address, id);
        pending.push(id);
        id
    }

    fn successors(&self, at: usize, scope: &FrameRef) -> Vec<Node> {
        match &self.nodes[at] {
            Node::Frame(frame) => {
                let values: Vec<Value> = frame.bindings.borrow().values().cloned().collect();
                let mut targets: Vec<Node> =
                    values.into_iter().filter_map(Node::from_value).collect();
                if !Rc::ptr_eq(frame, scope)
                    && let Some(parent) = &frame.parent
                {
                    targets.push(Node::Frame(Rc::clone(parent)));
                }
                targets
            }
            Node::Pair(pair) => [pair.car(), pair.cdr()]
                .into_iter()
                .filter_map(Node::from_value)
                .collect(),
            Node::Closure(closure) if closure.frame.descends_from(scope) => {
                vec![Node::Frame(Rc::clone(&closure.frame))]
            }
            Node::Closure(_) => Vec::new(),
        }
    }

    /// Whether anything outside the graph still reaches `scope`.
    ///
    /// `held` is the number of references to `scope` owned by the caller.
    fn scope_is_reachable(&self, held: usize) -> bool {
        let mut internal = vec![0usize; self.nodes.len()];
        for &to in self.edges.iter().flatten() {
            internal[to] += 1;
        }

        let mut live = vec![false; self.nodes.len()];
        let mut pending = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            let owned = if id == 0 { 1 + held } else { 1 };
            if node.strong_count() > owned + internal[id] {
                live[id] = true;
                pending.push(id);
            }
        }
        while let Some(id) = pending.pop() {
            for &to in &self.edges[id] {
                if !live[to] {
                    live[to] = true;
                    pending.push(to);
                }
            }
        }
        live[0]
    }

    fn clear_frames(&self) -> usize {
        let mut cleared = 0;
        for node in &self.nodes {
            if let Node::Frame(frame) = node {
                frame.clear();
                cleared += 1;
            }
        }
        cleared
    }
}

/// Release a call or `let` frame whose evaluation has finished.
///
/// If the only references left to `scope` come from values stored under it
/// (a procedure defined in its own body, for example), its bindings and
/// those of the frames nested under it are cleared so the cycle can drop.
pub(crate) fn release(scope: FrameRef) {
    if Rc::strong_count(&scope) == 1 {
        return;
    }
    let graph = ScopeGraph::scan(&scope);
    if !graph.scope_is_reachable(1) {
        let cleared = graph.clear_frames();
        debug!("released {cleared} unreachable frames");
    }
}

/// Owner of a session frame.
///
/// Dropping the session clears the bindings of its frame and of every frame
/// created under it, including frames still captured by procedures the host
/// kept hold of.
pub struct Session {
    frame: FrameRef,
}

impl Session {
    pub(crate) fn new(frame: FrameRef) -> Self {
        Session { frame }
    }

    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let cleared = ScopeGraph::scan(&self.frame).clear_frames();
        debug!("session closed, cleared {cleared} frames");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("frame", &self.frame).finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{list, num, sym};
    use crate::ErrorKind;

    fn chain() -> (FrameRef, FrameRef, FrameRef) {
        let root = Frame::root();
        root.define("r", Value::from(1));
        let middle = Frame::with_parent(&root);
        middle.define("m", Value::from(2));
        let inner = Frame::with_parent(&middle);
        inner.define("i", Value::from(3));
        (root, middle, inner)
    }

    #[test]
    fn test_lookup_walks_the_chain() {
        let (_root, _middle, inner) = chain();
        assert_eq!(inner.lookup("i").unwrap(), Value::from(3));
        assert_eq!(inner.lookup("m").unwrap(), Value::from(2));
        assert_eq!(inner.lookup("r").unwrap(), Value::from(1));
        let err = inner.lookup("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Name);
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_shadowing() {
        let (_root, middle, inner) = chain();
        inner.define("m", Value::from(20));
        assert_eq!(inner.lookup("m").unwrap(), Value::from(20));
        assert_eq!(middle.lookup("m").unwrap(), Value::from(2));
    }

    #[test]
    fn test_assign_targets_owning_frame() {
        let (root, middle, inner) = chain();
        inner.assign("m", Value::from(5)).unwrap();
        assert_eq!(middle.get_local("m"), Some(Value::from(5)));
        assert!(!inner.contains_local("m"));

        inner.assign("r", Value::from(6)).unwrap();
        assert_eq!(root.get_local("r"), Some(Value::from(6)));
    }

    #[test]
    fn test_assign_unbound_mutates_nothing() {
        let (root, middle, inner) = chain();
        let err = inner.assign("nope", Value::from(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Name);
        for frame in [&root, &middle, &inner] {
            assert!(!frame.contains_local("nope"));
        }
    }

    #[test]
    fn test_remove_local_only() {
        let (_root, middle, inner) = chain();
        let err = inner.remove_local("m").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Name);
        assert!(middle.contains_local("m"));

        assert_eq!(inner.remove_local("i").unwrap(), Value::from(3));
        assert!(inner.lookup("i").is_err());
    }

    #[test]
    fn test_create_binding_rejects_non_symbols() {
        let frame = Frame::root();
        frame.create_binding(&sym("x"), Value::from(1)).unwrap();
        assert_eq!(frame.get_local("x"), Some(Value::from(1)));

        for target in [list([sym("x")]), num(3)] {
            let err = frame.create_binding(&target, Value::from(1)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax);
        }
    }

    #[test]
    fn test_siblings_share_parent() {
        let root = Frame::root();
        let a = Frame::with_parent(&root);
        let b = Frame::with_parent(&root);
        root.define("shared", Value::from(1));
        assert_eq!(a.lookup("shared").unwrap(), Value::from(1));
        assert_eq!(b.lookup("shared").unwrap(), Value::from(1));
        assert_eq!(a.depth(), 2);
        assert!(root.is_root());
        assert!(!a.is_root());
    }

    #[test]
    fn test_bindings_are_sorted_and_shadowed() {
        let (_root, _middle, inner) = chain();
        inner.define("r", Value::from(100));
        let names: Vec<_> = inner.bindings().into_iter().map(|(n, v)| (n, v.to_string())).collect();
        assert_eq!(
            names,
            vec![
                ("i".to_owned(), "3".to_owned()),
                ("m".to_owned(), "2".to_owned()),
                ("r".to_owned(), "100".to_owned()),
            ]
        );
    }

    fn procedure_in(frame: &FrameRef) -> Value {
        Value::Closure(Rc::new(Closure {
            params: Vec::new(),
            body: num(0),
            frame: Rc::clone(frame),
        }))
    }

    #[test]
    fn test_descends_from() {
        let (root, middle, inner) = chain();
        assert!(inner.descends_from(&root));
        assert!(inner.descends_from(&middle));
        assert!(inner.descends_from(&inner));
        assert!(!middle.descends_from(&inner));
    }

    #[test]
    fn test_release_frees_self_referencing_scope() {
        let root = Frame::root();
        let scope = Frame::with_parent(&root);
        scope.define("again", procedure_in(&scope));
        let weak = Rc::downgrade(&scope);

        release(scope);
        assert!(weak.upgrade().is_none());
        assert_eq!(Rc::strong_count(&root), 1);
    }

    #[test]
    fn test_release_frees_nested_cycles() {
        let root = Frame::root();
        let scope = Frame::with_parent(&root);
        let nested = Frame::with_parent(&scope);
        nested.define("h", procedure_in(&nested));
        scope.define("g", procedure_in(&nested));
        scope.define("xs", Value::list([procedure_in(&scope), Value::from(1)]));
        let weak_scope = Rc::downgrade(&scope);
        let weak_nested = Rc::downgrade(&nested);
        drop(nested);

        release(scope);
        assert!(weak_scope.upgrade().is_none());
        assert!(weak_nested.upgrade().is_none());
    }

    #[test]
    fn test_release_keeps_scope_referenced_from_outside() {
        let root = Frame::root();
        let scope = Frame::with_parent(&root);
        let escaped = procedure_in(&scope);
        scope.define("f", escaped.clone());
        let weak = Rc::downgrade(&scope);

        release(scope);
        let kept = weak.upgrade().unwrap();
        assert!(kept.contains_local("f"));
        drop(kept);
        drop(escaped);
        // still a cycle, left for the session owner
        assert!(weak.upgrade().is_some());
    }

    #[test]
    fn test_release_keeps_scope_reached_through_shared_pair() {
        let root = Frame::root();
        let scope = Frame::with_parent(&root);
        let shared = Value::list([procedure_in(&scope)]);
        scope.define("xs", shared.clone());
        root.define("outside", shared);
        let weak = Rc::downgrade(&scope);

        release(scope);
        assert!(weak.upgrade().unwrap().contains_local("xs"));
    }

    #[test]
    fn test_session_drop_clears_created_frames() {
        let root = Frame::root();
        let session = Session::new(Frame::with_parent(&root));
        let frame = Rc::clone(session.frame());
        let nested = Frame::with_parent(&frame);
        nested.define("h", procedure_in(&nested));
        frame.define("g", procedure_in(&nested));
        frame.define("f", procedure_in(&frame));
        let weak_frame = Rc::downgrade(&frame);
        let weak_nested = Rc::downgrade(&nested);
        drop((frame, nested));

        drop(session);
        assert!(weak_frame.upgrade().is_none());
        assert!(weak_nested.upgrade().is_none());
        assert_eq!(Rc::strong_count(&root), 1);
    }
}
