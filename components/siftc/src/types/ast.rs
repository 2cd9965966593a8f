//! The desugared AST handed to the middle end by the front end.
//!
//! By the time a tree reaches this crate, rescue/ensure, multiple
//! assignment, and operator assignment have been lowered away; what remains
//! is the small expression language below. Every node carries the source
//! span it was desugared from, because inference reports errors against
//! these spans.

use crate::sym::{LocalId, NameId};
use crate::types::Span;

/// A literal value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  /// The nil literal.
  Nil,
  /// A boolean literal.
  Bool(bool),
  /// An integer literal.
  Int(i64),
  /// A string literal.
  Str(Box<str>),
  /// An interned symbol literal.
  Sym(NameId),
}

/// An expression node: a source span plus the variant payload.
#[derive(Clone, Debug)]
pub struct Expr {
  /// The source range this node was desugared from.
  pub loc: Span,
  /// The variant payload.
  pub kind: ExprKind,
}

/// The expression variants of the desugared language.
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// The empty tree, used where a body or receiver is absent.
  Empty,
  /// A sequence of expressions evaluated in order.
  Seq(Vec<Expr>),
  /// A method definition.
  MethodDef {
    /// The method name.
    name: NameId,
    /// The declared parameters, in order.
    params: Vec<LocalId>,
    /// The method body.
    body: Box<Expr>,
  },
  /// An assignment. The left-hand side is a `Local` or a `ConstLit`.
  Assign {
    /// The assignment target.
    lhs: Box<Expr>,
    /// The assigned value.
    rhs: Box<Expr>,
  },
  /// A not-yet-resolved constant literal, e.g. `Widget` or `A::B`.
  ConstLit {
    /// The enclosing scope expression, if written.
    scope: Option<Box<Expr>>,
    /// The constant name.
    name: NameId,
  },
  /// A read of a local variable.
  Local(LocalId),
  /// The receiver of the enclosing method.
  SelfRef,
  /// A literal value.
  Literal(Value),
  /// A method call.
  Send {
    /// The receiver.
    recv: Box<Expr>,
    /// The method name.
    method: NameId,
    /// Positional arguments.
    args: Vec<Expr>,
    /// The block literal passed to the call, if any.
    block: Option<Box<Expr>>,
  },
  /// A block (closure) literal; only ever appears as `Send::block`.
  Block {
    /// The block parameters.
    params: Vec<LocalId>,
    /// The block body.
    body: Box<Expr>,
  },
  /// A two-armed conditional.
  If {
    /// The condition.
    cond: Box<Expr>,
    /// The then arm.
    then_: Box<Expr>,
    /// The else arm.
    else_: Box<Expr>,
  },
  /// A pre-test loop.
  While {
    /// The condition.
    cond: Box<Expr>,
    /// The loop body.
    body: Box<Expr>,
  },
  /// An explicit return.
  Return(Option<Box<Expr>>),
}

impl Expr {
  /// Construct a node.
  #[must_use] pub fn new(loc: Span, kind: ExprKind) -> Self { Expr { loc, kind } }

  /// True for the empty tree.
  #[must_use] pub fn is_empty(&self) -> bool { matches!(self.kind, ExprKind::Empty) }

  /// Per-variant structural sanity. Debug-only callers (the verifier)
  /// invoke this on every node.
  pub fn sanity_check(&self) {
    match &self.kind {
      ExprKind::Empty | ExprKind::Local(_) | ExprKind::SelfRef | ExprKind::Literal(_)
      | ExprKind::ConstLit { .. } | ExprKind::Return(None) => {}
      ExprKind::Seq(exprs) =>
        debug_assert!(exprs.len() > 1, "single-element sequence should have been flattened"),
      ExprKind::MethodDef { body, .. } =>
        debug_assert!(!matches!(body.kind, ExprKind::MethodDef { .. }),
          "method body is itself a bare method definition"),
      ExprKind::Assign { lhs, .. } => debug_assert!(
        matches!(lhs.kind, ExprKind::Local(_) | ExprKind::ConstLit { .. }),
        "assignment target must be a local or constant literal"
      ),
      ExprKind::Send { block, .. } => {
        if let Some(b) = block {
          debug_assert!(matches!(b.kind, ExprKind::Block { .. }),
            "send block slot must hold a block literal");
        }
      }
      ExprKind::Block { body, .. } | ExprKind::While { body, .. } =>
        debug_assert!(!matches!(body.kind, ExprKind::Block { .. }),
          "block body is itself a bare block literal"),
      ExprKind::If { cond, .. } =>
        debug_assert!(!cond.is_empty(), "conditional with empty condition"),
      ExprKind::Return(Some(e)) => debug_assert!(!e.is_empty(), "return of the empty tree"),
    }
  }
}

/// A read-only AST traversal. Implementors override [`visit_expr`]
/// (delegating back to [`walk_expr`] to recurse) and observe nodes in
/// pre-order.
///
/// [`visit_expr`]: Visit::visit_expr
/// [`walk_expr`]: walk_expr
pub trait Visit: Sized {
  /// Visit one node. The default just recurses.
  fn visit_expr(&mut self, e: &Expr) { walk_expr(self, e) }
}

/// Recurse into the children of `e`, calling back into `v.visit_expr`.
pub fn walk_expr<V: Visit>(v: &mut V, e: &Expr) {
  match &e.kind {
    ExprKind::Empty | ExprKind::Local(_) | ExprKind::SelfRef | ExprKind::Literal(_)
    | ExprKind::Return(None) => {}
    ExprKind::Seq(exprs) => for e in exprs { v.visit_expr(e) },
    ExprKind::MethodDef { body, .. } => v.visit_expr(body),
    ExprKind::Assign { lhs, rhs } => {
      v.visit_expr(lhs);
      v.visit_expr(rhs);
    }
    ExprKind::ConstLit { scope, .. } => if let Some(s) = scope { v.visit_expr(s) },
    ExprKind::Send { recv, args, block, .. } => {
      v.visit_expr(recv);
      for a in args { v.visit_expr(a) }
      if let Some(b) = block { v.visit_expr(b) }
    }
    ExprKind::Block { body, .. } => v.visit_expr(body),
    ExprKind::If { cond, then_, else_ } => {
      v.visit_expr(cond);
      v.visit_expr(then_);
      v.visit_expr(else_);
    }
    ExprKind::While { cond, body } => {
      v.visit_expr(cond);
      v.visit_expr(body);
    }
    ExprKind::Return(Some(e)) => v.visit_expr(e),
  }
}
