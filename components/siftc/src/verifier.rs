//! A debug-only sanity walker for desugared trees.
//!
//! Runs between desugaring and CFG construction. It never modifies the
//! tree; it only asserts the structural facts later stages rely on:
//! locations are present, each node passes its own variant check, and no
//! constant is defined inside a method body.

use crate::sym::Context;
use crate::types::ast::{walk_expr, Expr, ExprKind, Visit};

/// The verifier walker. See [`Verifier::run`].
#[derive(Debug, Default)]
pub struct Verifier {
  method_depth: u32,
}

impl Verifier {
  /// Walk `node` once, asserting tree invariants. Does nothing in release
  /// builds. The tree is observed, never changed.
  pub fn run(_ctx: &Context<'_>, node: &Expr) {
    if !cfg!(debug_assertions) { return }
    Verifier::default().visit_expr(node);
  }
}

impl Visit for Verifier {
  fn visit_expr(&mut self, e: &Expr) {
    if !e.is_empty() {
      assert!(e.loc.exists(), "location is unset");
    }
    e.sanity_check();

    match &e.kind {
      ExprKind::MethodDef { body, .. } => {
        self.method_depth += 1;
        self.visit_expr(body);
        self.method_depth -= 1;
      }
      ExprKind::Assign { lhs, .. } => {
        if matches!(lhs.kind, ExprKind::ConstLit { .. }) {
          assert!(self.method_depth == 0, "Found constant definition inside method definition");
        }
        walk_expr(self, e);
      }
      _ => walk_expr(self, e),
    }
  }
}
