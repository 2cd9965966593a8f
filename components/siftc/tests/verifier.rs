#![cfg(debug_assertions)]

use std::sync::Arc;

use sift_util::Metrics;
use siftc::sym::{Context, VarTable};
use siftc::types::ast::{Expr, ExprKind, Value};
use siftc::types::Span;
use siftc::verifier::Verifier;
use siftc::Names;

fn loc(n: u32) -> Span { Span::new(n, n + 2) }

fn lit(n: u32, v: i64) -> Expr { Expr::new(loc(n), ExprKind::Literal(Value::Int(v))) }

#[test]
fn accepts_a_well_formed_tree() {
  let metrics = Arc::new(Metrics::new());
  let mut vars = VarTable::new();
  let mut names = Names::new();
  let x = vars.declare("x");

  // class-level constant definition next to a method that uses a local
  let tree = Expr::new(loc(0), ExprKind::Seq(vec![
    Expr::new(loc(1), ExprKind::Assign {
      lhs: Box::new(Expr::new(loc(1), ExprKind::ConstLit {
        scope: None,
        name: names.intern("LIMIT"),
      })),
      rhs: Box::new(lit(2, 10)),
    }),
    Expr::new(loc(3), ExprKind::MethodDef {
      name: names.intern("bump"),
      params: vec![x],
      body: Box::new(Expr::new(loc(4), ExprKind::Assign {
        lhs: Box::new(Expr::new(loc(4), ExprKind::Local(x))),
        rhs: Box::new(Expr::new(loc(5), ExprKind::Send {
          recv: Box::new(Expr::new(loc(5), ExprKind::Local(x))),
          method: names.intern("succ"),
          args: vec![],
          block: None,
        })),
      })),
    }),
  ]));

  Verifier::run(&Context::new(&vars, metrics), &tree);
}

#[test]
#[should_panic(expected = "location is unset")]
fn rejects_a_node_without_a_location() {
  let metrics = Arc::new(Metrics::new());
  let vars = VarTable::new();
  let tree = Expr::new(Span::NONE, ExprKind::Literal(Value::Nil));
  Verifier::run(&Context::new(&vars, metrics), &tree);
}

#[test]
#[should_panic(expected = "constant definition inside method definition")]
fn rejects_a_constant_defined_inside_a_method() {
  let metrics = Arc::new(Metrics::new());
  let vars = VarTable::new();
  let mut names = Names::new();

  let tree = Expr::new(loc(0), ExprKind::MethodDef {
    name: names.intern("configure"),
    params: vec![],
    body: Box::new(Expr::new(loc(1), ExprKind::Assign {
      lhs: Box::new(Expr::new(loc(1), ExprKind::ConstLit {
        scope: None,
        name: names.intern("LIMIT"),
      })),
      rhs: Box::new(lit(2, 10)),
    })),
  });

  Verifier::run(&Context::new(&vars, metrics), &tree);
}

#[test]
#[should_panic(expected = "assignment target")]
fn rejects_an_unassignable_target() {
  let metrics = Arc::new(Metrics::new());
  let vars = VarTable::new();

  let tree = Expr::new(loc(0), ExprKind::Assign {
    lhs: Box::new(lit(0, 1)),
    rhs: Box::new(lit(1, 2)),
  });

  Verifier::run(&Context::new(&vars, metrics), &tree);
}

#[test]
fn the_empty_tree_needs_no_location() {
  let metrics = Arc::new(Metrics::new());
  let vars = VarTable::new();
  let tree = Expr::new(Span::NONE, ExprKind::Empty);
  Verifier::run(&Context::new(&vars, metrics), &tree);
}
