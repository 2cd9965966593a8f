//! Name interning and the per-method local variable table.
//!
//! [`LocalId`]s are handed out by the [`VarTable`] that owns the method's
//! locals; they outlive any CFG built for the method. The table also owns
//! the two sentinel ids used by block exits: [`LocalId::UNCONDITIONAL`] and
//! [`LocalId::BLOCK_CALL`].

use std::collections::HashMap;
use std::sync::Arc;

use sift_util::Metrics;

use crate::types::{IdxVec, Span};

mk_id! {
  /// An interned method, constant, or attribute name.
  NameId(Debug("n")),

  /// A local variable id, scoped to one method's [`VarTable`].
  LocalId(Debug("l")),
}

impl LocalId {
  /// The sentinel condition of an unconditional jump.
  pub const UNCONDITIONAL: LocalId = LocalId(0);
  /// The sentinel condition of a block-dispatch header; exits carrying it
  /// are never coalesced away.
  pub const BLOCK_CALL: LocalId = LocalId(1);
}

/// A string interner for method and constant names.
#[derive(Debug, Default)]
pub struct Names {
  strings: IdxVec<NameId, Box<str>>,
  ids: HashMap<Box<str>, NameId>,
}

impl Names {
  /// Create an empty interner.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Intern `name`, returning the existing id if it was seen before.
  pub fn intern(&mut self, name: &str) -> NameId {
    if let Some(&id) = self.ids.get(name) { return id }
    let id = self.strings.push(name.into());
    self.ids.insert(name.into(), id);
    id
  }

  /// The string for an interned name.
  #[must_use] pub fn str(&self, id: NameId) -> &str { &self.strings[id] }
}

/// What kind of binding a local is; drives the predicates the CFG passes
/// key their rewrites on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarKind {
  /// A variable written in source.
  Regular,
  /// A compiler-introduced temporary; transparent to dealiasing.
  SyntheticTemp,
  /// A local standing for a global constant; writes to it are
  /// side-effecting and never removed.
  GlobalAlias,
  /// One of the block-exit sentinels.
  Sentinel,
}

struct VarInfo {
  name: Box<str>,
  kind: VarKind,
}

impl std::fmt::Debug for VarInfo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name)
  }
}

/// The local variable table for one method.
#[derive(Debug)]
pub struct VarTable {
  vars: IdxVec<LocalId, VarInfo>,
  next_temp: u32,
}

impl Default for VarTable {
  fn default() -> Self { Self::new() }
}

impl VarTable {
  /// Create a table holding only the two sentinels.
  #[must_use] pub fn new() -> Self {
    let mut vars = IdxVec::new();
    let unconditional =
      vars.push(VarInfo { name: "<unconditional>".into(), kind: VarKind::Sentinel });
    let block_call = vars.push(VarInfo { name: "<block-call>".into(), kind: VarKind::Sentinel });
    debug_assert_eq!(unconditional, LocalId::UNCONDITIONAL);
    debug_assert_eq!(block_call, LocalId::BLOCK_CALL);
    VarTable { vars, next_temp: 0 }
  }

  /// Declare a source-level local.
  pub fn declare(&mut self, name: &str) -> LocalId {
    self.vars.push(VarInfo { name: name.into(), kind: VarKind::Regular })
  }

  /// Mint a fresh synthetic temporary.
  pub fn fresh_temp(&mut self) -> LocalId {
    let n = self.next_temp;
    self.next_temp += 1;
    self.vars.push(VarInfo { name: format!("<tmp {}>", n).into(), kind: VarKind::SyntheticTemp })
  }

  /// Declare a local aliasing the global constant `name`.
  pub fn declare_global_alias(&mut self, name: &str) -> LocalId {
    self.vars.push(VarInfo { name: name.into(), kind: VarKind::GlobalAlias })
  }

  /// The display name of a local.
  #[must_use] pub fn name(&self, id: LocalId) -> &str { &self.vars[id].name }

  /// The kind of a local.
  #[must_use] pub fn kind(&self, id: LocalId) -> VarKind { self.vars[id].kind }

  /// True for compiler-introduced temporaries, the only ids dealiasing is
  /// allowed to rewrite.
  #[must_use] pub fn is_synthetic_temp(&self, id: LocalId) -> bool {
    self.vars[id].kind == VarKind::SyntheticTemp
  }

  /// True for locals standing in for a global constant.
  #[must_use] pub fn is_global_alias(&self, id: LocalId) -> bool {
    self.vars[id].kind == VarKind::GlobalAlias
  }
}

/// Per-method checking context threaded through the verifier and the CFG
/// passes.
#[derive(Debug)]
pub struct Context<'a> {
  /// The local variable table of the method being checked.
  pub vars: &'a VarTable,
  /// The metrics sink.
  pub metrics: Arc<Metrics>,
  /// The active LSP query location, if any. Position-perturbing passes are
  /// no-ops while a query is in flight.
  pub lsp_query: Option<Span>,
}

impl<'a> Context<'a> {
  /// A context with no active query.
  #[must_use] pub fn new(vars: &'a VarTable, metrics: Arc<Metrics>) -> Self {
    Context { vars, metrics, lsp_query: None }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interner_dedupes() {
    let mut names = Names::new();
    let a = names.intern("foo");
    let b = names.intern("bar");
    assert_ne!(a, b);
    assert_eq!(names.intern("foo"), a);
    assert_eq!(names.str(b), "bar");
  }

  #[test]
  fn var_kinds() {
    let mut vars = VarTable::new();
    let x = vars.declare("x");
    let t = vars.fresh_temp();
    let g = vars.declare_global_alias("Widget");
    assert!(!vars.is_synthetic_temp(x));
    assert!(vars.is_synthetic_temp(t));
    assert!(vars.is_global_alias(g));
    assert_eq!(vars.kind(LocalId::UNCONDITIONAL), VarKind::Sentinel);
  }
}
