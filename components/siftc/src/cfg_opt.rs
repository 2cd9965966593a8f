//! The CFG finalize pipeline.
//!
//! After construction a CFG is correct but raw: it is full of single-entry
//! straight-line chains, identity copies of synthetic temporaries, and
//! assignments nothing reads. The passes here rewrite it into the form the
//! inference engine consumes. [`Cfg::finalize`] composes them; each pass
//! assumes the graph invariants checked by [`Cfg::sanity_check`] hold on
//! entry and re-establishes them on exit.

use std::collections::{HashMap, HashSet};

use crate::sym::{Context, LocalId, VarTable};
use crate::types::cfg::{
  BlockExit, BlockFlags, BlockId, BlockVec, Cfg, InstrKind, ReadsAndWrites,
};
use crate::types::{Idx, IdxVec};

fn maybe_dealias(
  vars: &VarTable, what: LocalId, aliases: &HashMap<LocalId, LocalId>,
) -> LocalId {
  if vars.is_synthetic_temp(what) {
    aliases.get(&what).copied().unwrap_or(what)
  } else {
    what
  }
}

impl Cfg {
  /// Run the whole pipeline. On return the CFG is normalized: coalesced,
  /// dealiased, loop headers marked, dead assignments removed, loop depth
  /// summaries computed, and block arguments filled in.
  pub fn finalize(&mut self, ctx: &Context<'_>) {
    self.simplify(ctx);
    self.sanity_check();
    self.fill_in_topo_sort();
    self.dealias(ctx);
    self.mark_loop_headers();
    self.sanity_check();
    let rnw = self.find_all_reads_and_writes();
    self.remove_dead_assigns(ctx, &rnw);
    // erased bindings took reads with them; the loop summaries and block
    // arguments must see the graph as it now stands
    let rnw = self.find_all_reads_and_writes();
    self.compute_min_max_loops(&rnw);
    self.fill_in_block_arguments(ctx, &rnw);
    self.sanity_check();
  }

  /// Iterate local rewrites to a fixpoint: drop unreachable blocks, dedupe
  /// back-edges, normalize unconditional exits, fuse straight-line chains,
  /// and short-circuit empty unconditional branch targets. No-op while an
  /// LSP query is active, since coalescing perturbs positions.
  pub fn simplify(&mut self, ctx: &Context<'_>) {
    if ctx.lsp_query.is_some() { return }

    self.sanity_check();
    let mut changed = true;
    while changed {
      changed = false;
      for raw in 0..self.blocks.len() {
        let bb = BlockId::from_usize(raw);
        if self.blocks[bb].is_removed() { continue }
        let BlockExit { thenb, elseb, .. } = self.blocks[bb].bexit;

        if bb != BlockId::DEAD && bb != BlockId::ENTRY && self.blocks[bb].back_edges.is_empty() {
          // not reachable; detach and drop
          self.blocks[thenb].back_edges.retain(|&p| p != bb);
          if elseb != thenb {
            self.blocks[elseb].back_edges.retain(|&p| p != bb);
          }
          self.remove_block(bb);
          self.forwards_topo_sort.retain(|&b| b != bb);
          changed = true;
          self.sanity_check();
          continue;
        }

        // dedupe back edges
        let back_edges = &mut self.blocks[bb].back_edges;
        back_edges.sort_unstable();
        back_edges.dedup();

        if thenb == elseb {
          // remove the condition from unconditional jumps
          self.blocks[bb].bexit.cond = LocalId::UNCONDITIONAL;
        }
        if thenb == elseb && thenb != BlockId::DEAD && thenb != bb
          && self.blocks[bb].closure_id == self.blocks[thenb].closure_id
        {
          // can be squashed together
          if self.blocks[thenb].back_edges.len() == 1
            && self.blocks[thenb].outer_loops == self.blocks[bb].outer_loops
          {
            let mut moved = std::mem::take(&mut self.blocks[thenb].exprs);
            self.blocks[bb].exprs.append(&mut moved);
            self.blocks[thenb].back_edges.clear();
            let adopted = self.blocks[thenb].bexit;
            self.blocks[bb].bexit = adopted;
            self.blocks[adopted.thenb].back_edges.push(bb);
            if adopted.thenb != adopted.elseb {
              self.blocks[adopted.elseb].back_edges.push(bb);
            }
            changed = true;
            self.sanity_check();
            continue;
          } else if self.blocks[thenb].bexit.cond != LocalId::BLOCK_CALL
            && self.blocks[thenb].exprs.is_empty()
          {
            // don't remove block headers
            let adopted = self.blocks[thenb].bexit;
            self.blocks[bb].bexit = adopted;
            self.blocks[thenb].back_edges.retain(|&p| p != bb);
            self.blocks[adopted.thenb].back_edges.push(bb);
            if adopted.thenb != adopted.elseb {
              self.blocks[adopted.elseb].back_edges.push(bb);
            }
            changed = true;
            self.sanity_check();
            continue;
          }
        }
        if thenb != BlockId::DEAD
          && self.blocks[bb].closure_id == self.blocks[thenb].closure_id
          && self.blocks[thenb].exprs.is_empty()
          && self.blocks[thenb].bexit.thenb == self.blocks[thenb].bexit.elseb
          && self.blocks[bb].bexit.thenb != self.blocks[thenb].bexit.thenb
        {
          // shortcut then
          let target = self.blocks[thenb].bexit.thenb;
          self.blocks[bb].bexit.thenb = target;
          self.blocks[target].back_edges.push(bb);
          self.blocks[thenb].back_edges.retain(|&p| p != bb);
          changed = true;
          self.sanity_check();
          continue;
        }
        if elseb != BlockId::DEAD
          && self.blocks[bb].closure_id == self.blocks[thenb].closure_id
          && self.blocks[elseb].exprs.is_empty()
          && self.blocks[elseb].bexit.thenb == self.blocks[elseb].bexit.elseb
          && self.blocks[bb].bexit.elseb != self.blocks[elseb].bexit.elseb
        {
          // shortcut else
          self.sanity_check();
          let target = self.blocks[elseb].bexit.elseb;
          self.blocks[bb].bexit.elseb = target;
          self.blocks[target].back_edges.push(bb);
          self.blocks[elseb].back_edges.retain(|&p| p != bb);
          changed = true;
          self.sanity_check();
          continue;
        }
      }
    }
  }

  /// Graph consistency checks; no-op in release builds.
  pub fn sanity_check(&self) {
    if !cfg!(debug_assertions) { return }
    for bb in self.block_ids() {
      let bl = &self.blocks[bb];
      for &parent in &bl.back_edges {
        assert!(
          self.blocks[parent].bexit.thenb == bb || self.blocks[parent].bexit.elseb == bb,
          "parent is not aware of a child"
        );
      }
      if bb == BlockId::DEAD { continue }
      if bb != BlockId::ENTRY {
        assert!(
          bl.flags.contains(BlockFlags::WAS_JUMP_DESTINATION),
          "block {:?} was never linked into cfg", bb
        );
      }
      assert!(self.blocks[bl.bexit.thenb].back_edges.contains(&bb), "backedge unset for thenb");
      assert!(self.blocks[bl.bexit.elseb].back_edges.contains(&bb), "backedge unset for elseb");
    }
  }

  /// Remove identity copies of synthetic temporaries, so that
  /// `t = y; f(t)` reads `f(y)`. A single reverse-topological sweep carries
  /// a per-block exit map of live aliases; maps from the block's parents
  /// are intersected on entry.
  ///
  /// Why a separate pass instead of doing this during construction?
  /// Because of code like `a.foo(a = 2, if x then a = true else a = nil end)`:
  /// the alias for the receiver is only known once every write to `a` in
  /// the argument list has been lowered.
  pub fn dealias(&mut self, ctx: &Context<'_>) {
    let mut out_aliases: BlockVec<HashMap<LocalId, LocalId>> =
      IdxVec::from_default(self.blocks.len());
    let order = self.forwards_topo_sort.clone();
    for &bb in order.iter().rev() {
      if bb == BlockId::DEAD { continue }

      let parents = self.blocks[bb].back_edges.clone();
      let mut current =
        parents.first().map_or_else(HashMap::new, |&p| out_aliases[p].clone());
      for &parent in &parents {
        // keep only entries every parent agrees on; this drops entries for
        // parents not yet visited (loop back-edges), which is correct but
        // too conservative, in particular for loop headers
        let other = &out_aliases[parent];
        current.retain(|k, v| other.get(k) == Some(&*v));
      }

      let vars = ctx.vars;
      let bl = &mut self.blocks[bb];
      for binding in &mut bl.exprs {
        if let InstrKind::Ident(w) = &mut binding.value.kind {
          *w = maybe_dealias(vars, *w, &current);
        }
        // invalidate stale records
        current.retain(|_, v| *v != binding.bind);
        if !binding.value.synthetic {
          // we don't dealias operands of synthetic instructions, as
          // otherwise it fools dead code analysis
          match &mut binding.value.kind {
            InstrKind::Ident(w) => *w = maybe_dealias(vars, *w, &current),
            InstrKind::Send { recv, args, .. } => {
              *recv = maybe_dealias(vars, *recv, &current);
              for a in args {
                *a = maybe_dealias(vars, *a, &current);
              }
            }
            InstrKind::Absurd(w) | InstrKind::Return(w) =>
              *w = maybe_dealias(vars, *w, &current),
            InstrKind::Literal(_) | InstrKind::LoadSelf | InstrKind::LoadArg(_)
            | InstrKind::LoadYieldParams | InstrKind::Alias(_) => {}
          }
        }
        // record the new alias
        if let InstrKind::Ident(w) = &binding.value.kind {
          current.insert(binding.bind, *w);
        }
      }
      if bl.bexit.cond != LocalId::UNCONDITIONAL {
        bl.bexit.cond = maybe_dealias(vars, bl.bexit.cond, &current);
      }
      out_aliases[bb] = current;
    }
  }

  /// Set [`BlockFlags::LOOP_HEADER`] on every block with a predecessor at a
  /// shallower loop depth.
  pub fn mark_loop_headers(&mut self) {
    for raw in 0..self.blocks.len() {
      let bb = BlockId::from_usize(raw);
      if self.blocks[bb].is_removed() { continue }
      let outer = self.blocks[bb].outer_loops;
      let header =
        self.blocks[bb].back_edges.iter().any(|&p| self.blocks[p].outer_loops < outer);
      if header {
        self.blocks[bb].flags |= BlockFlags::LOOP_HEADER;
      }
    }
  }

  /// Erase bindings whose target is never read, in this block or through
  /// either successor's arguments. Writes to global aliases always stay.
  /// No-op while an LSP query is active.
  pub fn remove_dead_assigns(&mut self, ctx: &Context<'_>, rnw: &ReadsAndWrites) {
    if ctx.lsp_query.is_some() { return }

    for raw in 0..self.blocks.len() {
      let bb = BlockId::from_usize(raw);
      if self.blocks[bb].is_removed() { continue }
      let BlockExit { thenb, elseb, .. } = self.blocks[bb].bexit;
      let exprs = std::mem::take(&mut self.blocks[bb].exprs);
      let kept: Vec<_> = exprs.into_iter().filter(|binding| {
        if ctx.vars.is_global_alias(binding.bind) { return true }
        let was_read = rnw.reads[bb].contains(&binding.bind)
          || self.blocks[thenb].args.contains(&binding.bind)
          || self.blocks[elseb].args.contains(&binding.bind);
        if was_read { return true }
        // only instructions with no side effects may go; listing the
        // deletable kinds positively means new instruction kinds default
        // to being kept
        !matches!(binding.value.kind,
          InstrKind::Ident(_) | InstrKind::Literal(_) | InstrKind::LoadSelf
          | InstrKind::LoadArg(_) | InstrKind::LoadYieldParams)
      }).collect();
      self.blocks[bb].exprs = kept;
    }
  }

  /// Fill [`Cfg::min_loops`] and [`Cfg::max_loop_write`]: per local, the
  /// shallowest loop depth at which it is accessed, and the deepest at
  /// which it is written.
  pub fn compute_min_max_loops(&mut self, rnw: &ReadsAndWrites) {
    let Cfg { blocks, min_loops, max_loop_write, .. } = self;
    for (bb, bl) in blocks.enum_iter() {
      if bb == BlockId::DEAD || bl.is_removed() { continue }
      for &what in &rnw.reads[bb] {
        let cur_min = min_loops.entry(what).or_insert(u32::MAX);
        if *cur_min > bl.outer_loops {
          *cur_min = bl.outer_loops;
        }
      }
    }
    for (bb, bl) in blocks.enum_iter() {
      if bb == BlockId::DEAD || bl.is_removed() { continue }
      for binding in &bl.exprs {
        let what = binding.bind;
        let cur_min = min_loops.entry(what).or_insert(u32::MAX);
        if *cur_min > bl.outer_loops {
          *cur_min = bl.outer_loops;
        }
        let cur_max = max_loop_write.entry(what).or_insert(0);
        if *cur_max < bl.outer_loops {
          *cur_max = bl.outer_loops;
        }
      }
    }
  }

  /// Compute each block's arguments by intersecting two over-approximations:
  ///
  /// - `upper_bounds1` accumulates reads over the forward graph (what the
  ///   block or its successors could need);
  /// - `upper_bounds2` accumulates writes over the reverse graph (what
  ///   could have been assigned on some path into the block).
  ///
  /// Every block gets the intersection of the two, sorted by local id.
  /// This is `O((|BB| + |vars|) * |cycles| + |answer|)`; keep it that way.
  pub fn fill_in_block_arguments(&mut self, ctx: &Context<'_>, rnw: &ReadsAndWrites) {
    let n = self.blocks.len();

    let mut upper_bounds1: BlockVec<HashSet<LocalId>> = IdxVec::from_default(n);
    for &bb in &self.forwards_topo_sort {
      upper_bounds1[bb].extend(rnw.reads[bb].iter().copied());
    }
    let mut changed = true;
    while changed {
      changed = false;
      for &bb in &self.forwards_topo_sort {
        let sz = upper_bounds1[bb].len();
        let BlockExit { thenb, elseb, .. } = self.blocks[bb].bexit;
        let mut cur = std::mem::take(&mut upper_bounds1[bb]);
        if thenb != BlockId::DEAD {
          cur.extend(upper_bounds1[thenb].iter().copied());
        }
        if elseb != BlockId::DEAD {
          cur.extend(upper_bounds1[elseb].iter().copied());
        }
        // a local written but not read here is dead on entry, so the block
        // does not require it. Locals pinned inside a loop cannot be
        // erased, because inference fixes their type at the loop's widest
        // write depth.
        for dead in &rnw.dead[bb] {
          if self.blocks[bb].outer_loops <= self.min_loops.get(dead).copied().unwrap_or(0) {
            cur.remove(dead);
          }
        }
        changed = changed || cur.len() != sz;
        upper_bounds1[bb] = cur;
      }
    }

    let mut upper_bounds2: BlockVec<HashSet<LocalId>> = IdxVec::from_default(n);
    changed = true;
    while changed {
      changed = false;
      for &bb in self.forwards_topo_sort.iter().rev() {
        let sz = upper_bounds2[bb].len();
        let mut cur = std::mem::take(&mut upper_bounds2[bb]);
        for &parent in &self.blocks[bb].back_edges {
          if parent == BlockId::DEAD { continue }
          cur.extend(rnw.writes[parent].iter().copied());
          cur.extend(upper_bounds2[parent].iter().copied());
        }
        changed = changed || cur.len() != sz;
        upper_bounds2[bb] = cur;
      }
    }

    for raw in 0..n {
      let bb = BlockId::from_usize(raw);
      if self.blocks[bb].is_removed() { continue }
      let set2 = &upper_bounds2[bb];
      let mut args: Vec<LocalId> =
        upper_bounds1[bb].iter().filter(|v| set2.contains(*v)).copied().collect();
      args.sort();
      ctx.metrics.histogram_inc("cfgbuilder.blockArguments", args.len());
      self.blocks[bb].args = args;
    }
  }

  /// Fill [`Cfg::forwards_topo_sort`] by post-order DFS from the entry;
  /// the entry block ends up last. See [`Cfg::topo_sort_fwd`].
  pub fn fill_in_topo_sort(&mut self) {
    for raw in 0..self.blocks.len() {
      self.blocks.0[raw].fwd_id = -1;
    }
    let mut target = vec![BlockId::ENTRY; self.blocks.len()];
    let count = self.topo_sort_fwd(&mut target, 0, BlockId::ENTRY);
    target.truncate(count);
    self.forwards_topo_sort = target;
  }

  /// Recursive post-order DFS. The child at the lower loop depth is visited
  /// first so loop bodies cluster in the resulting order. `fwd_id` doubles
  /// as the visit marker: -1 unvisited, -2 in progress (a back-edge during
  /// the walk), otherwise the assigned index.
  fn topo_sort_fwd(
    &mut self, target: &mut [BlockId], next_free: usize, current: BlockId,
  ) -> usize {
    if self.blocks[current].fwd_id != -1 { return next_free }
    self.blocks[current].fwd_id = -2;
    let BlockExit { thenb, elseb, .. } = self.blocks[current].bexit;
    let next_free = if self.blocks[thenb].outer_loops > self.blocks[elseb].outer_loops {
      let nf = self.topo_sort_fwd(target, next_free, elseb);
      self.topo_sort_fwd(target, nf, thenb)
    } else {
      let nf = self.topo_sort_fwd(target, next_free, thenb);
      self.topo_sort_fwd(target, nf, elseb)
    };
    target[next_free] = current;
    self.blocks[current].fwd_id = i32::try_from(next_free).expect("overflow");
    next_free + 1
  }
}
