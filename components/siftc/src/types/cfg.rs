//! The control-flow graph a method body is lowered into.
//!
//! Blocks live in an arena ([`BlockVec`]) and refer to each other by
//! [`BlockId`]; `thenb`/`elseb`/`back_edges` are indices, never owning
//! references, so the cyclic graph has no ownership cycles and removing a
//! block is a constant-time tombstone. Two blocks are distinguished:
//! [`BlockId::ENTRY`] and the [`BlockId::DEAD`] sink that absorbs the exit
//! edges of proven-unreachable control flow. Neither is ever removed.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::sym::{LocalId, NameId};
use crate::types::{ast::Value, IdxVec, Span};

mk_id! {
  /// A basic block id, indexing into [`Cfg::blocks`].
  BlockId(Debug("bb")),
}

impl BlockId {
  /// The entry block. Always present, never removed.
  pub const ENTRY: BlockId = BlockId(0);
  /// The dead-block sink. Always present, never removed, reachable by no
  /// real control flow.
  pub const DEAD: BlockId = BlockId(1);
}

/// A vector indexed by [`BlockId`].
pub type BlockVec<T> = IdxVec<BlockId, T>;

/// The payload of one instruction.
#[derive(Clone, PartialEq, Eq)]
pub enum InstrKind {
  /// A copy of another local.
  Ident(LocalId),
  /// A literal value.
  Literal(Value),
  /// The method receiver.
  LoadSelf,
  /// The `idx`th declared parameter.
  LoadArg(u32),
  /// The parameter tuple delivered to a block on dispatch.
  LoadYieldParams,
  /// A method call.
  Send {
    /// The receiver local.
    recv: LocalId,
    /// The called method.
    method: NameId,
    /// Argument locals, in positional order.
    args: SmallVec<[LocalId; 4]>,
  },
  /// Surrender the method's value.
  Return(LocalId),
  /// An exhaustiveness assertion: control proves the operand uninhabited.
  Absurd(LocalId),
  /// Bind the global constant `name` to this local.
  Alias(NameId),
}

impl InstrKind {
  /// Call `f` on every local this instruction reads.
  pub fn for_each_read(&self, mut f: impl FnMut(LocalId)) {
    match *self {
      InstrKind::Ident(w) | InstrKind::Return(w) | InstrKind::Absurd(w) => f(w),
      InstrKind::Send { recv, ref args, .. } => {
        f(recv);
        for &a in args { f(a) }
      }
      InstrKind::Literal(_) | InstrKind::LoadSelf | InstrKind::LoadArg(_)
      | InstrKind::LoadYieldParams | InstrKind::Alias(_) => {}
    }
  }
}

impl std::fmt::Debug for InstrKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    use itertools::Itertools;
    match self {
      InstrKind::Ident(w) => write!(f, "{:?}", w),
      InstrKind::Literal(v) => write!(f, "lit {:?}", v),
      InstrKind::LoadSelf => write!(f, "self"),
      InstrKind::LoadArg(i) => write!(f, "arg {}", i),
      InstrKind::LoadYieldParams => write!(f, "yield_params"),
      InstrKind::Send { recv, method, args } =>
        write!(f, "{:?}.{:?}({:?})", recv, method, args.iter().format(", ")),
      InstrKind::Return(w) => write!(f, "return {:?}", w),
      InstrKind::Absurd(w) => write!(f, "absurd {:?}", w),
      InstrKind::Alias(n) => write!(f, "alias {:?}", n),
    }
  }
}

/// An instruction: the payload plus the synthetic flag. Synthetic
/// instructions were invented during lowering and are opaque to dealiasing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instr {
  /// The payload.
  pub kind: InstrKind,
  /// True if lowering invented this instruction.
  pub synthetic: bool,
}

impl Instr {
  /// An instruction as written in source.
  #[must_use] pub fn new(kind: InstrKind) -> Self { Instr { kind, synthetic: false } }

  /// An instruction invented by lowering.
  #[must_use] pub fn synth(kind: InstrKind) -> Self { Instr { kind, synthetic: true } }
}

/// One assignment inside a basic block: `bind := value`.
#[derive(Clone, PartialEq, Eq)]
pub struct Binding {
  /// The local written.
  pub bind: LocalId,
  /// The instruction producing the value.
  pub value: Instr,
  /// Where the assignment came from.
  pub loc: Span,
}

impl std::fmt::Debug for Binding {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?} := {}{:?}", self.bind, if self.value.synthetic { "synth " } else { "" },
      self.value.kind)
  }
}

/// A block terminator: branch on `cond` to `thenb`/`elseb`. When the two
/// targets agree the jump is unconditional and `cond` is
/// [`LocalId::UNCONDITIONAL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockExit {
  /// The branch condition, or a sentinel.
  pub cond: LocalId,
  /// Target when the condition is truthy.
  pub thenb: BlockId,
  /// Target when the condition is falsy.
  pub elseb: BlockId,
}

bitflags! {
  /// Per-block attribute bits.
  pub struct BlockFlags: u8 {
    /// Some exit names this block as a target; true for every live block
    /// except the entry and the dead sink.
    const WAS_JUMP_DESTINATION = 1 << 0;
    /// Some predecessor sits at a shallower loop depth.
    const LOOP_HEADER = 1 << 1;
    /// The block was removed; the arena slot is a tombstone.
    const REMOVED = 1 << 2;
  }
}

/// A basic block.
#[derive(Clone, Debug)]
pub struct BasicBlock {
  /// The assignments of the block, in execution order.
  pub exprs: Vec<Binding>,
  /// The terminator.
  pub bexit: BlockExit,
  /// Predecessor blocks. A multiset until `simplify` dedupes it.
  pub back_edges: Vec<BlockId>,
  /// The block's arguments (the locals whose types flow in through joins),
  /// sorted ascending once `fill_in_block_arguments` has run.
  pub args: Vec<LocalId>,
  /// Loop-nesting depth of the block.
  pub outer_loops: u32,
  /// Which closure scope the block belongs to; blocks are never fused
  /// across closure boundaries.
  pub closure_id: u32,
  /// Attribute bits.
  pub flags: BlockFlags,
  /// Index into [`Cfg::forwards_topo_sort`]: -1 unvisited, -2 visit in
  /// progress.
  pub fwd_id: i32,
}

impl BasicBlock {
  fn new(closure_id: u32, outer_loops: u32) -> Self {
    BasicBlock {
      exprs: Vec::new(),
      bexit: BlockExit {
        cond: LocalId::UNCONDITIONAL,
        thenb: BlockId::DEAD,
        elseb: BlockId::DEAD,
      },
      back_edges: Vec::new(),
      args: Vec::new(),
      outer_loops,
      closure_id,
      flags: BlockFlags::empty(),
      fwd_id: -1,
    }
  }

  /// True if the arena slot is a tombstone.
  #[must_use] #[inline] pub fn is_removed(&self) -> bool {
    self.flags.contains(BlockFlags::REMOVED)
  }

  /// True if the block is a loop header.
  #[must_use] #[inline] pub fn is_loop_header(&self) -> bool {
    self.flags.contains(BlockFlags::LOOP_HEADER)
  }
}

/// Per-block read/write summary, indexed by block id.
#[derive(Debug, Default)]
pub struct ReadsAndWrites {
  /// Locals read in each block (including the branch condition).
  pub reads: BlockVec<HashSet<LocalId>>,
  /// Locals written in each block.
  pub writes: BlockVec<HashSet<LocalId>>,
  /// Locals whose first access in the block is a write; dead on entry.
  pub dead: BlockVec<HashSet<LocalId>>,
}

/// The control-flow graph of one method body. Owns every block.
#[derive(Clone, Debug)]
pub struct Cfg {
  /// The block arena. Slot [`BlockId::ENTRY`] is the entry, slot
  /// [`BlockId::DEAD`] the dead sink; removed blocks stay as tombstones.
  pub blocks: BlockVec<BasicBlock>,
  /// Live blocks in forward-topological order, entry last; filled by
  /// `fill_in_topo_sort`, maintained by `simplify`.
  pub forwards_topo_sort: Vec<BlockId>,
  /// Per local, the shallowest loop depth at which it is accessed.
  pub min_loops: HashMap<LocalId, u32>,
  /// Per local, the deepest loop depth at which it is written.
  pub max_loop_write: HashMap<LocalId, u32>,
}

impl Default for Cfg {
  fn default() -> Self { Self::new() }
}

impl Cfg {
  /// A fresh CFG holding the entry block (exiting into the dead sink) and
  /// the dead sink itself.
  #[must_use] pub fn new() -> Self {
    let mut blocks = BlockVec::new();
    let entry = blocks.push(BasicBlock::new(0, 0));
    let dead = blocks.push(BasicBlock::new(0, 0));
    debug_assert_eq!(entry, BlockId::ENTRY);
    debug_assert_eq!(dead, BlockId::DEAD);
    blocks[BlockId::DEAD].bexit =
      BlockExit { cond: LocalId::UNCONDITIONAL, thenb: BlockId::DEAD, elseb: BlockId::DEAD };
    blocks[BlockId::DEAD].back_edges.push(BlockId::ENTRY);
    Cfg {
      blocks,
      forwards_topo_sort: Vec::new(),
      min_loops: HashMap::new(),
      max_loop_write: HashMap::new(),
    }
  }

  /// An upper bound on live block ids; tombstones count.
  #[must_use] pub fn max_block_id(&self) -> usize { self.blocks.len() }

  /// Append a new block belonging to `closure_id` at loop depth
  /// `outer_loops`. Its exit initially falls into the dead sink.
  pub fn new_block(&mut self, closure_id: u32, outer_loops: u32) -> BlockId {
    let id = self.blocks.push(BasicBlock::new(closure_id, outer_loops));
    self.blocks[BlockId::DEAD].back_edges.push(id);
    id
  }

  /// Append `bind := value` to `bb`.
  pub fn bind(&mut self, bb: BlockId, bind: LocalId, value: Instr, loc: Span) {
    self.blocks[bb].exprs.push(Binding { bind, value, loc });
  }

  /// Point `from`'s exit at `thenb`/`elseb` under `cond`, unlinking the old
  /// targets' back-edges and linking the new ones. Marks the new targets as
  /// jump destinations, as construction does.
  pub fn set_exit(&mut self, from: BlockId, cond: LocalId, thenb: BlockId, elseb: BlockId) {
    let old = self.blocks[from].bexit;
    self.blocks[old.thenb].back_edges.retain(|&b| b != from);
    if old.elseb != old.thenb {
      self.blocks[old.elseb].back_edges.retain(|&b| b != from);
    }
    self.blocks[from].bexit = BlockExit { cond, thenb, elseb };
    self.blocks[thenb].back_edges.push(from);
    self.blocks[thenb].flags |= BlockFlags::WAS_JUMP_DESTINATION;
    if elseb != thenb {
      self.blocks[elseb].back_edges.push(from);
      self.blocks[elseb].flags |= BlockFlags::WAS_JUMP_DESTINATION;
    }
  }

  /// Tombstone `id`. The caller is responsible for having detached it.
  pub(crate) fn remove_block(&mut self, id: BlockId) {
    debug_assert!(id != BlockId::ENTRY && id != BlockId::DEAD);
    let bl = &mut self.blocks[id];
    bl.exprs.clear();
    bl.back_edges.clear();
    bl.args.clear();
    bl.flags |= BlockFlags::REMOVED;
  }

  /// Iterator over the live blocks (the dead sink included).
  pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
    self.blocks.enum_iter().filter(|(_, bl)| !bl.is_removed()).map(|(id, _)| id)
  }

  /// The number of live blocks.
  #[must_use] pub fn num_blocks(&self) -> usize { self.block_ids().count() }

  /// Compute the per-block read/write/dead-on-entry summary.
  #[must_use] pub fn find_all_reads_and_writes(&self) -> ReadsAndWrites {
    let n = self.blocks.len();
    let mut rnw = ReadsAndWrites {
      reads: BlockVec::from_default(n),
      writes: BlockVec::from_default(n),
      dead: BlockVec::from_default(n),
    };
    for id in self.block_ids() {
      let bl = &self.blocks[id];
      let mut read_so_far = HashSet::new();
      for binding in &bl.exprs {
        binding.value.kind.for_each_read(|r| {
          read_so_far.insert(r);
          rnw.reads[id].insert(r);
        });
        rnw.writes[id].insert(binding.bind);
        if !read_so_far.contains(&binding.bind) {
          rnw.dead[id].insert(binding.bind);
        }
      }
      if bl.bexit.cond != LocalId::UNCONDITIONAL {
        rnw.reads[id].insert(bl.bexit.cond);
      }
    }
    rnw
  }
}
