//! File-level indexing and the fast/slow path classifier.
//!
//! The indexer keeps a hash summary per workspace file. An incoming edit
//! batch can take the fast path (incremental re-type-check of the affected
//! methods) only if every edited file is already known and its
//! *definition* hash is unchanged; anything that adds, removes, or reshapes
//! definitions forces the slow path (whole-program re-index and
//! re-type-check).
//!
//! Slow-path commits are provisional: the hashes they evict are remembered
//! until the typechecker reports the commit, and restored if the slow path
//! is canceled, so the retry classifies against the pre-cancel state.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// One file edit: the full new contents of a file (the server runs with
/// full-text document sync).
#[derive(Clone, Debug)]
pub struct FileEdit {
  /// Workspace-relative path of the edited file.
  pub path: String,
  /// The complete new contents.
  pub contents: String,
}

impl FileEdit {
  /// Construct an edit.
  #[must_use] pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
    FileEdit { path: path.into(), contents: contents.into() }
  }
}

/// The hash summary of one file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileHash {
  /// Covers only definition-introducing lines; stable under body-only edits.
  pub definitions: u64,
  /// Covers the whole file.
  pub contents: u64,
}

impl FileHash {
  /// Summarize `text`.
  #[must_use] pub fn compute(text: &str) -> FileHash {
    let mut contents = DefaultHasher::new();
    text.hash(&mut contents);
    let mut definitions = DefaultHasher::new();
    for line in text.lines() {
      let line = line.trim_start();
      if line.starts_with("def ") || line.starts_with("class ") || line.starts_with("module ") {
        line.hash(&mut definitions);
      }
    }
    FileHash { definitions: definitions.finish(), contents: contents.finish() }
  }
}

/// The result of committing one edit batch to the indexer.
#[derive(Clone, Debug)]
pub struct FileUpdates {
  /// Monotonically increasing commit identifier; slow-path cancellation is
  /// keyed on it.
  pub epoch: u32,
  /// Total edits in this batch, merges included.
  pub edit_count: u32,
  /// Edits of this batch that were already committed by an earlier attempt.
  pub committed_edit_count: u32,
  /// Whether this batch may run on the fast path.
  pub can_take_fast_path: bool,
  /// True if this commit took over from a slow path that was canceled on
  /// its behalf.
  pub canceled_slow_path: bool,
  /// The edits themselves, handed on to the typechecker.
  pub updates: Vec<FileEdit>,
}

#[derive(Debug)]
struct OutstandingSlow {
  epoch: u32,
  evicted: Vec<(String, Option<FileHash>)>,
}

/// The workspace file index. Owned by the typechecker thread; see the
/// module docs for the commit/cancel protocol.
#[derive(Debug, Default)]
pub struct Indexer {
  files: HashMap<String, FileHash>,
  epoch: u32,
  outstanding: Option<OutstandingSlow>,
  canceled_pending: bool,
}

impl Indexer {
  /// An empty index.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The epoch of the most recent commit.
  #[must_use] pub fn epoch(&self) -> u32 { self.epoch }

  /// Hash every edited file. Pure; does not touch the index.
  #[must_use] pub fn compute_file_hashes(&self, updates: &[FileEdit]) -> Vec<FileHash> {
    updates.iter().map(|e| FileHash::compute(&e.contents)).collect()
  }

  /// Classify an edit batch against the current index, given the hashes
  /// from [`compute_file_hashes`](Indexer::compute_file_hashes).
  #[must_use] pub fn can_take_fast_path(&self, updates: &[FileEdit], hashes: &[FileHash]) -> bool {
    updates.iter().zip(hashes).all(|(e, h)| {
      self.files.get(&e.path).map_or(false, |old| old.definitions == h.definitions)
    })
  }

  /// Commit an edit batch: bump the epoch, apply the new hashes, and
  /// produce the [`FileUpdates`] the dispatcher runs with. A slow-path
  /// commit records the evicted hashes until the typechecker confirms it.
  pub fn commit_edit(&mut self, updates: &[FileEdit], edit_count: u32) -> FileUpdates {
    let hashes = self.compute_file_hashes(updates);
    let fast = self.can_take_fast_path(updates, &hashes);
    self.epoch += 1;
    let mut evicted = Vec::with_capacity(updates.len());
    for (e, &h) in updates.iter().zip(&hashes) {
      let old = self.files.insert(e.path.clone(), h);
      evicted.push((e.path.clone(), old));
    }
    let canceled_slow_path = std::mem::take(&mut self.canceled_pending);
    if !fast {
      self.outstanding = Some(OutstandingSlow { epoch: self.epoch, evicted });
    }
    FileUpdates {
      epoch: self.epoch,
      edit_count,
      committed_edit_count: 0,
      can_take_fast_path: fast,
      canceled_slow_path,
      updates: updates.to_vec(),
    }
  }

  /// The typechecker committed the slow-path batch `epoch`; its eviction
  /// record is no longer needed.
  pub fn commit_succeeded(&mut self, epoch: u32) {
    if self.outstanding.as_ref().map_or(false, |o| o.epoch == epoch) {
      self.outstanding = None;
    }
  }

  /// The running slow path was canceled: roll its hashes back and arm the
  /// `canceled_slow_path` flag for the next commit.
  pub fn slow_path_canceled(&mut self) {
    if let Some(outstanding) = self.outstanding.take() {
      for (path, old) in outstanding.evicted.into_iter().rev() {
        match old {
          Some(h) => { self.files.insert(path, h); }
          None => { self.files.remove(&path); }
        }
      }
    }
    self.canceled_pending = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn definition_hash_ignores_body_edits() {
    let a = FileHash::compute("class Widget\n  def run\n    1\n  end\nend\n");
    let b = FileHash::compute("class Widget\n  def run\n    2\n  end\nend\n");
    let c = FileHash::compute("class Widget\n  def walk\n    1\n  end\nend\n");
    assert_eq!(a.definitions, b.definitions);
    assert_ne!(a.contents, b.contents);
    assert_ne!(a.definitions, c.definitions);
  }

  #[test]
  fn unknown_files_force_the_slow_path() {
    let mut indexer = Indexer::new();
    let edit = vec![FileEdit::new("a.silt", "def run\nend\n")];
    let hashes = indexer.compute_file_hashes(&edit);
    assert!(!indexer.can_take_fast_path(&edit, &hashes));

    let updates = indexer.commit_edit(&edit, 1);
    assert!(!updates.can_take_fast_path);
    indexer.commit_succeeded(updates.epoch);

    // body-only change to a known file is fast
    let edit = vec![FileEdit::new("a.silt", "def run\n  1\nend\n")];
    let hashes = indexer.compute_file_hashes(&edit);
    assert!(indexer.can_take_fast_path(&edit, &hashes));
  }

  #[test]
  fn canceled_slow_path_restores_hashes() {
    let mut indexer = Indexer::new();
    let first = vec![FileEdit::new("a.silt", "def run\nend\n")];
    let updates = indexer.commit_edit(&first, 1);
    indexer.commit_succeeded(updates.epoch);

    // a definition edit goes slow and is then canceled
    let second = vec![FileEdit::new("a.silt", "def run\nend\ndef walk\nend\n")];
    let updates = indexer.commit_edit(&second, 1);
    assert!(!updates.can_take_fast_path);
    indexer.slow_path_canceled();

    // the retry classifies against the pre-cancel state: still slow
    let retry = indexer.commit_edit(&second, 1);
    assert!(!retry.can_take_fast_path);
    assert!(retry.canceled_slow_path);
  }
}
