//! The workspace-edit task state machine.
//!
//! An [`EditTask`] carries one batch of file edits through its lifecycle:
//! created on the preprocessor thread (where consecutive un-indexed tasks
//! may be merged), indexed on the typechecker thread, then run on the fast
//! path ([`EditTask::run`]) or handed to a slow-path thread
//! ([`EditTask::run_special`]). The slow path is cancellable through the
//! process-wide [`TypecheckEpochManager`]; a canceled run emits no latency
//! samples and advances no counters.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use sift_util::{Metrics, Timer};

use crate::index::{FileEdit, FileUpdates, Indexer};
use crate::util::Notification;

/// The merged parameter set of one edit task.
#[derive(Debug, Default)]
pub struct WorkspaceEditParams {
  /// The edits, in arrival order.
  pub updates: Vec<FileEdit>,
  /// Total edits folded into this batch, merges included.
  pub edit_count: u32,
  /// Per-edit diagnostic latency timers, cloned from the task latency
  /// timer during preprocessing.
  pub diagnostic_latency_timers: Vec<Timer>,
}

impl WorkspaceEditParams {
  /// Wrap a batch of edits.
  #[must_use] pub fn new(updates: Vec<FileEdit>) -> Self {
    let edit_count = u32::try_from(updates.len()).expect("overflow");
    WorkspaceEditParams { updates, edit_count, diagnostic_latency_timers: Vec::new() }
  }

  fn merge(&mut self, other: &mut WorkspaceEditParams) {
    self.updates.append(&mut other.updates);
    self.edit_count += other.edit_count;
    self.diagnostic_latency_timers.append(&mut other.diagnostic_latency_timers);
  }
}

/// How far a task's lifecycle runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
  /// The task is finished after preprocessing (a no-op edit).
  Preprocess,
  /// The task runs a typecheck.
  Run,
}

/// Process-wide mediator of slow-path lifetime. The typechecker binds an
/// epoch when a cancellable slow path starts; the scheduler may request
/// cooperative cancellation, which the slow path observes between units of
/// work.
#[derive(Debug, Default)]
pub struct TypecheckEpochManager {
  state: Mutex<EpochState>,
}

#[derive(Debug, Default)]
struct EpochState {
  running: Option<u32>,
  canceled: bool,
}

impl TypecheckEpochManager {
  /// A manager with no slow path running.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Bind `epoch` as the running cancellable slow path.
  pub fn start_commit_epoch(&self, epoch: u32) {
    let mut state = self.state.lock().unwrap();
    state.running = Some(epoch);
    state.canceled = false;
  }

  /// Request cancellation of the running slow path. Returns false if no
  /// slow path is running (or it is already being canceled).
  pub fn try_cancel_slow_path(&self) -> bool {
    let mut state = self.state.lock().unwrap();
    if state.running.is_some() && !state.canceled {
      state.canceled = true;
      true
    } else {
      false
    }
  }

  /// Polled by the slow path between units of work.
  #[must_use] pub fn was_canceled(&self, epoch: u32) -> bool {
    let state = self.state.lock().unwrap();
    state.running == Some(epoch) && state.canceled
  }

  /// The slow path for `epoch` finished (committed or canceled).
  pub fn finish_epoch(&self, epoch: u32) {
    let mut state = self.state.lock().unwrap();
    if state.running == Some(epoch) {
      state.running = None;
      state.canceled = false;
    }
  }

  /// True while a cancellable slow path is bound.
  #[must_use] pub fn is_running(&self) -> bool {
    self.state.lock().unwrap().running.is_some()
  }
}

/// A fixed set of workers the slow path fans out on.
#[derive(Copy, Clone, Debug)]
pub struct WorkerPool {
  size: usize,
}

impl WorkerPool {
  /// A pool of `size` workers (at least one).
  #[must_use] pub fn new(size: usize) -> Self { WorkerPool { size: size.max(1) } }

  /// The number of workers.
  #[must_use] pub fn size(&self) -> usize { self.size }

  /// Run `f(worker_index)` on every worker and wait for all of them.
  pub fn run(&self, f: impl Fn(usize) + Sync) {
    let result = crossbeam::scope(|s| {
      for i in 0..self.size {
        let f = &f;
        s.spawn(move |_| f(i));
      }
    });
    assert!(result.is_ok(), "worker pool thread panicked");
  }
}

/// The typechecker as the dispatcher sees it. The inference engine proper
/// lives upstream; it plugs in here.
pub trait Typecheck {
  /// Incremental re-type-check of the methods affected by `updates`. Not
  /// cancellable.
  fn typecheck_on_fast_path(&self, updates: FileUpdates, diagnostic_latency_timers: &mut Vec<Timer>);

  /// Whole-program re-type-check, fanned out over `workers`. Returns false
  /// if the epoch was canceled; the caller then discards all metrics for
  /// the task.
  fn typecheck(
    &self, updates: FileUpdates, workers: &WorkerPool,
    diagnostic_latency_timers: &mut Vec<Timer>,
  ) -> bool;

  /// The process-wide epoch manager.
  fn epoch_manager(&self) -> &Arc<TypecheckEpochManager>;
}

/// One batch of workspace edits moving through the dispatcher.
#[derive(Debug)]
pub struct EditTask {
  /// The (possibly merged) edit parameters.
  pub params: WorkspaceEditParams,
  updates: Option<FileUpdates>,
  latency_timer: Option<Timer>,
  latency_cancel_slow_path: Option<Timer>,
  started: Arc<Notification>,
  cached_fast_path: Cell<Option<bool>>,
  metrics: Arc<Metrics>,
}

impl EditTask {
  /// A fresh task. Its overall latency timer starts now; the
  /// cancel-slow-path timer is armed unless the batch is a no-op.
  #[must_use] pub fn new(metrics: Arc<Metrics>, params: WorkspaceEditParams) -> Self {
    let latency_timer = Timer::new(metrics.clone(), "task_latency");
    let mut latency_cancel_slow_path = Timer::new(metrics.clone(), "latency.cancel_slow_path");
    if params.updates.is_empty() {
      latency_cancel_slow_path.cancel();
    }
    EditTask {
      params,
      updates: None,
      latency_timer: Some(latency_timer),
      latency_cancel_slow_path: Some(latency_cancel_slow_path),
      started: Arc::new(Notification::new()),
      cached_fast_path: Cell::new(None),
      metrics,
    }
  }

  /// A no-op batch is finished after preprocessing; everything else runs a
  /// typecheck.
  #[must_use] pub fn final_phase(&self) -> Phase {
    if self.params.updates.is_empty() { Phase::Preprocess } else { Phase::Run }
  }

  /// Fold the newer task `other` into this one. Only legal before either
  /// task has been indexed. The newer task's latency timers are canceled
  /// (merged edits report one latency), and both cached fast-path
  /// decisions are dropped.
  pub fn merge_newer(&mut self, other: &mut EditTask) {
    debug_assert!(self.updates.is_none() && other.updates.is_none(),
      "tasks can only be merged before indexing");
    self.params.merge(&mut other.params);
    if let Some(timer) = &mut other.latency_timer {
      timer.cancel();
    }
    if let Some(timer) = &mut other.latency_cancel_slow_path {
      timer.cancel();
    }
    other.cached_fast_path.set(None);
    self.cached_fast_path.set(None);
  }

  /// Attach the per-edit diagnostic latency timer, anchored to the task's
  /// arrival instant.
  pub fn preprocess(&mut self) {
    if let Some(timer) = &self.latency_timer {
      if !self.params.updates.is_empty() {
        self.params.diagnostic_latency_timers.push(timer.clone_as("last_diagnostic_latency"));
      }
    }
  }

  /// Commit the batch to the indexer, fixing its epoch and path decision.
  pub fn index(&mut self, indexer: &mut Indexer) {
    self.updates = Some(indexer.commit_edit(&self.params.updates, self.params.edit_count));
  }

  /// The committed updates, once [`index`](EditTask::index) has run.
  #[must_use] pub fn updates(&self) -> Option<&FileUpdates> { self.updates.as_ref() }

  /// The committed epoch. Panics before indexing.
  #[must_use] pub fn epoch(&self) -> u32 {
    self.updates.as_ref().expect("edit was not indexed").epoch
  }

  /// The latch [`run`](EditTask::run)/[`run_special`](EditTask::run_special)
  /// fire once the epoch is bound; the scheduler blocks on it.
  #[must_use] pub fn started_handle(&self) -> Arc<Notification> { self.started.clone() }

  /// Fast path: non-cancellable incremental re-type-check.
  pub fn run(&mut self, typechecker: &dyn Typecheck) {
    if let Some(timer) = &mut self.latency_timer {
      timer.set_tag("path", "fast");
    }
    let updates = self.updates.take().expect("edit was not indexed");
    if let Some(mut timer) = self.latency_cancel_slow_path.take() {
      if !updates.canceled_slow_path {
        timer.cancel();
      }
      // dropping the timer reports the metric
    }
    self.started.notify();
    assert!(updates.can_take_fast_path,
      "Attempted to run a slow path update on the fast path!");
    let new_edit_count = updates.edit_count - updates.committed_edit_count;
    typechecker.typecheck_on_fast_path(updates, &mut self.params.diagnostic_latency_timers);
    self.params.diagnostic_latency_timers.clear();
    self.metrics.category_counter_add(
      "lsp.messages.processed", "sift.mergedEdits", u64::from(new_edit_count - 1));
  }

  /// Slow path: bind a cancellable epoch, release the scheduler, and run
  /// the whole-program typecheck. Returns whether the edit was committed;
  /// a canceled run reports nothing.
  pub fn run_special(&mut self, typechecker: &dyn Typecheck, workers: &WorkerPool) -> bool {
    if let Some(timer) = &mut self.latency_timer {
      timer.set_tag("path", "slow");
    }
    let updates = self.updates.take().expect("edit was not indexed");
    if let Some(mut timer) = self.latency_cancel_slow_path.take() {
      if !updates.canceled_slow_path {
        timer.cancel();
      }
    }
    // tell the epoch manager a cancelable typecheck is coming, then let the
    // scheduler move on
    let epoch = updates.epoch;
    typechecker.epoch_manager().start_commit_epoch(epoch);
    self.started.notify();
    let new_edit_count = updates.edit_count - updates.committed_edit_count;
    let committed =
      typechecker.typecheck(updates, workers, &mut self.params.diagnostic_latency_timers);
    typechecker.epoch_manager().finish_epoch(epoch);
    if committed {
      self.params.diagnostic_latency_timers.clear();
      self.metrics.category_counter_add(
        "lsp.messages.processed", "sift.mergedEdits", u64::from(new_edit_count - 1));
    } else {
      // no latency samples for a canceled slow path
      if let Some(timer) = &mut self.latency_timer {
        timer.cancel();
      }
      for timer in &mut self.params.diagnostic_latency_timers {
        timer.cancel();
      }
      self.params.diagnostic_latency_timers.clear();
      log::info!("slow path canceled at epoch {}", epoch);
    }
    committed
  }

  /// Block until the running thread has bound the task's epoch.
  pub fn scheduler_wait_until_ready(&self) {
    self.started.wait();
  }

  /// Whether this batch can run on the fast path. Before indexing the
  /// answer is computed from file hashes and cached; after indexing it is
  /// read off the committed updates.
  #[must_use] pub fn can_take_fast_path(&self, indexer: &Indexer) -> bool {
    if let Some(updates) = &self.updates {
      return updates.can_take_fast_path;
    }
    if let Some(cached) = self.cached_fast_path.get() {
      return cached;
    }
    let hashes = indexer.compute_file_hashes(&self.params.updates);
    let decision = indexer.can_take_fast_path(&self.params.updates, &hashes);
    self.cached_fast_path.set(Some(decision));
    decision
  }

  /// Only fast-path tasks may preempt a running slow path.
  #[must_use] pub fn can_preempt(&self, indexer: &Indexer) -> bool {
    self.can_take_fast_path(indexer)
  }

  /// Slow-path tasks need the worker pool.
  #[must_use] pub fn needs_multithreading(&self, indexer: &Indexer) -> bool {
    !self.can_take_fast_path(indexer)
  }

  /// Rebuild a task from a canceled slow-path run: same parameters, fresh
  /// timers, nothing indexed. The scheduler re-enqueues the result at the
  /// front of the queue.
  #[must_use] pub fn into_retry(mut self) -> EditTask {
    let params = WorkspaceEditParams {
      updates: std::mem::take(&mut self.params.updates),
      edit_count: self.params.edit_count,
      diagnostic_latency_timers: Vec::new(),
    };
    let mut task = EditTask::new(self.metrics.clone(), params);
    task.preprocess();
    task
  }
}
