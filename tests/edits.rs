use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sift::dispatch::{
  EditTask, Phase, Typecheck, TypecheckEpochManager, WorkerPool, WorkspaceEditParams,
};
use sift::index::{FileEdit, FileUpdates, Indexer};
use sift::server::{Dispatcher, TaskQueue};
use sift_util::{Metrics, Timer};

const MERGED_EDITS: (&str, &str) = ("lsp.messages.processed", "sift.mergedEdits");

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Event {
  FastRun(u32),
  SlowStart(u32),
  SlowCanceled(u32),
  SlowCommitted(u32),
}

/// A typechecker that records what happens to it. While `hold` is set, slow
/// paths spin until they are canceled or released, so tests control the
/// preemption window.
#[derive(Debug, Default)]
struct ScriptedTypechecker {
  epochs: Arc<TypecheckEpochManager>,
  events: Mutex<Vec<Event>>,
  hold: AtomicBool,
}

impl ScriptedTypechecker {
  fn new() -> Arc<Self> { Arc::new(Self::default()) }

  fn push(&self, e: Event) { self.events.lock().unwrap().push(e) }

  fn events(&self) -> Vec<Event> { self.events.lock().unwrap().clone() }

  fn wait_until(&self, pred: impl Fn(&[Event]) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
      if pred(self.events.lock().unwrap().as_slice()) { return }
      std::thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for events; saw {:?}", self.events());
  }
}

impl Typecheck for ScriptedTypechecker {
  fn typecheck_on_fast_path(&self, updates: FileUpdates, _: &mut Vec<Timer>) {
    self.push(Event::FastRun(updates.edit_count));
  }

  fn typecheck(&self, updates: FileUpdates, workers: &WorkerPool, _: &mut Vec<Timer>) -> bool {
    self.push(Event::SlowStart(updates.epoch));
    let deadline = Instant::now() + Duration::from_secs(5);
    while self.hold.load(Ordering::SeqCst)
      && !self.epochs.was_canceled(updates.epoch)
      && Instant::now() < deadline
    {
      std::thread::sleep(Duration::from_millis(1));
    }
    if self.epochs.was_canceled(updates.epoch) {
      self.push(Event::SlowCanceled(updates.epoch));
      false
    } else {
      workers.run(|_| {});
      self.push(Event::SlowCommitted(updates.epoch));
      true
    }
  }

  fn epoch_manager(&self) -> &Arc<TypecheckEpochManager> { &self.epochs }
}

fn one_edit(path: &str, contents: &str) -> WorkspaceEditParams {
  WorkspaceEditParams::new(vec![FileEdit::new(path, contents)])
}

/// Prime `path` into the indexer so later body-only edits classify fast.
fn prime(indexer: &mut Indexer, path: &str, contents: &str) {
  let updates = indexer.commit_edit(&[FileEdit::new(path, contents)], 1);
  indexer.commit_succeeded(updates.epoch);
}

#[test]
fn empty_edit_finishes_at_preprocess() {
  let metrics = Arc::new(Metrics::new());
  let task = EditTask::new(metrics.clone(), WorkspaceEditParams::new(vec![]));
  assert_eq!(task.final_phase(), Phase::Preprocess);
  drop(task);
  assert!(metrics.timings_named("latency.cancel_slow_path").is_empty());
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "merged before indexing")]
fn merge_after_index_is_rejected() {
  let metrics = Arc::new(Metrics::new());
  let mut indexer = Indexer::new();
  let mut older = EditTask::new(metrics.clone(), one_edit("a.silt", "def run\nend\n"));
  let mut newer = EditTask::new(metrics, one_edit("a.silt", "def run\n  1\nend\n"));
  older.index(&mut indexer);
  older.merge_newer(&mut newer);
}

/// Committing k merged edits on the fast path advances the merged-edits
/// counter by k - 1, and the scheduler latch is released.
#[test]
fn fast_path_reports_merged_edits() {
  let metrics = Arc::new(Metrics::new());
  let mut indexer = Indexer::new();
  let typechecker = ScriptedTypechecker::new();
  prime(&mut indexer, "a.silt", "def run\nend\n");

  let mut task = EditTask::new(metrics.clone(), WorkspaceEditParams::new(vec![
    FileEdit::new("a.silt", "def run\n  1\nend\n"),
    FileEdit::new("a.silt", "def run\n  2\nend\n"),
    FileEdit::new("a.silt", "def run\n  3\nend\n"),
  ]));
  task.preprocess();
  task.index(&mut indexer);
  assert!(task.can_take_fast_path(&indexer));
  task.run(typechecker.as_ref());
  task.scheduler_wait_until_ready();

  assert_eq!(typechecker.events(), vec![Event::FastRun(3)]);
  assert_eq!(metrics.category_counter(MERGED_EDITS.0, MERGED_EDITS.1), 2);
}

/// A canceled slow path emits no latency samples and advances no counters.
#[test]
fn canceled_slow_path_reports_nothing() {
  let metrics = Arc::new(Metrics::new());
  let mut indexer = Indexer::new();
  let typechecker = ScriptedTypechecker::new();
  typechecker.hold.store(true, Ordering::SeqCst);

  let mut task = EditTask::new(metrics.clone(), one_edit("a.silt", "def run\nend\n"));
  task.preprocess();
  task.index(&mut indexer);
  assert!(task.needs_multithreading(&indexer));

  let workers = WorkerPool::new(2);
  let handle = {
    let typechecker = typechecker.clone();
    std::thread::spawn(move || {
      let committed = task.run_special(typechecker.as_ref(), &workers);
      (task, committed)
    })
  };
  typechecker.wait_until(|ev| ev.iter().any(|e| matches!(e, Event::SlowStart(_))));
  assert!(typechecker.epochs.try_cancel_slow_path());
  let (task, committed) = handle.join().unwrap();
  assert!(!committed);
  drop(task);

  assert_eq!(metrics.category_counter(MERGED_EDITS.0, MERGED_EDITS.1), 0);
  assert!(metrics.timings_named("task_latency").is_empty());
  assert!(metrics.timings_named("latency.cancel_slow_path").is_empty());
  assert!(metrics.timings_named("last_diagnostic_latency").is_empty());
}

/// The fast-path decision is stable once cached, and recomputed after a
/// merge invalidates it.
#[test]
fn fast_path_decision_is_cached_until_merge() {
  let metrics = Arc::new(Metrics::new());
  let mut indexer = Indexer::new();
  prime(&mut indexer, "a.silt", "def run\nend\n");

  let mut older =
    EditTask::new(metrics.clone(), one_edit("a.silt", "def run\n  1\nend\n"));
  assert!(older.can_take_fast_path(&indexer));

  // the file grows a definition behind the task's back; the cached
  // decision holds
  prime(&mut indexer, "a.silt", "def run\nend\ndef walk\nend\n");
  assert!(older.can_take_fast_path(&indexer));

  // merging drops the cache, and the recomputation sees the new state
  let mut newer =
    EditTask::new(metrics, one_edit("a.silt", "def run\n  2\nend\n"));
  older.merge_newer(&mut newer);
  assert!(!older.can_take_fast_path(&indexer));
  assert!(older.can_preempt(&indexer) == older.can_take_fast_path(&indexer));
}

/// Scenario: two consecutive edits merge into one task, which commits once
/// with the combined edit count.
#[test]
fn consecutive_edits_merge_into_one_commit() {
  let metrics = Arc::new(Metrics::new());
  let mut indexer = Indexer::new();
  let queue = TaskQueue::new();

  queue.enqueue_edit(&metrics, one_edit("a.silt", "def run\nend\n"));
  queue.enqueue_edit(&metrics, one_edit("a.silt", "def run\n  1\nend\n"));
  assert_eq!(queue.len(), 1, "consecutive un-indexed edits must merge");

  let mut task = queue.pop().unwrap();
  assert_eq!(task.params.edit_count, 2);
  task.index(&mut indexer);
  let updates = task.updates().unwrap();
  assert_eq!(updates.edit_count, 2);
  assert_eq!(updates.committed_edit_count, 0);
  assert!(!updates.can_take_fast_path, "unknown file must go slow");
}

/// Scenario: a fast edit arriving during a slow path preempts it. The slow
/// path reports canceled and nothing else; the fast edit runs to
/// completion and owns the cancellation latency sample; the canceled batch
/// is retried and commits.
#[test]
fn fast_edit_preempts_running_slow_path() {
  let metrics = Arc::new(Metrics::new());
  let typechecker = ScriptedTypechecker::new();
  let queue = Arc::new(TaskQueue::new());
  let mut dispatcher = Dispatcher::new(queue.clone(), typechecker.clone(), WorkerPool::new(2));
  let worker = std::thread::spawn(move || dispatcher.run());

  // prime a file so a later body edit can take the fast path
  queue.enqueue_edit(&metrics, one_edit("b.silt", "def poll\nend\n"));
  typechecker.wait_until(|ev| ev.iter().any(|e| matches!(e, Event::SlowCommitted(_))));

  // a definition edit starts a slow path and is held open
  typechecker.hold.store(true, Ordering::SeqCst);
  queue.enqueue_edit(&metrics, one_edit("a.silt", "def run\nend\n"));
  typechecker.wait_until(|ev| {
    ev.iter().filter(|e| matches!(e, Event::SlowStart(_))).count() == 2
  });

  // two merged body-only edits preempt it
  queue.enqueue_edit(&metrics, WorkspaceEditParams::new(vec![
    FileEdit::new("b.silt", "def poll\n  1\nend\n"),
    FileEdit::new("b.silt", "def poll\n  2\nend\n"),
  ]));
  typechecker.wait_until(|ev| ev.iter().any(|e| matches!(e, Event::FastRun(_))));

  // the canceled batch is re-enqueued and now allowed to finish
  typechecker.wait_until(|ev| {
    ev.iter().filter(|e| matches!(e, Event::SlowStart(_))).count() == 3
  });
  typechecker.hold.store(false, Ordering::SeqCst);
  typechecker.wait_until(|ev| {
    ev.iter().filter(|e| matches!(e, Event::SlowCommitted(_))).count() == 2
  });

  queue.close();
  worker.join().unwrap();

  let kinds: Vec<&str> = typechecker.events().iter().map(|e| match e {
    Event::FastRun(_) => "fast",
    Event::SlowStart(_) => "start",
    Event::SlowCanceled(_) => "canceled",
    Event::SlowCommitted(_) => "committed",
  }).collect();
  assert_eq!(kinds, vec!["start", "committed", "start", "canceled", "fast", "start", "committed"]);
  assert!(typechecker.events().contains(&Event::FastRun(2)));

  // counters: only the fast batch had merged edits (2 - 1); the canceled
  // slow path contributed nothing
  assert_eq!(metrics.category_counter(MERGED_EDITS.0, MERGED_EDITS.1), 1);
  // exactly one cancellation latency sample, owned by the preempting edit
  assert_eq!(metrics.timings_named("latency.cancel_slow_path").len(), 1);
  // three tasks completed: the priming edit, the fast edit, the retry
  let latencies = metrics.timings_named("task_latency");
  assert_eq!(latencies.len(), 3);
  assert_eq!(latencies.iter().filter(|s| s.tags.contains(&("path", "fast"))).count(), 1);
  assert_eq!(latencies.iter().filter(|s| s.tags.contains(&("path", "slow"))).count(), 2);
}

#[test]
fn epoch_manager_protocol() {
  let epochs = TypecheckEpochManager::new();
  assert!(!epochs.try_cancel_slow_path(), "nothing to cancel");
  epochs.start_commit_epoch(7);
  assert!(epochs.is_running());
  assert!(!epochs.was_canceled(7));
  assert!(epochs.try_cancel_slow_path());
  assert!(!epochs.try_cancel_slow_path(), "already being canceled");
  assert!(epochs.was_canceled(7));
  assert!(!epochs.was_canceled(8));
  epochs.finish_epoch(7);
  assert!(!epochs.is_running());
  assert!(!epochs.try_cancel_slow_path());
}

#[test]
fn worker_pool_runs_every_worker() {
  let pool = WorkerPool::new(4);
  let ran = AtomicUsize::new(0);
  pool.run(|_| { ran.fetch_add(1, Ordering::SeqCst); });
  assert_eq!(ran.load(Ordering::SeqCst), 4);
  assert_eq!(WorkerPool::new(0).size(), 1);
}
