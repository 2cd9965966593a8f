//! The LSP server: stdio transport, the preprocessor side that merges
//! incoming edits, and the typechecker thread that runs them.
//!
//! Three threads of control:
//!
//! - the *preprocessor* (the transport loop here) turns `didOpen`/
//!   `didChange` notifications into [`EditTask`]s and enqueues them,
//!   merging consecutive not-yet-indexed tasks;
//! - the *typechecker thread* ([`Dispatcher::run`]) pops tasks in FIFO
//!   order, indexes them, and runs fast-path tasks inline;
//! - slow-path tasks get a dedicated thread plus the worker pool, and may
//!   be preempted: a fast-path task arriving while a slow path runs cancels
//!   it, and the canceled batch is re-enqueued at the front of the queue.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{RecvError, SendError};
use lsp_server::{Connection, ErrorCode, Message, ProtocolError, Response};
use lsp_types::{
  DidChangeTextDocumentParams, DidOpenTextDocumentParams, InitializeParams, ServerCapabilities,
  TextDocumentSyncCapability, TextDocumentSyncKind,
};
use serde_json::{from_value, to_value};
use sift_util::{Metrics, Timer};

use crate::dispatch::{
  EditTask, Phase, Typecheck, TypecheckEpochManager, WorkerPool, WorkspaceEditParams,
};
use crate::index::{FileEdit, FileUpdates, Indexer};

/// Any failure that tears down the server loop.
#[derive(Debug)]
pub struct ServerError(Box<dyn Any + Send + 'static>);

impl From<serde_json::Error> for ServerError {
  fn from(e: serde_json::error::Error) -> Self { ServerError(Box::new(e)) }
}

impl From<ProtocolError> for ServerError {
  fn from(e: ProtocolError) -> Self { ServerError(Box::new(e)) }
}

impl From<RecvError> for ServerError {
  fn from(e: RecvError) -> Self { ServerError(Box::new(e)) }
}

impl<T: Send + 'static> From<SendError<T>> for ServerError {
  fn from(e: SendError<T>) -> Self { ServerError(Box::new(e)) }
}

impl<T> From<PoisonError<T>> for ServerError {
  fn from(_: PoisonError<T>) -> Self { ServerError(Box::new("poison error")) }
}

impl From<Box<(dyn Any + Send + 'static)>> for ServerError {
  fn from(e: Box<(dyn Any + Send + 'static)>) -> Self { ServerError(e) }
}

/// The edit queue between the preprocessor and the typechecker thread.
#[derive(Debug, Default)]
pub struct TaskQueue {
  state: Mutex<QueueState>,
  cv: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
  tasks: VecDeque<EditTask>,
  closed: bool,
}

impl TaskQueue {
  /// An open, empty queue.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Preprocessor side: wrap `params` in a task and enqueue it, folding it
  /// into the newest pending task when one is waiting (neither has been
  /// indexed yet, so merging is legal).
  pub fn enqueue_edit(&self, metrics: &Arc<Metrics>, params: WorkspaceEditParams) {
    let mut task = EditTask::new(metrics.clone(), params);
    task.preprocess();
    let mut state = self.state.lock().unwrap();
    if let Some(last) = state.tasks.back_mut() {
      last.merge_newer(&mut task);
      return;
    }
    state.tasks.push_back(task);
    self.cv.notify_one();
  }

  /// Put a task at the front of the queue (used for canceled slow-path
  /// retries).
  pub fn push_front(&self, task: EditTask) {
    self.state.lock().unwrap().tasks.push_front(task);
    self.cv.notify_one();
  }

  /// Typechecker side: block for the next task; `None` once the queue is
  /// closed and drained.
  pub fn pop(&self) -> Option<EditTask> {
    let mut state = self.state.lock().unwrap();
    loop {
      if let Some(task) = state.tasks.pop_front() {
        return Some(task);
      }
      if state.closed {
        return None;
      }
      state = self.cv.wait(state).unwrap();
    }
  }

  /// Close the queue; pending tasks still drain.
  pub fn close(&self) {
    self.state.lock().unwrap().closed = true;
    self.cv.notify_all();
  }

  /// Number of tasks waiting.
  #[must_use] pub fn len(&self) -> usize { self.state.lock().unwrap().tasks.len() }

  /// True if no task is waiting.
  #[must_use] pub fn is_empty(&self) -> bool { self.len() == 0 }
}

struct SlowRun {
  epoch: u32,
  thread: JoinHandle<(EditTask, bool)>,
}

/// The typechecker thread: owns the [`Indexer`], pops tasks FIFO, and
/// coordinates slow-path cancellation.
pub struct Dispatcher<T> {
  queue: Arc<TaskQueue>,
  indexer: Indexer,
  typechecker: Arc<T>,
  workers: WorkerPool,
  slow: Option<SlowRun>,
}

impl<T> std::fmt::Debug for Dispatcher<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Dispatcher({:?})", self.indexer)
  }
}

impl<T: Typecheck + Send + Sync + 'static> Dispatcher<T> {
  /// A dispatcher over an empty index.
  pub fn new(queue: Arc<TaskQueue>, typechecker: Arc<T>, workers: WorkerPool) -> Self {
    Dispatcher { queue, indexer: Indexer::new(), typechecker, workers, slow: None }
  }

  /// Process tasks until the queue closes. Runs on the typechecker thread.
  pub fn run(&mut self) {
    while let Some(mut task) = self.queue.pop() {
      if task.final_phase() == Phase::Preprocess {
        // no-op edit, e.g. a file outside the workspace
        continue;
      }
      self.wait_or_preempt(&task);
      task.index(&mut self.indexer);
      if task.can_take_fast_path(&self.indexer) {
        task.run(self.typechecker.as_ref());
      } else {
        self.slow = Some(self.spawn_slow(task));
      }
    }
    self.reap_slow();
  }

  /// A slow path may be in flight. A fast-path task cancels it; everything
  /// else waits for it. Either way the outcome is settled before `next`
  /// touches the indexer.
  fn wait_or_preempt(&mut self, next: &EditTask) {
    if self.slow.is_none() { return }
    if next.can_preempt(&self.indexer) {
      self.typechecker.epoch_manager().try_cancel_slow_path();
    }
    self.reap_slow();
  }

  fn reap_slow(&mut self) {
    let Some(run) = self.slow.take() else { return };
    let (task, committed) = run.thread.join().expect("slow path thread panicked");
    if committed {
      self.indexer.commit_succeeded(run.epoch);
    } else {
      self.indexer.slow_path_canceled();
      log::info!("requeueing edit batch from canceled epoch {}", run.epoch);
      self.queue.push_front(task.into_retry());
    }
  }

  fn spawn_slow(&mut self, mut task: EditTask) -> SlowRun {
    let epoch = task.epoch();
    let started = task.started_handle();
    let typechecker = self.typechecker.clone();
    let workers = self.workers;
    let thread = std::thread::spawn(move || {
      let committed = task.run_special(typechecker.as_ref(), &workers);
      (task, committed)
    });
    // once the worker has bound the epoch the scheduler may move on
    started.wait();
    SlowRun { epoch, thread }
  }
}

/// Delegate used when the server runs without an inference engine in tree;
/// it honors the cancellation protocol and publishes nothing.
#[derive(Debug, Default)]
pub struct NullTypechecker {
  epochs: Arc<TypecheckEpochManager>,
}

impl NullTypechecker {
  /// A delegate with a fresh epoch manager.
  #[must_use] pub fn new() -> Self { Self::default() }
}

impl Typecheck for NullTypechecker {
  fn typecheck_on_fast_path(&self, updates: FileUpdates, _: &mut Vec<Timer>) {
    log::debug!("fast path: {} edits at epoch {}", updates.edit_count, updates.epoch);
  }

  fn typecheck(&self, updates: FileUpdates, workers: &WorkerPool, _: &mut Vec<Timer>) -> bool {
    let canceled = AtomicBool::new(false);
    workers.run(|_| {
      if self.epochs.was_canceled(updates.epoch) {
        canceled.store(true, Ordering::Relaxed);
      }
    });
    !canceled.load(Ordering::Relaxed)
  }

  fn epoch_manager(&self) -> &Arc<TypecheckEpochManager> { &self.epochs }
}

fn message_loop(
  conn: &Connection, queue: &Arc<TaskQueue>, metrics: &Arc<Metrics>,
) -> Result<(), ServerError> {
  loop {
    match conn.receiver.recv()? {
      Message::Request(req) => {
        if conn.handle_shutdown(&req)? {
          return Ok(());
        }
        conn.sender.send(Message::Response(Response::new_err(
          req.id, ErrorCode::MethodNotFound as i32, format!("unhandled method {}", req.method),
        )))?;
      }
      Message::Response(_) => {}
      Message::Notification(notif) => match notif.method.as_str() {
        "textDocument/didOpen" => {
          let params: DidOpenTextDocumentParams = from_value(notif.params)?;
          let doc = params.text_document;
          queue.enqueue_edit(metrics, WorkspaceEditParams::new(vec![
            FileEdit::new(doc.uri.path(), doc.text),
          ]));
        }
        "textDocument/didChange" => {
          let params: DidChangeTextDocumentParams = from_value(notif.params)?;
          // full-text sync: the last change carries the whole document
          if let Some(change) = params.content_changes.into_iter().last() {
            queue.enqueue_edit(metrics, WorkspaceEditParams::new(vec![
              FileEdit::new(params.text_document.uri.path(), change.text),
            ]));
          }
        }
        "textDocument/didClose" => {}
        _ => {}
      },
    }
  }
}

fn run_server(metrics: Arc<Metrics>) -> Result<(), ServerError> {
  let (conn, _iot) = Connection::stdio();
  let _params: InitializeParams = from_value(conn.initialize(
    to_value(ServerCapabilities {
      text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
      ..Default::default()
    })?)?)?;

  let queue = Arc::new(TaskQueue::new());
  let typechecker = Arc::new(NullTypechecker::new());
  let workers =
    WorkerPool::new(std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get));
  let mut dispatcher = Dispatcher::new(queue.clone(), typechecker, workers);

  crossbeam::scope(|s| {
    s.spawn(|_| dispatcher.run());
    let result = message_loop(&conn, &queue, &metrics);
    queue.close();
    result
  })?
}

/// Entry point for the `server` subcommand.
pub fn main(args: &clap::ArgMatches<'_>) {
  if args.is_present("debug") {
    use simplelog::{Config, LevelFilter, WriteLogger};
    let _ = WriteLogger::init(
      LevelFilter::Debug, Config::default(),
      std::fs::File::create("sift-lsp.log").expect("cannot create log file"));
  }
  let metrics = Arc::new(Metrics::new());
  run_server(metrics).unwrap_or_else(|e| {
    eprintln!("server failed: {:?}", e);
  })
}
