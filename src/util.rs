//! Shared plumbing for the server side.

use std::error::Error;
use std::sync::{Condvar, Mutex};

/// A catch-all boxed error for fallible seams that cross threads.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A one-shot latch. One side calls [`notify`](Notification::notify) exactly
/// once; any number of waiters block in [`wait`](Notification::wait) until
/// it has fired. Notifying establishes a happens-before edge with every
/// return from `wait`.
#[derive(Debug, Default)]
pub struct Notification {
  fired: Mutex<bool>,
  cv: Condvar,
}

impl Notification {
  /// A latch that has not fired.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Fire the latch, releasing all current and future waiters.
  pub fn notify(&self) {
    let mut fired = self.fired.lock().unwrap();
    *fired = true;
    self.cv.notify_all();
  }

  /// Block until the latch has fired. Returns immediately if it already has.
  pub fn wait(&self) {
    let mut fired = self.fired.lock().unwrap();
    while !*fired {
      fired = self.cv.wait(fired).unwrap();
    }
  }

  /// True once [`notify`](Notification::notify) has run.
  #[must_use] pub fn has_fired(&self) -> bool { *self.fired.lock().unwrap() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn wait_returns_after_notify() {
    let latch = Arc::new(Notification::new());
    let waiter = {
      let latch = latch.clone();
      std::thread::spawn(move || latch.wait())
    };
    latch.notify();
    waiter.join().unwrap();
    assert!(latch.has_fired());
    latch.wait();
  }
}
