//! Scoped latency timers. A [`Timer`] measures from its creation to its
//! drop and records a [`TimingSample`](crate::TimingSample) in the registry,
//! unless [`cancel`](Timer::cancel) ran first.

use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{Metrics, TimingSample};

/// An emit-or-cancel latency handle.
///
/// Dropping the timer emits a sample; canceling it makes the drop silent.
/// [`clone_as`](Timer::clone_as) derives a timer under a new name that keeps
/// the original start instant, so derived measurements (e.g. per-diagnostic
/// latency) are anchored to the moment the original work arrived.
#[derive(Debug)]
pub struct Timer {
  metrics: Arc<Metrics>,
  name: &'static str,
  tags: Vec<(&'static str, &'static str)>,
  start: Instant,
  canceled: bool,
}

impl Timer {
  /// Start a timer named `name`.
  #[must_use] pub fn new(metrics: Arc<Metrics>, name: &'static str) -> Self {
    Timer { metrics, name, tags: Vec::new(), start: Instant::now(), canceled: false }
  }

  /// Derive a timer with a different name and the *same* start instant.
  /// Tags are not inherited.
  #[must_use] pub fn clone_as(&self, name: &'static str) -> Self {
    Timer {
      metrics: self.metrics.clone(),
      name,
      tags: Vec::new(),
      start: self.start,
      canceled: false,
    }
  }

  /// Attach (or overwrite) a tag reported with the sample.
  pub fn set_tag(&mut self, key: &'static str, value: &'static str) {
    if let Some(slot) = self.tags.iter_mut().find(|(k, _)| *k == key) {
      slot.1 = value;
    } else {
      self.tags.push((key, value));
    }
  }

  /// Suppress the sample this timer would emit on drop.
  pub fn cancel(&mut self) { self.canceled = true }
}

impl Drop for Timer {
  fn drop(&mut self) {
    if !self.canceled {
      self.metrics.record_timing(TimingSample {
        name: self.name,
        tags: std::mem::take(&mut self.tags),
        duration: self.start.elapsed(),
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn drop_emits_unless_canceled() {
    let m = Arc::new(Metrics::new());
    {
      let mut t = Timer::new(m.clone(), "latency");
      t.set_tag("path", "fast");
    }
    {
      let mut t = Timer::new(m.clone(), "latency");
      t.cancel();
    }
    let samples = m.timings_named("latency");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].tags, vec![("path", "fast")]);
  }

  #[test]
  fn clone_as_keeps_the_start_instant() {
    let m = Arc::new(Metrics::new());
    let t = Timer::new(m.clone(), "outer");
    std::thread::sleep(std::time::Duration::from_millis(5));
    drop(t.clone_as("derived"));
    drop(t);
    let derived = m.timings_named("derived");
    assert!(derived[0].duration >= std::time::Duration::from_millis(5));
  }
}
