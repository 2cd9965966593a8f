//! A small in-process metrics registry: monotonic counters, value
//! histograms, and latency samples emitted by [`Timer`](crate::Timer)s.
//!
//! The registry is an instance, not a global; the server creates one
//! [`Metrics`] at startup and shares it via `Arc`. Tests create their own,
//! so nothing leaks between them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

/// One latency measurement, recorded when a [`Timer`](crate::Timer) is
/// dropped without being canceled.
#[derive(Clone, Debug)]
pub struct TimingSample {
  /// The timer name, e.g. `latency.cancel_slow_path`.
  pub name: &'static str,
  /// Key/value tags attached before the timer was dropped.
  pub tags: Vec<(&'static str, &'static str)>,
  /// Elapsed wall time from timer creation (or the creation instant of the
  /// timer this one was cloned from) to drop.
  pub duration: Duration,
}

/// The metrics registry. All methods take `&self`; each family of metrics
/// sits behind its own mutex so the checker and the server never contend on
/// a single lock.
#[derive(Debug, Default)]
pub struct Metrics {
  counters: Mutex<HashMap<String, u64>>,
  histograms: Mutex<HashMap<&'static str, BTreeMap<usize, u64>>>,
  timings: Mutex<Vec<TimingSample>>,
}

impl Metrics {
  /// Create an empty registry.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Add `n` to the counter `name`.
  pub fn counter_add(&self, name: &str, n: u64) {
    *self.counters.lock().unwrap().entry(name.to_owned()).or_insert(0) += n;
  }

  /// Add `n` to the categorized counter `name:category`.
  pub fn category_counter_add(&self, name: &str, category: &str, n: u64) {
    self.counter_add(&format!("{}:{}", name, category), n);
  }

  /// Record one occurrence of `value` in the histogram `name`.
  pub fn histogram_inc(&self, name: &'static str, value: usize) {
    *self.histograms.lock().unwrap().entry(name).or_default().entry(value).or_insert(0) += 1;
  }

  pub(crate) fn record_timing(&self, sample: TimingSample) {
    self.timings.lock().unwrap().push(sample);
  }

  /// Read a counter, or 0 if it was never incremented.
  #[must_use] pub fn counter(&self, name: &str) -> u64 {
    self.counters.lock().unwrap().get(name).copied().unwrap_or(0)
  }

  /// Read a categorized counter, or 0 if it was never incremented.
  #[must_use] pub fn category_counter(&self, name: &str, category: &str) -> u64 {
    self.counter(&format!("{}:{}", name, category))
  }

  /// The recorded `(value, count)` pairs of a histogram, in value order.
  #[must_use] pub fn histogram(&self, name: &str) -> Vec<(usize, u64)> {
    self.histograms.lock().unwrap().get(name)
      .map_or_else(Vec::new, |h| h.iter().map(|(&v, &n)| (v, n)).collect())
  }

  /// All timing samples recorded so far, in emission order.
  #[must_use] pub fn timings(&self) -> Vec<TimingSample> {
    self.timings.lock().unwrap().clone()
  }

  /// Timing samples with the given name.
  #[must_use] pub fn timings_named(&self, name: &str) -> Vec<TimingSample> {
    self.timings.lock().unwrap().iter().filter(|s| s.name == name).cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counters_accumulate() {
    let m = Metrics::new();
    m.counter_add("edits", 2);
    m.counter_add("edits", 3);
    m.category_counter_add("lsp.messages.processed", "sift.mergedEdits", 1);
    assert_eq!(m.counter("edits"), 5);
    assert_eq!(m.category_counter("lsp.messages.processed", "sift.mergedEdits"), 1);
    assert_eq!(m.counter("missing"), 0);
  }

  #[test]
  fn histogram_buckets_by_value() {
    let m = Metrics::new();
    m.histogram_inc("cfgbuilder.blockArguments", 0);
    m.histogram_inc("cfgbuilder.blockArguments", 2);
    m.histogram_inc("cfgbuilder.blockArguments", 2);
    assert_eq!(m.histogram("cfgbuilder.blockArguments"), vec![(0, 1), (2, 2)]);
  }
}
