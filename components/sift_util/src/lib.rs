//! Utilities shared between the sift server and the checker middle end:
//! a process-local metrics registry and the latency [`Timer`] handle.

// rust lints we want
#![warn(
  bare_trait_objects,
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  missing_debug_implementations,
  future_incompatible,
  rust_2018_idioms,
  trivial_numeric_casts,
  variant_size_differences,
  unreachable_pub,
  unused,
  missing_docs
)]
#![allow(clippy::module_name_repetitions)]

mod metrics;
mod timer;

pub use metrics::{Metrics, TimingSample};
pub use timer::Timer;
