//! The sift checker middle end.
//!
//! This crate takes a desugared method body from the front end and produces
//! a normalized control-flow graph ready for flow-sensitive type inference:
//! the [`types::cfg`] data model, the finalize pass pipeline in [`cfg_opt`],
//! and the debug-only AST [`verifier`].

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
// all the clippy
#![warn(clippy::all, clippy::pedantic)]
// clippy lints we don't want
#![allow(
  clippy::cognitive_complexity,
  clippy::default_trait_access,
  clippy::enum_glob_use,
  clippy::missing_errors_doc,
  clippy::missing_panics_doc,
  clippy::module_name_repetitions,
  clippy::semicolon_if_nothing_returned,
  clippy::too_many_lines,
  clippy::use_self
)]

macro_rules! mk_id {
  (@ImplDebug $id:ident) => {
    impl std::fmt::Debug for $id {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", stringify!($id), self.0)
      }
    }
  };
  (@ImplDebug $id:ident !Debug) => {};
  (@ImplDebug $id:ident Debug($l:expr)) => {
    impl std::fmt::Debug for $id {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", $l, self.0)
      }
    }
  };
  ($($(#[$attr:meta])* $id:ident $(($($lit:tt)*))?),* $(,)?) => {$(
    $(#[$attr])*
    #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct $id(pub u32);
    mk_id!(@ImplDebug $id $($($lit)*)?);
    impl From<$id> for usize {
      fn from(id: $id) -> usize { id.0 as usize }
    }
    impl $crate::types::Idx for $id {
      fn into_usize(self) -> usize { self.into() }
      fn from_usize(n: usize) -> Self { $id(std::convert::TryFrom::try_from(n).expect("overflow")) }
    }
  )*}
}

#[macro_use] extern crate bitflags;

pub mod types;
pub mod sym;
pub mod verifier;
pub mod cfg_opt;

pub use sym::{Context, LocalId, NameId, Names, VarTable};
