//! The sift type checker for the Silt language.
//!
//! The heavy lifting (CFG construction, normalization, the AST verifier)
//! lives in the `siftc` component crate; this crate hosts the LSP side:
//! the workspace-edit [`dispatch`] state machine, the file [`index`]er that
//! classifies edits as fast- or slow-path, and the [`server`] transport and
//! scheduling loops.

#![warn(bare_trait_objects)]
#![warn(elided_lifetimes_in_paths)]
#![warn(missing_copy_implementations, missing_debug_implementations)]
#![warn(future_incompatible, rust_2018_idioms)]
#![warn(trivial_numeric_casts)]
#![warn(variant_size_differences)]
#![warn(unreachable_pub)]
#![warn(unused)]
#![warn(missing_docs)]

pub mod util;
pub mod index;
pub mod dispatch;
pub mod server;
