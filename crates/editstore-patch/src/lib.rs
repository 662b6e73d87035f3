//! Structured document patches and their pure application semantics.
//!
//! A [`Patch`] is an ordered list of operations over a closed set of verbs
//! (`set`, `setIfMissing`, `unset`, `insert`, `inc`, `dec`,
//! `diffMatchPatch`). [`apply`] is a pure function: it never mutates its
//! input and has no hidden state. The `codec` module maps patches to and
//! from their JSON wire bodies; `dmp` holds the text diff patch format used
//! by the `diffMatchPatch` verb.

pub mod apply;
pub mod codec;
pub mod dmp;
pub mod keys;
mod types;

pub use apply::{apply, apply_lenient, apply_op};
pub use keys::{ensure_array_keys_deep, generate_key};
pub use types::{InsertPosition, Patch, PatchDiagnostic, PatchError, PatchOp};

pub use editstore_path::{Path, PathError, PathStep};
