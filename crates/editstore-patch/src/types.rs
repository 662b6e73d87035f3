//! Core patch types: the closed set of verbs and the patch error taxonomy.

use serde_json::Value;
use thiserror::Error;

pub use editstore_path::{Path, PathError, PathStep};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    #[error("unsupported operation: {0:?}")]
    UnsupportedOperation(String),
    #[error("type mismatch at `{path}`: expected {expected}")]
    TypeMismatch { path: Path, expected: &'static str },
    #[error("insert anchor not found at `{0}`")]
    AnchorNotFound(Path),
    #[error("text at `{0}` has diverged beyond patch tolerance")]
    TextDiverged(Path),
    #[error("malformed diff patch: {0}")]
    MalformedTextPatch(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Where `insert` places its items relative to the anchor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
    Replace,
}

impl InsertPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertPosition::Before => "before",
            InsertPosition::After => "after",
            InsertPosition::Replace => "replace",
        }
    }
}

/// A single patch operation.
///
/// Operations within one [`Patch`] apply left-to-right against the result of
/// the previous operation, never against a stale snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Replace the value at `path`, creating intermediate containers.
    Set { path: Path, value: Value },
    /// Like `Set`, but only when `path` currently resolves to nothing.
    SetIfMissing { path: Path, value: Value },
    /// Remove the value or array element at `path`. Missing target is a no-op.
    Unset { path: Path },
    /// Insert `items` into an array relative to the anchor addressed by the
    /// final step of `anchor` (keyed or indexed).
    Insert {
        anchor: Path,
        position: InsertPosition,
        items: Vec<Value>,
    },
    /// Numeric adjustment; fails unless the target is a number.
    Inc { path: Path, delta: f64 },
    Dec { path: Path, delta: f64 },
    /// Apply a text diff patch to a string value at `path`.
    DiffMatchPatch { path: Path, patch: String },
}

impl PatchOp {
    pub fn verb(&self) -> &'static str {
        match self {
            PatchOp::Set { .. } => "set",
            PatchOp::SetIfMissing { .. } => "setIfMissing",
            PatchOp::Unset { .. } => "unset",
            PatchOp::Insert { .. } => "insert",
            PatchOp::Inc { .. } => "inc",
            PatchOp::Dec { .. } => "dec",
            PatchOp::DiffMatchPatch { .. } => "diffMatchPatch",
        }
    }

    /// The path the operation targets (the anchor path for inserts).
    pub fn path(&self) -> &Path {
        match self {
            PatchOp::Set { path, .. } => path,
            PatchOp::SetIfMissing { path, .. } => path,
            PatchOp::Unset { path } => path,
            PatchOp::Insert { anchor, .. } => anchor,
            PatchOp::Inc { path, .. } => path,
            PatchOp::Dec { path, .. } => path,
            PatchOp::DiffMatchPatch { path, .. } => path,
        }
    }
}

/// An ordered list of operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new(ops: Vec<PatchOp>) -> Self {
        Patch { ops }
    }

    pub fn single(op: PatchOp) -> Self {
        Patch { ops: vec![op] }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<PatchOp> for Patch {
    fn from(op: PatchOp) -> Self {
        Patch::single(op)
    }
}

/// A non-fatal report about an operation that could not be applied.
///
/// Produced by lenient application (see the reconciliation layer): the
/// offending operation is dropped, the rest of the patch still applies, and
/// the condition is keyed by the affected path.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDiagnostic {
    pub path: Path,
    pub verb: &'static str,
    pub error: PatchError,
}
