//! Structured paths addressing locations inside a document value.
//!
//! A path is an ordered sequence of steps: field names, array indices, or
//! keyed-array selectors (`[_key=="abc"]`). Keyed selectors match an array
//! element by its stable `_key` field rather than by position, which keeps
//! patches valid across concurrent array reordering. Index steps are
//! positional and therefore best-effort; negative indices count from the end
//! of the array.

use std::fmt;

mod parse;
mod resolve;

pub use parse::parse;
pub use resolve::{index_for_key, normalize_index, resolve};

use thiserror::Error;

/// The object field holding an array element's stable key.
pub const KEY_FIELD: &str = "_key";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("malformed path {input:?} at offset {offset}: {reason}")]
    Malformed {
        input: String,
        offset: usize,
        reason: &'static str,
    },
}

/// A single step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// Object field access, e.g. `title`.
    Field(String),
    /// Array element by position, e.g. `[3]`. Negative counts from the end.
    Index(i64),
    /// Array element by stable key, e.g. `[_key=="abc"]`.
    Key(String),
}

/// An ordered sequence of steps addressing a location inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(Vec<PathStep>);

impl Path {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Path(steps)
    }

    /// Parse the canonical string form, e.g. `a.b[3].c[_key=="k1"]`.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        parse(input)
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, step: PathStep) {
        self.0.push(step);
    }

    /// The path without its final step, plus that step. `None` when empty.
    pub fn split_last(&self) -> Option<(Path, &PathStep)> {
        let (last, parent) = self.0.split_last()?;
        Some((Path(parent.to_vec()), last))
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl From<Vec<PathStep>> for Path {
    fn from(steps: Vec<PathStep>) -> Self {
        Path(steps)
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Field(name) => write!(f, "{name}"),
            PathStep::Index(i) => write!(f, "[{i}]"),
            PathStep::Key(key) => write!(f, "[{KEY_FIELD}==\"{key}\"]"),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                if let PathStep::Field(_) = step {
                    f.write_str(".")?;
                }
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}
