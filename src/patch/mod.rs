//! Line-level patch model
//!
//! A [`Patch`] is an ordered set of [`Edit`]s against a single file. Every
//! edit addresses the *original* snapshot of the file (1-indexed), never the
//! output of another edit in the same patch. The applier relies on that to
//! process edits bottom-up without index drift.

mod applier;
mod diff;

pub use applier::{ApplyError, ApplyOutcome, PatchApplier, StdinConfirmer};

#[cfg(test)]
pub use applier::{Confirmer, split_lines};
#[cfg(test)]
pub use diff::LineDiff;

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while validating or applying a patch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The proposed patch is structurally invalid
    #[error("malformed patch: {reason}")]
    MalformedPatch { reason: String },

    /// An edit addresses a line past the end of the file
    #[error("edit targets line {line} but {path} has only {len} lines")]
    OutOfRangeEdit {
        path: PathBuf,
        line: usize,
        len: usize,
    },
}

impl PatchError {
    /// Create a malformed patch error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPatch {
            reason: reason.into(),
        }
    }
}

/// The three supported line operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditOperation {
    Replace,
    Delete,
    InsertAfter,
}

impl EditOperation {
    /// Parse the wire name of an operation (exact match)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Replace" => Some(Self::Replace),
            "Delete" => Some(Self::Delete),
            "InsertAfter" => Some(Self::InsertAfter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "Replace",
            Self::Delete => "Delete",
            Self::InsertAfter => "InsertAfter",
        }
    }

    /// Application rank among edits sharing a line: inserts go first so the
    /// line they anchor on is still in place.
    fn rank(&self) -> u8 {
        match self {
            Self::InsertAfter => 0,
            Self::Replace | Self::Delete => 1,
        }
    }
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validated line edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edit {
    pub operation: EditOperation,
    /// 1-indexed line in the original file
    pub line: usize,
    /// Replacement or inserted text, `None` for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Edit {
    pub fn replace(line: usize, content: impl Into<String>) -> Self {
        Self {
            operation: EditOperation::Replace,
            line,
            content: Some(content.into()),
        }
    }

    pub fn delete(line: usize) -> Self {
        Self {
            operation: EditOperation::Delete,
            line,
            content: None,
        }
    }

    pub fn insert_after(line: usize, content: impl Into<String>) -> Self {
        Self {
            operation: EditOperation::InsertAfter,
            line,
            content: Some(content.into()),
        }
    }

    /// Text written by this edit (empty for deletes)
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Unvalidated edit as it arrives from a repair backend
#[derive(Debug, Clone, Deserialize)]
pub struct RawEdit {
    pub operation: String,
    pub line: i64,
    #[serde(default)]
    pub content: Option<String>,
}

impl RawEdit {
    /// Check the operation name and line number and build an [`Edit`]
    pub fn validate(self) -> Result<Edit, PatchError> {
        let operation = EditOperation::parse(&self.operation).ok_or_else(|| {
            PatchError::malformed(format!("unknown operation '{}'", self.operation))
        })?;

        if self.line < 1 {
            return Err(PatchError::malformed(format!(
                "{} has line {}, lines start at 1",
                operation, self.line
            )));
        }

        let line = self.line as usize;
        if operation == EditOperation::Delete {
            return Ok(Edit::delete(line));
        }

        let content = self.content.ok_or_else(|| {
            PatchError::malformed(format!("{} on line {} has no content", operation, self.line))
        })?;
        Ok(match operation {
            EditOperation::InsertAfter => Edit::insert_after(line, content),
            _ => Edit::replace(line, content),
        })
    }
}

/// An ordered, file-scoped collection of edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
    pub path: PathBuf,
    pub edits: Vec<Edit>,
    /// Free-text rationale from the backend, never interpreted
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub explanations: Vec<String>,
}

impl Patch {
    /// Build a validated patch
    pub fn new(path: impl Into<PathBuf>, edits: Vec<Edit>) -> Result<Self, PatchError> {
        let patch = Self {
            path: path.into(),
            edits,
            explanations: Vec::new(),
        };
        patch.validate()?;
        Ok(patch)
    }

    pub fn with_explanations(mut self, explanations: Vec<String>) -> Self {
        self.explanations = explanations;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check line numbers, content presence and same-line conflicts
    pub fn validate(&self) -> Result<(), PatchError> {
        let mut rewritten: HashMap<usize, EditOperation> = HashMap::new();

        for edit in &self.edits {
            if edit.line == 0 {
                return Err(PatchError::malformed(format!(
                    "{} has line 0, lines start at 1",
                    edit.operation
                )));
            }

            if edit.operation != EditOperation::Delete && edit.content.is_none() {
                return Err(PatchError::malformed(format!(
                    "{} on line {} has no content",
                    edit.operation, edit.line
                )));
            }

            if edit.operation != EditOperation::InsertAfter {
                if let Some(previous) = rewritten.insert(edit.line, edit.operation) {
                    return Err(PatchError::malformed(format!(
                        "conflicting edits on line {}: {} and {}",
                        edit.line, previous, edit.operation
                    )));
                }
            }
        }

        Ok(())
    }

    /// Highest line any edit refers to
    pub fn max_line(&self) -> Option<usize> {
        self.edits.iter().map(|e| e.line).max()
    }

    /// Edits in application order.
    ///
    /// Descending by line. On a shared line, inserts run first in reverse
    /// listing order (so they end up in listing order), then the single
    /// replace or delete.
    pub fn ordered_edits(&self) -> Vec<&Edit> {
        let mut indexed: Vec<(usize, &Edit)> = self.edits.iter().enumerate().collect();
        indexed.sort_by_key(|(idx, edit)| (Reverse(edit.line), edit.operation.rank(), Reverse(*idx)));
        indexed.into_iter().map(|(_, edit)| edit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(operation: &str, line: i64, content: Option<&str>) -> RawEdit {
        RawEdit {
            operation: operation.into(),
            line,
            content: content.map(String::from),
        }
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(EditOperation::parse("Replace"), Some(EditOperation::Replace));
        assert_eq!(EditOperation::parse("Delete"), Some(EditOperation::Delete));
        assert_eq!(
            EditOperation::parse("InsertAfter"),
            Some(EditOperation::InsertAfter)
        );
        assert_eq!(EditOperation::parse("replace"), None);
        assert_eq!(EditOperation::parse("InsertBefore"), None);
    }

    #[test]
    fn test_raw_edit_validate() {
        let edit = raw("Replace", 4, Some("    return a + b")).validate().unwrap();
        assert_eq!(edit, Edit::replace(4, "    return a + b"));

        let edit = raw("Delete", 2, Some("ignored")).validate().unwrap();
        assert_eq!(edit, Edit::delete(2));
    }

    #[test]
    fn test_raw_edit_rejects_bad_input() {
        assert!(matches!(
            raw("Modify", 1, Some("x")).validate(),
            Err(PatchError::MalformedPatch { .. })
        ));
        assert!(matches!(
            raw("Replace", 0, Some("x")).validate(),
            Err(PatchError::MalformedPatch { .. })
        ));
        assert!(matches!(
            raw("InsertAfter", 0, Some("x")).validate(),
            Err(PatchError::MalformedPatch { .. })
        ));
        assert!(matches!(
            raw("Delete", -3, None).validate(),
            Err(PatchError::MalformedPatch { .. })
        ));
        assert!(matches!(
            raw("InsertAfter", 2, None).validate(),
            Err(PatchError::MalformedPatch { .. })
        ));
    }

    #[test]
    fn test_empty_patch_is_valid() {
        let patch = Patch::new("a.py", vec![]).unwrap();
        assert!(patch.is_empty());
        assert_eq!(patch.max_line(), None);
    }

    #[test]
    fn test_conflicting_edits_rejected() {
        let result = Patch::new("a.py", vec![Edit::replace(3, "x"), Edit::delete(3)]);
        assert!(matches!(result, Err(PatchError::MalformedPatch { .. })));

        let result = Patch::new("a.py", vec![Edit::replace(3, "x"), Edit::replace(3, "y")]);
        assert!(matches!(result, Err(PatchError::MalformedPatch { .. })));

        // Inserts may share a line with anything
        let result = Patch::new(
            "a.py",
            vec![
                Edit::delete(3),
                Edit::insert_after(3, "x"),
                Edit::insert_after(3, "y"),
            ],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_ordered_edits_descending() {
        let patch = Patch::new(
            "a.py",
            vec![
                Edit::replace(1, "a"),
                Edit::delete(5),
                Edit::insert_after(3, "c"),
            ],
        )
        .unwrap();

        let lines: Vec<usize> = patch.ordered_edits().iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![5, 3, 1]);
    }

    #[test]
    fn test_ordered_edits_tie_break() {
        let patch = Patch::new(
            "a.py",
            vec![
                Edit::delete(2),
                Edit::insert_after(2, "first"),
                Edit::insert_after(2, "second"),
            ],
        )
        .unwrap();

        let ordered = patch.ordered_edits();
        assert_eq!(ordered[0].text(), "second");
        assert_eq!(ordered[1].text(), "first");
        assert_eq!(ordered[2].operation, EditOperation::Delete);
    }
}
