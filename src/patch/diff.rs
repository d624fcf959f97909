//! Unified line diffs for operator review

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// Lines of context around each hunk
const CONTEXT_RADIUS: usize = 3;

/// Advisory diff between a file before and after a patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineDiff {
    /// Unified diff text, empty when nothing changed
    pub unified: String,
    pub added: usize,
    pub removed: usize,
}

impl LineDiff {
    /// Diff two file contents, labelling the headers with `label`
    pub fn between(label: &str, old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);

        let mut added = 0;
        let mut removed = 0;
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => added += 1,
                ChangeTag::Delete => removed += 1,
                ChangeTag::Equal => {}
            }
        }

        let unified = if added == 0 && removed == 0 {
            String::new()
        } else {
            diff.unified_diff()
                .context_radius(CONTEXT_RADIUS)
                .header(&format!("a/{}", label), &format!("b/{}", label))
                .to_string()
        };

        Self {
            unified,
            added,
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    /// One-line summary like `+2 -1`
    pub fn summary(&self) -> String {
        format!("+{} -{}", self.added, self.removed)
    }
}
