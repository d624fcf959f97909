//! Patch application with all-or-nothing writes

use super::diff::LineDiff;
use super::{EditOperation, Patch, PatchError};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors during patch application
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("failed to read file {path}: {source}")]
    ReadError { path: PathBuf, source: io::Error },

    #[error("failed to write file {path}: {source}")]
    WriteError { path: PathBuf, source: io::Error },
}

/// A patch that made it to disk
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    pub patch: Patch,
    pub diff: LineDiff,
}

/// What happened when a patch was offered to the applier
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// File rewritten with the patched content
    Applied(AppliedPatch),
    /// Patch had no edits, or its edits produced identical content
    NoChange,
    /// Operator rejected the diff; file untouched
    Declined(LineDiff),
}

/// Asks an operator whether a diff should be written
pub trait Confirmer: Send + Sync {
    fn confirm(&self, path: &Path, diff: &LineDiff, explanations: &[String]) -> bool;
}

/// Prints the diff to stderr and reads `y`/`n` from stdin
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, path: &Path, diff: &LineDiff, explanations: &[String]) -> bool {
        let mut stderr = io::stderr().lock();
        if !explanations.is_empty() {
            let _ = writeln!(stderr, "Explanations:");
            for explanation in explanations {
                let _ = writeln!(stderr, "  - {}", explanation);
            }
        }
        let _ = writeln!(stderr, "\nChanges to be made to {}:", path.display());
        let _ = write!(stderr, "{}", diff.unified);
        let _ = write!(stderr, "Do you want to apply these changes? (y/n): ");
        let _ = stderr.flush();
        drop(stderr);

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

/// Split file content into newline-terminated lines.
///
/// The last line keeps whatever ending it had, so joining the result
/// reproduces the input byte for byte.
pub fn split_lines(content: &str) -> Vec<String> {
    content.split_inclusive('\n').map(String::from).collect()
}

/// Apply a patch to a line buffer, returning the new buffer.
///
/// Every edit is checked against the snapshot before anything is mutated, so
/// an out-of-range edit leaves no partial result behind.
pub fn apply_edits(lines: &[String], patch: &Patch) -> Result<Vec<String>, PatchError> {
    patch.validate()?;

    let len = lines.len();
    if let Some(line) = patch.max_line().filter(|&line| line > len) {
        return Err(PatchError::OutOfRangeEdit {
            path: patch.path.clone(),
            line,
            len,
        });
    }

    let mut buffer = lines.to_vec();
    for edit in patch.ordered_edits() {
        let index = edit.line - 1;
        match edit.operation {
            EditOperation::Replace => {
                buffer[index] = format!("{}\n", edit.text());
            }
            EditOperation::Delete => {
                buffer.remove(index);
            }
            EditOperation::InsertAfter => {
                buffer.insert(index + 1, format!("{}\n", edit.text()));
            }
        }
    }

    Ok(buffer)
}

/// Applies patches to their target file
#[derive(Default)]
pub struct PatchApplier {
    confirmer: Option<Box<dyn Confirmer>>,
}

impl PatchApplier {
    /// Applier that writes without asking
    pub fn new() -> Self {
        Self { confirmer: None }
    }

    /// Require operator confirmation before each write
    pub fn with_confirmer(mut self, confirmer: Box<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Apply `patch` to the file at `patch.path`
    pub fn apply(&self, patch: &Patch) -> Result<ApplyOutcome, ApplyError> {
        let path = patch.path();
        let original = fs::read_to_string(path).map_err(|e| ApplyError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let lines = split_lines(&original);
        let patched = apply_edits(&lines, patch)?.concat();

        let diff = LineDiff::between(&path.display().to_string(), &original, &patched);
        if diff.is_empty() {
            tracing::debug!(path = %path.display(), "patch produced no change");
            return Ok(ApplyOutcome::NoChange);
        }

        if let Some(ref confirmer) = self.confirmer {
            if !confirmer.confirm(path, &diff, &patch.explanations) {
                tracing::info!(path = %path.display(), "operator declined patch");
                return Ok(ApplyOutcome::Declined(diff));
            }
        }

        fs::write(path, &patched).map_err(|e| ApplyError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::info!(
            path = %path.display(),
            edits = patch.edits.len(),
            changes = %diff.summary(),
            "patch applied"
        );

        Ok(ApplyOutcome::Applied(AppliedPatch {
            patch: patch.clone(),
            diff,
        }))
    }
}
