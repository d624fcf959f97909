//! Failure extraction
//!
//! Turns raw test output into a [`FailureSignal`] and finds the files that
//! should accompany the target as repair context. The matching heuristic sits
//! behind [`FailureExtractor`] so a different test-runner dialect can be
//! swapped in without touching the repair loop.

mod imports;
mod markers;

pub use imports::ImportScanner;
pub use markers::{Dialect, FailureSignal, MarkerSet};

use std::path::{Path, PathBuf};

/// Isolates failure signals and related files
pub trait FailureExtractor: Send + Sync {
    /// Minimal excerpt explaining the failure; never empty-handed
    fn signal(&self, output: &str) -> FailureSignal;

    /// Files the target imports; empty when the target cannot be scanned
    fn related_files(&self, target: &Path) -> Vec<PathBuf>;
}

/// Marker search plus static import scan
#[derive(Debug, Clone)]
pub struct StandardExtractor {
    markers: MarkerSet,
    imports: ImportScanner,
}

impl StandardExtractor {
    pub fn new(markers: MarkerSet, imports: ImportScanner) -> Self {
        Self { markers, imports }
    }

    /// Extractor for a dialect with no extra markers or search paths
    #[cfg(test)]
    pub(crate) fn for_dialect(dialect: Dialect) -> Self {
        Self::new(MarkerSet::for_dialect(dialect, &[]), ImportScanner::default())
    }
}

impl FailureExtractor for StandardExtractor {
    fn signal(&self, output: &str) -> FailureSignal {
        let signal = self.markers.extract(output);
        if !signal.matched() {
            tracing::debug!("no failure marker matched, using whole output");
        }
        signal
    }

    fn related_files(&self, target: &Path) -> Vec<PathBuf> {
        self.imports.related_files(target)
    }
}
