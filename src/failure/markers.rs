//! Marker-based failure signal extraction

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// A blank line: newline, optional whitespace, newline
static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("valid blank-line regex"));

const PYTHON_TRACEBACK: &str = "Traceback (most recent call last):";

/// Test-runner output dialects with built-in marker sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Plain Python scripts, unittest, pytest
    #[default]
    Python,
    /// behave BDD runs, including ambiguous step conflicts
    Behave,
    /// cargo test
    Rust,
    /// Only user-supplied markers
    Generic,
}

impl Dialect {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "python" => Some(Self::Python),
            "behave" => Some(Self::Behave),
            "rust" => Some(Self::Rust),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Built-in markers, most specific first
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &[PYTHON_TRACEBACK],
            Self::Behave => &["AmbiguousStep", PYTHON_TRACEBACK, "Assertion Failed:"],
            Self::Rust => &["panicked at", "error["],
            Self::Generic => &[],
        }
    }
}

/// The minimal excerpt of test output that explains a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSignal {
    pub text: String,
    /// Marker that matched, `None` when the whole output was used
    pub marker: Option<String>,
}

impl FailureSignal {
    /// Whether a known marker was found
    pub fn matched(&self) -> bool {
        self.marker.is_some()
    }
}

/// Ordered list of error markers to search for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    markers: Vec<String>,
}

impl MarkerSet {
    /// Dialect markers followed by any extra ones
    pub fn for_dialect(dialect: Dialect, extra: &[String]) -> Self {
        let mut markers: Vec<String> = dialect.markers().iter().map(|m| m.to_string()).collect();
        for marker in extra {
            if !marker.is_empty() && !markers.contains(marker) {
                markers.push(marker.clone());
            }
        }
        Self { markers }
    }

    /// Earliest marker occurrence in `output`
    fn first_match<'a>(&'a self, output: &str) -> Option<(usize, &'a str)> {
        self.markers
            .iter()
            .filter_map(|m| output.find(m.as_str()).map(|pos| (pos, m.as_str())))
            .min_by_key(|(pos, _)| *pos)
    }

    /// Cut the failure signal out of raw output.
    ///
    /// Starts at the earliest marker and runs to the first blank line after
    /// it. Without a marker the whole output is the signal.
    pub fn extract(&self, output: &str) -> FailureSignal {
        let Some((start, marker)) = self.first_match(output) else {
            return FailureSignal {
                text: output.trim_end().to_string(),
                marker: None,
            };
        };

        let rest = &output[start..];
        let end = BLANK_LINE.find(rest).map(|m| m.start()).unwrap_or(rest.len());

        FailureSignal {
            text: rest[..end].trim_end().to_string(),
            marker: Some(marker.to_string()),
        }
    }
}
