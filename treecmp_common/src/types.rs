use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Wording recorded for a path that exists only in the source tree
pub const MISSING_IN_TARGET: &str = "File missing in target directory";
/// Wording recorded for a path that exists only in the target tree
pub const MISSING_IN_SOURCE: &str = "File missing in source directory";

/// Outcome of reconciling one relative path across the two trees
///
/// `identical` and `error_message` are written independently: an error sets
/// both, so consumers never have to infer one from the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Relative path, forward-slash separated
    pub path: String,
    /// Upper-cased extension tag used for dispatch (`UNKNOWN` if none)
    pub detected_type: String,
    /// True only when no difference and no error was recorded
    pub identical: bool,
    /// Human-readable differences in discovery order
    pub differences: Vec<String>,
    /// Set when the comparison could not complete
    pub error_message: Option<String>,
}

impl ComparisonResult {
    pub fn missing_in_target(path: impl Into<String>, detected_type: impl Into<String>) -> Self {
        let mut builder = ResultBuilder::new(path, detected_type);
        builder.difference(MISSING_IN_TARGET);
        builder.finish()
    }

    pub fn missing_in_source(path: impl Into<String>, detected_type: impl Into<String>) -> Self {
        let mut builder = ResultBuilder::new(path, detected_type);
        builder.difference(MISSING_IN_SOURCE);
        builder.finish()
    }

    pub fn difference_count(&self) -> usize {
        self.differences.len()
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Accumulates differences for a single file before freezing them into a
/// [`ComparisonResult`]
#[derive(Debug, Clone)]
pub struct ResultBuilder {
    path: String,
    detected_type: String,
    identical: bool,
    differences: Vec<String>,
}

impl ResultBuilder {
    pub fn new(path: impl Into<String>, detected_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detected_type: detected_type.into(),
            identical: true,
            differences: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn detected_type(&self) -> &str {
        &self.detected_type
    }

    /// Record a difference; any recorded difference makes the file non-identical
    pub fn difference(&mut self, difference: impl Into<String>) {
        self.differences.push(difference.into());
        self.identical = false;
    }

    pub fn difference_count(&self) -> usize {
        self.differences.len()
    }

    pub fn is_identical(&self) -> bool {
        self.identical
    }

    pub fn finish(self) -> ComparisonResult {
        ComparisonResult {
            path: self.path,
            detected_type: self.detected_type,
            identical: self.identical,
            differences: self.differences,
            error_message: None,
        }
    }

    /// Finish with an error. Differences recorded so far are kept.
    pub fn fail(self, message: impl Into<String>) -> ComparisonResult {
        ComparisonResult {
            path: self.path,
            detected_type: self.detected_type,
            identical: false,
            differences: self.differences,
            error_message: Some(message.into()),
        }
    }
}

/// Corpus-level counts, always derived from a result collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub identical: usize,
    pub different: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ComparisonResult]) -> Self {
        let identical = results.iter().filter(|r| r.identical).count();
        Self {
            total: results.len(),
            identical,
            different: results.len() - identical,
            errored: results.iter().filter(|r| r.has_error()).count(),
        }
    }

    pub fn all_identical(&self) -> bool {
        self.different == 0
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// Ignore patterns applied to both trees (e.g., "*.log", "tmp/")
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Worker threads for per-file comparisons (None = one per core)
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Directory receiving `comparison_summary.txt`
    #[serde(default)]
    pub report_dir: Option<PathBuf>,

    /// Directory archives are extracted into
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}
