use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use treecmp_common::{ComparisonResult, RunSummary, TreeCmpError};

pub const SUMMARY_FILE_NAME: &str = "comparison_summary.txt";

/// Render the plain-text summary report
pub fn render_summary(results: &[ComparisonResult]) -> String {
    let summary = RunSummary::from_results(results);
    let mut out = String::new();

    out.push_str("File Comparison Summary\n");
    out.push_str("======================\n\n");
    let _ = writeln!(out, "Total files compared: {}", summary.total);
    let _ = writeln!(out, "Identical files: {}", summary.identical);
    let _ = writeln!(out, "Files with differences: {}", summary.different);
    let _ = writeln!(out, "Files with errors: {}\n", summary.errored);

    out.push_str("Detailed Results:\n");
    out.push_str("-----------------\n");

    for result in results {
        let _ = writeln!(out, "\nFile: {}", result.path);
        let _ = writeln!(out, "Type: {}", result.detected_type);
        let status = if result.identical { "IDENTICAL" } else { "DIFFERENT" };
        let _ = writeln!(out, "Status: {}", status);

        if !result.identical {
            let _ = writeln!(out, "Differences: {}", result.difference_count());
            if let Some(error) = &result.error_message {
                let _ = writeln!(out, "Error: {}", error);
            }
            for difference in &result.differences {
                // Multi-line differences keep their continuation lines indented
                for line in difference.lines() {
                    let _ = writeln!(out, "  {}", line);
                }
            }
        }
    }

    out
}

/// Writes reports into a directory created up front by [`ReportWriter::prepare`]
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn prepare(dir: &Path) -> Result<Self, TreeCmpError> {
        fs::create_dir_all(dir).map_err(|e| {
            TreeCmpError::Path(format!(
                "Cannot create report directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the summary report, returning its path
    pub fn write(&self, results: &[ComparisonResult]) -> Result<PathBuf, TreeCmpError> {
        let path = self.dir.join(SUMMARY_FILE_NAME);
        fs::write(&path, render_summary(results))?;
        info!("Wrote report to {}", path.display());
        Ok(path)
    }
}
