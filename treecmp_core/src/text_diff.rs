use crate::dispatch::{FileKind, FormatComparator};
use std::fs;
use std::path::Path;
use tracing::debug;
use treecmp_common::{ResultBuilder, TreeCmpError};

/// Line-by-line comparison of UTF-8 text.
///
/// Lines are paired by index; there is no alignment of inserted or deleted
/// lines. Also the fallback for every unrecognised extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDiffEngine;

impl TextDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compare two texts already in memory
    pub fn compare_text(&self, source: &str, target: &str, result: &mut ResultBuilder) {
        let source_lines = split_lines(source);
        let target_lines = split_lines(target);

        if source_lines.len() != target_lines.len() {
            result.difference(format!(
                "Line count mismatch: source={}, target={}",
                source_lines.len(),
                target_lines.len()
            ));
        }

        for (idx, (source_line, target_line)) in
            source_lines.iter().zip(target_lines.iter()).enumerate()
        {
            if source_line != target_line {
                result.difference(format!(
                    "Line {} differs:\n  Source: {}\n  Target: {}",
                    idx + 1,
                    source_line,
                    target_line
                ));
            }
        }
    }
}

impl FormatComparator for TextDiffEngine {
    fn kind(&self) -> FileKind {
        FileKind::Text
    }

    fn label(&self) -> &'static str {
        "text files"
    }

    fn compare_into(
        &self,
        source: &Path,
        target: &Path,
        result: &mut ResultBuilder,
    ) -> Result<(), TreeCmpError> {
        let source_content = read_utf8(source, "source")?;
        let target_content = read_utf8(target, "target")?;

        self.compare_text(&source_content, &target_content, result);
        debug!("{}: {} text differences", result.path(), result.difference_count());
        Ok(())
    }
}

fn read_utf8(path: &Path, side: &str) -> Result<String, TreeCmpError> {
    fs::read_to_string(path).map_err(|e| {
        TreeCmpError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {} file {}: {}", side, path.display(), e),
        ))
    })
}

/// Split on `\n`, `\r\n` or a lone `\r`. A trailing terminator does not
/// produce an extra empty line.
fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += 1;
                if bytes.get(i) == Some(&b'\n') {
                    i += 1;
                }
                start = i;
            }
            _ => i += 1,
        }
    }

    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}
