use crate::dispatch::{FileKind, FormatComparator};
use csv::{ReaderBuilder, StringRecord};
use std::fs;
use std::path::Path;
use tracing::debug;
use treecmp_common::{ResultBuilder, TreeCmpError};

/// Engine for comparing CSV files row by row.
///
/// Every record is data (no header row), rows may have differing field
/// counts, a blank line is a row holding one empty field, and a differing
/// row is reported whole.
pub struct CsvDiffEngine {
    delimiter: u8,
}

impl CsvDiffEngine {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn read_rows(&self, path: &Path, side: &str) -> Result<Vec<Vec<String>>, TreeCmpError> {
        let data = fs::read(path).map_err(|e| {
            TreeCmpError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {} CSV file: {}", side, e),
            ))
        })?;

        self.parse_rows(&data).map_err(|e| {
            TreeCmpError::Parse(format!("Failed to read {} CSV records: {}", side, e))
        })
    }

    /// Parse every record; a blank line is a row with one empty field
    pub fn parse_rows(&self, data: &[u8]) -> Result<Vec<Vec<String>>, csv::Error> {
        let mut rows = Vec::new();
        let mut record = StringRecord::new();

        for line in record_lines(data, b'"') {
            if line.is_empty() {
                rows.push(vec![String::new()]);
                continue;
            }

            let mut reader = ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(self.delimiter)
                .from_reader(line);
            if reader.read_record(&mut record)? {
                rows.push(record.iter().map(str::to_string).collect());
            }
        }

        Ok(rows)
    }

    /// Compare already-parsed rows
    pub fn compare_rows(
        &self,
        source_rows: &[Vec<String>],
        target_rows: &[Vec<String>],
        result: &mut ResultBuilder,
    ) {
        if source_rows.len() != target_rows.len() {
            result.difference(format!(
                "Row count mismatch: source={}, target={}",
                source_rows.len(),
                target_rows.len()
            ));
        }

        for (idx, (source, target)) in source_rows.iter().zip(target_rows.iter()).enumerate() {
            if source != target {
                result.difference(format!(
                    "Row {} differs: source={}, target={}",
                    idx + 1,
                    format_row(source),
                    format_row(target)
                ));
            }
        }
    }
}

impl Default for CsvDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatComparator for CsvDiffEngine {
    fn kind(&self) -> FileKind {
        FileKind::Csv
    }

    fn label(&self) -> &'static str {
        "CSV files"
    }

    fn compare_into(
        &self,
        source: &Path,
        target: &Path,
        result: &mut ResultBuilder,
    ) -> Result<(), TreeCmpError> {
        let source_rows = self.read_rows(source, "source")?;
        let target_rows = self.read_rows(target, "target")?;

        self.compare_rows(&source_rows, &target_rows, result);
        debug!(
            "{}: compared {} / {} rows",
            result.path(),
            source_rows.len(),
            target_rows.len()
        );
        Ok(())
    }
}

/// Split input into physical records at line terminators (`\n`, `\r\n`, `\r`)
/// outside quoted fields. Text after the last terminator is a record only if
/// non-empty.
fn record_lines(data: &[u8], quote: u8) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte == quote {
            in_quotes = !in_quotes;
        } else if !in_quotes && (byte == b'\n' || byte == b'\r') {
            lines.push(&data[start..i]);
            if byte == b'\r' && data.get(i + 1) == Some(&b'\n') {
                i += 1;
            }
            start = i + 1;
        }
        i += 1;
    }

    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// `[a, b, c]`
fn format_row(fields: &[String]) -> String {
    format!("[{}]", fields.join(", "))
}
