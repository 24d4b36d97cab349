//! Extension-based selection of a [`FormatComparator`].

use crate::text_diff::TextDiffEngine;
use std::path::Path;
use treecmp_common::{ComparisonResult, ResultBuilder, TreeCmpError};

/// Tag recorded when a file name carries no usable extension
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// Comparison strategy selected for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Text,
    Csv,
    Spreadsheet,
    Xml,
}

impl FileKind {
    /// Map an extension tag to a kind. Unrecognised tags compare as text.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "XML" => FileKind::Xml,
            "CSV" => FileKind::Csv,
            "XLSX" | "XLS" => FileKind::Spreadsheet,
            _ => FileKind::Text,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_tag(&extension_tag(path))
    }
}

/// Upper-cased text after the last `.` of the file name.
///
/// A leading dot does not start an extension, so `.gitignore` and `README`
/// both yield [`UNKNOWN_TYPE`].
pub fn extension_tag(path: &Path) -> String {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return UNKNOWN_TYPE.to_string(),
    };

    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_uppercase(),
        _ => UNKNOWN_TYPE.to_string(),
    }
}

/// A format-specific equivalence rule for two same-named files
pub trait FormatComparator: Send + Sync {
    fn kind(&self) -> FileKind;

    /// Wording used in the error prefix, e.g. "text files"
    fn label(&self) -> &'static str;

    /// Record every difference between `source` and `target` into `result`.
    ///
    /// Returning an error aborts the file; differences already recorded are
    /// kept.
    fn compare_into(
        &self,
        source: &Path,
        target: &Path,
        result: &mut ResultBuilder,
    ) -> Result<(), TreeCmpError>;

    fn compare(&self, source: &Path, target: &Path, mut result: ResultBuilder) -> ComparisonResult {
        match self.compare_into(source, target, &mut result) {
            Ok(()) => result.finish(),
            Err(e) => {
                let message = format!("Error comparing {}: {}", self.label(), e);
                tracing::warn!("{}: {}", result.path(), message);
                result.fail(message)
            }
        }
    }
}

/// Owns one comparator per [`FileKind`]
pub struct ComparatorRegistry {
    text: Box<dyn FormatComparator>,
    csv: Option<Box<dyn FormatComparator>>,
    spreadsheet: Option<Box<dyn FormatComparator>>,
    xml: Option<Box<dyn FormatComparator>>,
}

impl ComparatorRegistry {
    /// Registry with every comparator compiled into this build
    pub fn new() -> Self {
        Self {
            text: Box::new(TextDiffEngine::new()),
            #[cfg(feature = "csv-diff")]
            csv: Some(Box::new(crate::csv_diff::CsvDiffEngine::new())),
            #[cfg(not(feature = "csv-diff"))]
            csv: None,
            #[cfg(feature = "excel-diff")]
            spreadsheet: Some(Box::new(crate::excel_diff::ExcelDiffEngine::new())),
            #[cfg(not(feature = "excel-diff"))]
            spreadsheet: None,
            #[cfg(feature = "xml-diff")]
            xml: Some(Box::new(crate::xml_diff::XmlDiffEngine::new())),
            #[cfg(not(feature = "xml-diff"))]
            xml: None,
        }
    }

    /// Only the text comparator; every kind falls back to it
    pub fn text_only() -> Self {
        Self {
            text: Box::new(TextDiffEngine::new()),
            csv: None,
            spreadsheet: None,
            xml: None,
        }
    }

    /// Replace the comparator registered for its kind
    pub fn with_comparator(mut self, comparator: Box<dyn FormatComparator>) -> Self {
        match comparator.kind() {
            FileKind::Text => self.text = comparator,
            FileKind::Csv => self.csv = Some(comparator),
            FileKind::Spreadsheet => self.spreadsheet = Some(comparator),
            FileKind::Xml => self.xml = Some(comparator),
        }
        self
    }

    pub fn for_kind(&self, kind: FileKind) -> &dyn FormatComparator {
        let selected = match kind {
            FileKind::Text => None,
            FileKind::Csv => self.csv.as_deref(),
            FileKind::Spreadsheet => self.spreadsheet.as_deref(),
            FileKind::Xml => self.xml.as_deref(),
        };
        selected.unwrap_or(&*self.text)
    }

    pub fn for_path(&self, path: &Path) -> &dyn FormatComparator {
        self.for_kind(FileKind::from_path(path))
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
