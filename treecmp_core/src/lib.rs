pub mod comparison;
pub mod dispatch;
pub mod report;
pub mod scanner;
pub mod text_diff;

#[cfg(feature = "archives")]
pub mod archive;

#[cfg(feature = "csv-diff")]
pub mod csv_diff;

#[cfg(feature = "excel-diff")]
pub mod excel_diff;

#[cfg(feature = "xml-diff")]
pub mod xml_diff;

pub use comparison::{ComparisonEngine, PathPair, Pairing, ProgressCallback};
pub use dispatch::{extension_tag, ComparatorRegistry, FileKind, FormatComparator};
pub use report::{render_summary, ReportWriter};
pub use scanner::{count_files, DirectoryIndex, FolderScanner};
pub use text_diff::TextDiffEngine;

#[cfg(feature = "archives")]
pub use archive::{extract_archive, is_archive, ArchiveKind};

#[cfg(feature = "csv-diff")]
pub use csv_diff::CsvDiffEngine;

#[cfg(feature = "excel-diff")]
pub use excel_diff::ExcelDiffEngine;

#[cfg(feature = "xml-diff")]
pub use xml_diff::XmlDiffEngine;
