use crate::dispatch::{FileKind, FormatComparator};
use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use treecmp_common::{ResultBuilder, TreeCmpError};

/// A single cell, keeping the kind it was declared with
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    /// Numeric cell carrying a date display format
    Date(NaiveDateTime),
    Bool(bool),
    /// Formula text, without the leading `=`
    Formula(String),
    Error(String),
    Empty,
}

impl CellValue {
    /// Canonical string used for equality.
    ///
    /// Kinds are not coerced: text `"5"` and number `5` normalise to `5` and
    /// `5.0` respectively. Error cells normalise to the empty string.
    pub fn normalized(&self) -> String {
        match self {
            CellValue::Text(text) => text.clone(),
            CellValue::Number(value) => format_number(*value),
            CellValue::Date(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellValue::Bool(value) => value.to_string(),
            CellValue::Formula(formula) => formula.clone(),
            CellValue::Error(_) | CellValue::Empty => String::new(),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl From<&Data> for CellValue {
    #[allow(unreachable_patterns)]
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Empty,
            Data::String(text) => CellValue::Text(text.clone()),
            Data::Float(value) => CellValue::Number(*value),
            Data::Int(value) => CellValue::Number(*value as f64),
            Data::Bool(value) => CellValue::Bool(*value),
            Data::DateTime(serial) => match data.as_datetime() {
                Some(datetime) => CellValue::Date(datetime),
                None => CellValue::Number(serial.as_f64()),
            },
            Data::DateTimeIso(text) | Data::DurationIso(text) => CellValue::Text(text.clone()),
            Data::Error(error) => CellValue::Error(error.to_string()),
            _ => CellValue::Empty,
        }
    }
}

/// Decimal form for magnitudes in `[1e-3, 1e7)`, scientific (`1.0E7`,
/// `1.5E-4`) outside it. The mantissa always keeps one fractional digit.
fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        if value.fract() == 0.0 {
            format!("{:.1}", value)
        } else {
            value.to_string()
        }
    } else {
        let scientific = format!("{:e}", value);
        match scientific.split_once('e') {
            Some((mantissa, exponent)) if mantissa.contains('.') => {
                format!("{}E{}", mantissa, exponent)
            }
            Some((mantissa, exponent)) => format!("{}.0E{}", mantissa, exponent),
            None => scientific,
        }
    }
}

/// Populated cells of one worksheet, keyed by 0-based row then column.
///
/// Rows without any populated cell are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    pub name: String,
    rows: BTreeMap<u32, BTreeMap<u32, CellValue>>,
}

impl SheetGrid {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
        }
    }

    /// Store a cell; empty values are not stored
    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if value.is_empty() {
            return;
        }
        self.rows.entry(row).or_default().insert(col, value);
    }

    /// Highest populated row index + 1
    pub fn row_count(&self) -> u32 {
        self.rows.keys().next_back().map_or(0, |row| row + 1)
    }

    pub fn row(&self, row: u32) -> Option<&BTreeMap<u32, CellValue>> {
        self.rows.get(&row)
    }

    /// Build from calamine ranges; a formula takes precedence over its cached value
    fn from_ranges(name: String, values: &Range<Data>, formulas: &Range<String>) -> Self {
        let mut grid = SheetGrid::new(name);

        if let Some((row0, col0)) = values.start() {
            for (row, col, data) in values.used_cells() {
                grid.set(row0 + row as u32, col0 + col as u32, CellValue::from(data));
            }
        }

        if let Some((row0, col0)) = formulas.start() {
            for (row, col, formula) in formulas.used_cells() {
                grid.set(
                    row0 + row as u32,
                    col0 + col as u32,
                    CellValue::Formula(formula.clone()),
                );
            }
        }

        grid
    }
}

/// Engine for comparing Excel workbooks: workbook → sheet → row → cell
pub struct ExcelDiffEngine;

impl ExcelDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Load every sheet of a workbook, in workbook order
    pub fn load_workbook(&self, path: &Path, side: &str) -> Result<Vec<SheetGrid>, TreeCmpError> {
        let mut workbook = open_workbook_auto(path).map_err(|e| {
            TreeCmpError::Parse(format!("Failed to open {} Excel file: {}", side, e))
        })?;

        let sheet_names = workbook.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(sheet_names.len());

        for sheet_name in sheet_names {
            let values = workbook.worksheet_range(&sheet_name).map_err(|e| {
                TreeCmpError::Parse(format!(
                    "Failed to read sheet '{}' of {} Excel file: {}",
                    sheet_name, side, e
                ))
            })?;
            let formulas = workbook.worksheet_formula(&sheet_name).map_err(|e| {
                TreeCmpError::Parse(format!(
                    "Failed to read formulas of sheet '{}' of {} Excel file: {}",
                    sheet_name, side, e
                ))
            })?;
            sheets.push(SheetGrid::from_ranges(sheet_name, &values, &formulas));
        }

        Ok(sheets)
    }

    /// Compare already-loaded workbooks
    pub fn compare_workbooks(
        &self,
        source: &[SheetGrid],
        target: &[SheetGrid],
        result: &mut ResultBuilder,
    ) {
        if source.len() != target.len() {
            result.difference(format!(
                "Sheet count mismatch: source={}, target={}",
                source.len(),
                target.len()
            ));
        }

        for (source_sheet, target_sheet) in source.iter().zip(target.iter()) {
            self.compare_sheets(source_sheet, target_sheet, result);
        }
    }

    fn compare_sheets(&self, source: &SheetGrid, target: &SheetGrid, result: &mut ResultBuilder) {
        if source.name != target.name {
            result.difference(format!(
                "Sheet name mismatch: source='{}', target='{}'",
                source.name, target.name
            ));
        }

        let source_rows = source.row_count();
        let target_rows = target.row_count();
        if source_rows != target_rows {
            result.difference(format!(
                "Row count mismatch in sheet '{}': source={}, target={}",
                source.name, source_rows, target_rows
            ));
        }

        for row in 0..source_rows.min(target_rows) {
            let (source_row, target_row) = match (source.row(row), target.row(row)) {
                (None, None) => continue,
                (Some(s), Some(t)) => (s, t),
                _ => {
                    result.difference(format!("Row {} missing in one file", row + 1));
                    continue;
                }
            };

            let cell_count = last_column(source_row).max(last_column(target_row));
            for col in 0..cell_count {
                let source_value = cell_text(source_row, col);
                let target_value = cell_text(target_row, col);

                if source_value != target_value {
                    result.difference(format!(
                        "Cell [{}{}] differs: source='{}', target='{}'",
                        column_letter(col),
                        row + 1,
                        source_value,
                        target_value
                    ));
                }
            }
        }
    }
}

impl Default for ExcelDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatComparator for ExcelDiffEngine {
    fn kind(&self) -> FileKind {
        FileKind::Spreadsheet
    }

    fn label(&self) -> &'static str {
        "Excel files"
    }

    fn compare_into(
        &self,
        source: &Path,
        target: &Path,
        result: &mut ResultBuilder,
    ) -> Result<(), TreeCmpError> {
        let source_sheets = self.load_workbook(source, "source")?;
        let target_sheets = self.load_workbook(target, "target")?;

        self.compare_workbooks(&source_sheets, &target_sheets, result);
        debug!(
            "{}: compared {} / {} sheets",
            result.path(),
            source_sheets.len(),
            target_sheets.len()
        );
        Ok(())
    }
}

/// Highest populated column index + 1
fn last_column(row: &BTreeMap<u32, CellValue>) -> u32 {
    row.keys().next_back().map_or(0, |col| col + 1)
}

fn cell_text(row: &BTreeMap<u32, CellValue>, col: u32) -> String {
    row.get(&col).map(CellValue::normalized).unwrap_or_default()
}

/// Base-26 column label: 0 → A, 25 → Z, 26 → AA
pub fn column_letter(index: u32) -> String {
    let mut letters = Vec::new();
    let mut n = index as u64 + 1;
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn grid(name: &str, cells: &[(u32, u32, CellValue)]) -> SheetGrid {
        let mut grid = SheetGrid::new(name);
        for (row, col, value) in cells {
            grid.set(*row, *col, value.clone());
        }
        grid
    }

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn compare(source: &[SheetGrid], target: &[SheetGrid]) -> Vec<String> {
        let mut result = ResultBuilder::new("book.xlsx", "XLSX");
        ExcelDiffEngine::new().compare_workbooks(source, target, &mut result);
        result.finish().differences
    }

    /// Minimal xlsx package; style index 1 is a date format
    fn write_xlsx(path: &Path, sheets: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default();

        let mut overrides = String::new();
        let mut sheet_entries = String::new();
        let mut rels = String::new();
        for (idx, (name, _)) in sheets.iter().enumerate() {
            let n = idx + 1;
            overrides.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
            sheet_entries.push_str(&format!(r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#));
            rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));
        }

        let parts = vec![
            (
                "[Content_Types].xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>{overrides}</Types>"#
                ),
            ),
            (
                "_rels/.rels".to_string(),
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#.to_string(),
            ),
            (
                "xl/workbook.xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{sheet_entries}</sheets></workbook>"#
                ),
            ),
            (
                "xl/_rels/workbook.xml.rels".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}<Relationship Id="rIdStyles" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#
                ),
            ),
            (
                "xl/styles.xml".to_string(),
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/></cellXfs></styleSheet>"#.to_string(),
            ),
        ];

        for (name, content) in parts {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        for (idx, (_, rows)) in sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", idx + 1), options).unwrap();
            zip.write_all(
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{rows}</sheetData></worksheet>"#
                )
                .as_bytes(),
            )
            .unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(1), "B");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_normalized_values() {
        assert_eq!(text("5").normalized(), "5");
        assert_eq!(CellValue::Number(5.0).normalized(), "5.0");
        assert_eq!(CellValue::Number(2.5).normalized(), "2.5");
        assert_eq!(CellValue::Number(-3.0).normalized(), "-3.0");
        assert_eq!(CellValue::Bool(true).normalized(), "true");
        assert_eq!(CellValue::Bool(false).normalized(), "false");
        assert_eq!(CellValue::Formula("SUM(A1:A2)".to_string()).normalized(), "SUM(A1:A2)");
        assert_eq!(CellValue::Error("#DIV/0!".to_string()).normalized(), "");
        assert_eq!(CellValue::Empty.normalized(), "");

        let date = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(CellValue::Date(date).normalized(), "2024-01-31 00:00:00");
    }

    #[test]
    fn test_number_magnitude_thresholds() {
        assert_eq!(format_number(0.0), "0.0");
        assert_eq!(format_number(0.001), "0.001");
        assert_eq!(format_number(9_999_999.0), "9999999.0");
        assert_eq!(format_number(1e7), "1.0E7");
        assert_eq!(format_number(12_345_678.0), "1.2345678E7");
        assert_eq!(format_number(-2.5e10), "-2.5E10");
        assert_eq!(format_number(0.00015), "1.5E-4");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_row_count_is_highest_populated_row() {
        let sheet = grid("S", &[(0, 0, text("a")), (4, 2, text("b"))]);
        assert_eq!(sheet.row_count(), 5);
        assert!(sheet.row(2).is_none());
        assert_eq!(SheetGrid::new("empty").row_count(), 0);
    }

    #[test]
    fn test_empty_values_are_not_stored() {
        let sheet = grid("S", &[(3, 0, CellValue::Empty)]);
        assert_eq!(sheet.row_count(), 0);
    }

    #[test]
    fn test_identical_workbooks() {
        let sheet = grid("Data", &[(0, 0, text("id")), (1, 0, CellValue::Number(1.0))]);
        assert!(compare(&[sheet.clone()], &[sheet]).is_empty());
    }

    #[test]
    fn test_text_and_number_are_not_coerced() {
        let source = grid("Sheet1", &[(1, 1, text("5"))]);
        let target = grid("Sheet1", &[(1, 1, CellValue::Number(5.0))]);

        assert_eq!(
            compare(&[source], &[target]),
            vec!["Cell [B2] differs: source='5', target='5.0'".to_string()]
        );
    }

    #[test]
    fn test_sheet_count_and_name_mismatch() {
        let source = vec![grid("One", &[]), grid("Two", &[])];
        let target = vec![grid("Uno", &[])];

        assert_eq!(
            compare(&source, &target),
            vec![
                "Sheet count mismatch: source=2, target=1".to_string(),
                "Sheet name mismatch: source='One', target='Uno'".to_string(),
            ]
        );
    }

    #[test]
    fn test_row_count_mismatch_and_overlap() {
        let source = grid("S", &[(0, 0, text("a")), (2, 0, text("c"))]);
        let target = grid("S", &[(0, 0, text("A"))]);

        assert_eq!(
            compare(&[source], &[target]),
            vec![
                "Row count mismatch in sheet 'S': source=3, target=1".to_string(),
                "Cell [A1] differs: source='a', target='A'".to_string(),
            ]
        );
    }

    #[test]
    fn test_row_missing_on_one_side() {
        let source = grid("S", &[(0, 0, text("a")), (2, 0, text("c"))]);
        let target = grid("S", &[(1, 0, text("b")), (2, 0, text("c"))]);

        assert_eq!(
            compare(&[source], &[target]),
            vec![
                "Row 1 missing in one file".to_string(),
                "Row 2 missing in one file".to_string(),
            ]
        );
    }

    #[test]
    fn test_trailing_cell_on_one_side() {
        let source = grid("S", &[(0, 0, text("a"))]);
        let target = grid("S", &[(0, 0, text("a")), (0, 27, CellValue::Bool(true))]);

        assert_eq!(
            compare(&[source], &[target]),
            vec!["Cell [AB1] differs: source='', target='true'".to_string()]
        );
    }

    #[test]
    fn test_formula_compared_by_text() {
        let source = grid("S", &[(0, 0, CellValue::Formula("A2+A3".to_string()))]);
        let target = grid("S", &[(0, 0, CellValue::Formula("A2+A4".to_string()))]);

        assert_eq!(
            compare(&[source], &[target]),
            vec!["Cell [A1] differs: source='A2+A3', target='A2+A4'".to_string()]
        );
    }

    #[test]
    fn test_load_and_compare_xlsx_files() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source.xlsx");
        let target = temp.path().join("target.xlsx");

        write_xlsx(
            &source,
            &[(
                "Sheet1",
                r#"<row r="1"><c r="A1" t="inlineStr"><is><t>name</t></is></c></row><row r="2"><c r="B2" t="inlineStr"><is><t>5</t></is></c></row>"#,
            )],
        );
        write_xlsx(
            &target,
            &[(
                "Sheet1",
                r#"<row r="1"><c r="A1" t="inlineStr"><is><t>name</t></is></c></row><row r="2"><c r="B2"><v>5</v></c></row>"#,
            )],
        );

        let result = ExcelDiffEngine::new().compare(&source, &target, ResultBuilder::new("book.xlsx", "XLSX"));
        assert!(result.error_message.is_none(), "{:?}", result.error_message);
        assert_eq!(
            result.differences,
            vec!["Cell [B2] differs: source='5', target='5.0'".to_string()]
        );
    }

    #[test]
    fn test_load_xlsx_cell_kinds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kinds.xlsx");
        write_xlsx(
            &path,
            &[(
                "Kinds",
                r#"<row r="1"><c r="A1" t="b"><v>1</v></c><c r="B1" s="1"><v>45292</v></c><c r="C1"><f>SUM(D1:E1)</f><v>3</v></c><c r="D1"><v>1</v></c><c r="E1"><v>2</v></c></row>"#,
            )],
        );

        let sheets = ExcelDiffEngine::new().load_workbook(&path, "source").unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].name, "Kinds");

        let row = sheets[0].row(0).unwrap();
        assert_eq!(row[&0].normalized(), "true");
        assert_eq!(row[&1].normalized(), "2024-01-01 00:00:00");
        assert_eq!(row[&2].normalized(), "SUM(D1:E1)");
        assert_eq!(row[&3].normalized(), "1.0");
    }

    #[test]
    fn test_corrupt_workbook_is_error() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.xlsx");
        let target = temp.path().join("b.xlsx");
        std::fs::write(&source, b"not a zip").unwrap();
        std::fs::write(&target, b"not a zip").unwrap();

        let result = ExcelDiffEngine::new().compare(&source, &target, ResultBuilder::new("a.xlsx", "XLSX"));
        assert!(!result.identical);
        let message = result.error_message.unwrap();
        assert!(message.starts_with("Error comparing Excel files:"), "{}", message);
    }
}
