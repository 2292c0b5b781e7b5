//! In-memory dataset context and the delimited-text exporter.
//!
//! The table is the shared mutable context that transform and validator
//! capabilities operate on: a header plus string rows, loaded from the
//! unpacked archive's tab-separated data file and written back under a
//! chosen text encoding with an explicit column-exclusion list.

use std::fs;
use std::path::Path;

use encoding_rs::{UTF_8, WINDOWS_1252};
use tracing::debug;

use crate::error::PublishError;

/// Row predicate scoping a redaction step, composable with logical AND.
#[derive(Debug, Clone)]
pub enum DataFilter {
    /// Matches rows where the column holds exactly this value. A missing
    /// column matches nothing.
    ColumnEquals { column: String, value: String },
    /// Matches rows where the column holds a non-empty value.
    ColumnNotEmpty { column: String },
    And(Box<DataFilter>, Box<DataFilter>),
}

impl DataFilter {
    pub fn column_equals(column: &str, value: &str) -> Self {
        Self::ColumnEquals {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn column_not_empty(column: &str) -> Self {
        Self::ColumnNotEmpty {
            column: column.to_string(),
        }
    }

    /// Combines two filters; a row must satisfy both.
    pub fn and(self, other: DataFilter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn matches(&self, table: &DataTable, row: usize) -> bool {
        match self {
            Self::ColumnEquals { column, value } => {
                table.value(row, column).is_some_and(|v| v == value)
            }
            Self::ColumnNotEmpty { column } => {
                table.value(row, column).is_some_and(|v| !v.is_empty())
            }
            Self::And(left, right) => left.matches(table, row) && right.matches(table, row),
        }
    }
}

/// Tab-separated dataset held in memory for one pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Loads the data file from an unpacked archive. The portal delivers
    /// either UTF-8 or cp1252 files; non-UTF-8 input falls back to cp1252,
    /// which decodes any byte sequence.
    pub fn load(path: &Path) -> Result<Self, PublishError> {
        let bytes = fs::read(path)?;
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(_) => WINDOWS_1252.decode(&bytes).0.into_owned(),
        };

        let mut lines = text.lines();
        let header = lines.next().unwrap_or_default();
        let columns: Vec<String> = header.split('\t').map(str::to_string).collect();
        let width = columns.len();

        let mut table = Self::new(columns);
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let mut row: Vec<String> = line.split('\t').map(str::to_string).collect();
            row.resize(width, String::new());
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Adds a column filled with `default`, returning its index. Adding an
    /// existing column is a no-op.
    pub fn add_column(&mut self, name: &str, default: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
        self.columns.len() - 1
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(index) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(index);
        }
        true
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|r| r[index].as_str())
    }

    pub fn set_value(&mut self, row: usize, column: &str, value: &str) {
        if let Some(index) = self.column_index(column) {
            if let Some(r) = self.rows.get_mut(row) {
                r[index] = value.to_string();
            }
        }
    }

    /// Writes `value` into `column` for every row matching `filter`
    /// (every row when no filter is given). Returns the number of rows
    /// touched; a missing column touches none.
    pub fn set_column_where(
        &mut self,
        column: &str,
        value: &str,
        filter: Option<&DataFilter>,
    ) -> usize {
        let Some(index) = self.column_index(column) else {
            return 0;
        };
        let mut touched = 0;
        for row in 0..self.rows.len() {
            let selected = filter.map_or(true, |f| f.matches(self, row));
            if selected {
                self.rows[row][index] = value.to_string();
                touched += 1;
            }
        }
        touched
    }

    /// Removes every row matching `filter`, returning the count removed.
    pub fn remove_rows_where(&mut self, filter: &DataFilter) -> usize {
        let before = self.rows.len();
        let keep: Vec<bool> = (0..before).map(|row| !filter.matches(self, row)).collect();
        let mut it = keep.into_iter();
        self.rows.retain(|_| it.next().unwrap_or(true));
        before - self.rows.len()
    }
}

/// Text encodings accepted by the portal importer. The original tool tries
/// latin-1, cp1252 and utf-8 in order; under the WHATWG encoding tables the
/// latin-1 label resolves to windows-1252, so two encodings remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportEncoding {
    Windows1252,
    Utf8,
}

impl ExportEncoding {
    /// Portal-preferred fallback order.
    pub const FALLBACK_ORDER: [ExportEncoding; 2] =
        [ExportEncoding::Windows1252, ExportEncoding::Utf8];

    pub fn label(self) -> &'static str {
        match self {
            Self::Windows1252 => "windows-1252",
            Self::Utf8 => "utf-8",
        }
    }

    /// Encodes `text`, returning `None` when a character cannot be
    /// represented in this encoding.
    fn encode(self, text: &str) -> Option<Vec<u8>> {
        let encoding = match self {
            Self::Windows1252 => WINDOWS_1252,
            Self::Utf8 => UTF_8,
        };
        let (bytes, _, had_errors) = encoding.encode(text);
        if had_errors {
            None
        } else {
            Some(bytes.into_owned())
        }
    }
}

/// Serializes a [`DataTable`] to a tab-separated artifact under a chosen
/// encoding, skipping an explicit set of excluded columns.
#[derive(Debug, Default)]
pub struct TableExporter {
    excluded_columns: Vec<String>,
}

impl TableExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_columns
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Writes the table to `path` under `encoding`. Fails with an archive
    /// error when the encoding cannot represent the data.
    pub fn export(
        &self,
        table: &DataTable,
        path: &Path,
        encoding: ExportEncoding,
    ) -> Result<(), PublishError> {
        let text = self.render(table);
        let bytes = encoding.encode(&text).ok_or_else(|| PublishError::Archive {
            archive: path.display().to_string(),
            message: format!("data not representable in {}", encoding.label()),
        })?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Writes the table trying each encoding in the portal's fallback
    /// order, returning the one that worked.
    pub fn export_with_fallback(
        &self,
        table: &DataTable,
        path: &Path,
    ) -> Result<ExportEncoding, PublishError> {
        for encoding in ExportEncoding::FALLBACK_ORDER {
            match self.export(table, path, encoding) {
                Ok(()) => {
                    debug!(encoding = encoding.label(), path = %path.display(), "exported data file");
                    return Ok(encoding);
                }
                Err(PublishError::Archive { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(PublishError::Archive {
            archive: path.display().to_string(),
            message: "no export encoding can represent the data".to_string(),
        })
    }

    fn render(&self, table: &DataTable) -> String {
        let kept: Vec<usize> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| !self.excluded_columns.contains(name))
            .map(|(index, _)| index)
            .collect();

        let mut out = String::new();
        let header: Vec<&str> = kept.iter().map(|&i| table.columns[i].as_str()).collect();
        out.push_str(&header.join("\t"));
        out.push('\n');
        for row in &table.rows {
            let line: Vec<&str> = kept.iter().map(|&i| row[i].as_str()).collect();
            out.push_str(&line.join("\t"));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> DataTable {
        let mut table = DataTable::new(vec![
            "station".to_string(),
            "parameter".to_string(),
            "water_depth_m".to_string(),
        ]);
        table.push_row(vec!["A".into(), "Secchi depth".into(), "12".into()]);
        table.push_row(vec!["B".into(), "Chlorophyll-a".into(), "30".into()]);
        table.push_row(vec!["C".into(), "Secchi depth".into(), "".into()]);
        table
    }

    #[test]
    fn test_load_parses_header_and_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shark_data.txt");
        fs::write(&path, "a\tb\n1\t2\n3\t4\n").unwrap();
        let table = DataTable::load(&path).unwrap();
        assert_eq!(table.columns(), ["a", "b"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(1, "b"), Some("4"));
    }

    #[test]
    fn test_load_decodes_cp1252_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shark_data.txt");
        // 0xE5 is 'å' in cp1252, invalid as a lone UTF-8 byte.
        fs::write(&path, b"name\n\xe5\n").unwrap();
        let table = DataTable::load(&path).unwrap();
        assert_eq!(table.value(0, "name"), Some("å"));
    }

    #[test]
    fn test_filter_and_composition() {
        let table = sample_table();
        let filter = DataFilter::column_equals("parameter", "Secchi depth")
            .and(DataFilter::column_not_empty("water_depth_m"));
        assert!(filter.matches(&table, 0));
        assert!(!filter.matches(&table, 1));
        assert!(!filter.matches(&table, 2));
    }

    #[test]
    fn test_set_column_where_scoped_by_filter() {
        let mut table = sample_table();
        let filter = DataFilter::column_equals("parameter", "Secchi depth");
        let touched = table.set_column_where("water_depth_m", "999", Some(&filter));
        assert_eq!(touched, 2);
        assert_eq!(table.value(0, "water_depth_m"), Some("999"));
        // The non-matching row is untouched.
        assert_eq!(table.value(1, "water_depth_m"), Some("30"));
    }

    #[test]
    fn test_set_column_missing_column_touches_nothing() {
        let mut table = sample_table();
        assert_eq!(table.set_column_where("no_such_column", "x", None), 0);
    }

    #[test]
    fn test_remove_rows_where() {
        let mut table = sample_table();
        let removed =
            table.remove_rows_where(&DataFilter::column_equals("parameter", "Secchi depth"));
        assert_eq!(removed, 2);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, "station"), Some("B"));
    }

    #[test]
    fn test_add_and_drop_column() {
        let mut table = sample_table();
        let index = table.add_column("reported_date", "");
        assert_eq!(index, 3);
        // Adding again is a no-op.
        assert_eq!(table.add_column("reported_date", ""), 3);
        assert!(table.drop_column("reported_date"));
        assert!(!table.has_column("reported_date"));
    }

    #[test]
    fn test_export_excludes_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.txt");
        let table = sample_table();
        TableExporter::new()
            .exclude_columns(["water_depth_m"])
            .export(&table, &path, ExportEncoding::Utf8)
            .unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("station\tparameter\n"));
        assert!(!written.contains("water_depth_m"));
    }

    #[test]
    fn test_export_fallback_prefers_cp1252() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.txt");
        let mut table = DataTable::new(vec!["comment".to_string()]);
        table.push_row(vec!["Östersjön".into()]);
        let encoding = TableExporter::new()
            .export_with_fallback(&table, &path)
            .unwrap();
        assert_eq!(encoding, ExportEncoding::Windows1252);
    }

    #[test]
    fn test_export_fallback_uses_utf8_when_needed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.txt");
        let mut table = DataTable::new(vec!["comment".to_string()]);
        table.push_row(vec!["水深".into()]);
        let encoding = TableExporter::new()
            .export_with_fallback(&table, &path)
            .unwrap();
        assert_eq!(encoding, ExportEncoding::Utf8);
    }
}
