//! # Tabular Data
//!
//! In-memory table used both as a query result and as an upload payload.
//!
//! Tables serialize to delimited UTF-8 text with a header row and no index
//! column. Reading the text back infers column types: a column whose
//! non-empty cells all parse as integers becomes `Int`, and so on through
//! floats, booleans and date-times, falling back to text. Empty cells are
//! read as `Null`.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Field separator used when the caller does not pick one
pub const DEFAULT_SEPARATOR: char = ',';

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

// ============================================================================
// Cell Values
// ============================================================================

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl CellValue {
    /// Check for SQL NULL / missing value
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer value, if this is an `Int`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value, if this is a `Text`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    /// Delimited-text rendering; `Null` and NaN render as an empty field
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) if v.is_nan() => Ok(()),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{:.1}", v)
            }
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Bytes(v) => write!(f, "0x{}", hex::encode_upper(v)),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// Table
// ============================================================================

/// Rows of cells under named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Create an empty table with the given column names
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row
    ///
    /// # Errors
    /// - `TableError::ColumnCountMismatch` if the row width differs from the header
    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::ColumnCountMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `column`
    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// All values of one column, top to bottom
    pub fn column_values(&self, column: &str) -> Result<Vec<&CellValue>, TableError> {
        let index = self
            .column_index(column)
            .ok_or_else(|| TableError::UnknownColumn {
                name: column.to_string(),
            })?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// New table with the same columns and only the rows matching `predicate`
    pub fn filter_rows<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&[CellValue]) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(row))
                .cloned()
                .collect(),
        }
    }

    /// Serialize as delimited text
    ///
    /// Writes a header row followed by one line per row, `\n` terminated.
    /// Fields are quoted only when they contain the separator, a quote or a
    /// line break.
    ///
    /// # Errors
    /// - `TableError::InvalidSeparator` for non-ASCII, quote or line-break separators
    pub fn to_delimited(&self, separator: char) -> Result<String, TableError> {
        let delimiter = separator_byte(separator)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(&self.columns).map_err(csv_error)?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|cell| cell.to_string()))
                .map_err(csv_error)?;
        }

        let bytes = writer.into_inner().map_err(|e| TableError::Csv {
            message: e.to_string(),
        })?;
        String::from_utf8(bytes).map_err(|e| TableError::Encoding {
            message: e.to_string(),
        })
    }

    /// Parse delimited text produced by [`Table::to_delimited`] or a similar writer
    ///
    /// # Errors
    /// - `TableError::EmptyInput` if there is no header row
    /// - `TableError::Csv` for ragged rows, malformed quoting or non-UTF-8 input
    pub fn from_delimited(data: &[u8], separator: char) -> Result<Self, TableError> {
        let delimiter = separator_byte(separator)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(data);

        let columns: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            return Err(TableError::EmptyInput);
        }

        let mut raw_rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            raw_rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let kinds: Vec<ColumnKind> = (0..columns.len())
            .map(|i| {
                let fields: Vec<&str> = raw_rows.iter().map(|row| row[i].as_str()).collect();
                ColumnKind::infer(&fields)
            })
            .collect();

        let rows = raw_rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&kinds)
                    .map(|(field, kind)| kind.parse(field))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }
}

fn separator_byte(separator: char) -> Result<u8, TableError> {
    if !separator.is_ascii() || matches!(separator, '"' | '\n' | '\r') {
        return Err(TableError::InvalidSeparator { separator });
    }
    Ok(separator as u8)
}

fn csv_error(e: csv::Error) -> TableError {
    TableError::Csv {
        message: e.to_string(),
    }
}

/// Column type inferred while reading delimited text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    DateTime,
    Text,
}

impl ColumnKind {
    fn infer(fields: &[&str]) -> Self {
        let present: Vec<&str> = fields.iter().copied().filter(|f| !f.is_empty()).collect();
        if present.is_empty() {
            return Self::Text;
        }

        [Self::Int, Self::Float, Self::Bool, Self::DateTime]
            .into_iter()
            .find(|kind| present.iter().all(|f| kind.accepts(f)))
            .unwrap_or(Self::Text)
    }

    fn accepts(self, field: &str) -> bool {
        match self {
            Self::Int => field.parse::<i64>().is_ok(),
            Self::Float => field.parse::<f64>().is_ok(),
            Self::Bool => parse_bool(field).is_some(),
            Self::DateTime => parse_datetime(field).is_some(),
            Self::Text => true,
        }
    }

    fn parse(self, field: String) -> CellValue {
        if field.is_empty() {
            return CellValue::Null;
        }
        let parsed = match self {
            Self::Int => field.parse().ok().map(CellValue::Int),
            Self::Float => field.parse().ok().map(CellValue::Float),
            Self::Bool => parse_bool(&field).map(CellValue::Bool),
            Self::DateTime => parse_datetime(&field).map(CellValue::DateTime),
            Self::Text => None,
        };
        parsed.unwrap_or(CellValue::Text(field))
    }
}

fn parse_bool(field: &str) -> Option<bool> {
    match field {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

fn parse_datetime(field: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(field, format).ok())
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors building, encoding or decoding tables
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Row {row} has {actual} cells, expected {expected}")]
    ColumnCountMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown column: {name}")]
    UnknownColumn { name: String },

    #[error("Invalid separator {separator:?}: must be a single ASCII character other than a quote or line break")]
    InvalidSeparator { separator: char },

    #[error("Delimited text has no header row")]
    EmptyInput,

    #[error("Delimited text error: {message}")]
    Csv { message: String },

    #[error("Text encoding error: {message}")]
    Encoding { message: String },
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
