//! Row generators: turn a source into an ordered sequence of string rows.
//!
//! Three shapes are supported: rows already in memory ([`ListRows`]),
//! CSV text ([`CsvRows`]), and the line-oriented `Term: value | arg` text
//! format ([`TextRows`]). Generators own their underlying reader, so a file
//! handle is released when the generator is dropped, whether or not it was
//! fully consumed.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::MetatabError;
use crate::source::{SourceFormat, SourceRef};

/// One row of cells. Column 0 is the term, column 1 the value, the rest args.
pub type Row = Vec<String>;

/// A source of rows.
pub trait RowGenerator: Iterator<Item = Result<Row, MetatabError>> {
    /// Name of the source, used in term provenance.
    fn path(&self) -> &str;

    /// Physical line of the row most recently returned, when the generator
    /// knows it. The term stream counts rows itself otherwise.
    fn line_number(&self) -> Option<usize> {
        None
    }
}

impl<G: RowGenerator + ?Sized> RowGenerator for Box<G> {
    fn path(&self) -> &str {
        (**self).path()
    }

    fn line_number(&self) -> Option<usize> {
        (**self).line_number()
    }
}

// ──────────────────────────────────────────────
// In-memory rows
// ──────────────────────────────────────────────

/// Rows supplied directly by the caller.
pub struct ListRows {
    path: String,
    rows: std::vec::IntoIter<Row>,
}

impl ListRows {
    pub fn new(path: impl Into<String>, rows: Vec<Row>) -> Self {
        ListRows {
            path: path.into(),
            rows: rows.into_iter(),
        }
    }

    pub fn from_slices(path: impl Into<String>, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| (*c).to_owned()).collect())
            .collect();
        ListRows::new(path, rows)
    }
}

impl Iterator for ListRows {
    type Item = Result<Row, MetatabError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(Ok)
    }
}

impl RowGenerator for ListRows {
    fn path(&self) -> &str {
        &self.path
    }
}

// ──────────────────────────────────────────────
// CSV
// ──────────────────────────────────────────────

/// RFC 4180 CSV rows. Records may have differing lengths; there is no
/// header record.
pub struct CsvRows<R: Read> {
    path: String,
    records: csv::StringRecordsIntoIter<R>,
    line: Option<usize>,
}

impl<R: Read> CsvRows<R> {
    pub fn from_reader(path: impl Into<String>, reader: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        CsvRows {
            path: path.into(),
            records: reader.into_records(),
            line: None,
        }
    }
}

impl CsvRows<File> {
    pub fn from_path(path: &Path) -> Result<Self, MetatabError> {
        let file = File::open(path)
            .map_err(|e| MetatabError::generate(&path.display().to_string(), e.to_string()))?;
        Ok(CsvRows::from_reader(path.display().to_string(), file))
    }
}

impl CsvRows<Cursor<Vec<u8>>> {
    pub fn from_bytes(path: impl Into<String>, mut bytes: Vec<u8>) -> Self {
        if bytes.starts_with(b"\xEF\xBB\xBF") {
            bytes.drain(..3);
        }
        CsvRows::from_reader(path, Cursor::new(bytes))
    }
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<Row, MetatabError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(match record {
            Ok(record) => {
                self.line = record.position().map(|p| p.line() as usize);
                Ok(record.iter().map(str::to_owned).collect())
            }
            Err(e) => Err(MetatabError::generate(&self.path, e.to_string())),
        })
    }
}

impl<R: Read> RowGenerator for CsvRows<R> {
    fn path(&self) -> &str {
        &self.path
    }

    fn line_number(&self) -> Option<usize> {
        self.line
    }
}

// ──────────────────────────────────────────────
// Line-oriented text
// ──────────────────────────────────────────────

/// Rows from `Term: value | arg | arg` lines.
///
/// Blank lines and lines whose first non-blank character is `#` are
/// skipped. `==== Name` is shorthand for `Section: Name`. `\|` is a literal
/// pipe inside a value.
pub struct TextRows {
    path: String,
    lines: std::vec::IntoIter<String>,
    line: usize,
}

impl TextRows {
    pub fn new(path: impl Into<String>, text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_owned).collect();
        TextRows {
            path: path.into(),
            lines: lines.into_iter(),
            line: 0,
        }
    }
}

impl Iterator for TextRows {
    type Item = Result<Row, MetatabError>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            self.line += 1;
            if let Some(row) = parse_line(&line) {
                return Some(Ok(row));
            }
        }
        None
    }
}

impl RowGenerator for TextRows {
    fn path(&self) -> &str {
        &self.path
    }

    fn line_number(&self) -> Option<usize> {
        Some(self.line)
    }
}

/// Parse one line of the text format; `None` for blank and comment lines.
pub(crate) fn parse_line(line: &str) -> Option<Row> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (term, rest) = match line.strip_prefix("====") {
        Some(name) => ("Section", name.trim_start_matches('=')),
        None => line.split_once(':').unwrap_or((line, "")),
    };
    let mut row = vec![term.trim().to_owned()];
    row.extend(split_values(rest));
    Some(row)
}

fn split_values(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => {
                let part = std::mem::take(&mut current);
                parts.push(part.trim().to_owned());
            }
            _ => current.push(c),
        }
    }
    parts.push(current.trim().to_owned());
    parts
}

/// Escape a cell for the text format.
pub(crate) fn escape_value(s: &str) -> String {
    s.replace('|', "\\|")
}

/// Build the generator matching a source's format from its bytes.
pub fn rows_from_bytes(
    source: &SourceRef,
    bytes: Vec<u8>,
) -> Result<Box<dyn RowGenerator>, MetatabError> {
    let path = source.display_name();
    match source.format() {
        SourceFormat::Csv => Ok(Box::new(CsvRows::from_bytes(path, bytes))),
        SourceFormat::Lines => {
            let text = String::from_utf8(bytes)
                .map_err(|e| MetatabError::generate(&path, format!("not UTF-8 text: {}", e)))?;
            Ok(Box::new(TextRows::new(path, &text)))
        }
    }
}
