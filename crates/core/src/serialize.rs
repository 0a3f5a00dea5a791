//! Writing documents back out as rows, CSV or line-oriented text.
//!
//! Each section other than `Root` is introduced by a blank row and a
//! `Section` row carrying its header columns. A term's row holds its value
//! followed by the values of terminal children named by those headers.
//! The remaining children follow in their original order: terminal ones as
//! `Parent.Child` rows, non-terminal ones recursively.

use std::path::Path;

use crate::doc::Document;
use crate::error::MetatabError;
use crate::generate::{escape_value, Row};
use crate::term::TermId;

fn trim_row(mut row: Row) -> Row {
    while row.len() > 1 && row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

impl Document {
    fn term_rows(&self, id: TermId, headers: &[String], out: &mut Vec<Row>) {
        let term = self.term(id);
        let name = if term.is_root_child() {
            term.record_term().to_owned()
        } else {
            term.join()
        };
        let mut row = vec![name, term.value().unwrap_or("").to_owned()];
        let mut used = vec![false; term.children().len()];

        for header in headers {
            let slot = term.children().iter().enumerate().position(|(i, c)| {
                let c = self.term(*c);
                !used[i]
                    && c.is_terminal()
                    && c.value().is_some()
                    && c.record_term().eq_ignore_ascii_case(header)
            });
            match slot {
                Some(i) => {
                    used[i] = true;
                    let value = self.term(term.children()[i]).value().unwrap_or("");
                    row.push(value.to_owned());
                }
                None => row.push(String::new()),
            }
        }
        out.push(trim_row(row));

        // Remaining children, in their original order.
        for (i, child) in term.children().iter().enumerate() {
            if used[i] {
                continue;
            }
            let c = self.term(*child);
            if c.is_terminal() {
                let name = format!("{}.{}", term.record_term(), c.record_term());
                out.push(trim_row(vec![name, c.value().unwrap_or("").to_owned()]));
            } else {
                self.term_rows(*child, headers, out);
            }
        }
    }

    /// The document as rows, `Root` first.
    pub fn rows(&self) -> Vec<Row> {
        let mut out = Vec::new();
        for (_, section) in self.sections() {
            let headers = section.property_names();
            if !section.is_root() {
                out.push(vec![String::new()]);
                let mut row = vec!["Section".to_owned(), section.name().to_owned()];
                row.extend(headers.iter().cloned());
                out.push(row);
            }
            for id in section.terms() {
                self.term_rows(*id, headers, &mut out);
            }
        }
        out
    }

    /// The document as CSV text.
    pub fn as_csv(&self) -> Result<String, MetatabError> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        for row in self.rows() {
            writer.write_record(&row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| MetatabError::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| MetatabError::Conversion(e.to_string()))
    }

    /// Write the document as CSV to `path`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), MetatabError> {
        let text = self.as_csv()?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The document in the line-oriented text format.
    pub fn as_lines(&self) -> String {
        let mut out = String::new();
        for row in self.rows() {
            let Some((term, cells)) = row.split_first() else {
                continue;
            };
            if term.is_empty() {
                out.push('\n');
                continue;
            }
            let cells: Vec<String> = cells.iter().map(|c| escape_value(c)).collect();
            if cells.is_empty() {
                out.push_str(&format!("{}:\n", term));
            } else {
                out.push_str(&format!("{}: {}\n", term, cells.join(" | ")));
            }
        }
        out
    }
}
