//! Error types for the Metatab pipeline.
//!
//! Two layers: [`ParseError`] is a non-fatal diagnostic record collected on
//! the document while parsing continues; [`MetatabError`] is what fallible
//! operations return when they cannot continue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// A source could not be read or decoded into rows.
    Generate,
    /// An `Include` or `Declare` target could not be resolved or would cycle.
    Include,
    /// A declaration references an undeclared section or unknown base term.
    Declaration,
    /// A term could not be linked into the tree.
    Parse,
    /// A document could not be converted to another format.
    Conversion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Generate => "generate",
            ErrorKind::Include => "include",
            ErrorKind::Declaration => "declaration",
            ErrorKind::Parse => "parse",
            ErrorKind::Conversion => "conversion",
        };
        f.write_str(s)
    }
}

/// A diagnostic tied to a location in a source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub file: String,
    pub row: usize,
    pub col: usize,
    pub term: String,
    pub message: String,
}

impl ParseError {
    pub fn new(
        kind: ErrorKind,
        file: &str,
        row: usize,
        col: usize,
        term: &str,
        message: impl Into<String>,
    ) -> Self {
        ParseError {
            kind,
            file: file.to_owned(),
            row,
            col,
            term: term.to_owned(),
            message: message.into(),
        }
    }

    pub fn parse(file: &str, row: usize, col: usize, term: &str, message: impl Into<String>) -> Self {
        ParseError::new(ErrorKind::Parse, file, row, col, term, message)
    }

    pub fn include(
        file: &str,
        row: usize,
        col: usize,
        term: &str,
        message: impl Into<String>,
    ) -> Self {
        ParseError::new(ErrorKind::Include, file, row, col, term, message)
    }

    pub fn declaration(
        file: &str,
        row: usize,
        col: usize,
        term: &str,
        message: impl Into<String>,
    ) -> Self {
        ParseError::new(ErrorKind::Declaration, file, row, col, term, message)
    }

    /// Serialize as the `{file, row, col, term, error}` record used in
    /// document error listings.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "file":  self.file,
            "row":   self.row,
            "col":   self.col,
            "term":  self.term,
            "error": self.message,
        })
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error in {}:{}:{} ({}): {}",
            self.kind, self.file, self.row, self.col, self.term, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Errors that stop an operation.
#[derive(Debug, thiserror::Error)]
pub enum MetatabError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The top-level source could not produce rows.
    #[error("cannot generate rows from '{path}': {message}")]
    Generate { path: String, message: String },

    /// An include or declaration failure escalated by strict configuration.
    #[error("{0}")]
    Include(ParseError),

    /// CSV encoding or decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A document could not be converted.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A term-level API call was given a term it cannot accept.
    #[error("invalid term '{term}': {message}")]
    InvalidTerm { term: String, message: String },

    /// A section lookup failed.
    #[error("no section '{name}'; sections are: {available}")]
    UnknownSection { name: String, available: String },

    /// Rows were loaded into a document that already holds a parse.
    #[error("document has already been loaded")]
    AlreadyLoaded,
}

impl MetatabError {
    pub(crate) fn generate(path: &str, message: impl Into<String>) -> Self {
        MetatabError::Generate {
            path: path.to_owned(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_term(term: &str, message: impl Into<String>) -> Self {
        MetatabError::InvalidTerm {
            term: term.to_owned(),
            message: message.into(),
        }
    }
}
