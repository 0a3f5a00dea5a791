//! Term data and qualified-name helpers.
//!
//! A term is named `Parent.Record`. Names compare case-insensitively but the
//! case written in the source is kept for output. A name without a dot has
//! the parent `Root`.

use serde::{Deserialize, Serialize};

/// Parent name of top-level terms.
pub const ROOT: &str = "Root";

/// Key a term's own value is stored under in dictionaries when no value
/// name is declared.
pub const DEFAULT_VALUE_NAME: &str = "@value";

/// Handle of a term in a document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub(crate) usize);

/// Handle of a section in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub(crate) usize);

/// How repeated children with the same record term fold into a dictionary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildPropertyType {
    /// Scalar on first occurrence, promoted to a list on the second.
    #[default]
    Any,
    /// Last occurrence wins.
    Scalar,
    /// Always a list.
    Sequence,
}

impl ChildPropertyType {
    /// Parse a declared type name. Unknown names fall back to `Any`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "scalar" => ChildPropertyType::Scalar,
            "sequence" => ChildPropertyType::Sequence,
            _ => ChildPropertyType::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChildPropertyType::Any => "any",
            ChildPropertyType::Scalar => "scalar",
            ChildPropertyType::Sequence => "sequence",
        }
    }
}

/// Where a term was read from. `col` is 1 for row terms and `i + 2` for
/// the child synthesized from argument column `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file: String,
    pub row: usize,
    pub col: usize,
}

impl Provenance {
    pub fn new(file: &str, row: usize, col: usize) -> Self {
        Provenance {
            file: file.to_owned(),
            row,
            col,
        }
    }
}

/// A term with its tree links. Links are empty until the term is placed
/// in a [`Document`](crate::doc::Document).
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub(crate) parent_term: String,
    pub(crate) record_term: String,
    pub(crate) value: Option<String>,
    pub(crate) args: Vec<String>,
    pub(crate) provenance: Provenance,
    pub(crate) term_value_name: String,
    pub(crate) child_property_type: ChildPropertyType,
    pub(crate) valid: Option<bool>,
    pub(crate) parent: Option<TermId>,
    pub(crate) children: Vec<TermId>,
    pub(crate) section: Option<SectionId>,
}

impl Term {
    pub fn new(parent_term: &str, record_term: &str, value: Option<&str>) -> Self {
        Term {
            parent_term: parent_term.trim().to_owned(),
            record_term: record_term.trim().to_owned(),
            value: value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned),
            args: Vec::new(),
            provenance: Provenance::default(),
            term_value_name: DEFAULT_VALUE_NAME.to_owned(),
            child_property_type: ChildPropertyType::Any,
            valid: None,
            parent: None,
            children: Vec::new(),
            section: None,
        }
    }

    /// Build a term from a possibly qualified name such as `Root.Title`,
    /// `Title` or `Table.Column`.
    pub fn from_name(name: &str, value: Option<&str>) -> Self {
        let (parent, record) = split_term(name);
        Term::new(&parent, &record, value)
    }

    pub fn parent_term(&self) -> &str {
        &self.parent_term
    }

    pub fn record_term(&self) -> &str {
        &self.record_term
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn term_value_name(&self) -> &str {
        &self.term_value_name
    }

    pub fn child_property_type(&self) -> ChildPropertyType {
        self.child_property_type
    }

    /// Whether the term's qualified name is declared. `None` when no
    /// declaration lookup has been made.
    pub fn valid(&self) -> Option<bool> {
        self.valid
    }

    pub fn parent(&self) -> Option<TermId> {
        self.parent
    }

    pub fn children(&self) -> &[TermId] {
        &self.children
    }

    pub fn section(&self) -> Option<SectionId> {
        self.section
    }

    /// `Parent.Record` as written.
    pub fn join(&self) -> String {
        format!("{}.{}", self.parent_term, self.record_term)
    }

    /// `parent.record`, lowercased.
    pub fn join_lc(&self) -> String {
        self.join().to_lowercase()
    }

    pub fn record_term_lc(&self) -> String {
        self.record_term.to_lowercase()
    }

    pub fn parent_term_lc(&self) -> String {
        self.parent_term.to_lowercase()
    }

    pub fn is_root_child(&self) -> bool {
        self.parent_term.eq_ignore_ascii_case(ROOT)
    }

    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }

    /// Match against a qualified name where either part may be `*`.
    pub fn term_is(&self, pattern: &str) -> bool {
        term_matches(&self.parent_term, &self.record_term, pattern)
    }
}

/// Split a qualified name on its first dot. Names without a dot get the
/// parent `Root`; `.Child` yields an empty parent.
pub fn split_term(name: &str) -> (String, String) {
    match name.split_once('.') {
        Some((parent, record)) => (parent.trim().to_owned(), record.trim().to_owned()),
        None => (ROOT.to_owned(), name.trim().to_owned()),
    }
}

pub fn split_term_lower(name: &str) -> (String, String) {
    let (p, r) = split_term(name);
    (p.to_lowercase(), r.to_lowercase())
}

/// Lowercased `parent.record` with the `Root` default applied.
pub fn normalize_term(name: &str) -> String {
    let (p, r) = split_term_lower(name);
    format!("{}.{}", p, r)
}

pub(crate) fn term_matches(parent_term: &str, record_term: &str, pattern: &str) -> bool {
    let (pp, pr) = split_term_lower(pattern);
    let part_matches = |pat: &str, actual: &str| pat == "*" || pat == actual.to_lowercase();
    part_matches(&pp, parent_term) && part_matches(&pr, record_term)
}
