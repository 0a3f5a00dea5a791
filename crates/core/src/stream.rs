//! Lexical pass: rows to raw terms, with `Include` and `Declare` splicing.
//!
//! The stream walks a stack of frames, one per open source. A `Root.Include`
//! or `Root.Declare` row is yielded, then the target's terms are spliced in
//! place, bracketed by [`StreamItem::Enter`] and [`StreamItem::Leave`].
//! Every non-empty argument column of an ordinary row becomes a child term
//! whose record term is the column index, emitted right after its row.

use log::{debug, warn};
use std::collections::{HashSet, VecDeque};

use crate::config::Config;
use crate::declarations;
use crate::error::{MetatabError, ParseError};
use crate::generate::{rows_from_bytes, CsvRows, Row, RowGenerator};
use crate::source::{SourceProvider, SourceRef};
use crate::term::{Provenance, ROOT};

/// Whether terms belong to the document or to a declaration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Document,
    Declare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceKind {
    Include,
    Declare,
}

/// The parent part of a raw term name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentTerm {
    Root,
    /// `.Child`: the parent is the last parent-eligible term.
    Elided,
    Named(String),
}

/// A term as read from one row, before linking.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTerm {
    pub parent_term: ParentTerm,
    pub record_term: String,
    pub value: Option<String>,
    pub args: Vec<String>,
    pub provenance: Provenance,
    pub file_type: FileType,
    /// Synthesized from an argument column of the preceding row term.
    pub arg_child: bool,
}

impl RowTerm {
    fn from_row(row: Row, file: &str, line: usize, file_type: FileType) -> Option<RowTerm> {
        let mut cells = row.into_iter().map(|c| c.trim().to_owned());
        let name = cells.next()?;
        if name.is_empty() || name.starts_with('#') {
            return None;
        }
        let (parent_term, record_term) = match name.split_once('.') {
            Some(("", record)) => (ParentTerm::Elided, record.trim().to_owned()),
            Some((parent, record)) if parent.trim().eq_ignore_ascii_case(ROOT) => {
                (ParentTerm::Root, record.trim().to_owned())
            }
            Some((parent, record)) => (
                ParentTerm::Named(parent.trim().to_owned()),
                record.trim().to_owned(),
            ),
            None => (ParentTerm::Root, name),
        };
        if record_term.is_empty() {
            return None;
        }
        let value = cells.next().filter(|v| !v.is_empty());
        let args = cells.collect();
        Some(RowTerm {
            parent_term,
            record_term,
            value,
            args,
            provenance: Provenance::new(file, line, 1),
            file_type,
            arg_child: false,
        })
    }

    /// True for `Root.<record>`, case-insensitively.
    pub fn is_root(&self, record: &str) -> bool {
        self.parent_term == ParentTerm::Root && self.record_term.eq_ignore_ascii_case(record)
    }

    /// Qualified name for diagnostics.
    pub fn display_name(&self) -> String {
        let parent = match &self.parent_term {
            ParentTerm::Root => "root",
            ParentTerm::Elided => "",
            ParentTerm::Named(p) => p.as_str(),
        };
        format!("{}.{}", parent, self.record_term).to_lowercase()
    }

    fn arg_children(&self) -> Vec<RowTerm> {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, arg)| !arg.is_empty())
            .map(|(i, arg)| RowTerm {
                parent_term: ParentTerm::Named(self.record_term.clone()),
                record_term: i.to_string(),
                value: Some(arg.clone()),
                args: Vec::new(),
                provenance: Provenance::new(&self.provenance.file, self.provenance.row, i + 2),
                file_type: self.file_type,
                arg_child: true,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Term(RowTerm),
    /// The terms that follow come from a spliced source.
    Enter { kind: SpliceKind, source: String },
    /// A spliced source is exhausted. `section` is the last `Section` term of
    /// the enclosing source, `None` when it is still in `Root`.
    Leave {
        kind: SpliceKind,
        section: Option<RowTerm>,
    },
}

struct Frame {
    source: SourceRef,
    key: SourceRef,
    rows: Box<dyn RowGenerator>,
    rows_read: usize,
    terms_read: usize,
    pending: VecDeque<StreamItem>,
    file_type: FileType,
    kind: Option<SpliceKind>,
    last_section: Option<RowTerm>,
    origin: Option<RowTerm>,
}

/// Iterator of [`StreamItem`]s over a source and everything it splices in.
pub struct TermStream<'a> {
    provider: &'a dyn SourceProvider,
    config: &'a Config,
    frames: Vec<Frame>,
    active: HashSet<SourceRef>,
    declared: HashSet<String>,
    errors: Vec<ParseError>,
}

/// Open a source's rows, including the built-in declaration documents.
pub fn open_source(
    provider: &dyn SourceProvider,
    source: &SourceRef,
) -> Result<Box<dyn RowGenerator>, MetatabError> {
    if let SourceRef::Builtin(name) = source {
        let text = declarations::builtin(name).ok_or_else(|| {
            MetatabError::generate(name, "no built-in declaration document with this name")
        })?;
        return Ok(Box::new(CsvRows::from_bytes(
            name.clone(),
            text.as_bytes().to_vec(),
        )));
    }
    let bytes = provider
        .read_source(source)
        .map_err(|e| MetatabError::generate(&source.display_name(), e.to_string()))?;
    rows_from_bytes(source, bytes)
}

impl<'a> TermStream<'a> {
    /// Stream over rows already opened for `source`.
    pub fn new(
        provider: &'a dyn SourceProvider,
        config: &'a Config,
        source: SourceRef,
        rows: Box<dyn RowGenerator>,
    ) -> Self {
        let key = provider.canonicalize(&source).unwrap_or_else(|_| source.clone());
        let mut active = HashSet::new();
        active.insert(key.clone());
        TermStream {
            provider,
            config,
            frames: vec![Frame {
                source,
                key,
                rows,
                rows_read: 0,
                terms_read: 0,
                pending: VecDeque::new(),
                file_type: FileType::Document,
                kind: None,
                last_section: None,
                origin: None,
            }],
            active,
            declared: HashSet::new(),
            errors: Vec::new(),
        }
    }

    /// Stream over a source read through the provider.
    ///
    /// # Errors
    ///
    /// Returns [`MetatabError::Generate`] when the source cannot be read.
    pub fn open(
        provider: &'a dyn SourceProvider,
        config: &'a Config,
        source: SourceRef,
    ) -> Result<Self, MetatabError> {
        let rows = open_source(provider, &source)?;
        Ok(TermStream::new(provider, config, source, rows))
    }

    /// Declaration sources already processed; they will not be spliced again.
    pub fn with_declared<I: IntoIterator<Item = String>>(mut self, declared: I) -> Self {
        self.declared.extend(declared);
        self
    }

    /// Take the non-fatal errors recorded so far.
    pub fn take_errors(&mut self) -> Vec<ParseError> {
        std::mem::take(&mut self.errors)
    }

    fn pop_frame(&mut self) -> Option<StreamItem> {
        let frame = self.frames.pop()?;
        self.active.remove(&frame.key);
        let kind = frame.kind?;
        debug!(source = frame.source.display_name().as_str(); "leaving spliced source");
        let section = self.frames.last().and_then(|f| f.last_section.clone());
        Some(StreamItem::Leave { kind, section })
    }

    /// Record a failure of an include branch, or escalate it under
    /// `strict_includes`.
    fn branch_error(&mut self, term: &RowTerm, message: String) -> Result<(), MetatabError> {
        let error = ParseError::include(
            &term.provenance.file,
            term.provenance.row,
            term.provenance.col,
            &term.display_name(),
            message,
        );
        warn!(file = error.file.as_str(), row = error.row; "{}", error.message);
        if self.config.strict_includes() {
            return Err(MetatabError::Include(error));
        }
        self.errors.push(error);
        Ok(())
    }

    fn find_declaration(&self, base: &SourceRef, name: &str) -> Result<SourceRef, String> {
        let name = name.trim();
        if declarations::builtin(name).is_some() {
            let lc = name.to_ascii_lowercase();
            let builtin = lc.strip_suffix(".csv").unwrap_or(&lc);
            return Ok(SourceRef::Builtin(builtin.to_owned()));
        }
        if let url @ SourceRef::Url(_) = SourceRef::parse(name) {
            return Ok(url);
        }
        let with_ext = if name.contains('.') {
            None
        } else {
            Some(format!("{}.csv", name))
        };
        let mut candidates = Vec::new();
        for n in std::iter::once(name).chain(with_ext.as_deref()) {
            if let Ok(r) = self.provider.resolve(base, n) {
                candidates.push(r);
            }
            for dir in self.config.declaration_paths() {
                candidates.push(SourceRef::Path(dir.join(n)));
            }
        }
        candidates
            .into_iter()
            .find(|c| self.provider.exists(c))
            .ok_or_else(|| format!("no declaration document found for '{}'", name))
    }

    /// Resolve and push the frame for an `Include` or `Declare` term.
    fn splice(&mut self, term: &RowTerm, kind: SpliceKind) -> Result<(), MetatabError> {
        let Some(reference) = term.value.clone() else {
            return self.branch_error(term, format!("{} has no target", term.record_term));
        };
        let (base, depth, file_type) = match self.frames.last() {
            Some(f) => (f.source.clone(), self.frames.len(), f.file_type),
            None => return Ok(()),
        };

        let target = match kind {
            SpliceKind::Include => self
                .provider
                .resolve(&base, &reference)
                .map_err(|e| format!("cannot resolve include '{}': {}", reference, e)),
            SpliceKind::Declare => self.find_declaration(&base, &reference),
        };
        let target = match target {
            Ok(t) => t,
            Err(message) => return self.branch_error(term, message),
        };
        let key = match self.provider.canonicalize(&target) {
            Ok(k) => k,
            Err(e) => {
                return self.branch_error(
                    term,
                    format!("cannot open '{}': {}", target.display_name(), e),
                )
            }
        };

        if self.active.contains(&key) {
            let chain: Vec<String> = self
                .frames
                .iter()
                .map(|f| f.source.display_name())
                .chain(std::iter::once(target.display_name()))
                .collect();
            return self.branch_error(
                term,
                format!("include cycle detected: {}", chain.join(" \u{2192} ")),
            );
        }
        let key_name = key.display_name();
        if kind == SpliceKind::Declare && self.declared.contains(&key_name) {
            debug!(source = key_name.as_str(); "declaration already loaded");
            return Ok(());
        }
        if depth > self.config.max_include_depth() {
            return self.branch_error(
                term,
                format!(
                    "include depth limit of {} exceeded at '{}'",
                    self.config.max_include_depth(),
                    reference
                ),
            );
        }

        let rows = match open_source(self.provider, &target) {
            Ok(rows) => rows,
            Err(e) => return self.branch_error(term, e.to_string()),
        };
        if kind == SpliceKind::Declare {
            self.declared.insert(key_name.clone());
        }
        debug!(source = key_name.as_str(), depth = depth; "splicing source");

        let file_type = match kind {
            SpliceKind::Declare => FileType::Declare,
            SpliceKind::Include => file_type,
        };
        let mut pending = VecDeque::new();
        pending.push_back(StreamItem::Enter {
            kind,
            source: key_name,
        });
        self.active.insert(key.clone());
        self.frames.push(Frame {
            source: target,
            key,
            rows,
            rows_read: 0,
            terms_read: 0,
            pending,
            file_type,
            kind: Some(kind),
            last_section: None,
            origin: Some(term.clone()),
        });
        Ok(())
    }

    fn dispatch(&mut self, term: RowTerm) -> Result<StreamItem, MetatabError> {
        if term.is_root("include") {
            self.splice(&term, SpliceKind::Include)?;
        } else if term.is_root("declare") {
            self.splice(&term, SpliceKind::Declare)?;
        } else if term.is_root("section") {
            if let Some(frame) = self.frames.last_mut() {
                frame.last_section = Some(term.clone());
            }
        } else if !term.is_root("header") {
            if let Some(frame) = self.frames.last_mut() {
                frame.pending.extend(term.arg_children().into_iter().map(StreamItem::Term));
            }
        }
        Ok(StreamItem::Term(term))
    }
}

impl Iterator for TermStream<'_> {
    type Item = Result<StreamItem, MetatabError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frames.last_mut()?;
            if let Some(item) = frame.pending.pop_front() {
                return Some(Ok(item));
            }
            match frame.rows.next() {
                None => {
                    if let (Some(origin), 0) = (frame.origin.clone(), frame.terms_read) {
                        let message =
                            format!("'{}' produced no rows", frame.source.display_name());
                        if let Err(fatal) = self.branch_error(&origin, message) {
                            return Some(Err(fatal));
                        }
                    }
                    if let Some(item) = self.pop_frame() {
                        return Some(Ok(item));
                    }
                }
                Some(Err(e)) => {
                    let Some(origin) = frame.origin.clone() else {
                        self.frames.clear();
                        return Some(Err(e));
                    };
                    if let Err(fatal) = self.branch_error(&origin, e.to_string()) {
                        return Some(Err(fatal));
                    }
                    if let Some(item) = self.pop_frame() {
                        return Some(Ok(item));
                    }
                }
                Some(Ok(row)) => {
                    frame.rows_read += 1;
                    let line = frame.rows.line_number().unwrap_or(frame.rows_read);
                    let file = frame.rows.path().to_owned();
                    if let Some(term) = RowTerm::from_row(row, &file, line, frame.file_type) {
                        frame.terms_read += 1;
                        return Some(self.dispatch(term));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::ListRows;
    use crate::source::InMemoryProvider;
    use std::path::PathBuf;

    fn terms(items: &[StreamItem]) -> Vec<(String, Option<String>)> {
        items
            .iter()
            .filter_map(|i| match i {
                StreamItem::Term(t) => Some((t.display_name(), t.value.clone())),
                _ => None,
            })
            .collect()
    }

    fn run(provider: &dyn SourceProvider, config: &Config, rows: &[&[&str]]) -> (Vec<StreamItem>, Vec<ParseError>) {
        let source = SourceRef::Memory {
            name: "<rows>".into(),
            base_dir: Some(PathBuf::from("/docs")),
        };
        let mut stream = TermStream::new(
            provider,
            config,
            source,
            Box::new(ListRows::from_slices("<rows>", rows)),
        );
        let items: Vec<StreamItem> = stream.by_ref().map(|i| i.unwrap()).collect();
        (items, stream.take_errors())
    }

    #[test]
    fn skips_blank_and_comment_rows() {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let (items, _) = run(
            &provider,
            &config,
            &[&["#", "comment"], &[""], &[], &["Title", "Hello"]],
        );
        assert_eq!(terms(&items), vec![("root.title".into(), Some("Hello".into()))]);
    }

    #[test]
    fn splits_parent_on_first_dot() {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let (items, _) = run(&provider, &config, &[&["Table.Column", "id"], &[".Note", "x"]]);
        let StreamItem::Term(column) = &items[0] else { panic!("expected term") };
        assert_eq!(column.parent_term, ParentTerm::Named("Table".into()));
        let StreamItem::Term(note) = &items[1] else { panic!("expected term") };
        assert_eq!(note.parent_term, ParentTerm::Elided);
    }

    #[test]
    fn argument_columns_become_children() {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let (items, _) = run(&provider, &config, &[&["Datafile", "http://x", "", "y"]]);
        assert_eq!(items.len(), 2);
        let StreamItem::Term(child) = &items[1] else { panic!("expected term") };
        assert!(child.arg_child);
        assert_eq!(child.record_term, "1");
        assert_eq!(child.value.as_deref(), Some("y"));
        assert_eq!(child.provenance.col, 3);
    }

    #[test]
    fn section_and_header_rows_have_no_argument_children() {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let (items, _) = run(
            &provider,
            &config,
            &[&["Section", "Resources", "Name"], &["Header", "url", "Name"]],
        );
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn include_is_spliced_between_enter_and_leave() {
        let provider = InMemoryProvider::default().with_file("/docs/sub.csv", "Note,N1\n");
        let config = Config::default();
        let (items, errors) = run(
            &provider,
            &config,
            &[&["Title", "T"], &["Include", "sub.csv"], &["Name", "n"]],
        );
        assert!(errors.is_empty());
        assert!(matches!(items[2], StreamItem::Enter { kind: SpliceKind::Include, .. }));
        assert!(matches!(items[4], StreamItem::Leave { kind: SpliceKind::Include, .. }));
        assert_eq!(
            terms(&items),
            vec![
                ("root.title".into(), Some("T".into())),
                ("root.include".into(), Some("sub.csv".into())),
                ("root.note".into(), Some("N1".into())),
                ("root.name".into(), Some("n".into())),
            ]
        );
    }

    #[test]
    fn include_cycle_is_recorded_not_followed() {
        let provider = InMemoryProvider::default()
            .with_file("/docs/a.csv", "Include,b.csv\nNote,A\n")
            .with_file("/docs/b.csv", "Include,a.csv\nNote,B\n");
        let config = Config::default();
        let (items, errors) = run(&provider, &config, &[&["Include", "a.csv"]]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cycle"));
        let notes: Vec<_> = terms(&items)
            .into_iter()
            .filter(|(n, _)| n == "root.note")
            .collect();
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn missing_include_is_recorded() {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let (items, errors) = run(&provider, &config, &[&["Include", "nope.csv"], &["Title", "x"]]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].term, "root.include");
        assert_eq!(terms(&items).len(), 2);
    }

    #[test]
    fn strict_includes_escalate() {
        let provider = InMemoryProvider::default();
        let config = Config::default().with_strict_includes(true);
        let source = SourceRef::memory("<rows>");
        let mut stream = TermStream::new(
            &provider,
            &config,
            source,
            Box::new(ListRows::from_slices("<rows>", &[&["Include", "/nope.csv"]])),
        );
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(err, MetatabError::Include(_)));
    }

    #[test]
    fn builtin_declaration_is_spliced_once() {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let (items, errors) = run(
            &provider,
            &config,
            &[&["Declare", "metatab-latest"], &["Declare", "metatab-latest"]],
        );
        assert!(errors.is_empty());
        let enters = items
            .iter()
            .filter(|i| matches!(i, StreamItem::Enter { kind: SpliceKind::Declare, .. }))
            .count();
        assert_eq!(enters, 1);
        assert!(items.iter().any(|i| matches!(
            i,
            StreamItem::Term(t) if t.file_type == FileType::Declare
        )));
    }

    #[test]
    fn declaration_found_in_configured_directory() {
        let provider =
            InMemoryProvider::default().with_file("/decls/custom.csv", "DeclareSection,Extra\n");
        let config = Config::default().with_declaration_path("/decls");
        let (items, errors) = run(&provider, &config, &[&["Declare", "custom"]]);
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(terms(&items).contains(&("root.declaresection".into(), Some("Extra".into()))));
    }

    #[test]
    fn depth_limit_counts_spliced_sources() {
        let provider = InMemoryProvider::default()
            .with_file("/docs/a.csv", "Include,b.csv\n")
            .with_file("/docs/b.csv", "Note,deep\n");

        let config = Config::default().with_max_include_depth(2);
        let (items, errors) = run(&provider, &config, &[&["Include", "a.csv"]]);
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(terms(&items).iter().any(|(n, _)| n == "root.note"));

        let config = Config::default().with_max_include_depth(1);
        let (items, errors) = run(&provider, &config, &[&["Include", "a.csv"]]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("depth"));
        assert!(!terms(&items).iter().any(|(n, _)| n == "root.note"));
    }

    #[test]
    fn empty_include_is_recorded() {
        let provider =
            InMemoryProvider::default().with_file("/docs/empty.csv", "\n# nothing here\n");
        let config = Config::default();
        let (items, errors) = run(&provider, &config, &[&["Include", "empty.csv"], &["Title", "T"]]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::error::ErrorKind::Include);
        assert_eq!(errors[0].term, "root.include");
        assert!(errors[0].message.contains("no rows"));
        assert!(items.iter().any(|i| matches!(i, StreamItem::Leave { .. })));
        assert_eq!(terms(&items).len(), 2);
    }
}
