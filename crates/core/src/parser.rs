//! Semantic pass: link raw terms into a tree and apply declarations.
//!
//! [`TermParser`] consumes a [`TermStream`] and produces [`ParseEvent`]s.
//! For each raw term it applies synonyms, resolves elided parents, renames
//! argument children through the current header map, looks up the term's
//! declaration, and decides which earlier term (or section) it belongs to.
//! Terms read from declaration documents update the [`Declarations`] and are
//! not emitted.

use log::{debug, trace, warn};
use std::collections::HashMap;

use crate::declarations::{DeclaredTerm, Declarations};
use crate::error::{MetatabError, ParseError};
use crate::stream::{FileType, ParentTerm, RowTerm, SpliceKind, StreamItem, TermStream};
use crate::term::{split_term, Provenance, Term, DEFAULT_VALUE_NAME, ROOT};

/// Output of the semantic pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// A `Section` row. Sections with the same name coalesce.
    Section {
        name: String,
        args: Vec<String>,
        provenance: Provenance,
    },
    /// A `Header` row overriding the header columns of `section`.
    Header {
        section: String,
        args: Vec<String>,
        value_name: String,
    },
    /// A linked term. `parent` is the `index` of an earlier term; `None`
    /// places the term at the top level of `section`.
    Term {
        index: usize,
        term: Term,
        parent: Option<usize>,
        section: String,
    },
}

/// Linking state. Saved and restored around declaration documents.
#[derive(Debug, Clone)]
struct LinkContext {
    section: String,
    param_map: Vec<Option<String>>,
    default_value_name: String,
    last_parent: Option<usize>,
    last_row_term: Option<usize>,
    last_term_map: HashMap<String, usize>,
}

impl LinkContext {
    fn new() -> Self {
        LinkContext {
            section: ROOT.to_owned(),
            param_map: Vec::new(),
            default_value_name: DEFAULT_VALUE_NAME.to_owned(),
            last_parent: None,
            last_row_term: None,
            last_term_map: HashMap::new(),
        }
    }
}

enum OpenDeclaration {
    Term {
        index: usize,
        decl: DeclaredTerm,
        provenance: Provenance,
    },
    ValueSet {
        index: usize,
        name: String,
    },
}

fn param_map(args: &[String]) -> Vec<Option<String>> {
    args.iter()
        .map(|a| a.trim())
        .map(|a| if a.is_empty() { None } else { Some(a.to_owned()) })
        .collect()
}

fn trim_trailing_empty(mut args: Vec<String>) -> Vec<String> {
    while args.last().is_some_and(|a| a.trim().is_empty()) {
        args.pop();
    }
    args
}

pub struct TermParser<'a> {
    stream: TermStream<'a>,
    declarations: Declarations,
    errors: Vec<ParseError>,
    context: LinkContext,
    saved: Vec<LinkContext>,
    record_terms: Vec<String>,
    open: Option<OpenDeclaration>,
}

impl<'a> TermParser<'a> {
    /// Parse `stream` starting from `declarations`. Declaration sources
    /// already loaded into `declarations` are not spliced again.
    pub fn new(stream: TermStream<'a>, declarations: Declarations) -> Self {
        let stream = stream.with_declared(declarations.loaded_sources().cloned());
        TermParser {
            stream,
            declarations,
            errors: Vec::new(),
            context: LinkContext::new(),
            saved: Vec::new(),
            record_terms: Vec::new(),
            open: None,
        }
    }

    pub fn declarations(&self) -> &Declarations {
        &self.declarations
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Consume the parser, returning the final declarations and the
    /// recorded errors.
    pub fn into_parts(mut self) -> (Declarations, Vec<ParseError>) {
        self.finish_declaration();
        self.errors.extend(self.stream.take_errors());
        (self.declarations, self.errors)
    }

    fn record(&mut self, error: ParseError) {
        warn!(file = error.file.as_str(), row = error.row, col = error.col; "{}", error.message);
        self.errors.push(error);
    }

    fn parse_error(&mut self, rt: &RowTerm, message: String) {
        let p = &rt.provenance;
        let error = ParseError::parse(&p.file, p.row, p.col, &rt.display_name(), message);
        self.record(error);
    }

    fn enter_section(&mut self, name: &str, args: &[String]) {
        self.context.section = name.to_owned();
        self.context.param_map = param_map(args);
        self.context.default_value_name = DEFAULT_VALUE_NAME.to_owned();
        self.context.last_parent = None;
        self.context.last_row_term = None;
    }

    fn enter(&mut self, kind: SpliceKind, source: &str) {
        self.finish_declaration();
        if kind == SpliceKind::Declare {
            self.declarations.mark_loaded(source);
            let outer = std::mem::replace(&mut self.context, LinkContext::new());
            self.saved.push(outer);
        }
    }

    fn leave(&mut self, kind: SpliceKind, section: Option<RowTerm>) {
        self.finish_declaration();
        match kind {
            SpliceKind::Declare => {
                if let Some(outer) = self.saved.pop() {
                    self.context = outer;
                }
            }
            SpliceKind::Include => {
                let (name, args) = match section {
                    Some(s) => (s.value.unwrap_or_else(|| ROOT.to_owned()), s.args),
                    None => (ROOT.to_owned(), Vec::new()),
                };
                if !name.eq_ignore_ascii_case(&self.context.section) {
                    debug!(section = name.as_str(); "restoring section after include");
                    let args = if args.iter().any(|a| !a.trim().is_empty()) {
                        args
                    } else {
                        self.declarations.section_args(&name)
                    };
                    self.enter_section(&name, &args);
                }
            }
        }
    }

    fn finish_declaration(&mut self) {
        if let Some(OpenDeclaration::Term {
            decl, provenance, ..
        }) = self.open.take()
        {
            if let Err(message) = self.declarations.commit_term(decl) {
                let error = ParseError::declaration(
                    &provenance.file,
                    provenance.row,
                    provenance.col,
                    "root.declareterm",
                    message,
                );
                self.record(error);
            }
        }
    }

    fn remap(&self, record_term: &str) -> String {
        record_term
            .parse::<usize>()
            .ok()
            .and_then(|i| self.context.param_map.get(i).cloned().flatten())
            .unwrap_or_else(|| record_term.to_owned())
    }

    fn apply_synonym(&self, parent: &str, record: &str) -> (String, String) {
        let key = format!("{}.{}", parent, record).to_lowercase();
        match self.declarations.synonym_for(&key) {
            Some(canonical) => split_term(canonical),
            None => (parent.to_owned(), record.to_owned()),
        }
    }

    fn section(&mut self, rt: RowTerm) -> Option<ParseEvent> {
        let Some(name) = rt.value.clone() else {
            self.parse_error(&rt, "Section row has no section name".to_owned());
            return None;
        };
        let args = if rt.args.iter().any(|a| !a.trim().is_empty()) {
            trim_trailing_empty(rt.args)
        } else {
            self.declarations.section_args(&name)
        };
        self.enter_section(&name, &args);
        debug!(section = name.as_str(); "entering section");
        if rt.file_type == FileType::Declare {
            return None;
        }
        Some(ParseEvent::Section {
            name,
            args,
            provenance: rt.provenance,
        })
    }

    fn header(&mut self, rt: RowTerm) -> Option<ParseEvent> {
        let args = trim_trailing_empty(rt.args);
        let value_name = rt
            .value
            .map(|v| v.to_lowercase())
            .unwrap_or_else(|| DEFAULT_VALUE_NAME.to_owned());
        self.context.param_map = param_map(&args);
        self.context.default_value_name = value_name.clone();
        if rt.file_type == FileType::Declare {
            return None;
        }
        Some(ParseEvent::Header {
            section: self.context.section.clone(),
            args,
            value_name,
        })
    }

    /// Apply a linked term to the declaration tables when it is a
    /// declaration or a child of the open declaration.
    fn declare(&mut self, term: &Term, index: usize, parent: Option<usize>) {
        let value = term.value().unwrap_or("");
        match term.join_lc().as_str() {
            "root.declaresection" => {
                if value.is_empty() {
                    self.declaration_error(term, "DeclareSection has no section name");
                } else {
                    let args: Vec<&str> = term.args().iter().map(String::as_str).collect();
                    self.declarations.declare_section(value, &args);
                }
            }
            "root.declareterm" => {
                self.open = Some(OpenDeclaration::Term {
                    index,
                    decl: DeclaredTerm::new(value),
                    provenance: term.provenance().clone(),
                });
            }
            "root.declarevalueset" => {
                if value.is_empty() {
                    self.declaration_error(term, "DeclareValueSet has no name");
                } else {
                    self.open = Some(OpenDeclaration::ValueSet {
                        index,
                        name: value.to_owned(),
                    });
                }
            }
            "root.synonym" => {
                let canonical = term.args().iter().find(|a| !a.trim().is_empty());
                match canonical {
                    Some(canonical) if !value.is_empty() => {
                        let canonical = canonical.clone();
                        self.declarations.add_synonym(value, &canonical);
                    }
                    _ => self.declaration_error(term, "Synonym needs a term and a canonical name"),
                }
            }
            _ => match (&mut self.open, parent) {
                (Some(OpenDeclaration::Term { index: open, decl, .. }), Some(p)) if p == *open => {
                    decl.set_property(term.record_term(), value);
                }
                (Some(OpenDeclaration::ValueSet { index: open, name }), Some(p))
                    if p == *open && term.record_term().eq_ignore_ascii_case("value") =>
                {
                    if !value.is_empty() {
                        let display = term.args().iter().find(|a| !a.trim().is_empty());
                        self.declarations
                            .add_value(name, value, display.map(String::as_str));
                    }
                }
                _ => {}
            },
        }
    }

    fn declaration_error(&mut self, term: &Term, message: &str) {
        let p = term.provenance();
        let error = ParseError::declaration(&p.file, p.row, p.col, &term.join_lc(), message);
        self.record(error);
    }

    fn process(&mut self, rt: RowTerm) -> Option<ParseEvent> {
        let continues_declaration = rt.arg_child
            || rt.parent_term == ParentTerm::Elided
            || matches!(&rt.parent_term, ParentTerm::Named(p)
                if p.eq_ignore_ascii_case("declareterm") || p.eq_ignore_ascii_case("declarevalueset"));
        if !continues_declaration {
            self.finish_declaration();
        }

        if rt.is_root("section") {
            return self.section(rt);
        }
        if rt.is_root("header") {
            return self.header(rt);
        }

        let linked = match &rt.parent_term {
            _ if rt.arg_child => self.context.last_row_term.map(|p| {
                let (parent, record) =
                    self.apply_synonym(&self.record_terms[p], &self.remap(&rt.record_term));
                (Some(p), parent, record)
            }),
            ParentTerm::Elided => match self.context.last_parent {
                Some(p) => {
                    let (parent, record) = self.apply_synonym(&self.record_terms[p], &rt.record_term);
                    Some((Some(p), parent, record))
                }
                None => {
                    self.parse_error(
                        &rt,
                        format!("no parent term for elided term '.{}'", rt.record_term),
                    );
                    None
                }
            },
            ParentTerm::Root | ParentTerm::Named(_) => {
                let parent_name = match &rt.parent_term {
                    ParentTerm::Named(p) => p.as_str(),
                    _ => ROOT,
                };
                let (parent, record) = self.apply_synonym(parent_name, &rt.record_term);
                if parent.eq_ignore_ascii_case(ROOT) {
                    Some((None, parent, record))
                } else {
                    match self.context.last_term_map.get(&parent.to_lowercase()) {
                        Some(p) => Some((Some(*p), parent, record)),
                        None => {
                            self.parse_error(
                                &rt,
                                format!(
                                    "parent term '{}' not found for '{}.{}'",
                                    parent, parent, record
                                ),
                            );
                            None
                        }
                    }
                }
            }
        };
        let Some((parent_index, parent_term, record_term)) = linked else {
            if !rt.arg_child {
                self.context.last_row_term = None;
            }
            return None;
        };

        let mut term = Term::new(&parent_term, &record_term, rt.value.as_deref());
        term.args = rt.args;
        term.provenance = rt.provenance;
        self.declarations
            .decorate(&mut term, &self.context.default_value_name);

        let index = self.record_terms.len();
        self.record_terms.push(term.record_term().to_owned());
        if !rt.arg_child {
            self.context.last_row_term = Some(index);
            if rt.parent_term != ParentTerm::Elided {
                self.context.last_parent = Some(index);
                self.context
                    .last_term_map
                    .insert(term.record_term_lc(), index);
            }
        }

        self.declare(&term, index, parent_index);
        if rt.file_type == FileType::Declare {
            return None;
        }
        trace!(term = term.join().as_str(), row = term.provenance().row; "parsed term");
        Some(ParseEvent::Term {
            index,
            term,
            parent: parent_index,
            section: self.context.section.clone(),
        })
    }
}

impl Iterator for TermParser<'_> {
    type Item = Result<ParseEvent, MetatabError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = match self.stream.next() {
                None => {
                    self.finish_declaration();
                    self.errors.extend(self.stream.take_errors());
                    return None;
                }
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(item)) => item,
            };
            self.errors.extend(self.stream.take_errors());
            let event = match item {
                StreamItem::Enter { kind, source } => {
                    self.enter(kind, &source);
                    None
                }
                StreamItem::Leave { kind, section } => {
                    self.leave(kind, section);
                    None
                }
                StreamItem::Term(rt) => self.process(rt),
            };
            if let Some(event) = event {
                return Some(Ok(event));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::generate::ListRows;
    use crate::source::{InMemoryProvider, SourceRef};

    fn parse(rows: &[&[&str]]) -> (Vec<ParseEvent>, Declarations, Vec<ParseError>) {
        let provider = InMemoryProvider::default();
        let config = Config::default();
        let stream = TermStream::new(
            &provider,
            &config,
            SourceRef::memory("<rows>"),
            Box::new(ListRows::from_slices("<rows>", rows)),
        );
        let mut parser = TermParser::new(stream, Declarations::bootstrap());
        let events: Vec<ParseEvent> = parser.by_ref().map(|e| e.unwrap()).collect();
        let (decls, errors) = parser.into_parts();
        (events, decls, errors)
    }

    fn term_events(events: &[ParseEvent]) -> Vec<(usize, String, Option<String>, Option<usize>)> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Term {
                    index,
                    term,
                    parent,
                    ..
                } => Some((*index, term.join(), term.value().map(str::to_owned), *parent)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn argument_children_take_header_names() {
        let (events, _, errors) = parse(&[
            &["Section", "Resources", "Name", "Description"],
            &["Datafile", "http://x/a.csv", "y", "a y file"],
        ]);
        assert!(errors.is_empty());
        let terms = term_events(&events);
        assert_eq!(terms[0].1, "Root.Datafile");
        assert_eq!(terms[1], (1, "Datafile.Name".into(), Some("y".into()), Some(0)));
        assert_eq!(
            terms[2],
            (2, "Datafile.Description".into(), Some("a y file".into()), Some(0))
        );
    }

    #[test]
    fn blank_header_keeps_column_index() {
        let (events, _, _) = parse(&[
            &["Section", "Resources", "", "Description"],
            &["Datafile", "u", "a", "b"],
        ]);
        let terms = term_events(&events);
        assert_eq!(terms[1].1, "Datafile.0");
        assert_eq!(terms[2].1, "Datafile.Description");
    }

    #[test]
    fn elided_term_attaches_to_last_parent() {
        let (events, _, errors) = parse(&[
            &["Wrangler", "Alice"],
            &[".Email", "alice@example.com"],
            &[".Tel", "555"],
        ]);
        assert!(errors.is_empty());
        let terms = term_events(&events);
        assert_eq!(terms[1], (1, "Wrangler.Email".into(), Some("alice@example.com".into()), Some(0)));
        assert_eq!(terms[2].3, Some(0));
    }

    #[test]
    fn elided_term_without_parent_is_dropped() {
        let (events, _, errors) = parse(&[&[".Email", "x", "extra"], &["Title", "T"]]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::error::ErrorKind::Parse);
        let terms = term_events(&events);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].1, "Root.Title");
    }

    #[test]
    fn explicit_parent_must_exist() {
        let (events, _, errors) = parse(&[&["Table.Column", "id"]]);
        assert!(term_events(&events).is_empty());
        assert!(errors[0].message.contains("not found"));
    }

    #[test]
    fn explicit_parent_resolves_across_rows() {
        let (events, _, errors) = parse(&[
            &["Table", "people"],
            &["Table.Column", "id"],
            &[".DataType", "integer"],
            &["Table.Column", "name"],
        ]);
        assert!(errors.is_empty());
        let terms = term_events(&events);
        assert_eq!(terms[1].3, Some(0));
        assert_eq!(terms[2], (2, "Column.DataType".into(), Some("integer".into()), Some(1)));
        assert_eq!(terms[3].3, Some(0));
    }

    #[test]
    fn section_resets_elided_parent() {
        let (_, _, errors) = parse(&[&["Title", "T"], &["Section", "Contacts"], &[".Email", "x"]]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn header_overrides_param_map_and_value_name() {
        let (events, _, _) = parse(&[
            &["Section", "Resources", "Name"],
            &["Header", "url", "Title"],
            &["Datafile", "http://x", "T"],
        ]);
        assert!(events.iter().any(|e| matches!(
            e,
            ParseEvent::Header { value_name, .. } if value_name == "url"
        )));
        let datafile = events
            .iter()
            .find_map(|e| match e {
                ParseEvent::Term { term, .. } if term.record_term() == "Datafile" => Some(term),
                _ => None,
            })
            .unwrap();
        assert_eq!(datafile.term_value_name(), "url");
        assert_eq!(term_events(&events)[1].1, "Datafile.Title");
    }

    #[test]
    fn declare_term_with_elided_synonym_takes_effect() {
        let (events, decls, errors) = parse(&[
            &["DeclareTerm", "Root.Creator"],
            &[".Synonym", "Root.Wrangler"],
            &["Creator", "Bob"],
        ]);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(decls.synonym_for("root.creator"), Some("Root.Wrangler"));
        let terms = term_events(&events);
        assert_eq!(terms.last().unwrap().1, "Root.Wrangler");
        assert_eq!(terms.last().unwrap().2.as_deref(), Some("Bob"));
    }

    #[test]
    fn synonym_row_adds_synonym() {
        let (events, _, _) = parse(&[&["Synonym", "Author", "Creator"], &["Author", "Ann"]]);
        let terms = term_events(&events);
        assert_eq!(terms.last().unwrap().1, "Root.Creator");
    }

    #[test]
    fn undeclared_section_in_declaration_is_recorded() {
        let (_, decls, errors) = parse(&[
            &["DeclareTerm", "Root.Thing"],
            &[".Section", "Nowhere"],
        ]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::error::ErrorKind::Declaration);
        assert!(decls.term("Root.Thing").is_none());
    }

    #[test]
    fn declaration_document_terms_are_not_emitted() {
        let (events, decls, errors) = parse(&[&["Declare", "metatab-latest"], &["Title", "Hello"]]);
        assert!(errors.is_empty(), "{:?}", errors);
        let terms = term_events(&events);
        assert_eq!(
            terms.iter().map(|t| t.1.as_str()).collect::<Vec<_>>(),
            vec!["Root.Declare", "Root.Title"]
        );
        assert!(decls.section("contacts").is_some());
        assert_eq!(
            decls.section_args("Contacts"),
            vec!["Email", "Organization", "Tel", "Url"]
        );
        assert!(decls.term("Datafile.Name").is_some());
        assert!(decls.value_set_for("Root.Format").is_some());
    }

    #[test]
    fn section_without_headers_uses_declared_args() {
        let (events, _, _) = parse(&[
            &["Declare", "metatab-latest"],
            &["Section", "Contacts"],
            &["Wrangler", "Alice", "alice@example.com"],
        ]);
        assert!(events.iter().any(|e| matches!(
            e,
            ParseEvent::Section { name, args, .. } if name == "Contacts" && args.len() == 4
        )));
        let terms = term_events(&events);
        assert_eq!(terms.last().unwrap().1, "Wrangler.Email");
    }

    #[test]
    fn decoration_marks_validity() {
        let (events, _, _) = parse(&[
            &["Declare", "metatab-latest"],
            &["Title", "T"],
            &["Frobnicate", "x"],
        ]);
        let valid: Vec<(String, Option<bool>)> = events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Term { term, .. } => Some((term.record_term().to_owned(), term.valid())),
                _ => None,
            })
            .collect();
        assert!(valid.contains(&("Title".into(), Some(true))));
        assert!(valid.contains(&("Frobnicate".into(), Some(false))));
    }
}
