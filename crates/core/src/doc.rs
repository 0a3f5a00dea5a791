//! The document model.
//!
//! A [`Document`] owns every term in an arena and hands out [`TermId`] and
//! [`SectionId`] handles. Terms link to their parent, children and section
//! through those handles. Read access goes through [`TermRef`]; mutation
//! goes through methods on the document that take a handle.

use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::declarations::Declarations;
use crate::error::{MetatabError, ParseError};
use crate::generate::{CsvRows, ListRows, Row, RowGenerator, TextRows};
use crate::parser::{ParseEvent, TermParser};
use crate::source::{DefaultProvider, SourceProvider, SourceRef};
use crate::stream::TermStream;
use crate::term::{split_term, Provenance, SectionId, Term, TermId, DEFAULT_VALUE_NAME, ROOT};

/// A named group of top-level terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub(crate) name: String,
    pub(crate) args: Vec<String>,
    pub(crate) header_args: Option<Vec<String>>,
    pub(crate) default_value_name: String,
    pub(crate) terms: Vec<TermId>,
    pub(crate) provenance: Provenance,
}

impl Section {
    fn new(name: &str, args: Vec<String>, provenance: Provenance) -> Self {
        Section {
            name: name.to_owned(),
            args,
            header_args: None,
            default_value_name: DEFAULT_VALUE_NAME.to_owned(),
            terms: Vec::new(),
            provenance,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header columns from the `Section` row.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Header columns set by a `Header` row, if any.
    pub fn header_args(&self) -> Option<&[String]> {
        self.header_args.as_deref()
    }

    /// The columns argument values are named by: the `Header` override when
    /// present, otherwise the `Section` row's columns.
    pub fn property_names(&self) -> &[String] {
        self.header_args.as_deref().unwrap_or(&self.args)
    }

    pub fn default_value_name(&self) -> &str {
        &self.default_value_name
    }

    pub fn terms(&self) -> &[TermId] {
        &self.terms
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn is_root(&self) -> bool {
        self.name.eq_ignore_ascii_case(ROOT)
    }
}

/// A parsed Metatab document.
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) arena: Vec<Term>,
    pub(crate) sections: Vec<Section>,
    section_index: IndexMap<String, SectionId>,
    top_level: Vec<TermId>,
    declarations: Declarations,
    errors: Vec<ParseError>,
    source: Option<SourceRef>,
    loaded: bool,
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

impl Document {
    /// An empty document holding only the `Root` section and the bootstrap
    /// declarations.
    pub fn new() -> Self {
        let mut doc = Document {
            arena: Vec::new(),
            sections: Vec::new(),
            section_index: IndexMap::new(),
            top_level: Vec::new(),
            declarations: Declarations::bootstrap(),
            errors: Vec::new(),
            source: None,
            loaded: false,
        };
        doc.add_section(ROOT, Vec::new(), Provenance::default());
        doc
    }

    /// An empty document with the named declaration documents loaded.
    pub fn with_declarations(names: &[&str]) -> Result<Self, MetatabError> {
        DocumentBuilder::new().declare_all(names).build_empty()
    }

    /// Parse a CSV or `.txt` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MetatabError> {
        DocumentBuilder::new().load_path(path)
    }

    /// Parse a document given as a path or URL string.
    pub fn from_reference(reference: &str) -> Result<Self, MetatabError> {
        DocumentBuilder::new().load(SourceRef::parse(reference))
    }

    /// Parse line-oriented text.
    pub fn from_text(text: &str) -> Result<Self, MetatabError> {
        DocumentBuilder::new().load_text(text)
    }

    /// Parse CSV text.
    pub fn from_csv_str(text: &str) -> Result<Self, MetatabError> {
        DocumentBuilder::new().load_csv(text)
    }

    /// Parse rows already split into cells.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self, MetatabError> {
        DocumentBuilder::new().load_rows(rows)
    }

    /// Load rows into this document. The document must not have been
    /// loaded before; declarations already present are kept.
    pub fn load_rows(&mut self, rows: Vec<Row>) -> Result<(), MetatabError> {
        let provider = DefaultProvider::default();
        let config = Config::default();
        let source = SourceRef::memory("<rows>");
        let generator = ListRows::new("<rows>", rows);
        self.load_generator(&provider, &config, source, Box::new(generator))
    }

    /// Load CSV text into this document.
    pub fn load_csv(&mut self, text: &str) -> Result<(), MetatabError> {
        let provider = DefaultProvider::default();
        let config = Config::default();
        let source = SourceRef::memory("<csv>");
        let generator = CsvRows::from_bytes("<csv>", text.as_bytes().to_vec());
        self.load_generator(&provider, &config, source, Box::new(generator))
    }

    pub(crate) fn load_generator(
        &mut self,
        provider: &dyn SourceProvider,
        config: &Config,
        source: SourceRef,
        rows: Box<dyn RowGenerator>,
    ) -> Result<(), MetatabError> {
        if self.loaded {
            return Err(MetatabError::AlreadyLoaded);
        }
        let stream = TermStream::new(provider, config, source.clone(), rows);
        self.load_stream(stream)?;
        self.source = Some(source);
        Ok(())
    }

    fn load_stream(&mut self, stream: TermStream<'_>) -> Result<(), MetatabError> {
        let mut parser = TermParser::new(stream, self.declarations.clone());
        let mut ids: HashMap<usize, TermId> = HashMap::new();
        for event in parser.by_ref() {
            match event? {
                ParseEvent::Section {
                    name,
                    args,
                    provenance,
                } => {
                    self.add_section(&name, args, provenance);
                }
                ParseEvent::Header {
                    section,
                    args,
                    value_name,
                } => {
                    let sid = self.get_or_new_section(&section, &[]);
                    let s = &mut self.sections[sid.0];
                    s.header_args = Some(args);
                    s.default_value_name = value_name;
                }
                ParseEvent::Term {
                    index,
                    term,
                    parent,
                    section,
                } => {
                    let id = match parent {
                        None => {
                            let sid = self.get_or_new_section(&section, &[]);
                            self.push_top_level(sid, term)
                        }
                        Some(p) => match ids.get(&p) {
                            Some(pid) => self.push_child(*pid, term),
                            None => continue,
                        },
                    };
                    ids.insert(index, id);
                }
            }
        }
        let (declarations, errors) = parser.into_parts();
        self.declarations = declarations;
        self.errors.extend(errors);
        self.loaded = true;
        debug!(terms = self.arena.len(), errors = self.errors.len(); "document loaded");
        Ok(())
    }

    /// Run a parse over `Declare` rows only, keeping the declarations and
    /// errors it produces.
    fn load_declarations(
        &mut self,
        provider: &dyn SourceProvider,
        config: &Config,
        names: &[String],
    ) -> Result<(), MetatabError> {
        let rows = names
            .iter()
            .map(|n| vec!["Declare".to_owned(), n.clone()])
            .collect();
        let source = SourceRef::memory("<declarations>");
        let stream = TermStream::new(
            provider,
            config,
            source,
            Box::new(ListRows::new("<declarations>", rows)),
        );
        let mut parser = TermParser::new(stream, self.declarations.clone());
        for event in parser.by_ref() {
            event?;
        }
        let (declarations, errors) = parser.into_parts();
        self.declarations = declarations;
        self.errors.extend(errors);
        Ok(())
    }

    // ── Arena ────────────────────────────────────────────────────────────

    fn push_term(&mut self, term: Term) -> TermId {
        let id = TermId(self.arena.len());
        self.arena.push(term);
        id
    }

    fn push_top_level(&mut self, sid: SectionId, mut term: Term) -> TermId {
        term.section = Some(sid);
        term.parent = None;
        let id = self.push_term(term);
        self.sections[sid.0].terms.push(id);
        self.top_level.push(id);
        id
    }

    fn push_child(&mut self, parent: TermId, mut term: Term) -> TermId {
        term.parent = Some(parent);
        term.section = self.arena[parent.0].section;
        let id = self.push_term(term);
        self.arena[parent.0].children.push(id);
        id
    }

    fn add_section(&mut self, name: &str, args: Vec<String>, provenance: Provenance) -> SectionId {
        let key = name.to_lowercase();
        if let Some(sid) = self.section_index.get(&key) {
            let s = &mut self.sections[sid.0];
            if s.args.is_empty() && !args.is_empty() {
                s.args = args;
            }
            return *sid;
        }
        let sid = SectionId(self.sections.len());
        self.sections.push(Section::new(name, args, provenance));
        self.section_index.insert(key, sid);
        sid
    }

    // ── Read access ──────────────────────────────────────────────────────

    pub fn term(&self, id: TermId) -> &Term {
        &self.arena[id.0]
    }

    pub fn get(&self, id: TermId) -> TermRef<'_> {
        TermRef { doc: self, id }
    }

    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.0]
    }

    pub fn root(&self) -> SectionId {
        SectionId(0)
    }

    pub fn section_id(&self, name: &str) -> Option<SectionId> {
        self.section_index.get(&name.to_lowercase()).copied()
    }

    /// Look up a section by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// [`MetatabError::UnknownSection`] listing the sections that do exist.
    pub fn get_section(&self, name: &str) -> Result<&Section, MetatabError> {
        match self.section_id(name) {
            Some(sid) => Ok(self.section(sid)),
            None => Err(MetatabError::UnknownSection {
                name: name.to_owned(),
                available: self.section_names().join(", "),
            }),
        }
    }

    /// Sections in first-seen order, `Root` first.
    pub fn sections(&self) -> impl Iterator<Item = (SectionId, &Section)> {
        self.section_index
            .values()
            .map(move |sid| (*sid, &self.sections[sid.0]))
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections().map(|(_, s)| s.name()).collect()
    }

    /// Top-level terms in parse order across all sections.
    pub fn terms(&self) -> &[TermId] {
        &self.top_level
    }

    /// Every reachable term: sections in order, each top-level term
    /// followed by its descendants depth-first.
    pub fn all_terms(&self) -> Vec<TermId> {
        let mut out = Vec::new();
        for (_, section) in self.sections() {
            for id in &section.terms {
                self.collect_subtree(*id, &mut out);
            }
        }
        out
    }

    fn collect_subtree(&self, id: TermId, out: &mut Vec<TermId>) {
        out.push(id);
        for child in &self.arena[id.0].children {
            self.collect_subtree(*child, out);
        }
    }

    pub fn declarations(&self) -> &Declarations {
        &self.declarations
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn errors_as_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.errors.iter().map(ParseError::to_json_value).collect())
    }

    /// `{terms, sections, synonyms}` of the loaded declarations.
    pub fn declare_dict(&self) -> serde_json::Value {
        self.declarations.to_json()
    }

    /// The source the document was loaded from.
    pub fn source(&self) -> Option<&SourceRef> {
        self.source.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    // ── Query ────────────────────────────────────────────────────────────

    /// Terms matching `term`, which may use `*` wildcards.
    pub fn find(&self, term: &str) -> Vec<TermId> {
        self.find_where(&[term], None, None)
    }

    /// Terms matching any of `terms`, grouped in the order the names are
    /// given, optionally filtered by exact value and section name.
    pub fn find_where(
        &self,
        terms: &[&str],
        value: Option<&str>,
        section: Option<&str>,
    ) -> Vec<TermId> {
        let all = self.all_terms();
        let mut found = Vec::new();
        for name in terms {
            for id in &all {
                let t = &self.arena[id.0];
                if !t.term_is(name) {
                    continue;
                }
                if value.is_some_and(|v| t.value() != Some(v)) {
                    continue;
                }
                if let Some(section) = section {
                    let in_section = t
                        .section
                        .is_some_and(|sid| self.sections[sid.0].name.eq_ignore_ascii_case(section));
                    if !in_section {
                        continue;
                    }
                }
                found.push(*id);
            }
        }
        found
    }

    /// Terms matching `term` whose children carry every `(property, value)`.
    pub fn find_with_props(&self, term: &str, props: &[(&str, &str)]) -> Vec<TermId> {
        self.find(term)
            .into_iter()
            .filter(|id| {
                let t = self.get(*id);
                props.iter().all(|(p, v)| t.get_value(p) == Some(*v))
            })
            .collect()
    }

    pub fn find_first(&self, term: &str) -> Option<TermId> {
        self.find(term).into_iter().next()
    }

    pub fn find_first_in(&self, term: &str, section: &str) -> Option<TermId> {
        self.find_where(&[term], None, Some(section)).into_iter().next()
    }

    pub fn find_first_value(&self, term: &str) -> Option<&str> {
        self.find_first(term).and_then(|id| self.arena[id.0].value())
    }

    /// Value of the first term matching `term`.
    pub fn get_value(&self, term: &str) -> Option<&str> {
        self.find_first_value(term)
    }

    /// Terms of kind `base` or of any term declared to inherit from it.
    pub fn find_derived(&self, base: &str) -> Vec<TermId> {
        self.all_terms()
            .into_iter()
            .filter(|id| {
                self.declarations
                    .is_kind_of(&self.arena[id.0].join_lc(), base)
            })
            .collect()
    }

    // ── Mutation ─────────────────────────────────────────────────────────

    /// Create a section, or return the existing one with the same name.
    /// Non-empty `args` replace the section's header columns.
    pub fn new_section(&mut self, name: &str, args: &[&str]) -> SectionId {
        self.get_or_new_section(name, args)
    }

    pub fn get_or_new_section(&mut self, name: &str, args: &[&str]) -> SectionId {
        let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
        let existed = self.section_id(name);
        let sid = self.add_section(name, args.clone(), Provenance::default());
        if existed.is_some() && !args.is_empty() {
            self.sections[sid.0].args = args;
        }
        sid
    }

    /// Remove a section and its terms.
    pub fn remove_section(&mut self, name: &str) -> Result<(), MetatabError> {
        let sid = match self.section_id(name) {
            Some(sid) if sid == self.root() => {
                return Err(MetatabError::invalid_term(name, "the Root section cannot be removed"))
            }
            Some(sid) => sid,
            None => {
                return Err(MetatabError::UnknownSection {
                    name: name.to_owned(),
                    available: self.section_names().join(", "),
                })
            }
        };
        self.clean_section(sid);
        self.section_index.shift_remove(&name.to_lowercase());
        Ok(())
    }

    /// Remove every term from a section, keeping the section.
    pub fn clean_section(&mut self, sid: SectionId) {
        let terms = std::mem::take(&mut self.sections[sid.0].terms);
        self.top_level.retain(|id| !terms.contains(id));
        for id in terms {
            self.arena[id.0].section = None;
        }
    }

    pub fn set_value(&mut self, id: TermId, value: Option<&str>) {
        self.arena[id.0].value = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
    }

    /// Append a top-level term to a section. `name` must be a root-level
    /// name; `props` become children.
    pub fn new_term(
        &mut self,
        sid: SectionId,
        name: &str,
        value: Option<&str>,
        props: &[(&str, &str)],
    ) -> Result<TermId, MetatabError> {
        let (parent, record) = split_term(name);
        if !parent.eq_ignore_ascii_case(ROOT) {
            return Err(MetatabError::invalid_term(
                name,
                "section terms must be children of Root",
            ));
        }
        let id = self.append_term(sid, &record, value);
        for (p, v) in props {
            self.new_child(id, p, Some(v));
        }
        Ok(id)
    }

    pub(crate) fn append_term(&mut self, sid: SectionId, record: &str, value: Option<&str>) -> TermId {
        let mut term = Term::new(ROOT, record, value);
        let value_name = self.sections[sid.0].default_value_name.clone();
        self.declarations.decorate(&mut term, &value_name);
        self.push_top_level(sid, term)
    }

    /// The first top-level term of the section matching `name`, created
    /// when absent. A given `value` is set on an existing term.
    pub fn get_or_new_term(
        &mut self,
        sid: SectionId,
        name: &str,
        value: Option<&str>,
    ) -> Result<TermId, MetatabError> {
        let existing = self.sections[sid.0]
            .terms
            .iter()
            .copied()
            .find(|id| self.arena[id.0].term_is(name));
        match existing {
            Some(id) => {
                if value.is_some() {
                    self.set_value(id, value);
                }
                Ok(id)
            }
            None => self.new_term(sid, name, value, &[]),
        }
    }

    /// Append a child. `name` may be qualified; only its record part is used.
    pub fn new_child(&mut self, parent: TermId, name: &str, value: Option<&str>) -> TermId {
        let record = record_part(name);
        let parent_record = self.arena[parent.0].record_term.clone();
        let mut term = Term::new(&parent_record, record, value);
        self.declarations.decorate(&mut term, DEFAULT_VALUE_NAME);
        self.push_child(parent, term)
    }

    /// The first child named `name`, created when absent. A given `value`
    /// is set on an existing child.
    pub fn get_or_new_child(&mut self, parent: TermId, name: &str, value: Option<&str>) -> TermId {
        match self.get(parent).child(name).map(|c| c.id()) {
            Some(id) => {
                if value.is_some() {
                    self.set_value(id, value);
                }
                id
            }
            None => self.new_child(parent, name, value),
        }
    }

    /// Set a property: the term's own value when `name` is `value` or its
    /// value name, otherwise the first child of that name. `None` removes
    /// the child.
    pub fn set_child(&mut self, parent: TermId, name: &str, value: Option<&str>) {
        if self.get(parent).is_value_name(name) {
            self.set_value(parent, value);
            return;
        }
        match value {
            Some(v) => {
                self.get_or_new_child(parent, name, Some(v));
            }
            None => {
                if let Some(child) = self.get(parent).child(name).map(|c| c.id()) {
                    self.remove_term(child);
                }
            }
        }
    }

    /// Remove every child of `parent` named `name`. Returns how many were
    /// removed.
    pub fn remove_child(&mut self, parent: TermId, name: &str) -> usize {
        let record = record_part(name).to_lowercase();
        let before = self.arena[parent.0].children.len();
        let arena = &self.arena;
        let kept: Vec<TermId> = arena[parent.0]
            .children
            .iter()
            .copied()
            .filter(|c| arena[c.0].record_term_lc() != record)
            .collect();
        let removed = before - kept.len();
        self.arena[parent.0].children = kept;
        removed
    }

    /// Detach a term from its parent, or from its section when top-level.
    /// Its subtree goes with it.
    pub fn remove_term(&mut self, id: TermId) {
        match self.arena[id.0].parent {
            Some(parent) => self.arena[parent.0].children.retain(|c| *c != id),
            None => {
                if let Some(sid) = self.arena[id.0].section {
                    self.sections[sid.0].terms.retain(|t| *t != id);
                }
                self.top_level.retain(|t| *t != id);
            }
        }
        self.arena[id.0].parent = None;
        self.arena[id.0].section = None;
    }

    /// Reorder a section's top-level terms: terms named in `order` first,
    /// in that order, then the rest in their current order. With `None`
    /// the order of the section's declared terms is used.
    pub fn sort_terms(&mut self, sid: SectionId, order: Option<&[&str]>) {
        let declared: Vec<String>;
        let order: Vec<&str> = match order {
            Some(o) => o.to_vec(),
            None => {
                let name = self.sections[sid.0].name.clone();
                declared = self
                    .declarations
                    .section(&name)
                    .map(|s| s.terms.clone())
                    .unwrap_or_default();
                declared.iter().map(String::as_str).collect()
            }
        };
        let rank = |t: &Term| {
            order
                .iter()
                .position(|o| t.term_is(o))
                .unwrap_or(order.len())
        };
        let arena = &self.arena;
        self.sections[sid.0]
            .terms
            .sort_by_key(|id| rank(&arena[id.0]));
    }
}

fn record_part(name: &str) -> &str {
    match name.split_once('.') {
        Some((_, record)) => record.trim(),
        None => name.trim(),
    }
}

/// Read view of a term in a document.
#[derive(Debug, Clone, Copy)]
pub struct TermRef<'d> {
    doc: &'d Document,
    id: TermId,
}

impl<'d> TermRef<'d> {
    pub fn id(&self) -> TermId {
        self.id
    }

    pub fn doc(&self) -> &'d Document {
        self.doc
    }

    pub fn term(&self) -> &'d Term {
        &self.doc.arena[self.id.0]
    }

    pub fn value(&self) -> Option<&'d str> {
        self.term().value()
    }

    pub fn record_term(&self) -> &'d str {
        self.term().record_term()
    }

    pub fn parent_term(&self) -> &'d str {
        self.term().parent_term()
    }

    pub fn join(&self) -> String {
        self.term().join()
    }

    pub fn join_lc(&self) -> String {
        self.term().join_lc()
    }

    pub fn term_is(&self, pattern: &str) -> bool {
        self.term().term_is(pattern)
    }

    pub fn is_terminal(&self) -> bool {
        self.term().is_terminal()
    }

    pub fn children(&self) -> impl Iterator<Item = TermRef<'d>> + 'd {
        let doc = self.doc;
        self.term().children.iter().map(move |id| doc.get(*id))
    }

    pub fn parent(&self) -> Option<TermRef<'d>> {
        self.term().parent.map(|p| self.doc.get(p))
    }

    pub fn section(&self) -> Option<&'d Section> {
        self.term().section.map(|sid| self.doc.section(sid))
    }

    fn is_value_name(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case("value")
            || name.eq_ignore_ascii_case(self.term().term_value_name())
    }

    fn child_matches(&self, child: &Term, name: &str) -> bool {
        if name.contains('.') {
            child.term_is(name)
        } else {
            child.record_term.eq_ignore_ascii_case(name.trim())
        }
    }

    /// First child whose record term is `name` (or whose qualified name
    /// matches, when `name` is qualified).
    pub fn child(&self, name: &str) -> Option<TermRef<'d>> {
        self.children()
            .find(|c| self.child_matches(c.term(), name))
    }

    /// The term's own value for `value` or its value name, otherwise the
    /// value of the first matching child.
    pub fn get_value(&self, name: &str) -> Option<&'d str> {
        if self.is_value_name(name) {
            return self.value();
        }
        self.child(name).and_then(|c| c.value())
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.is_value_name(name) || self.child(name).is_some()
    }

    pub fn find(&self, name: &str) -> Vec<TermRef<'d>> {
        self.children()
            .filter(|c| self.child_matches(c.term(), name))
            .collect()
    }

    pub fn find_first(&self, name: &str) -> Option<TermRef<'d>> {
        self.child(name)
    }

    /// Every term below this one, depth-first.
    pub fn descendants(&self) -> Vec<TermRef<'d>> {
        let mut ids = Vec::new();
        for child in &self.term().children {
            self.doc.collect_subtree(*child, &mut ids);
        }
        ids.into_iter().map(|id| self.doc.get(id)).collect()
    }

    /// Children's values by lowercased record term; later children win.
    pub fn props(&self) -> IndexMap<String, Option<String>> {
        self.children()
            .map(|c| (c.term().record_term_lc(), c.value().map(str::to_owned)))
            .collect()
    }

    /// Raw row arguments keyed by the section's property names.
    pub fn arg_props(&self) -> IndexMap<String, String> {
        let Some(section) = self.section() else {
            return IndexMap::new();
        };
        section
            .property_names()
            .iter()
            .zip(self.term().args())
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect()
    }

    /// [`props`](Self::props) plus the term's own value under its value name.
    pub fn all_props(&self) -> IndexMap<String, Option<String>> {
        let mut props = self.props();
        props.insert(
            self.term().term_value_name().to_lowercase(),
            self.value().map(str::to_owned),
        );
        props
    }

    pub fn as_dict(&self) -> serde_json::Value {
        crate::dict::term_dict(self.doc, self.id)
    }
}

/// Builds [`Document`]s with a configuration, a source provider and
/// pre-loaded declarations.
pub struct DocumentBuilder {
    config: Config,
    provider: Option<Box<dyn SourceProvider>>,
    declarations: Vec<String>,
    base_dir: Option<std::path::PathBuf>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        DocumentBuilder::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        DocumentBuilder {
            config: Config::default(),
            provider: None,
            declarations: Vec::new(),
            base_dir: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: impl SourceProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Load a declaration document before any rows.
    pub fn declare(mut self, name: &str) -> Self {
        self.declarations.push(name.to_owned());
        self
    }

    pub fn declare_all(mut self, names: &[&str]) -> Self {
        self.declarations
            .extend(names.iter().map(|n| (*n).to_owned()));
        self
    }

    /// Directory relative `Include` and `Declare` references in text,
    /// CSV or row input resolve against.
    pub fn base_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn memory_source(&self, name: &str) -> SourceRef {
        SourceRef::Memory {
            name: name.to_owned(),
            base_dir: self.base_dir.clone(),
        }
    }

    /// A document holding only the declarations.
    pub fn build_empty(self) -> Result<Document, MetatabError> {
        self.build(None)
    }

    pub fn load(self, source: SourceRef) -> Result<Document, MetatabError> {
        self.build(Some((source, None)))
    }

    pub fn load_path(self, path: impl AsRef<Path>) -> Result<Document, MetatabError> {
        self.load(SourceRef::Path(path.as_ref().to_path_buf()))
    }

    pub fn load_text(self, text: &str) -> Result<Document, MetatabError> {
        let source = self.memory_source("<text>");
        let rows = Box::new(TextRows::new("<text>", text));
        self.build(Some((source, Some(rows as Box<dyn RowGenerator>))))
    }

    pub fn load_csv(self, text: &str) -> Result<Document, MetatabError> {
        let source = self.memory_source("<csv>");
        let rows = Box::new(CsvRows::from_bytes("<csv>", text.as_bytes().to_vec()));
        self.build(Some((source, Some(rows as Box<dyn RowGenerator>))))
    }

    pub fn load_rows(self, rows: Vec<Row>) -> Result<Document, MetatabError> {
        let source = self.memory_source("<rows>");
        let rows = Box::new(ListRows::new("<rows>", rows));
        self.build(Some((source, Some(rows as Box<dyn RowGenerator>))))
    }

    fn build(
        self,
        input: Option<(SourceRef, Option<Box<dyn RowGenerator>>)>,
    ) -> Result<Document, MetatabError> {
        let fallback;
        let provider: &dyn SourceProvider = match &self.provider {
            Some(p) => p.as_ref(),
            None => {
                fallback = DefaultProvider::new(self.config.fetch_urls());
                &fallback
            }
        };
        let mut doc = Document::new();
        if !self.declarations.is_empty() {
            doc.load_declarations(provider, &self.config, &self.declarations)?;
        }
        let Some((source, rows)) = input else {
            return Ok(doc);
        };
        let rows = match rows {
            Some(rows) => rows,
            None => crate::stream::open_source(provider, &source)?,
        };
        doc.load_generator(provider, &self.config, source, rows)?;
        Ok(doc)
    }
}
