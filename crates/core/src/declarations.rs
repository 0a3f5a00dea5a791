//! Term and section declarations.
//!
//! Declarations say which sections exist and what header columns they
//! default to, which terms exist and in which section, how a term's value
//! is named and how its children fold into dictionaries, which names are
//! synonyms of others, and which terms inherit children from a base term.
//! They are read from declaration documents named by `Declare` rows; the
//! `metatab-latest` document is compiled into the crate.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;

use crate::term::{normalize_term, split_term, split_term_lower, ChildPropertyType, Term};

const METATAB_LATEST: &str = include_str!("../declarations/metatab-latest.csv");

/// Declaration documents compiled into the crate, by name.
const BUILTIN_DECLARATIONS: &[(&str, &str)] = &[("metatab-latest", METATAB_LATEST)];

/// Look up a built-in declaration document by name, with or without the
/// `.csv` extension.
pub fn builtin(name: &str) -> Option<&'static str> {
    let name = name.trim().to_ascii_lowercase();
    let name = name.strip_suffix(".csv").unwrap_or(&name);
    BUILTIN_DECLARATIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, text)| *text)
}

/// A declared term.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeclaredTerm {
    /// Qualified name as written in the declaration.
    pub term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_value_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_property_type: Option<ChildPropertyType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
    /// Any other declared property (data type, description, ...), keyed by
    /// lowercased property name.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
}

impl DeclaredTerm {
    pub fn new(term: &str) -> Self {
        DeclaredTerm {
            term: term.trim().to_owned(),
            ..Default::default()
        }
    }

    fn with(mut self, property: &str, value: &str) -> Self {
        self.set_property(property, value);
        self
    }

    /// Set a property from a declaration child. Empty values are ignored.
    pub fn set_property(&mut self, property: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let owned = Some(value.to_owned());
        match property.trim().to_lowercase().as_str() {
            "termvaluename" => self.term_value_name = owned,
            "childpropertytype" => {
                self.child_property_type = Some(ChildPropertyType::from_name(value))
            }
            "section" => self.section = owned,
            "synonym" => self.synonym = owned,
            "inheritsfrom" => self.inherits_from = owned,
            "valuesetname" | "valueset" => self.value_set = owned,
            other => {
                self.properties.insert(other.to_owned(), value.to_owned());
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeclaredSection {
    pub name: String,
    /// Default header columns.
    pub args: Vec<String>,
    /// Qualified names of the terms declared in this section.
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueSetEntry {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// The declaration tables of a document.
#[derive(Debug, Clone, Serialize)]
pub struct Declarations {
    terms: IndexMap<String, DeclaredTerm>,
    sections: IndexMap<String, DeclaredSection>,
    synonyms: IndexMap<String, String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    value_sets: IndexMap<String, Vec<ValueSetEntry>>,
    #[serde(skip)]
    super_terms: IndexMap<String, String>,
    #[serde(skip)]
    inherited: HashSet<(String, String)>,
    #[serde(skip)]
    sources: HashSet<String>,
}

impl Default for Declarations {
    fn default() -> Self {
        Declarations::bootstrap()
    }
}

impl Declarations {
    /// Tables holding only the declarations needed to read declaration
    /// documents themselves.
    pub fn bootstrap() -> Self {
        let mut decls = Declarations {
            terms: IndexMap::new(),
            sections: IndexMap::new(),
            synonyms: IndexMap::new(),
            value_sets: IndexMap::new(),
            super_terms: IndexMap::new(),
            inherited: HashSet::new(),
            sources: HashSet::new(),
        };
        let seed = [
            DeclaredTerm::new("Root.Section").with("termvaluename", "name"),
            DeclaredTerm::new("Root.Synonym")
                .with("termvaluename", "term")
                .with("childpropertytype", "sequence"),
            DeclaredTerm::new("Root.DeclareTerm")
                .with("termvaluename", "term")
                .with("childpropertytype", "sequence"),
            DeclaredTerm::new("Root.DeclareSection")
                .with("termvaluename", "section")
                .with("childpropertytype", "sequence"),
            DeclaredTerm::new("Root.DeclareValueSet")
                .with("termvaluename", "name")
                .with("childpropertytype", "sequence"),
            DeclaredTerm::new("DeclareValueSet.Value")
                .with("termvaluename", "value")
                .with("childpropertytype", "sequence"),
        ];
        for t in seed {
            decls.terms.insert(normalize_term(&t.term), t);
        }
        decls.declare_section("Root", &[]);
        decls.declare_section(
            "DeclaredTerms",
            &["TermValueName", "ChildPropertyType", "Section"],
        );
        decls.declare_section("DeclaredSections", &[]);
        decls
    }

    pub fn terms(&self) -> &IndexMap<String, DeclaredTerm> {
        &self.terms
    }

    pub fn sections(&self) -> &IndexMap<String, DeclaredSection> {
        &self.sections
    }

    /// Synonym table: lowercased qualified name to canonical name as written.
    pub fn synonyms(&self) -> &IndexMap<String, String> {
        &self.synonyms
    }

    pub fn value_sets(&self) -> &IndexMap<String, Vec<ValueSetEntry>> {
        &self.value_sets
    }

    pub fn term(&self, name: &str) -> Option<&DeclaredTerm> {
        self.terms.get(&normalize_term(name))
    }

    pub fn section(&self, name: &str) -> Option<&DeclaredSection> {
        self.sections.get(&name.trim().to_lowercase())
    }

    /// Default header columns of a declared section; empty when undeclared.
    pub fn section_args(&self, name: &str) -> Vec<String> {
        self.section(name).map(|s| s.args.clone()).unwrap_or_default()
    }

    /// Canonical name for a lowercased qualified name, if it is a synonym.
    pub fn synonym_for(&self, join_lc: &str) -> Option<&str> {
        self.synonyms.get(join_lc).map(String::as_str)
    }

    pub fn value_set_for(&self, term: &str) -> Option<&[ValueSetEntry]> {
        let set = self.term(term)?.value_set.as_ref()?;
        self.value_sets
            .get(&set.to_lowercase())
            .map(|v| v.as_slice())
    }

    /// Declare or redeclare a section. Redeclaring replaces the default
    /// headers but keeps the section's term list.
    pub fn declare_section(&mut self, name: &str, args: &[&str]) {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_owned)
            .collect();
        let entry = self
            .sections
            .entry(name.trim().to_lowercase())
            .or_insert_with(|| DeclaredSection {
                name: name.trim().to_owned(),
                ..Default::default()
            });
        entry.args = args;
    }

    pub fn add_synonym(&mut self, term: &str, canonical: &str) {
        self.synonyms
            .insert(normalize_term(term), canonical.trim().to_owned());
    }

    pub fn add_value(&mut self, set: &str, value: &str, display: Option<&str>) {
        self.value_sets
            .entry(set.trim().to_lowercase())
            .or_default()
            .push(ValueSetEntry {
                value: value.trim().to_owned(),
                display: display
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_owned),
            });
    }

    /// Add a fully staged term declaration.
    ///
    /// # Errors
    ///
    /// Returns a message when the declared section does not exist, or when
    /// `InheritsFrom` names an undeclared base or is used without a section.
    /// Nothing is added in that case.
    pub fn commit_term(&mut self, decl: DeclaredTerm) -> Result<(), String> {
        if decl.term.is_empty() {
            return Err("DeclareTerm has no term name".to_owned());
        }
        let key = normalize_term(&decl.term);
        let section_key = decl.section.as_ref().map(|s| s.to_lowercase());
        if let (Some(section), Some(section_key)) = (&decl.section, &section_key) {
            if !self.sections.contains_key(section_key) {
                return Err(format!(
                    "term '{}' is declared in section '{}', which has not been declared",
                    decl.term, section
                ));
            }
        }
        let base_key = match &decl.inherits_from {
            Some(base) => {
                if section_key.is_none() {
                    return Err(format!(
                        "term '{}' must specify a section to use InheritsFrom",
                        decl.term
                    ));
                }
                let base_key = normalize_term(base);
                if !self.terms.contains_key(&base_key) {
                    return Err(format!(
                        "term '{}' inherits from '{}', which has not been declared",
                        decl.term, base
                    ));
                }
                Some(base_key)
            }
            None => None,
        };

        if let Some(synonym) = &decl.synonym {
            self.synonyms.insert(key.clone(), synonym.clone());
        }
        if let Some(section_key) = &section_key {
            self.add_to_section(section_key, &decl.term);
        }
        let derived_record = split_term(&decl.term).1;
        self.terms.insert(key.clone(), decl);

        if let (Some(base_key), Some(section_key)) = (base_key, section_key) {
            self.inherit_children(&key, &derived_record, &base_key, &section_key);
        }
        Ok(())
    }

    fn add_to_section(&mut self, section_key: &str, term: &str) {
        if let Some(section) = self.sections.get_mut(section_key) {
            let exists = section.terms.iter().any(|t| t.eq_ignore_ascii_case(term));
            if !exists {
                section.terms.push(term.to_owned());
            }
        }
    }

    /// Copy each `Base.Child` declaration to `Derived.Child`, without
    /// overriding explicit declarations.
    fn inherit_children(
        &mut self,
        derived_key: &str,
        derived_record: &str,
        base_key: &str,
        section_key: &str,
    ) {
        if derived_key == base_key
            || !self
                .inherited
                .insert((derived_key.to_owned(), base_key.to_owned()))
        {
            return;
        }
        self.super_terms
            .insert(derived_key.to_owned(), base_key.to_owned());

        let base_record = split_term_lower(base_key).1;
        let inherited: Vec<DeclaredTerm> = self
            .terms
            .values()
            .filter(|t| split_term_lower(&t.term).0 == base_record)
            .cloned()
            .collect();
        for mut child in inherited {
            let child_record = split_term(&child.term).1;
            let name = format!("{}.{}", derived_record, child_record);
            let key = normalize_term(&name);
            if self.terms.contains_key(&key) {
                continue;
            }
            child.term = name.clone();
            child.inherits_from = None;
            child.section = self.sections.get(section_key).map(|s| s.name.clone());
            self.add_to_section(section_key, &name);
            self.terms.insert(key, child);
        }
    }

    /// Map each base term to every term that inherits from it, directly or
    /// through another derived term.
    pub fn derived_terms(&self) -> IndexMap<String, Vec<String>> {
        let mut out: IndexMap<String, Vec<String>> = IndexMap::new();
        for derived in self.super_terms.keys() {
            let mut seen = HashSet::new();
            let mut current = derived.as_str();
            while let Some(base) = self.super_terms.get(current) {
                if !seen.insert(base.as_str()) {
                    break;
                }
                out.entry(base.clone()).or_default().push(derived.clone());
                current = base.as_str();
            }
        }
        out
    }

    /// True when `term` is `base` or inherits from it.
    pub fn is_kind_of(&self, term: &str, base: &str) -> bool {
        let base = normalize_term(base);
        let mut current = normalize_term(term);
        let mut seen = HashSet::new();
        loop {
            if current == base {
                return true;
            }
            if !seen.insert(current.clone()) {
                return false;
            }
            match self.super_terms.get(&current) {
                Some(next) => current = next.clone(),
                None => return false,
            }
        }
    }

    /// Set a parsed term's value name, child folding rule and validity.
    pub fn decorate(&self, term: &mut Term, default_value_name: &str) {
        match self.terms.get(&term.join_lc()) {
            Some(decl) => {
                term.term_value_name = decl
                    .term_value_name
                    .clone()
                    .unwrap_or_else(|| default_value_name.to_owned());
                term.child_property_type = decl.child_property_type.unwrap_or_default();
                term.valid = Some(true);
            }
            None => {
                term.term_value_name = default_value_name.to_owned();
                term.child_property_type = ChildPropertyType::Any;
                term.valid = Some(false);
            }
        }
    }

    /// Record that a declaration source has been processed. Returns false
    /// when it already had been.
    pub(crate) fn mark_loaded(&mut self, key: &str) -> bool {
        self.sources.insert(key.to_owned())
    }

    pub(crate) fn loaded_sources(&self) -> impl Iterator<Item = &String> {
        self.sources.iter()
    }

    /// `{terms, sections, synonyms}` as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
