//! End-to-end parsing scenarios and document invariants.

use metatab_core::{Document, DocumentBuilder, ErrorKind, InMemoryProvider, TermId};

fn rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|c| (*c).to_owned()).collect())
        .collect()
}

fn values(doc: &Document, ids: &[TermId]) -> Vec<Option<String>> {
    ids.iter()
        .map(|id| doc.term(*id).value().map(str::to_owned))
        .collect()
}

// ──────────────────────────────────────────────
// Scenarios
// ──────────────────────────────────────────────

#[test]
fn declared_lines_document() {
    let doc = Document::from_text("Declare: metatab-latest\nTitle: Hello\nIdentifier: 1234").unwrap();
    assert!(doc.errors().is_empty(), "{:?}", doc.errors());
    assert_eq!(doc.find_first_value("Root.Title"), Some("Hello"));
    assert_eq!(doc.find_first_value("Root.Identifier"), Some("1234"));
    assert_eq!(doc.as_dict()["title"], "Hello");
}

#[test]
fn section_headers_name_argument_children() {
    let doc = Document::from_rows(rows(&[
        &["Section", "Resources", "Name", "Description"],
        &["Datafile", "http://x/y.csv", "y", "a y file"],
    ]))
    .unwrap();
    let found = doc.find("Root.Datafile");
    assert_eq!(found.len(), 1);
    let datafile = doc.get(found[0]);
    assert_eq!(datafile.section().unwrap().name(), "Resources");
    assert_eq!(datafile.get_value("Datafile.Name"), Some("y"));
    assert_eq!(datafile.get_value("Datafile.Description"), Some("a y file"));
    assert_eq!(datafile.children().count(), 2);
}

#[test]
fn elided_child_in_lines() {
    let doc = Document::from_text("Contacts:\nWrangler: Alice\n.Email: alice@example.com").unwrap();
    let wranglers = doc.find("Root.Wrangler");
    assert_eq!(wranglers.len(), 1);
    let w = doc.get(wranglers[0]);
    assert_eq!(w.value(), Some("Alice"));
    assert!(w.parent().is_none());
    assert_eq!(w.get_value("Wrangler.Email"), Some("alice@example.com"));
}

#[test]
fn synonym_replaces_term() {
    let doc = Document::from_text("Synonym: Creator | Wrangler\nCreator: Bob").unwrap();
    assert!(doc.find("Root.Creator").is_empty());
    let wranglers = doc.find("Root.Wrangler");
    assert_eq!(values(&doc, &wranglers), vec![Some("Bob".to_owned())]);
}

#[test]
fn include_splices_rows_and_keeps_the_include_term() {
    let provider = InMemoryProvider::default()
        .with_file("/docs/main.csv", "Include,sub.csv\n")
        .with_file("/docs/sub.csv", "Note,N1\n");
    let doc = DocumentBuilder::new()
        .provider(provider)
        .load_path("/docs/main.csv")
        .unwrap();
    assert!(doc.errors().is_empty(), "{:?}", doc.errors());
    assert_eq!(doc.get_value("Root.Note"), Some("N1"));
    assert_eq!(doc.get_value("Root.Include"), Some("sub.csv"));
}

#[test]
fn unnamed_columns_become_positional_children() {
    let doc = Document::from_text("Section: S | A | B\nX: v | a1 | b1 | c1").unwrap();
    let x = doc.get(doc.find_first("Root.X").unwrap());
    assert_eq!(x.value(), Some("v"));
    assert_eq!(x.get_value("X.A"), Some("a1"));
    assert_eq!(x.get_value("X.B"), Some("b1"));
    assert_eq!(x.get_value("X.2"), Some("c1"));
}

// ──────────────────────────────────────────────
// Boundary behaviors
// ──────────────────────────────────────────────

#[test]
fn term_only_row_has_no_value_or_args() {
    let doc = Document::from_rows(rows(&[&["Contacts"]])).unwrap();
    let t = doc.term(doc.find_first("Root.Contacts").unwrap());
    assert_eq!(t.value(), None);
    assert!(t.args().is_empty());
    assert!(t.is_terminal());
}

#[test]
fn leading_elided_child_is_recorded_and_dropped() {
    let doc = Document::from_rows(rows(&[&[".Email", "x@y"], &["Title", "T"]])).unwrap();
    assert_eq!(doc.errors().len(), 1);
    let e = &doc.errors()[0];
    assert_eq!(e.kind, ErrorKind::Parse);
    assert_eq!((e.row, e.col), (1, 1));
    assert!(doc.find("*.Email").is_empty());
    assert_eq!(doc.errors_as_json()[0]["term"], ".email");
}

// ──────────────────────────────────────────────
// Invariants
// ──────────────────────────────────────────────

#[test]
fn no_term_keeps_a_synonym_name() {
    let doc = Document::from_rows(rows(&[
        &["DeclareTerm", "Root.Author"],
        &[".Synonym", "Root.Creator"],
        &["Synonym", "Root.Maker", "Root.Creator"],
        &["Author", "A"],
        &["Maker", "M"],
        &["Section", "Resources", "Name"],
        &["Synonym", "Datafile.Label", "Datafile.Name"],
        &["Datafile", "http://x", "n"],
        &[".Label", "l"],
    ]))
    .unwrap();
    let synonyms = doc.declarations().synonyms();
    assert!(!synonyms.is_empty());
    for id in doc.all_terms() {
        let join = doc.term(id).join_lc();
        assert!(!synonyms.contains_key(&join), "{} is a synonym", join);
    }
    assert_eq!(doc.find("Root.Creator").len(), 2);
    let datafile = doc.get(doc.find_first("Root.Datafile").unwrap());
    assert_eq!(datafile.find("name").len(), 2);
}

#[test]
fn sections_coalesce_in_first_seen_order() {
    let doc = Document::from_rows(rows(&[
        &["Section", "Contacts", "Email"],
        &["Wrangler", "A", "a@x"],
        &["Section", "Resources", "Name"],
        &["Datafile", "u1", "one"],
        &["Section", "contacts"],
        &["Creator", "B", "b@x"],
        &["Section", "Resources", "Name"],
        &["Datafile", "u2", "two"],
    ]))
    .unwrap();
    assert_eq!(doc.section_names(), vec!["Root", "Contacts", "Resources"]);
    let contacts = doc.get_section("CONTACTS").unwrap();
    assert_eq!(contacts.terms().len(), 2);
    assert_eq!(doc.get_section("resources").unwrap().terms().len(), 2);
}

#[test]
fn children_share_their_ancestors_section() {
    let doc = Document::from_path(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/example.csv"),
    )
    .unwrap();
    assert!(doc.errors().is_empty(), "{:?}", doc.errors());
    for id in doc.all_terms() {
        let mut top = doc.get(id);
        while let Some(p) = top.parent() {
            top = p;
        }
        assert_eq!(doc.term(id).section(), top.term().section());
        let listed = doc.terms().iter().filter(|t| **t == id).count();
        let expected = usize::from(doc.term(id).parent().is_none());
        assert_eq!(listed, expected);
    }
}

#[test]
fn declared_value_names_and_inheritance() {
    let doc = Document::from_path(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/example.csv"),
    )
    .unwrap();
    let dict = doc.as_dict();
    assert_eq!(dict["wrangler"]["name"], "Alice Smith");
    assert_eq!(dict["wrangler"]["organization"], "Example Org");
    assert_eq!(dict["keyword"], serde_json::json!(["elections", "counties"]));
    assert_eq!(doc.find_derived("Root.Resource").len(), 3);
    assert_eq!(doc.find_derived("Root.Contact").len(), 2);
    let formats = doc.declarations().value_set_for("Root.Format").unwrap();
    assert!(formats.iter().any(|v| v.value == "csv"));
}
