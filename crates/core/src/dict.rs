//! Folding terms into nested JSON values.
//!
//! A terminal term becomes its value. A term with children becomes an
//! object keyed by each child's lowercased record term, plus the term's own
//! value under its lowercased value name. Repeated keys fold according to
//! the child's [`ChildPropertyType`].

use serde_json::{Map, Value};

use crate::doc::Document;
use crate::term::{ChildPropertyType, SectionId, TermId, DEFAULT_VALUE_NAME};

fn leaf(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_owned()))
}

fn fold(map: &mut Map<String, Value>, key: String, value: Value, kind: ChildPropertyType) {
    match kind {
        ChildPropertyType::Scalar => {
            map.insert(key, value);
        }
        ChildPropertyType::Sequence => match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                map.insert(key, Value::Array(vec![value]));
            }
        },
        ChildPropertyType::Any => match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        },
    }
}

fn fold_terms(doc: &Document, ids: &[TermId]) -> Map<String, Value> {
    let mut map = Map::new();
    for id in ids {
        let t = doc.term(*id);
        fold(&mut map, t.record_term_lc(), term_dict(doc, *id), t.child_property_type());
    }
    map
}

/// The dictionary form of one term.
pub fn term_dict(doc: &Document, id: TermId) -> Value {
    let term = doc.term(id);
    if term.is_terminal() {
        return leaf(term.value());
    }
    let mut map = fold_terms(doc, term.children());
    if let Some(v) = term.value() {
        map.insert(term.term_value_name().to_lowercase(), Value::String(v.to_owned()));
    }
    Value::Object(map)
}

/// The top-level terms of one section folded into an object.
pub fn section_dict(doc: &Document, sid: SectionId) -> Value {
    Value::Object(fold_terms(doc, doc.section(sid).terms()))
}

impl Document {
    /// Every section's terms folded into a single object.
    pub fn as_dict(&self) -> Value {
        let ids: Vec<TermId> = self
            .sections()
            .flat_map(|(_, s)| s.terms().iter().copied())
            .collect();
        let mut map = fold_terms(self, &ids);
        map.remove(DEFAULT_VALUE_NAME);
        Value::Object(map)
    }

    pub fn section_dict(&self, sid: SectionId) -> Value {
        section_dict(self, sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::Row;
    use serde_json::json;

    fn doc(rows: &[&[&str]]) -> Document {
        let rows: Vec<Row> = rows
            .iter()
            .map(|r| r.iter().map(|c| (*c).to_owned()).collect())
            .collect();
        Document::from_rows(rows).unwrap()
    }

    #[test]
    fn terminal_terms_are_scalars() {
        let d = doc(&[&["Title", "T"], &["Description", "D"]]);
        assert_eq!(d.as_dict(), json!({"title": "T", "description": "D"}));
    }

    #[test]
    fn repeated_any_terms_promote_to_list() {
        let d = doc(&[&["Note", "a"], &["Note", "b"], &["Note", "c"]]);
        assert_eq!(d.as_dict(), json!({"note": ["a", "b", "c"]}));
    }

    #[test]
    fn declared_sequence_is_always_a_list() {
        let d = doc(&[&["Declare", "metatab-latest"], &["Keyword", "a"]]);
        assert_eq!(d.as_dict()["keyword"], json!(["a"]));
    }

    #[test]
    fn parent_value_goes_under_value_name() {
        let d = doc(&[
            &["Declare", "metatab-latest"],
            &["Section", "Contacts", "Email"],
            &["Wrangler", "Alice", "alice@example.com"],
        ]);
        assert_eq!(
            d.as_dict()["wrangler"],
            json!({"email": "alice@example.com", "name": "Alice"})
        );
    }

    #[test]
    fn undeclared_parent_value_uses_default_name() {
        let d = doc(&[&["Thing", "x"], &[".Part", "y"]]);
        let id = d.find_first("Root.Thing").unwrap();
        assert_eq!(d.get(id).as_dict(), json!({"part": "y", "@value": "x"}));
    }

    #[test]
    fn scalar_children_keep_the_last() {
        let d = doc(&[
            &["DeclareTerm", "Thing.Part"],
            &[".ChildPropertyType", "scalar"],
            &["Thing", "x"],
            &[".Part", "a"],
            &[".Part", "b"],
        ]);
        let id = d.find_first("Root.Thing").unwrap();
        assert_eq!(d.get(id).as_dict()["part"], json!("b"));
    }

    #[test]
    fn section_dict_covers_one_section() {
        let d = doc(&[&["Title", "T"], &["Section", "Notes"], &["Note", "n"]]);
        let sid = d.section_id("notes").unwrap();
        assert_eq!(d.section_dict(sid), json!({"note": "n"}));
    }
}
