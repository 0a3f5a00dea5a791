//! Conversion to a Frictionless Data Package descriptor.

use serde_json::{json, Map, Value};

use crate::cleanse::slugify;
use crate::doc::{Document, TermRef};
use crate::error::MetatabError;

/// Map a declared column data type to a Table Schema field type.
fn field_type(datatype: Option<&str>) -> &'static str {
    match datatype.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        Some("int" | "integer") => "integer",
        Some("number" | "float" | "real" | "decimal") => "number",
        Some("str" | "string" | "text" | "unicode") => "string",
        Some("bool" | "boolean") => "boolean",
        Some("date") => "date",
        Some("datetime") => "datetime",
        Some("time") => "time",
        Some("year") => "year",
        _ => "any",
    }
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        map.insert(key.to_owned(), Value::String(v.to_owned()));
    }
}

fn schema_fields(table: TermRef<'_>) -> Vec<Value> {
    table
        .find("column")
        .into_iter()
        .filter_map(|c| {
            let name = c.value()?;
            let mut field = Map::new();
            field.insert("name".to_owned(), Value::String(name.to_owned()));
            insert_opt(&mut field, "title", c.get_value("altname"));
            field.insert(
                "type".to_owned(),
                Value::String(field_type(c.get_value("datatype")).to_owned()),
            );
            insert_opt(&mut field, "description", c.get_value("description"));
            Some(Value::Object(field))
        })
        .collect()
}

/// The resource's declared name, or the stem of its file name.
fn resource_name<'d>(resource: TermRef<'d>, path: &'d str) -> &'d str {
    match resource.get_value("name") {
        Some(name) => name,
        None => {
            let file = path.rsplit('/').next().unwrap_or(path);
            file.split('.').next().unwrap_or(file)
        }
    }
}

/// Build a Data Package descriptor from a document.
///
/// # Errors
///
/// [`MetatabError::Conversion`] when the document has neither `Root.Name`
/// nor `Root.Identifier`.
pub fn to_datapackage(doc: &Document) -> Result<Value, MetatabError> {
    let name = doc
        .get_value("Root.Name")
        .or_else(|| doc.get_value("Root.Identifier"))
        .ok_or_else(|| {
            MetatabError::Conversion("document has no Root.Name or Root.Identifier".to_owned())
        })?;

    let mut package = Map::new();
    package.insert("name".to_owned(), Value::String(slugify(name)));
    insert_opt(&mut package, "title", doc.get_value("Root.Title"));
    insert_opt(&mut package, "description", doc.get_value("Root.Description"));
    insert_opt(&mut package, "version", doc.get_value("Root.Version"));

    let keywords: Vec<Value> = doc
        .find("Root.Keyword")
        .into_iter()
        .filter_map(|id| doc.term(id).value().map(|v| Value::String(v.to_owned())))
        .collect();
    if !keywords.is_empty() {
        package.insert("keywords".to_owned(), Value::Array(keywords));
    }

    let mut resources = Vec::new();
    for id in doc.find_where(&["Root.Datafile"], None, Some("Resources")) {
        let resource = doc.get(id);
        let Some(path) = resource.value() else {
            log::warn!(row = resource.term().provenance().row; "datafile without a url skipped");
            continue;
        };
        let rname = resource_name(resource, path);
        let mut r = Map::new();
        r.insert("path".to_owned(), Value::String(path.to_owned()));
        r.insert("name".to_owned(), Value::String(slugify(rname)));
        insert_opt(&mut r, "description", resource.get_value("description"));

        let table_name = resource.get_value("schema").unwrap_or(rname);
        let table = doc
            .find("Root.Table")
            .into_iter()
            .map(|t| doc.get(t))
            .find(|t| t.value().is_some_and(|v| v.eq_ignore_ascii_case(table_name)));
        if let Some(table) = table {
            r.insert("schema".to_owned(), json!({ "fields": schema_fields(table) }));
        }
        resources.push(Value::Object(r));
    }
    package.insert("resources".to_owned(), Value::Array(resources));
    Ok(Value::Object(package))
}
