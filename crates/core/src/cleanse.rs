//! Identifier and name maintenance.
//!
//! A document's `Root.Name` is a slug built from the naming terms
//! `Origin`, `Dataset`, `Time`, `Space`, `Grain` and `Version`. Each part
//! is read from the `Name.*` child of `Root.Name` first and `Root.*` second.

use log::debug;

use crate::doc::Document;
use crate::error::MetatabError;
use crate::term::TermId;

/// Lowercase, keep ASCII alphanumerics, `_`, `.` and `-`, turn whitespace
/// runs into `-` and collapse repeated dashes.
pub fn slugify(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '.' | '-'))
        .collect();
    let mut out = String::with_capacity(kept.len());
    let mut pending_dash = false;
    for c in kept.trim().chars() {
        if c == '-' || c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if pending_dash {
            out.push('-');
            pending_dash = false;
        }
        out.push(c.to_ascii_lowercase());
    }
    if pending_dash {
        out.push('-');
    }
    out
}

const NAME_PARTS: [&str; 6] = ["Origin", "Dataset", "Time", "Space", "Grain", "Version"];

impl Document {
    fn root_name(&self) -> Option<TermId> {
        self.find_first_in("Root.Name", "Root")
    }

    fn name_part(&self, part: &str) -> Option<String> {
        let from_name = self
            .root_name()
            .and_then(|id| self.get(id).get_value(&format!("Name.{}", part)));
        from_name
            .or_else(|| self.get_value(&format!("Root.{}", part)))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }

    fn compose_name(&self, version: Option<&str>) -> String {
        NAME_PARTS
            .iter()
            .filter_map(|part| match *part {
                "Version" => version.map(str::to_owned),
                other => self.name_part(other),
            })
            .filter(|v| !v.trim().is_empty())
            .map(|v| slugify(&v.replace('-', "_")))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// The name the naming terms produce.
    pub fn identity_name(&self) -> String {
        let version = self.name_part("Version");
        self.compose_name(version.as_deref())
    }

    /// The identity name with a different version. `None` drops the
    /// version; `+n` or `-n` adjusts an integer version; anything else
    /// replaces it.
    pub fn as_version(&self, version: Option<&str>) -> Result<String, MetatabError> {
        let Some(version) = version.map(str::trim) else {
            return Ok(self.compose_name(None));
        };
        let adjust = version
            .strip_prefix('+')
            .map(|n| (1i64, n))
            .or_else(|| version.strip_prefix('-').map(|n| (-1i64, n)));
        let version = match adjust {
            Some((sign, n)) => {
                let delta: i64 = n.trim().parse().map_err(|_| {
                    MetatabError::invalid_term("Root.Version", format!("bad adjustment '{}'", version))
                })?;
                let current = self.name_part("Version").unwrap_or_else(|| "0".to_owned());
                let current: i64 = current.parse().map_err(|_| {
                    MetatabError::invalid_term(
                        "Root.Version",
                        format!("version '{}' is not an integer", current),
                    )
                })?;
                (current + sign * delta).to_string()
            }
            None => version.to_owned(),
        };
        Ok(self.compose_name(Some(&version)))
    }

    /// Add a `Root.Identifier` holding a fresh UUID when there is none.
    /// Returns the identifier term.
    pub fn ensure_identifier(&mut self) -> TermId {
        if let Some(id) = self.find_first_in("Root.Identifier", "Root") {
            return id;
        }
        let identifier = uuid::Uuid::new_v4().to_string();
        debug!(identifier = identifier.as_str(); "assigning identifier");
        let root = self.root();
        self.append_term(root, "Identifier", Some(&identifier))
    }

    /// Regenerate `Root.Name` from the naming terms. Returns messages
    /// describing what was done.
    pub fn update_name(&mut self, force: bool) -> Vec<String> {
        let mut updates = Vec::new();
        self.ensure_identifier();

        let Some(name_id) = self.root_name() else {
            updates.push("No Root.Name, can't update name".to_owned());
            return updates;
        };
        let orig_name = self.term(name_id).value().map(str::to_owned);
        let identifier = self.get_value("Root.Identifier").map(str::to_owned);

        if self.name_part("Dataset").is_some() {
            let name = self.identity_name();
            if orig_name.as_deref() != Some(name.as_str()) || force {
                self.set_value(name_id, Some(&name));
                updates.push("Changed Name".to_owned());
            } else {
                updates.push("Name did not change".to_owned());
            }
        } else if orig_name.is_none() {
            match identifier {
                Some(identifier) => {
                    self.set_value(name_id, Some(&identifier));
                    updates.push("Setting the name to the identifier".to_owned());
                }
                None => updates
                    .push("Failed to find Dataset term or Identifier term. Giving up".to_owned()),
            }
        } else if orig_name == identifier {
            updates.push("Name did not change".to_owned());
        } else {
            updates.push("No Root.Dataset, so can't update the name".to_owned());
        }
        updates
    }

    /// Ensure an identifier, regenerate the name, and otherwise make sure
    /// `Root.Name` is at least a slug.
    pub fn cleanse(&mut self) {
        let identifier_id = self.ensure_identifier();
        let identifier = self.term(identifier_id).value().unwrap_or("").to_owned();
        let updates = self.update_name(false);
        let generated = updates
            .iter()
            .any(|u| u == "Changed Name" || u == "Name did not change");
        if generated {
            return;
        }
        match self.root_name() {
            Some(id) => {
                let slug = match self.term(id).value() {
                    Some(v) => slugify(v),
                    None => slugify(&identifier),
                };
                self.set_value(id, Some(&slug));
            }
            None => {
                let root = self.root();
                self.append_term(root, "Name", Some(&slugify(&identifier)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::Row;

    fn doc(rows: &[&[&str]]) -> Document {
        let rows: Vec<Row> = rows
            .iter()
            .map(|r| r.iter().map(|c| (*c).to_owned()).collect())
            .collect();
        Document::from_rows(rows).unwrap()
    }

    #[test]
    fn slugify_rules() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  a -- b  "), "a-b");
        assert_eq!(slugify("census.gov_2010!"), "census.gov_2010");
        assert_eq!(slugify("Café Été"), "caf-t");
    }

    #[test]
    fn identity_name_prefers_name_children() {
        let d = doc(&[
            &["Name", ""],
            &["Name.Origin", "example.com"],
            &["Dataset", "Root Dataset"],
            &["Name.Dataset", "My Data"],
            &["Version", "3"],
        ]);
        assert_eq!(d.identity_name(), "example.com-my-data-3");
    }

    #[test]
    fn dashes_in_parts_become_underscores() {
        let d = doc(&[&["Origin", "a-b"], &["Dataset", "c"], &["Time", "2010-2015"]]);
        assert_eq!(d.identity_name(), "a_b-c-2010_2015");
    }

    #[test]
    fn as_version_adjusts_integer_versions() {
        let d = doc(&[&["Origin", "o"], &["Dataset", "d"], &["Version", "4"]]);
        assert_eq!(d.as_version(None).unwrap(), "o-d");
        assert_eq!(d.as_version(Some("+1")).unwrap(), "o-d-5");
        assert_eq!(d.as_version(Some("-2")).unwrap(), "o-d-2");
        assert_eq!(d.as_version(Some("v9")).unwrap(), "o-d-v9");
        let d = doc(&[&["Dataset", "d"], &["Version", "beta"]]);
        assert!(d.as_version(Some("+1")).is_err());
    }

    #[test]
    fn ensure_identifier_adds_uuid_once() {
        let mut d = doc(&[&["Title", "T"]]);
        let a = d.ensure_identifier();
        let b = d.ensure_identifier();
        assert_eq!(a, b);
        let value = d.term(a).value().unwrap();
        assert!(uuid::Uuid::parse_str(value).is_ok());
    }

    #[test]
    fn update_name_messages() {
        let mut d = doc(&[&["Title", "T"]]);
        assert_eq!(d.update_name(false), vec!["No Root.Name, can't update name"]);

        let mut d = doc(&[&["Name", "old"], &["Origin", "o"], &["Dataset", "d"]]);
        assert_eq!(d.update_name(false), vec!["Changed Name"]);
        assert_eq!(d.get_value("Root.Name"), Some("o-d"));
        assert_eq!(d.update_name(false), vec!["Name did not change"]);
        assert_eq!(d.update_name(true), vec!["Changed Name"]);

        let mut d = doc(&[&["Name", "Custom Name"]]);
        assert_eq!(
            d.update_name(false),
            vec!["No Root.Dataset, so can't update the name"]
        );

        let mut d = doc(&[&["Identifier", "abc"], &["Name", ""]]);
        assert_eq!(
            d.update_name(false),
            vec!["Setting the name to the identifier"]
        );
        assert_eq!(d.get_value("Root.Name"), Some("abc"));
    }

    #[test]
    fn cleanse_falls_back_to_slugs() {
        let mut d = doc(&[&["Name", "Custom Name"]]);
        d.cleanse();
        assert_eq!(d.get_value("Root.Name"), Some("custom-name"));

        let mut d = doc(&[&["Identifier", "ID 7"]]);
        d.cleanse();
        assert_eq!(d.get_value("Root.Name"), Some("id-7"));
    }
}
