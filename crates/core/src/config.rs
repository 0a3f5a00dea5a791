//! Parser configuration.
//!
//! [`Config`] controls how `Include` and `Declare` references are resolved
//! and how strictly their failures are treated. It implements
//! [`serde::Deserialize`] so it can be loaded from a TOML file:
//!
//! ```toml
//! declaration_paths = ["/usr/share/metatab"]
//! fetch_urls = false
//! strict_includes = true
//! max_include_depth = 8
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::MetatabError;

/// Default limit on nested `Include`/`Declare` splicing.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Extra directories searched for declaration documents by name.
    #[serde(default)]
    declaration_paths: Vec<PathBuf>,

    /// Allow HTTP(S) sources for includes and declarations.
    #[serde(default = "default_fetch_urls")]
    fetch_urls: bool,

    /// Turn include and declaration failures into fatal errors.
    #[serde(default)]
    strict_includes: bool,

    /// How many spliced sources may be nested below the top-level source.
    #[serde(default = "default_max_include_depth")]
    max_include_depth: usize,
}

fn default_fetch_urls() -> bool {
    true
}

fn default_max_include_depth() -> usize {
    DEFAULT_MAX_INCLUDE_DEPTH
}

impl Default for Config {
    fn default() -> Self {
        Config {
            declaration_paths: Vec::new(),
            fetch_urls: default_fetch_urls(),
            strict_includes: false,
            max_include_depth: default_max_include_depth(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, MetatabError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`MetatabError::Io`] if the file cannot be read and
    /// [`MetatabError::Config`] if it is not valid TOML for this struct.
    pub fn load(path: &Path) -> Result<Self, MetatabError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn declaration_paths(&self) -> &[PathBuf] {
        &self.declaration_paths
    }

    pub fn fetch_urls(&self) -> bool {
        self.fetch_urls
    }

    pub fn strict_includes(&self) -> bool {
        self.strict_includes
    }

    pub fn max_include_depth(&self) -> usize {
        self.max_include_depth
    }

    pub fn with_declaration_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.declaration_paths.push(dir.into());
        self
    }

    pub fn with_fetch_urls(mut self, fetch: bool) -> Self {
        self.fetch_urls = fetch;
        self
    }

    pub fn with_strict_includes(mut self, strict: bool) -> Self {
        self.strict_includes = strict;
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }
}
