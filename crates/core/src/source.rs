//! Source references and the provider abstraction used to read them.
//!
//! A [`SourceRef`] names where rows come from: a filesystem path, a URL, a
//! declaration document built into the crate, or rows handed over in memory.
//! The [`SourceProvider`] trait abstracts reading and canonicalizing those
//! references so the term stream can resolve `Include` and `Declare` targets
//! without depending on `std::fs` directly.

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Where a document (or an included fragment) comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceRef {
    Path(PathBuf),
    Url(Url),
    /// A declaration document compiled into the crate.
    Builtin(String),
    /// Rows or text supplied by the caller. Relative references resolve
    /// against `base_dir` when one is given.
    Memory {
        name: String,
        base_dir: Option<PathBuf>,
    },
}

/// How the bytes of a source are split into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    /// `Term: value | arg` lines.
    Lines,
}

impl SourceRef {
    /// Interpret a user-supplied reference: absolute `http`, `https` or
    /// `file` URLs become [`SourceRef::Url`] (or a path for `file`),
    /// anything else is a filesystem path.
    pub fn parse(reference: &str) -> SourceRef {
        let reference = reference.trim();
        match parse_url(reference) {
            Some(url) => url_to_source(url),
            None => SourceRef::Path(PathBuf::from(reference)),
        }
    }

    pub fn memory(name: &str) -> SourceRef {
        SourceRef::Memory {
            name: name.to_owned(),
            base_dir: None,
        }
    }

    /// Name used in term provenance and diagnostics.
    pub fn display_name(&self) -> String {
        match self {
            SourceRef::Path(p) => p.display().to_string(),
            SourceRef::Url(u) => u.to_string(),
            SourceRef::Builtin(name) => name.clone(),
            SourceRef::Memory { name, .. } => name.clone(),
        }
    }

    /// `.txt` references hold line-oriented text; everything else is CSV.
    pub fn format(&self) -> SourceFormat {
        let name = match self {
            SourceRef::Path(p) => p.to_string_lossy().to_string(),
            SourceRef::Url(u) => u.path().to_owned(),
            SourceRef::Builtin(name) | SourceRef::Memory { name, .. } => name.clone(),
        };
        if name.to_ascii_lowercase().ends_with(".txt") {
            SourceFormat::Lines
        } else {
            SourceFormat::Csv
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn parse_url(reference: &str) -> Option<Url> {
    if !reference.contains("://") {
        return None;
    }
    let url = Url::parse(reference).ok()?;
    match url.scheme() {
        "http" | "https" | "file" => Some(url),
        _ => None,
    }
}

fn url_to_source(url: Url) -> SourceRef {
    if url.scheme() == "file" {
        if let Ok(path) = url.to_file_path() {
            return SourceRef::Path(path);
        }
    }
    SourceRef::Url(url)
}

/// Resolve `reference` relative to `base`: file references against the
/// directory of the base path, URL references against the base URL.
pub fn resolve_reference(base: &SourceRef, reference: &str) -> Result<SourceRef, io::Error> {
    let reference = reference.trim();
    if let Some(url) = parse_url(reference) {
        return Ok(url_to_source(url));
    }
    let path = Path::new(reference);
    match base {
        SourceRef::Url(base_url) => base_url.join(reference).map(url_to_source).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot join '{}' to '{}': {}", reference, base_url, e),
            )
        }),
        _ if path.is_absolute() => Ok(SourceRef::Path(path.to_path_buf())),
        SourceRef::Path(p) => {
            let dir = p.parent().unwrap_or(Path::new(""));
            Ok(SourceRef::Path(dir.join(path)))
        }
        SourceRef::Memory {
            base_dir: Some(dir),
            ..
        } => Ok(SourceRef::Path(dir.join(path))),
        SourceRef::Memory { name, .. } | SourceRef::Builtin(name) => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "cannot resolve relative reference '{}' from '{}', which has no base path",
                reference, name
            ),
        )),
    }
}

/// Normalize a path by resolving `.` and `..` components without
/// touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !components.is_empty() {
                    components.pop();
                }
            }
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Trait that abstracts source I/O for the term stream.
pub trait SourceProvider {
    /// Read the raw bytes of a source.
    fn read_source(&self, source: &SourceRef) -> Result<Vec<u8>, io::Error>;

    /// Resolve an `Include`/`Declare` reference found in `base`.
    fn resolve(&self, base: &SourceRef, reference: &str) -> Result<SourceRef, io::Error> {
        resolve_reference(base, reference)
    }

    /// Canonical form of a source, used as the key for cycle detection.
    /// Fails when the source does not exist.
    fn canonicalize(&self, source: &SourceRef) -> Result<SourceRef, io::Error>;

    fn exists(&self, source: &SourceRef) -> bool {
        self.canonicalize(source).is_ok()
    }
}

/// Filesystem-backed provider that can also fetch HTTP(S) URLs when the
/// `http` feature is enabled.
#[derive(Debug, Clone)]
pub struct DefaultProvider {
    fetch_urls: bool,
}

impl Default for DefaultProvider {
    fn default() -> Self {
        DefaultProvider { fetch_urls: true }
    }
}

impl DefaultProvider {
    pub fn new(fetch_urls: bool) -> Self {
        DefaultProvider { fetch_urls }
    }
}

impl SourceProvider for DefaultProvider {
    fn read_source(&self, source: &SourceRef) -> Result<Vec<u8>, io::Error> {
        match source {
            SourceRef::Path(p) => std::fs::read(p),
            SourceRef::Url(u) if self.fetch_urls => fetch_url(u),
            SourceRef::Url(u) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("fetching URLs is disabled: {}", u),
            )),
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source '{}' cannot be read by the filesystem provider", other),
            )),
        }
    }

    fn canonicalize(&self, source: &SourceRef) -> Result<SourceRef, io::Error> {
        match source {
            SourceRef::Path(p) => p.canonicalize().map(SourceRef::Path),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(feature = "http")]
fn fetch_url(url: &Url) -> Result<Vec<u8>, io::Error> {
    debug!(url = url.as_str(); "fetching remote source");
    let agent = ureq::Agent::new_with_defaults();
    let response = agent
        .get(url.as_str())
        .call()
        .map_err(|e| io::Error::other(format!("GET {} failed: {}", url, e)))?;
    response
        .into_body()
        .read_to_vec()
        .map_err(|e| io::Error::other(format!("failed to read body of {}: {}", url, e)))
}

#[cfg(not(feature = "http"))]
fn fetch_url(url: &Url) -> Result<Vec<u8>, io::Error> {
    debug!(url = url.as_str(); "http feature disabled");
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("built without HTTP support, cannot fetch {}", url),
    ))
}

/// In-memory provider for tests and embedding.
///
/// Maps normalized paths and URL strings to source text.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    files: HashMap<PathBuf, String>,
    urls: HashMap<String, String>,
}

impl InMemoryProvider {
    pub fn new(files: HashMap<PathBuf, String>) -> Self {
        let files = files
            .into_iter()
            .map(|(p, text)| (normalize_path(&p), text))
            .collect();
        Self {
            files,
            urls: HashMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.files.insert(normalize_path(path.as_ref()), text.into());
        self
    }

    pub fn with_url(mut self, url: &str, text: impl Into<String>) -> Self {
        self.urls.insert(url.to_owned(), text.into());
        self
    }

    fn lookup(&self, source: &SourceRef) -> Option<&String> {
        match source {
            SourceRef::Path(p) => self.files.get(&normalize_path(p)),
            SourceRef::Url(u) => self.urls.get(u.as_str()),
            _ => None,
        }
    }
}

impl SourceProvider for InMemoryProvider {
    fn read_source(&self, source: &SourceRef) -> Result<Vec<u8>, io::Error> {
        self.lookup(source)
            .map(|text| text.as_bytes().to_vec())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("source not found in memory: {}", source),
                )
            })
    }

    fn canonicalize(&self, source: &SourceRef) -> Result<SourceRef, io::Error> {
        match source {
            SourceRef::Path(p) if self.lookup(source).is_some() => {
                Ok(SourceRef::Path(normalize_path(p)))
            }
            SourceRef::Url(_) if self.lookup(source).is_some() => Ok(source.clone()),
            SourceRef::Builtin(_) | SourceRef::Memory { .. } => Ok(source.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source not found in memory provider: {}", source),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_resolves_dot_and_dotdot() {
        let p = Path::new("/a/b/../c/./d.csv");
        assert_eq!(normalize_path(p), PathBuf::from("/a/c/d.csv"));
    }

    #[test]
    fn parse_distinguishes_urls_and_paths() {
        assert!(matches!(
            SourceRef::parse("http://example.com/m.csv"),
            SourceRef::Url(_)
        ));
        assert_eq!(
            SourceRef::parse("file:///tmp/m.csv"),
            SourceRef::Path(PathBuf::from("/tmp/m.csv"))
        );
        assert_eq!(
            SourceRef::parse("data/m.csv"),
            SourceRef::Path(PathBuf::from("data/m.csv"))
        );
    }

    #[test]
    fn format_detected_from_extension() {
        assert_eq!(SourceRef::parse("a/metadata.txt").format(), SourceFormat::Lines);
        assert_eq!(SourceRef::parse("a/metadata.csv").format(), SourceFormat::Csv);
        assert_eq!(
            SourceRef::parse("http://x.org/m.TXT?v=1").format(),
            SourceFormat::Lines
        );
    }

    #[test]
    fn resolve_relative_to_file_directory() {
        let base = SourceRef::Path(PathBuf::from("/docs/main.csv"));
        let r = resolve_reference(&base, "sub/inc.csv").unwrap();
        assert_eq!(r, SourceRef::Path(PathBuf::from("/docs/sub/inc.csv")));
    }

    #[test]
    fn resolve_relative_to_url() {
        let base = SourceRef::parse("http://example.com/pkg/metadata.csv");
        let r = resolve_reference(&base, "inc.csv").unwrap();
        assert_eq!(r, SourceRef::parse("http://example.com/pkg/inc.csv"));
    }

    #[test]
    fn resolve_absolute_reference_ignores_base() {
        let base = SourceRef::parse("http://example.com/pkg/metadata.csv");
        let r = resolve_reference(&base, "https://other.org/x.csv").unwrap();
        assert_eq!(r, SourceRef::parse("https://other.org/x.csv"));
    }

    #[test]
    fn resolve_from_memory_without_base_fails() {
        let base = SourceRef::memory("<rows>");
        let err = resolve_reference(&base, "inc.csv").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn resolve_from_memory_with_base_dir() {
        let base = SourceRef::Memory {
            name: "<text>".into(),
            base_dir: Some(PathBuf::from("/base")),
        };
        let r = resolve_reference(&base, "inc.csv").unwrap();
        assert_eq!(r, SourceRef::Path(PathBuf::from("/base/inc.csv")));
    }

    #[test]
    fn in_memory_read_and_canonicalize() {
        let provider = InMemoryProvider::default().with_file("/d/a.csv", "Title,X\n");
        let src = SourceRef::Path(PathBuf::from("/d/x/../a.csv"));
        assert_eq!(provider.read_source(&src).unwrap(), b"Title,X\n");
        assert_eq!(
            provider.canonicalize(&src).unwrap(),
            SourceRef::Path(PathBuf::from("/d/a.csv"))
        );
    }

    #[test]
    fn in_memory_missing_is_not_found() {
        let provider = InMemoryProvider::default();
        let src = SourceRef::Path(PathBuf::from("/missing.csv"));
        let err = provider.read_source(&src).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!provider.exists(&src));
    }

    #[test]
    fn default_provider_refuses_urls_when_disabled() {
        let provider = DefaultProvider::new(false);
        let err = provider
            .read_source(&SourceRef::parse("http://example.com/m.csv"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
