#![allow(clippy::result_large_err)]
//! metatab-core: reading, querying and writing Metatab metadata documents.
//!
//! A Metatab document is a table of `Term, value, arg, ...` rows, written as
//! CSV or as `Term: value | arg` lines. Processing runs in stages:
//!
//! - [`generate`] turns a source into rows,
//! - [`stream`] turns rows into raw terms and splices `Include` and
//!   `Declare` targets in place,
//! - [`parser`] links raw terms into a tree and applies declarations,
//! - [`doc`] stores the tree and answers queries.
//!
//! [`dict`], [`serialize`], [`cleanse`] and [`datapackage`] work on a built
//! [`Document`].
//!
//! # Public API
//!
//! - [`Document`] -- a parsed document; [`DocumentBuilder`] to configure one
//! - [`TermRef`] -- read view of a term
//! - [`Declarations`] -- declared terms, sections, synonyms and value sets
//! - [`MetatabError`] and [`ParseError`] -- fatal and recorded errors

pub mod cleanse;
pub mod config;
pub mod datapackage;
pub mod declarations;
pub mod dict;
pub mod doc;
pub mod error;
pub mod generate;
pub mod parser;
pub mod serialize;
pub mod source;
pub mod stream;
pub mod term;

// ── Convenience re-exports: key types ────────────────────────────────

pub use config::Config;
pub use declarations::Declarations;
pub use doc::{Document, DocumentBuilder, Section, TermRef};
pub use error::{ErrorKind, MetatabError, ParseError};
pub use source::{DefaultProvider, InMemoryProvider, SourceProvider, SourceRef};
pub use term::{ChildPropertyType, SectionId, Term, TermId};

// ── Convenience re-exports: pipeline entry points ────────────────────

pub use cleanse::slugify;
pub use datapackage::to_datapackage;
pub use parser::{ParseEvent, TermParser};
pub use stream::{StreamItem, TermStream};
