//! Core model for the translator
//!
//! - `archive`: archive state, lifecycle and the translate entry point
//! - `unit`: translation units and splice offsets
//! - `error`: error taxonomy using thiserror
//! - `language`: supported languages and extension lookup
//! - `namespaces`: prefix/URI registry with the reserved table
//! - `options`: typed option flags
//! - `hash`: per-unit content hashing

pub mod archive;
pub mod error;
pub mod hash;
pub mod language;
pub mod namespaces;
pub mod options;
pub mod unit;

pub use archive::{decide_framing, Archive, Transform, TranslateConfig};
pub use error::{MarkupError, Result};
pub use hash::HashAlgorithm;
pub use language::{ExtensionRegistry, Language};
pub use namespaces::{Namespace, NamespaceRegistry};
pub use options::OptionFlags;
pub use unit::{SpliceOffsets, Unit};
