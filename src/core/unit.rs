//! Translation units
//!
//! A `Unit` is one source file (or text input) plus everything the archive
//! knows about it: identity attributes, the markup XML of its body, the
//! original source bytes, and the splice offsets a transformation engine
//! needs to insert children without re-parsing.

use crate::core::language::Language;
use crate::core::namespaces::Namespace;

/// Byte ranges into a unit's XML text where content lives and where a
/// transform may splice new markup.
///
/// `content` spans the bytes strictly between the unit start tag and its end
/// tag; `insert` is the (possibly empty) range where appended children land,
/// immediately before the end tag. For a self-closing unit all four offsets
/// point at the `/` of `/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpliceOffsets {
    pub content_begin: usize,
    pub content_end: usize,
    pub insert_begin: usize,
    pub insert_end: usize,
}

/// One translation unit
#[derive(Debug, Clone, Default)]
pub struct Unit {
    pub(crate) language: Option<Language>,
    pub(crate) filename: Option<String>,
    pub(crate) dir: Option<String>,
    pub(crate) version: Option<String>,
    pub(crate) timestamp: Option<String>,
    pub(crate) hash: Option<String>,
    pub(crate) revision: Option<String>,

    /// Raw source bytes, when available
    pub(crate) source: Option<Vec<u8>>,
    /// Markup XML of the unit element, `<unit …>…</unit>`, when available
    pub(crate) xml: Option<String>,
    /// Lines of code: newline count of the source text
    pub(crate) loc: Option<usize>,

    /// User attributes in insertion order
    pub(crate) attributes: Vec<(String, String)>,
    /// Namespace declarations carried on this unit element beyond the root's
    pub(crate) namespaces: Vec<Namespace>,

    pub(crate) offsets: Option<SpliceOffsets>,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(&self) -> Option<Language> {
        self.language
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = Some(language);
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    pub fn dir(&self) -> Option<&str> {
        self.dir.as_deref()
    }

    pub fn set_dir(&mut self, dir: impl Into<String>) {
        self.dir = Some(dir.into());
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = Some(version.into());
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    pub fn set_timestamp(&mut self, timestamp: impl Into<String>) {
        self.timestamp = Some(timestamp.into());
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn set_hash(&mut self, hash: impl Into<String>) {
        self.hash = Some(hash.into());
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn set_revision(&mut self, revision: impl Into<String>) {
        self.revision = Some(revision.into());
    }

    /// Append a user attribute; emitted after the fixed attributes in insertion order
    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Markup XML of this unit's element, when parsed or read
    pub fn xml(&self) -> Option<&str> {
        self.xml.as_deref()
    }

    /// Original source bytes, when captured or extracted
    pub fn source(&self) -> Option<&[u8]> {
        self.source.as_deref()
    }

    pub fn loc(&self) -> Option<usize> {
        self.loc
    }

    pub fn splice_offsets(&self) -> Option<SpliceOffsets> {
        self.offsets
    }

    /// Bytes of the unit body between its start and end tags
    pub fn content_slice(&self) -> Option<&str> {
        let xml = self.xml.as_deref()?;
        let off = self.offsets?;
        xml.get(off.content_begin..off.content_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_unit_is_empty() {
        let unit = Unit::new();
        assert!(unit.language().is_none());
        assert!(unit.xml().is_none());
        assert!(unit.splice_offsets().is_none());
    }

    #[test]
    fn test_setters() {
        let mut unit = Unit::new();
        unit.set_language(Language::Cpp);
        unit.set_filename("a.cpp");
        unit.set_dir("src");
        unit.set_version("1");
        assert_eq!(unit.language(), Some(Language::Cpp));
        assert_eq!(unit.filename(), Some("a.cpp"));
        assert_eq!(unit.dir(), Some("src"));
        assert_eq!(unit.version(), Some("1"));
    }

    #[test]
    fn test_attribute_insertion_order() {
        let mut unit = Unit::new();
        unit.add_attribute("zeta", "1");
        unit.add_attribute("alpha", "2");
        let names: Vec<&str> = unit.attributes().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_content_slice() {
        let mut unit = Unit::new();
        unit.xml = Some("<unit>a;\n</unit>".to_string());
        unit.offsets = Some(SpliceOffsets {
            content_begin: 6,
            content_end: 9,
            insert_begin: 9,
            insert_end: 9,
        });
        assert_eq!(unit.content_slice(), Some("a;\n"));
    }
}
