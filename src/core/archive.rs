//! Archive state and lifecycle
//!
//! An archive is created empty, configured, then opened exactly once as
//! either a reader or a writer. Configuration that affects output framing is
//! rejected after open; the namespace table and option flags are frozen from
//! that point on. Closing flushes the structural tail of the document.

use std::collections::HashSet;
use std::path::Path;

use crate::core::error::{MarkupError, Result};
use crate::core::hash::HashAlgorithm;
use crate::core::language::{ExtensionRegistry, Language};
use crate::core::namespaces::{
    NamespaceRegistry, Namespace, CPP_NS_URI, ERR_NS_URI, LITERAL_NS_URI, MODIFIER_NS_URI,
    OPERATOR_NS_URI, POSITION_NS_URI,
};
use crate::core::options::OptionFlags;
use crate::core::unit::Unit;
use crate::io::{ByteSink, ByteSource, MemoryBuffer};
use crate::markup::{GrammarConfig, SourceTokenizer};
use crate::xml::emitter::{emit_unit_fragment, EmitConfig, Framing, XmlEmitter};
use crate::xml::reader::UnitReader;

/// A stored transformation request. Execution is the business of an external
/// engine; the archive only carries the list and its framing consequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    XPath(String),
    Xslt(String),
    XsltParam { name: String, value: String },
    RelaxNG(String),
}

impl Transform {
    /// Whether applying this transform can change the number of units
    pub fn may_change_unit_count(&self) -> bool {
        matches!(self, Transform::XPath(_) | Transform::RelaxNG(_))
    }
}

/// Document framing policy: a pure function of the input shape, the options
/// and the transformation list
pub fn decide_framing(
    input_count: usize,
    any_filelist_or_dir: bool,
    options: &OptionFlags,
    transforms: &[Transform],
) -> Framing {
    let full = input_count > 1
        || any_filelist_or_dir
        || options.full_archive
        || (options.hash && input_count > 1)
        || transforms.iter().any(Transform::may_change_unit_count);
    if full {
        Framing::Full
    } else {
        Framing::Solo
    }
}

/// Everything a parse worker needs, detached from the archive so workers
/// never share mutable state with the writer
#[derive(Clone)]
pub struct TranslateConfig {
    pub emit: EmitConfig,
    pub extensions: ExtensionRegistry,
    pub default_language: Option<Language>,
    pub hash_algorithm: HashAlgorithm,
}

impl TranslateConfig {
    /// Run the grammar over `source` and fill the unit with its markup XML,
    /// splice offsets, line count and (when enabled) content hash
    pub fn translate(&self, unit: &mut Unit, source: &[u8]) -> Result<()> {
        let language = unit
            .language()
            .or_else(|| {
                unit.filename()
                    .and_then(|f| self.extensions.language_for(f))
            })
            .or(self.default_language)
            .ok_or_else(|| MarkupError::UnsetLanguage {
                filename: unit.filename().map(str::to_string),
            })?;
        unit.set_language(language);

        if self.emit.options.hash {
            unit.set_hash(self.hash_algorithm.digest(source));
        }

        if language.has_preprocessor()
            && !unit.namespaces().iter().any(|n| n.uri == CPP_NS_URI)
        {
            let prefix = self
                .emit
                .namespaces
                .prefix_for(CPP_NS_URI)
                .unwrap_or("cpp")
                .to_string();
            unit.namespaces.push(Namespace {
                prefix,
                uri: CPP_NS_URI.to_string(),
            });
        }

        let grammar = GrammarConfig {
            literal_markup: self.emit.options.literal,
            macros: self
                .emit
                .macros
                .iter()
                .map(|(token, _)| token.clone())
                .collect::<HashSet<_>>(),
        };
        let mut producer = SourceTokenizer::new(source, language, grammar);
        let (xml, offsets) = emit_unit_fragment(&self.emit, unit, &mut producer)?;

        unit.loc = Some(source.iter().filter(|&&b| b == b'\n').count());
        unit.source = Some(source.to_vec());
        unit.xml = Some(xml);
        unit.offsets = Some(offsets);
        Ok(())
    }
}

enum Role {
    Idle,
    Writer(Box<XmlEmitter<ByteSink>>),
    Reader(Box<UnitReader>),
    Closed,
}

/// Mutable container for archive-scoped state
pub struct Archive {
    xml_encoding: String,
    src_encoding: Option<String>,
    language: Option<Language>,
    url: Option<String>,
    version: Option<String>,
    revision: Option<String>,
    tabstop: Option<usize>,
    options: OptionFlags,
    hash_algorithm: HashAlgorithm,
    compress_output: bool,
    namespaces: NamespaceRegistry,
    extensions: ExtensionRegistry,
    macros: Vec<(String, String)>,
    user_attributes: Vec<(String, String)>,
    transforms: Vec<Transform>,
    processing_instruction: Option<(String, String)>,
    role: Role,
    last_error: Option<String>,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    pub fn new() -> Self {
        Self {
            xml_encoding: "UTF-8".to_string(),
            src_encoding: None,
            language: None,
            url: None,
            version: None,
            revision: None,
            tabstop: None,
            options: OptionFlags::default(),
            hash_algorithm: HashAlgorithm::default(),
            compress_output: false,
            namespaces: NamespaceRegistry::standard(),
            extensions: ExtensionRegistry::new(),
            macros: Vec::new(),
            user_attributes: Vec::new(),
            transforms: Vec::new(),
            processing_instruction: None,
            role: Role::Idle,
            last_error: None,
        }
    }

    /// Copy configuration into a fresh, unopened archive. Options,
    /// namespaces, extensions, macros and transformations carry over; the
    /// sink or source does not.
    pub fn clone_config(&self) -> Self {
        Self {
            xml_encoding: self.xml_encoding.clone(),
            src_encoding: self.src_encoding.clone(),
            language: self.language,
            url: self.url.clone(),
            version: self.version.clone(),
            revision: self.revision.clone(),
            tabstop: self.tabstop,
            options: self.options.clone(),
            hash_algorithm: self.hash_algorithm,
            compress_output: self.compress_output,
            namespaces: self.namespaces.clone(),
            extensions: self.extensions.clone(),
            macros: self.macros.clone(),
            user_attributes: self.user_attributes.clone(),
            transforms: self.transforms.clone(),
            processing_instruction: self.processing_instruction.clone(),
            role: Role::Idle,
            last_error: None,
        }
    }

    fn ensure_configurable(&self) -> Result<()> {
        match self.role {
            Role::Idle => Ok(()),
            _ => Err(MarkupError::invalid_io_operation(
                "archive is already open; configuration is frozen",
            )),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_xml_encoding(&mut self, encoding: &str) -> Result<()> {
        self.ensure_configurable()?;
        if !known_encoding(encoding) {
            return Err(MarkupError::UnsupportedEncoding(encoding.to_string()));
        }
        self.xml_encoding = encoding.to_string();
        Ok(())
    }

    pub fn set_src_encoding(&mut self, encoding: &str) -> Result<()> {
        self.ensure_configurable()?;
        if !known_encoding(encoding) {
            return Err(MarkupError::UnsupportedEncoding(encoding.to_string()));
        }
        self.src_encoding = Some(encoding.to_string());
        Ok(())
    }

    pub fn set_language(&mut self, name: &str) -> Result<()> {
        self.ensure_configurable()?;
        self.language = Some(Language::from_name(name)?);
        Ok(())
    }

    pub fn set_url(&mut self, url: &str) -> Result<()> {
        self.ensure_configurable()?;
        self.url = Some(url.to_string());
        Ok(())
    }

    pub fn set_version(&mut self, version: &str) -> Result<()> {
        self.ensure_configurable()?;
        self.version = Some(version.to_string());
        Ok(())
    }

    pub fn set_revision(&mut self, revision: &str) -> Result<()> {
        self.ensure_configurable()?;
        self.revision = Some(revision.to_string());
        Ok(())
    }

    pub fn set_tabstop(&mut self, tabstop: usize) -> Result<()> {
        self.ensure_configurable()?;
        if tabstop < 1 {
            return Err(MarkupError::invalid_argument("tabstop must be at least 1"));
        }
        self.tabstop = Some(tabstop);
        Ok(())
    }

    pub fn set_processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.ensure_configurable()?;
        if target.is_empty() {
            return Err(MarkupError::invalid_argument("empty PI target"));
        }
        self.processing_instruction = Some((target.to_string(), data.to_string()));
        Ok(())
    }

    pub fn set_hash_algorithm(&mut self, algorithm: HashAlgorithm) -> Result<()> {
        self.ensure_configurable()?;
        self.hash_algorithm = algorithm;
        Ok(())
    }

    pub fn set_output_compression(&mut self, compress: bool) -> Result<()> {
        self.ensure_configurable()?;
        self.compress_output = compress;
        Ok(())
    }

    pub fn register_file_extension(&mut self, ext: &str, language: &str) -> Result<()> {
        self.ensure_configurable()?;
        let lang = Language::from_name(language)?;
        self.extensions.register(ext, lang)
    }

    pub fn register_namespace(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.ensure_configurable()?;
        if uri.is_empty() {
            return Err(MarkupError::invalid_argument("empty namespace uri"));
        }
        self.namespaces.set(prefix, uri);
        Ok(())
    }

    pub fn register_macro(&mut self, token: &str, macro_type: &str) -> Result<()> {
        self.ensure_configurable()?;
        if token.is_empty() || macro_type.is_empty() {
            return Err(MarkupError::invalid_argument("empty macro token or type"));
        }
        self.macros.push((token.to_string(), macro_type.to_string()));
        Ok(())
    }

    pub fn add_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        self.ensure_configurable()?;
        if name.is_empty() {
            return Err(MarkupError::invalid_argument("empty attribute name"));
        }
        self.user_attributes
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    pub fn add_transform(&mut self, transform: Transform) -> Result<()> {
        self.ensure_configurable()?;
        self.transforms.push(transform);
        Ok(())
    }

    pub fn enable_full_archive(&mut self) -> Result<()> {
        self.ensure_configurable()?;
        self.options.full_archive = true;
        Ok(())
    }

    pub fn disable_full_archive(&mut self) -> Result<()> {
        self.ensure_configurable()?;
        self.options.full_archive = false;
        Ok(())
    }

    pub fn enable_hash(&mut self) -> Result<()> {
        self.ensure_configurable()?;
        self.options.hash = true;
        Ok(())
    }

    pub fn disable_hash(&mut self) -> Result<()> {
        self.ensure_configurable()?;
        self.options.hash = false;
        Ok(())
    }

    /// Replace the whole option set; the usual route for CLI flag decoding
    pub fn set_options(&mut self, options: OptionFlags) -> Result<()> {
        self.ensure_configurable()?;
        self.options = options;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn xml_encoding(&self) -> &str {
        &self.xml_encoding
    }

    pub fn src_encoding(&self) -> Option<&str> {
        self.src_encoding.as_deref()
    }

    pub fn language(&self) -> Option<Language> {
        self.language
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn tabstop(&self) -> Option<usize> {
        self.tabstop
    }

    pub fn options(&self) -> &OptionFlags {
        &self.options
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn macros(&self) -> &[(String, String)] {
        &self.macros
    }

    pub fn user_attributes(&self) -> &[(String, String)] {
        &self.user_attributes
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn processing_instruction(&self) -> Option<&(String, String)> {
        self.processing_instruction.as_ref()
    }

    pub fn language_for_filename(&self, filename: &str) -> Option<Language> {
        self.extensions.language_for(filename)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Snapshot for parse workers; frozen configuration only
    pub fn translate_config(&self) -> TranslateConfig {
        TranslateConfig {
            emit: self.emit_config(),
            extensions: self.extensions.clone(),
            default_language: self.language,
            hash_algorithm: self.hash_algorithm,
        }
    }

    fn emit_config(&self) -> EmitConfig {
        let mut namespaces = self.namespaces.clone();
        append_option_namespaces(&mut namespaces, &self.options);
        EmitConfig {
            options: self.options.clone(),
            namespaces,
            xml_encoding: self.xml_encoding.clone(),
            src_encoding: self.src_encoding.clone(),
            language: self.language,
            url: self.url.clone(),
            version: self.version.clone(),
            revision: self.revision.clone(),
            tabstop: self.tabstop,
            processing_instruction: self.processing_instruction.clone(),
            macros: self.macros.clone(),
            user_attributes: self.user_attributes.clone(),
            hash_algorithm: self.hash_algorithm,
        }
    }

    // ------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------

    fn prepare_write(&mut self) -> Result<(EmitConfig, Framing)> {
        match self.role {
            Role::Idle => {}
            _ => {
                return Err(MarkupError::invalid_io_operation(
                    "archive is already open",
                ))
            }
        }
        self.namespaces.validate_reserved()?;
        self.register_option_namespaces();
        let framing = if self.options.full_archive {
            Framing::Full
        } else {
            Framing::Solo
        };
        Ok((self.emit_config(), framing))
    }

    /// Namespaces implied by enabled options join the registry at open so
    /// their declarations come out in a deterministic order
    fn register_option_namespaces(&mut self) {
        append_option_namespaces(&mut self.namespaces, &self.options);
    }

    pub fn write_open_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let (cfg, framing) = self.prepare_write()?;
        let sink = ByteSink::to_path(path, self.compress_output)?;
        self.role = Role::Writer(Box::new(XmlEmitter::new(sink, cfg, framing)));
        Ok(())
    }

    /// Open an in-memory sink; the returned buffer fills as units are written
    pub fn write_open_memory(&mut self) -> Result<MemoryBuffer> {
        let (cfg, framing) = self.prepare_write()?;
        let (sink, buffer) = ByteSink::to_memory();
        self.role = Role::Writer(Box::new(XmlEmitter::new(sink, cfg, framing)));
        Ok(buffer)
    }

    pub fn write_open_sink(&mut self, sink: ByteSink) -> Result<()> {
        let (cfg, framing) = self.prepare_write()?;
        self.role = Role::Writer(Box::new(XmlEmitter::new(sink, cfg, framing)));
        Ok(())
    }

    fn adopt_reader(&mut self, source: ByteSource) -> Result<()> {
        match self.role {
            Role::Idle => {}
            _ => {
                return Err(MarkupError::invalid_io_operation(
                    "archive is already open",
                ))
            }
        }
        self.namespaces.validate_reserved()?;
        let mut reader = UnitReader::open(source)?;
        if let Some(root) = reader.read_root_unit_attributes()? {
            let root = root.clone();
            self.xml_encoding = root.encoding.clone();
            if root.src_encoding.is_some() {
                self.src_encoding = root.src_encoding.clone();
            }
            if let Some(lang) = root.language.as_deref() {
                if let Ok(lang) = Language::from_name(lang) {
                    self.language = Some(lang);
                }
            }
            self.url = root.url.clone().or(self.url.take());
            self.version = root.version.clone().or(self.version.take());
            self.revision = root.revision.clone().or(self.revision.take());
            self.tabstop = root.tabstop.or(self.tabstop);
            self.options = root.options.clone();
            self.options.full_archive = root.is_archive;
            for (prefix, uri) in &root.namespaces {
                self.namespaces.merge(prefix, uri);
            }
            for (token, mtype) in &root.macros {
                self.macros.push((token.clone(), mtype.clone()));
            }
            for (name, value) in &root.attributes {
                self.user_attributes.push((name.clone(), value.clone()));
            }
            if root.processing_instruction.is_some() {
                self.processing_instruction = root.processing_instruction.clone();
            }
        }
        self.role = Role::Reader(Box::new(reader));
        Ok(())
    }

    pub fn read_open_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let source = ByteSource::from_path(path)?;
        self.adopt_reader(source)
    }

    pub fn read_open_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        // gzip detection happens inside the adapter
        let source = ByteSource::from_reader(Box::new(std::io::Cursor::new(bytes)))?;
        self.adopt_reader(source)
    }

    pub fn read_open_source(&mut self, source: ByteSource) -> Result<()> {
        self.adopt_reader(source)
    }

    /// True once the archive has been opened for reading and the document
    /// turned out to be a full archive
    pub fn is_full_archive(&self) -> bool {
        self.options.full_archive
    }

    // ------------------------------------------------------------------
    // Unit I/O
    // ------------------------------------------------------------------

    fn writer(&mut self) -> Result<&mut XmlEmitter<ByteSink>> {
        match &mut self.role {
            Role::Writer(emitter) => Ok(emitter),
            _ => Err(MarkupError::invalid_io_operation(
                "archive is not open for writing",
            )),
        }
    }

    fn reader(&mut self) -> Result<&mut UnitReader> {
        match &mut self.role {
            Role::Reader(reader) => Ok(reader),
            _ => Err(MarkupError::invalid_io_operation(
                "archive is not open for reading",
            )),
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    /// Translate source bytes into the unit using the archive configuration
    pub fn parse_unit(&self, unit: &mut Unit, source: &[u8]) -> Result<()> {
        self.translate_config().translate(unit, source)
    }

    /// Append a fully formed unit to the archive
    pub fn write_unit(&mut self, unit: &Unit) -> Result<()> {
        let result = self.writer().and_then(|w| w.write_unit(unit));
        self.record(result)
    }

    /// Next unit, header and body; `None` at end of the archive
    pub fn read_unit(&mut self) -> Result<Option<Unit>> {
        let result = self.reader().and_then(|r| r.read_unit());
        self.record(result)
    }

    /// Next unit's header only
    pub fn read_unit_header(&mut self) -> Result<Option<Unit>> {
        let result = self.reader().and_then(|r| r.read_unit_attributes());
        self.record(result)
    }

    /// Next unit's verbatim XML
    pub fn read_unit_xml(&mut self) -> Result<Option<String>> {
        let result = self.reader().and_then(|r| r.read_srcml());
        self.record(result)
    }

    // direct element API, delegated to the emitter

    pub fn write_start_unit(&mut self, unit: &Unit) -> Result<()> {
        let result = self.writer().and_then(|w| w.write_start_unit(unit));
        self.record(result)
    }

    pub fn write_end_unit(&mut self) -> Result<()> {
        let result = self.writer().and_then(|w| w.write_end_unit());
        self.record(result)
    }

    pub fn write_start_element(
        &mut self,
        prefix: Option<&str>,
        name: &str,
        uri: Option<&str>,
    ) -> Result<()> {
        let result = self
            .writer()
            .and_then(|w| w.write_start_element(prefix, name, uri));
        self.record(result)
    }

    pub fn write_end_element(&mut self) -> Result<()> {
        let result = self.writer().and_then(|w| w.write_end_element());
        self.record(result)
    }

    pub fn write_namespace(&mut self, prefix: Option<&str>, uri: &str) -> Result<()> {
        let result = self.writer().and_then(|w| w.write_namespace(prefix, uri));
        self.record(result)
    }

    pub fn write_attribute(
        &mut self,
        prefix: Option<&str>,
        name: &str,
        uri: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let result = self
            .writer()
            .and_then(|w| w.write_attribute(prefix, name, uri, value));
        self.record(result)
    }

    pub fn write_string(&mut self, text: &str) -> Result<()> {
        let result = self.writer().and_then(|w| w.write_string(text));
        self.record(result)
    }

    /// Take the writer role out of the archive, e.g. to hand it to the
    /// write-queue thread. The archive is closed from its point of view.
    pub fn take_writer(&mut self) -> Result<XmlEmitter<ByteSink>> {
        match std::mem::replace(&mut self.role, Role::Closed) {
            Role::Writer(emitter) => Ok(*emitter),
            other => {
                self.role = other;
                Err(MarkupError::invalid_io_operation(
                    "archive is not open for writing",
                ))
            }
        }
    }

    /// Flush the structural tail and release the sink or source
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.role, Role::Closed) {
            Role::Writer(mut emitter) => {
                let result = emitter.close();
                let result = result.and_then(|_| emitter.into_inner().finish());
                self.record(result)
            }
            Role::Reader(mut reader) => {
                reader.stop();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Namespaces implied by enabled markup options, in a fixed relative order
fn append_option_namespaces(namespaces: &mut NamespaceRegistry, options: &OptionFlags) {
    let wanted: [(bool, &str, &str); 5] = [
        (options.debug, "err", ERR_NS_URI),
        (options.literal, "lit", LITERAL_NS_URI),
        (options.operator, "op", OPERATOR_NS_URI),
        (options.modifier, "type", MODIFIER_NS_URI),
        (options.position, "pos", POSITION_NS_URI),
    ];
    for (enabled, prefix, uri) in wanted {
        if enabled && !namespaces.contains_uri(uri) {
            namespaces.set(prefix, uri);
        }
    }
}

fn known_encoding(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "UTF-8"
            | "UTF8"
            | "UTF-16"
            | "UTF-16LE"
            | "UTF-16BE"
            | "ISO-8859-1"
            | "ISO-8859-15"
            | "LATIN1"
            | "US-ASCII"
            | "ASCII"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::namespaces::SRC_NS_URI;

    fn memory_output(buffer: &MemoryBuffer) -> String {
        String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_translate_c_statement() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        let mut unit = Unit::new();
        unit.set_language(Language::C);
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        assert_eq!(
            unit.xml().unwrap(),
            "<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C\">\
             <expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>"
        );
    }

    #[test]
    fn test_translate_with_identity_attributes() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        let mut unit = Unit::new();
        unit.set_language(Language::Cpp);
        unit.set_dir("test");
        unit.set_filename("project");
        unit.set_version("1");
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        assert_eq!(
            unit.xml().unwrap(),
            "<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" \
             filename=\"project\" version=\"1\">\
             <expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>"
        );
    }

    #[test]
    fn test_translate_infers_language_from_extension() {
        let archive = Archive::new();
        let mut unit = Unit::new();
        unit.set_filename("project.c");
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        assert_eq!(unit.language(), Some(Language::C));
    }

    #[test]
    fn test_translate_registered_extension() {
        let mut archive = Archive::new();
        archive.register_file_extension("foo", "C").unwrap();
        let mut unit = Unit::new();
        unit.set_filename("project.foo");
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        assert_eq!(unit.language(), Some(Language::C));
    }

    #[test]
    fn test_translate_without_language_fails() {
        let archive = Archive::new();
        let mut unit = Unit::new();
        unit.set_filename("project.unknownext");
        let err = archive.parse_unit(&mut unit, b"a;\n").unwrap_err();
        assert!(matches!(err, MarkupError::UnsetLanguage { .. }));
    }

    #[test]
    fn test_hash_attribute_iff_enabled() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        let mut unit = Unit::new();
        unit.set_language(Language::C);
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        assert!(!unit.xml().unwrap().contains("hash="));

        let mut archive = Archive::new();
        archive.enable_hash().unwrap();
        let mut unit = Unit::new();
        unit.set_language(Language::C);
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        let expected = HashAlgorithm::Sha256.digest(b"a;\n");
        assert!(unit
            .xml()
            .unwrap()
            .contains(&format!("hash=\"{expected}\"")));
    }

    #[test]
    fn test_hash_of_empty_source_still_emitted() {
        let archive = Archive::new();
        let mut unit = Unit::new();
        unit.set_language(Language::C);
        archive.parse_unit(&mut unit, b"").unwrap();
        assert_eq!(unit.hash(), Some(HashAlgorithm::Sha256.digest(b"").as_str()));
    }

    #[test]
    fn test_double_open_rejected() {
        let mut archive = Archive::new();
        archive.write_open_memory().unwrap();
        let err = archive.write_open_memory().unwrap_err();
        assert!(matches!(err, MarkupError::InvalidIoOperation(_)));
        let err = archive.read_open_bytes(b"<unit/>".to_vec()).unwrap_err();
        assert!(matches!(err, MarkupError::InvalidIoOperation(_)));
    }

    #[test]
    fn test_configuration_frozen_after_open() {
        let mut archive = Archive::new();
        archive.write_open_memory().unwrap();
        assert!(archive.set_url("u").is_err());
        assert!(archive.enable_full_archive().is_err());
        assert!(archive.register_namespace("x", "y").is_err());
        assert!(archive.register_file_extension("zz", "C").is_err());
    }

    #[test]
    fn test_reserved_prefix_conflict_fails_at_open() {
        let mut archive = Archive::new();
        archive
            .register_namespace("cpp", "http://example.com/notcpp")
            .unwrap();
        let err = archive.write_open_memory().unwrap_err();
        assert!(matches!(err, MarkupError::NamespaceConflict { .. }));
    }

    #[test]
    fn test_reserved_prefix_canonical_is_fine() {
        let mut archive = Archive::new();
        archive.register_namespace("cpp", CPP_NS_URI).unwrap();
        assert!(archive.write_open_memory().is_ok());
    }

    #[test]
    fn test_src_prefix_reassignment() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        archive.register_namespace("s", SRC_NS_URI).unwrap();
        let buffer = archive.write_open_memory().unwrap();
        let mut unit = Unit::new();
        unit.set_language(Language::Cpp);
        archive.parse_unit(&mut unit, b"a;\n").unwrap();
        archive.write_unit(&unit).unwrap();
        archive.close().unwrap();
        let xml = memory_output(&buffer);
        assert!(xml.contains("<s:unit xmlns:s="));
        assert!(xml.contains("<s:expr_stmt>"));
    }

    #[test]
    fn test_tabstop_validation() {
        let mut archive = Archive::new();
        assert!(archive.set_tabstop(0).is_err());
        assert!(archive.set_tabstop(1).is_ok());
        assert!(archive.set_tabstop(8).is_ok());
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let mut archive = Archive::new();
        assert!(matches!(
            archive.set_xml_encoding("KLINGON-8"),
            Err(MarkupError::UnsupportedEncoding(_))
        ));
        assert!(archive.set_xml_encoding("ISO-8859-1").is_ok());
    }

    #[test]
    fn test_unknown_language_rejected() {
        let mut archive = Archive::new();
        assert!(matches!(
            archive.set_language("Fortran"),
            Err(MarkupError::UnknownLanguage(_))
        ));
    }

    #[test]
    fn test_clone_config_copies_settings_not_sink() {
        let mut archive = Archive::new();
        archive.set_url("http://example.com/project").unwrap();
        archive.register_macro("M", "src:macro").unwrap();
        archive.add_transform(Transform::XPath("//name".into())).unwrap();
        archive.write_open_memory().unwrap();

        let clone = archive.clone_config();
        assert_eq!(clone.url(), Some("http://example.com/project"));
        assert_eq!(clone.macros().len(), 1);
        assert_eq!(clone.transforms().len(), 1);
        // the clone is unopened: configuration still allowed
        let mut clone = clone;
        assert!(clone.set_version("2").is_ok());
    }

    #[test]
    fn test_solo_write_allows_one_unit() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        let config = archive.translate_config();
        let buffer = archive.write_open_memory().unwrap();

        let mut unit = Unit::new();
        unit.set_language(Language::C);
        config.translate(&mut unit, b"a;\n").unwrap();
        archive.write_unit(&unit).unwrap();
        let err = archive.write_unit(&unit).unwrap_err();
        assert!(matches!(err, MarkupError::InvalidInput(_)));
        assert!(archive.last_error().is_some());
        archive.close().unwrap();

        let xml = memory_output(&buffer);
        assert!(xml.contains("language=\"C\""));
        assert!(xml.trim_end().ends_with("</unit>"));
    }

    #[test]
    fn test_full_archive_two_units_separated() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        archive.enable_full_archive().unwrap();
        let config = archive.translate_config();
        let buffer = archive.write_open_memory().unwrap();

        for (name, body) in [("a.cpp", &b"x;\n"[..]), ("b.cpp", &b"y;\n"[..])] {
            let mut unit = Unit::new();
            unit.set_language(Language::Cpp);
            unit.set_filename(name);
            config.translate(&mut unit, body).unwrap();
            archive.write_unit(&unit).unwrap();
        }
        archive.close().unwrap();

        let xml = memory_output(&buffer);
        // root, two inner units, two newlines around every inner unit
        assert!(xml.contains("<unit xmlns=\"http://www.sdml.info/srcML/src\">\n\n<unit "));
        assert!(xml.contains("</unit>\n\n<unit "));
        assert!(xml.contains("</unit>\n\n</unit>\n"));
        assert!(xml.contains("filename=\"a.cpp\""));
        assert!(xml.contains("filename=\"b.cpp\""));
    }

    #[test]
    fn test_framing_decision() {
        let defaults = OptionFlags::default();
        assert_eq!(decide_framing(1, false, &defaults, &[]), Framing::Solo);
        assert_eq!(decide_framing(2, false, &defaults, &[]), Framing::Full);
        assert_eq!(decide_framing(1, true, &defaults, &[]), Framing::Full);

        let mut forced = defaults.clone();
        forced.full_archive = true;
        assert_eq!(decide_framing(1, false, &forced, &[]), Framing::Full);

        let multiplying = [Transform::XPath("//name".into())];
        assert_eq!(
            decide_framing(1, false, &defaults, &multiplying),
            Framing::Full
        );
        let harmless = [Transform::XsltParam {
            name: "a".into(),
            value: "b".into(),
        }];
        assert_eq!(decide_framing(1, false, &defaults, &harmless), Framing::Solo);
    }

    #[test]
    fn test_read_back_written_archive() {
        let mut archive = Archive::new();
        archive.disable_hash().unwrap();
        archive.enable_full_archive().unwrap();
        archive.set_url("test").unwrap();
        let config = archive.translate_config();
        let buffer = archive.write_open_memory().unwrap();
        for (name, body) in [("a.cpp", &b"x;\n"[..]), ("b.cpp", &b"y;\n"[..])] {
            let mut unit = Unit::new();
            unit.set_filename(name);
            config.translate(&mut unit, body).unwrap();
            archive.write_unit(&unit).unwrap();
        }
        archive.close().unwrap();
        let bytes = buffer.lock().unwrap().clone();

        let mut input = Archive::new();
        input.read_open_bytes(bytes).unwrap();
        assert_eq!(input.url(), Some("test"));
        let a = input.read_unit().unwrap().unwrap();
        assert_eq!(a.filename(), Some("a.cpp"));
        assert_eq!(a.source(), Some(&b"x;\n"[..]));
        let b = input.read_unit().unwrap().unwrap();
        assert_eq!(b.filename(), Some("b.cpp"));
        assert!(input.read_unit().unwrap().is_none());
        input.close().unwrap();
    }

    #[test]
    fn test_copy_units_between_archives() {
        // the split-archive pattern: read units, write them elsewhere
        let mut source = Archive::new();
        source.disable_hash().unwrap();
        source.enable_full_archive().unwrap();
        let config = source.translate_config();
        let buffer = source.write_open_memory().unwrap();
        for name in ["a.h", "b.cpp"] {
            let mut unit = Unit::new();
            unit.set_filename(name);
            unit.set_language(Language::Cpp);
            config.translate(&mut unit, b"z;\n").unwrap();
            source.write_unit(&unit).unwrap();
        }
        source.close().unwrap();

        let mut input = Archive::new();
        input.read_open_bytes(buffer.lock().unwrap().clone()).unwrap();
        let mut headers = Archive::new();
        let mut others = Archive::new();
        headers.set_options(input.options().clone()).unwrap();
        others.set_options(input.options().clone()).unwrap();
        let header_buf = headers.write_open_memory().unwrap();
        let other_buf = others.write_open_memory().unwrap();

        while let Some(unit) = input.read_unit().unwrap() {
            if unit.filename().is_some_and(|f| f.ends_with(".h")) {
                headers.write_unit(&unit).unwrap();
            } else {
                others.write_unit(&unit).unwrap();
            }
        }
        headers.close().unwrap();
        others.close().unwrap();

        assert!(memory_output(&header_buf).contains("filename=\"a.h\""));
        assert!(memory_output(&other_buf).contains("filename=\"b.cpp\""));
    }

    #[test]
    fn test_macro_registration_echoed() {
        let mut archive = Archive::new();
        archive.register_macro("MACRO1", "src:macro").unwrap();
        archive.enable_full_archive().unwrap();
        let buffer = archive.write_open_memory().unwrap();
        let config = archive.translate_config();
        let mut unit = Unit::new();
        unit.set_language(Language::Cpp);
        config.translate(&mut unit, b"MACRO1;\n").unwrap();
        archive.write_unit(&unit).unwrap();
        archive.close().unwrap();
        let xml = memory_output(&buffer);
        assert!(xml.contains("<macro-list token=\"MACRO1\" type=\"src:macro\"/>"));
        assert!(xml.contains("<macro><name>MACRO1</name></macro><empty_stmt>;</empty_stmt>"));
    }

    #[test]
    fn test_direct_write_requires_writer_role() {
        let mut archive = Archive::new();
        let err = archive.write_start_element(None, "element", None).unwrap_err();
        assert!(matches!(err, MarkupError::InvalidIoOperation(_)));
    }
}
