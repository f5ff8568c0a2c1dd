//! Streaming XML emitter
//!
//! Writes the markup document directly to any `std::io::Write` with no tree
//! in memory. One emitter handles all three placements: a solo document whose
//! root is the unit itself, a full archive with an outer root element, and
//! the bare unit fragments the parse workers produce.
//!
//! Text escapes `&`, `<`, `>` and nothing else, so the text content of a unit
//! concatenates back to the original source bytes.

use std::io::Write;

use crate::core::error::{MarkupError, Result};
use crate::core::hash::HashAlgorithm;
use crate::core::language::Language;
use crate::core::namespaces::{
    NamespaceRegistry, CPP_NS_URI, ERR_NS_URI, LITERAL_NS_URI, MODIFIER_NS_URI, OPERATOR_NS_URI,
    POSITION_NS_URI, SRC_NS_URI,
};
use crate::core::options::OptionFlags;
use crate::core::unit::{SpliceOffsets, Unit};
use crate::markup::token::{ElementKind, MarkupNs, MarkupToken, TokenProducer};

/// Document framing, fixed before the first unit is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The single unit element is the document root
    Solo,
    /// An outer `<unit>` element wraps the inner units
    Full,
    /// Inner-unit form with no document around it (worker output)
    Fragment,
}

/// Emitter configuration snapshot, frozen at archive open
#[derive(Debug, Clone, Default)]
pub struct EmitConfig {
    pub options: OptionFlags,
    pub namespaces: NamespaceRegistry,
    pub xml_encoding: String,
    pub src_encoding: Option<String>,
    pub language: Option<Language>,
    pub url: Option<String>,
    pub version: Option<String>,
    pub revision: Option<String>,
    pub tabstop: Option<usize>,
    pub processing_instruction: Option<(String, String)>,
    pub macros: Vec<(String, String)>,
    pub user_attributes: Vec<(String, String)>,
    pub hash_algorithm: HashAlgorithm,
}

impl EmitConfig {
    pub fn standard() -> Self {
        Self {
            namespaces: NamespaceRegistry::standard(),
            xml_encoding: "UTF-8".to_string(),
            ..Default::default()
        }
    }

    /// Prefix for a markup namespace, e.g. `""` for src by default
    fn prefix_for_uri(&self, uri: &str) -> String {
        self.namespaces.prefix_for(uri).unwrap_or("").to_string()
    }

    fn qname(&self, ns: MarkupNs, local: &str) -> String {
        let (uri, fallback) = match ns {
            MarkupNs::Src => (SRC_NS_URI, ""),
            MarkupNs::Cpp => (CPP_NS_URI, "cpp"),
            MarkupNs::Literal => (LITERAL_NS_URI, "lit"),
        };
        let prefix = self
            .namespaces
            .prefix_for(uri)
            .unwrap_or(fallback)
            .to_string();
        if prefix.is_empty() {
            local.to_string()
        } else {
            format!("{prefix}:{local}")
        }
    }
}

/// Escape text content: `&`, `<`, `>` only
pub fn escape_text(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'>' => out.extend_from_slice(b"&gt;"),
            _ => out.push(b),
        }
    }
    out
}

/// Escape attribute values: text escapes plus the double quote
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Which unit placement a start tag is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitPlacement {
    SoloRoot,
    Inner,
}

struct PendingTag {
    buf: String,
    is_unit: bool,
}

/// Streaming XML writer for markup documents
pub struct XmlEmitter<W: Write> {
    sink: W,
    cfg: EmitConfig,
    framing: Framing,
    written: usize,
    doc_started: bool,
    root_written: bool,
    units_written: usize,
    unit_open: bool,
    pending: Option<PendingTag>,
    open_elements: Vec<String>,
    unit_content_begin: Option<usize>,
    last_offsets: Option<SpliceOffsets>,
    closed: bool,
}

impl<W: Write> XmlEmitter<W> {
    pub fn new(sink: W, cfg: EmitConfig, framing: Framing) -> Self {
        Self {
            sink,
            cfg,
            framing,
            written: 0,
            doc_started: false,
            root_written: false,
            units_written: 0,
            unit_open: false,
            pending: None,
            open_elements: Vec::new(),
            unit_content_begin: None,
            last_offsets: None,
            closed: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn units_written(&self) -> usize {
        self.units_written
    }

    /// Splice offsets of the most recently finished unit (fragment mode)
    pub fn last_offsets(&self) -> Option<SpliceOffsets> {
        self.last_offsets
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes)?;
        self.written += bytes.len();
        Ok(())
    }

    fn ensure_document(&mut self) -> Result<()> {
        if self.doc_started || self.framing == Framing::Fragment {
            self.doc_started = true;
            return Ok(());
        }
        self.doc_started = true;
        if self.cfg.options.xml_decl {
            let decl = format!(
                "<?xml version=\"1.0\" encoding=\"{}\" standalone=\"yes\"?>\n",
                self.cfg.xml_encoding
            );
            self.write_raw(decl.as_bytes())?;
        }
        if let Some((target, data)) = self.cfg.processing_instruction.clone() {
            let pi = format!("<?{target} {data}?>\n");
            self.write_raw(pi.as_bytes())?;
        }
        Ok(())
    }

    /// Root start tag of a full archive, with its namespaces, attributes and
    /// macro-list children, followed by the blank-line separator
    fn ensure_root(&mut self) -> Result<()> {
        if self.root_written || self.framing != Framing::Full {
            return Ok(());
        }
        self.root_written = true;

        let mut tag = String::from("<");
        tag.push_str(&self.cfg.qname(MarkupNs::Src, "unit"));

        if self.cfg.options.namespace_decl {
            for decl in self.root_namespace_decls() {
                tag.push_str(&decl);
            }
        }

        // revision, src-encoding, language (advisory), url, version, tabs,
        // options, user attrs
        push_attr(&mut tag, "revision", self.cfg.revision.as_deref());
        if self.cfg.options.store_encoding {
            push_attr(&mut tag, "src-encoding", self.cfg.src_encoding.as_deref());
        }
        push_attr(
            &mut tag,
            "language",
            self.cfg.language.map(|l| l.as_str()),
        );
        push_attr(&mut tag, "url", self.cfg.url.as_deref());
        push_attr(&mut tag, "version", self.cfg.version.as_deref());
        self.push_tabs_attr(&mut tag);
        push_attr(
            &mut tag,
            "options",
            self.cfg.options.to_attribute().as_deref(),
        );
        for (name, value) in &self.cfg.user_attributes {
            push_attr(&mut tag, name, Some(value));
        }
        tag.push('>');

        for (token, mtype) in &self.cfg.macros {
            tag.push_str(&format!(
                "<macro-list token=\"{}\" type=\"{}\"/>",
                escape_attribute(token),
                escape_attribute(mtype)
            ));
        }
        tag.push_str("\n\n");
        self.write_raw(tag.as_bytes())
    }

    fn push_tabs_attr(&self, tag: &mut String) {
        if let Some(tabstop) = self.cfg.tabstop {
            let name = if self.cfg.options.position {
                let prefix = self.cfg.prefix_for_uri(POSITION_NS_URI);
                if prefix.is_empty() {
                    "tabs".to_string()
                } else {
                    format!("{prefix}:tabs")
                }
            } else {
                "tabs".to_string()
            };
            tag.push_str(&format!(" {name}=\"{tabstop}\""));
        }
    }

    /// Declarations required at a framing root by the enabled options, in
    /// registration order: src always, cpp with CPP markup, err with debug
    /// markup, lit/op/type/pos with their options, user namespaces always.
    fn root_namespace_decls(&self) -> Vec<String> {
        let mut decls = Vec::new();
        for ns in self.cfg.namespaces.iter() {
            let wanted = match ns.uri.as_str() {
                SRC_NS_URI => true,
                CPP_NS_URI => self.cfg.options.cpp,
                ERR_NS_URI => self.cfg.options.debug,
                LITERAL_NS_URI => self.cfg.options.literal,
                OPERATOR_NS_URI => self.cfg.options.operator,
                MODIFIER_NS_URI => self.cfg.options.modifier,
                POSITION_NS_URI => self.cfg.options.position,
                _ => true,
            };
            if wanted {
                decls.push(xmlns_decl(&ns.prefix, &ns.uri));
            }
        }
        decls
    }

    /// Start tag for a unit element (without the closing `>`)
    fn build_unit_tag(&self, unit: &Unit, placement: UnitPlacement) -> String {
        let mut tag = String::from("<");
        tag.push_str(&self.cfg.qname(MarkupNs::Src, "unit"));

        if self.cfg.options.namespace_decl {
            match placement {
                UnitPlacement::SoloRoot => {
                    for decl in self.root_namespace_decls() {
                        tag.push_str(&decl);
                    }
                    // namespaces the unit body needs beyond the option set
                    for ns in unit.namespaces() {
                        if !decl_selected(&self.cfg, &self.cfg.options, &ns.uri) {
                            tag.push_str(&xmlns_decl(&ns.prefix, &ns.uri));
                        }
                    }
                }
                UnitPlacement::Inner => {
                    for ns in unit.namespaces() {
                        tag.push_str(&xmlns_decl(&ns.prefix, &ns.uri));
                    }
                }
            }
        }

        push_attr(
            &mut tag,
            "revision",
            unit.revision().or(self.cfg.revision.as_deref()),
        );
        if placement == UnitPlacement::SoloRoot && self.cfg.options.store_encoding {
            push_attr(&mut tag, "src-encoding", self.cfg.src_encoding.as_deref());
        }
        push_attr(&mut tag, "language", unit.language().map(|l| l.as_str()));
        if placement == UnitPlacement::SoloRoot {
            push_attr(&mut tag, "url", self.cfg.url.as_deref());
        }
        push_attr(&mut tag, "dir", unit.dir());
        push_attr(&mut tag, "filename", unit.filename());
        push_attr(&mut tag, "version", unit.version());
        push_attr(&mut tag, "timestamp", unit.timestamp());
        if self.cfg.options.hash {
            push_attr(&mut tag, "hash", unit.hash());
        }
        if placement == UnitPlacement::SoloRoot {
            self.push_tabs_attr(&mut tag);
            push_attr(
                &mut tag,
                "options",
                self.cfg.options.to_attribute().as_deref(),
            );
        }
        for (name, value) in unit.attributes() {
            push_attr(&mut tag, name, Some(value));
        }
        tag
    }

    /// Begin a unit element; content follows through tokens or the direct API
    pub fn write_start_unit(&mut self, unit: &Unit) -> Result<()> {
        if self.closed {
            return Err(MarkupError::invalid_io_operation("emitter is closed"));
        }
        if self.unit_open {
            return Err(MarkupError::invalid_input("unit already open"));
        }
        if self.framing == Framing::Solo && self.units_written > 0 {
            return Err(MarkupError::invalid_input(
                "solo document already contains its unit",
            ));
        }
        if self.framing == Framing::Full && unit.language().is_none() {
            return Err(MarkupError::UnsetLanguage {
                filename: unit.filename().map(str::to_string),
            });
        }
        self.ensure_document()?;
        self.ensure_root()?;

        let placement = match self.framing {
            Framing::Solo => UnitPlacement::SoloRoot,
            Framing::Full | Framing::Fragment => UnitPlacement::Inner,
        };
        let tag = self.build_unit_tag(unit, placement);
        self.pending = Some(PendingTag {
            buf: tag,
            is_unit: true,
        });
        self.unit_open = true;
        self.unit_content_begin = None;

        // solo documents echo the macro list as first children
        if placement == UnitPlacement::SoloRoot && !self.cfg.macros.is_empty() {
            self.flush_pending(false)?;
            let macros = self.cfg.macros.clone();
            for (token, mtype) in &macros {
                let m = format!(
                    "<macro-list token=\"{}\" type=\"{}\"/>",
                    escape_attribute(token),
                    escape_attribute(mtype)
                );
                self.write_raw(m.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Close the current unit, auto-closing any dangling elements
    pub fn write_end_unit(&mut self) -> Result<()> {
        if !self.unit_open {
            return Err(MarkupError::invalid_input("no unit open"));
        }
        while !self.open_elements.is_empty() {
            self.write_end_element()?;
        }

        if let Some(pending) = self.pending.take() {
            // empty unit: self-closing, all offsets at the '/'
            let at = self.written + pending.buf.len();
            self.write_raw(pending.buf.as_bytes())?;
            self.write_raw(b"/>")?;
            self.last_offsets = Some(SpliceOffsets {
                content_begin: at,
                content_end: at,
                insert_begin: at,
                insert_end: at,
            });
        } else {
            let content_end = self.written;
            let end = format!("</{}>", self.cfg.qname(MarkupNs::Src, "unit"));
            self.write_raw(end.as_bytes())?;
            self.last_offsets = Some(SpliceOffsets {
                content_begin: self.unit_content_begin.unwrap_or(content_end),
                content_end,
                insert_begin: content_end,
                insert_end: content_end,
            });
        }

        match self.framing {
            Framing::Full => self.write_raw(b"\n\n")?,
            Framing::Solo => self.write_raw(b"\n")?,
            Framing::Fragment => {}
        }
        self.unit_open = false;
        self.units_written += 1;
        Ok(())
    }

    /// Append a fully formed unit: its parsed or captured XML fragment in a
    /// full archive, or a rebuilt root element in a solo document
    pub fn write_unit(&mut self, unit: &Unit) -> Result<()> {
        if self.closed {
            return Err(MarkupError::invalid_io_operation("emitter is closed"));
        }
        if self.unit_open {
            return Err(MarkupError::invalid_input("unit already open"));
        }
        let xml = unit
            .xml()
            .ok_or_else(|| MarkupError::invalid_input("unit has no parsed content"))?;

        match self.framing {
            Framing::Full => {
                if unit.language().is_none() {
                    return Err(MarkupError::UnsetLanguage {
                        filename: unit.filename().map(str::to_string),
                    });
                }
                self.ensure_document()?;
                self.ensure_root()?;
                self.write_raw(xml.as_bytes())?;
                self.write_raw(b"\n\n")?;
            }
            Framing::Solo | Framing::Fragment => {
                if self.units_written > 0 {
                    return Err(MarkupError::invalid_input(
                        "solo document already contains its unit",
                    ));
                }
                self.ensure_document()?;
                let placement = if self.framing == Framing::Solo {
                    UnitPlacement::SoloRoot
                } else {
                    UnitPlacement::Inner
                };
                let tag = self.build_unit_tag(unit, placement);
                let body = unit.content_slice().unwrap_or("");
                if body.is_empty() && self.cfg.macros.is_empty() {
                    self.write_raw(tag.as_bytes())?;
                    self.write_raw(b"/>")?;
                } else {
                    self.write_raw(tag.as_bytes())?;
                    self.write_raw(b">")?;
                    let macros = self.cfg.macros.clone();
                    for (token, mtype) in &macros {
                        let m = format!(
                            "<macro-list token=\"{}\" type=\"{}\"/>",
                            escape_attribute(token),
                            escape_attribute(mtype)
                        );
                        self.write_raw(m.as_bytes())?;
                    }
                    self.write_raw(body.as_bytes())?;
                    let end = format!("</{}>", self.cfg.qname(MarkupNs::Src, "unit"));
                    self.write_raw(end.as_bytes())?;
                }
                if self.framing == Framing::Solo {
                    self.write_raw(b"\n")?;
                }
            }
        }
        self.units_written += 1;
        Ok(())
    }

    /// Consume a token stream into the current document: the `UnitStart`
    /// token opens the unit with `unit`'s attributes, `EndOfInput` returns
    pub fn write_unit_tokens(
        &mut self,
        unit: &Unit,
        producer: &mut dyn TokenProducer,
    ) -> Result<()> {
        loop {
            match producer.next_token()? {
                MarkupToken::StartElement(ElementKind::Unit) => self.write_start_unit(unit)?,
                MarkupToken::EndElement(ElementKind::Unit) => self.write_end_unit()?,
                MarkupToken::StartElement(kind) => self.start_kind(kind)?,
                MarkupToken::EndElement(_) => self.write_end_element()?,
                MarkupToken::EmptyElement(kind) => {
                    self.start_kind(kind)?;
                    self.write_end_element()?;
                }
                MarkupToken::Text(bytes) => self.write_text_bytes(&bytes)?,
                MarkupToken::Escape(b) => self.write_escape(b)?,
                MarkupToken::EndOfInput => return Ok(()),
            }
        }
    }

    fn start_kind(&mut self, kind: ElementKind) -> Result<()> {
        let qname = self.cfg.qname(kind.ns(), kind.local_name());
        let mut buf = format!("<{qname}");
        for (name, value) in kind.fixed_attributes() {
            buf.push_str(&format!(" {name}=\"{value}\""));
        }
        self.flush_pending(false)?;
        self.pending = Some(PendingTag {
            buf,
            is_unit: false,
        });
        self.open_elements.push(qname);
        Ok(())
    }

    /// `<escape char="0x0c"/>` for a byte XML text cannot carry
    fn write_escape(&mut self, byte: u8) -> Result<()> {
        self.flush_pending(false)?;
        let qname = self.cfg.qname(MarkupNs::Src, "escape");
        let el = format!("<{qname} char=\"0x{byte:02x}\"/>");
        self.write_raw(el.as_bytes())
    }

    fn write_text_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.flush_pending(false)?;
        let escaped = escape_text(bytes);
        self.write_raw(&escaped)
    }

    /// Flush a buffered start tag. Records the unit-content origin when the
    /// flushed tag is the unit's own.
    fn flush_pending(&mut self, self_close: bool) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.write_raw(pending.buf.as_bytes())?;
            self.write_raw(if self_close { b"/>" } else { b">" })?;
            if pending.is_unit && !self_close {
                self.unit_content_begin = Some(self.written);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Direct element API, used by transformations and metadata writers
    // ------------------------------------------------------------------

    pub fn write_start_element(
        &mut self,
        prefix: Option<&str>,
        name: &str,
        uri: Option<&str>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(MarkupError::invalid_argument("empty element name"));
        }
        if !self.unit_open {
            return Err(MarkupError::invalid_input("no unit started"));
        }
        self.flush_pending(false)?;
        let qname = match prefix {
            Some(p) if !p.is_empty() => format!("{p}:{name}"),
            _ => name.to_string(),
        };
        let mut buf = format!("<{qname}");
        if let Some(uri) = uri {
            buf.push_str(&xmlns_decl(prefix.unwrap_or(""), uri));
        }
        self.pending = Some(PendingTag {
            buf,
            is_unit: false,
        });
        self.open_elements.push(qname);
        Ok(())
    }

    pub fn write_namespace(&mut self, prefix: Option<&str>, uri: &str) -> Result<()> {
        if uri.is_empty() {
            return Err(MarkupError::invalid_argument("empty namespace uri"));
        }
        let decl = xmlns_decl(prefix.unwrap_or(""), uri);
        match self.pending.as_mut() {
            Some(pending) => {
                if !pending.buf.contains(&decl) {
                    pending.buf.push_str(&decl);
                }
                Ok(())
            }
            None => Err(MarkupError::invalid_input(
                "no open start tag to attach a namespace to",
            )),
        }
    }

    pub fn write_attribute(
        &mut self,
        prefix: Option<&str>,
        name: &str,
        uri: Option<&str>,
        value: &str,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(MarkupError::invalid_argument("empty attribute name"));
        }
        let qname = match prefix {
            Some(p) if !p.is_empty() => format!("{p}:{name}"),
            _ => name.to_string(),
        };
        let mut addition = String::new();
        if let (Some(p), Some(u)) = (prefix, uri) {
            let decl = xmlns_decl(p, u);
            if !self
                .pending
                .as_ref()
                .map(|t| t.buf.contains(&decl))
                .unwrap_or(false)
            {
                addition.push_str(&decl);
            }
        }
        addition.push_str(&format!(" {qname}=\"{}\"", escape_attribute(value)));
        match self.pending.as_mut() {
            Some(pending) => {
                pending.buf.push_str(&addition);
                Ok(())
            }
            None => Err(MarkupError::invalid_input(
                "no open start tag to attach an attribute to",
            )),
        }
    }

    pub fn write_string(&mut self, text: &str) -> Result<()> {
        if !self.unit_open {
            return Err(MarkupError::invalid_input("no unit started"));
        }
        self.write_text_bytes(text.as_bytes())
    }

    pub fn write_end_element(&mut self) -> Result<()> {
        let qname = self
            .open_elements
            .pop()
            .ok_or_else(|| MarkupError::invalid_input("no element open"))?;
        if self.pending.is_some() {
            self.flush_pending(true)
        } else {
            let end = format!("</{qname}>");
            self.write_raw(end.as_bytes())
        }
    }

    /// Finish the document: close any open unit, write the structural tail
    /// of a full archive, and flush the sink
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.unit_open {
            self.write_end_unit()?;
        }
        if self.framing == Framing::Full {
            self.ensure_document()?;
            self.ensure_root()?;
            let end = format!("</{}>\n", self.cfg.qname(MarkupNs::Src, "unit"));
            self.write_raw(end.as_bytes())?;
        }
        self.sink.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

fn xmlns_decl(prefix: &str, uri: &str) -> String {
    if prefix.is_empty() {
        format!(" xmlns=\"{}\"", escape_attribute(uri))
    } else {
        format!(" xmlns:{prefix}=\"{}\"", escape_attribute(uri))
    }
}

fn push_attr(tag: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        tag.push_str(&format!(" {name}=\"{}\"", escape_attribute(value)));
    }
}

/// Whether a URI is already covered by the option-driven root declarations
fn decl_selected(cfg: &EmitConfig, options: &OptionFlags, uri: &str) -> bool {
    match uri {
        SRC_NS_URI => true,
        CPP_NS_URI => options.cpp,
        ERR_NS_URI => options.debug,
        LITERAL_NS_URI => options.literal,
        OPERATOR_NS_URI => options.operator,
        MODIFIER_NS_URI => options.modifier,
        POSITION_NS_URI => options.position,
        other => cfg.namespaces.contains_uri(other),
    }
}

/// Emit one unit as a standalone fragment: the form workers hand to the
/// write queue and archives store per unit
pub fn emit_unit_fragment(
    cfg: &EmitConfig,
    unit: &Unit,
    producer: &mut dyn TokenProducer,
) -> Result<(String, SpliceOffsets)> {
    let mut emitter = XmlEmitter::new(Vec::new(), cfg.clone(), Framing::Fragment);
    emitter.write_unit_tokens(unit, producer)?;
    let offsets = emitter
        .last_offsets()
        .ok_or_else(|| MarkupError::parse("token stream ended before the unit did"))?;
    let bytes = emitter.into_inner();
    let xml = String::from_utf8(bytes)
        .map_err(|e| MarkupError::parse(format!("emitted fragment is not UTF-8: {e}")))?;
    Ok((xml, offsets))
}
