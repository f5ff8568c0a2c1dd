//! Streaming markup-XML reader
//!
//! An event parser runs on its own thread and the consumer pulls whole units
//! from it. The two sides meet at *boundaries*: after the root start tag,
//! after each unit's start tag, after each unit's end tag, and after the root
//! end tag. The parser blocks at every boundary until the consumer asks for
//! the next one, so a consumer that only inspects headers never pays for body
//! capture beyond the unit it is looking at.
//!
//! Unit bodies are captured verbatim, byte for byte as they appeared in the
//! document, and the splice offsets a transformation engine needs are
//! recorded against that capture.

use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use quick_xml::events::{BytesPI, BytesStart, Event};
use quick_xml::Reader;

use crate::core::error::{MarkupError, Result};
use crate::core::language::Language;
use crate::core::namespaces::{normalize_uri, Namespace};
use crate::core::options::OptionFlags;
use crate::core::unit::{SpliceOffsets, Unit};
use crate::io::ByteSource;

/// Everything collected from the document prolog and the root start tag
#[derive(Debug, Clone)]
pub struct RootInfo {
    /// False when the root element is itself the single unit
    pub is_archive: bool,
    pub encoding: String,
    /// Recorded source encoding, when the document stored one
    pub src_encoding: Option<String>,
    /// Advisory language attribute on the root
    pub language: Option<String>,
    pub url: Option<String>,
    /// Filename and directory attributes, present on solo roots
    pub filename: Option<String>,
    pub dir: Option<String>,
    pub version: Option<String>,
    pub revision: Option<String>,
    pub tabstop: Option<usize>,
    pub options: OptionFlags,
    /// Declarations on the root element, in document order, normalized
    pub namespaces: Vec<(String, String)>,
    /// Root attributes that are not part of the recognized set
    pub attributes: Vec<(String, String)>,
    /// `<macro-list token type/>` declarations
    pub macros: Vec<(String, String)>,
    pub processing_instruction: Option<(String, String)>,
}

impl Default for RootInfo {
    fn default() -> Self {
        Self {
            is_archive: false,
            encoding: "UTF-8".to_string(),
            src_encoding: None,
            language: None,
            url: None,
            filename: None,
            dir: None,
            version: None,
            revision: None,
            tabstop: None,
            options: OptionFlags {
                xml_decl: false,
                namespace_decl: false,
                hash: false,
                ..Default::default()
            },
            namespaces: Vec::new(),
            attributes: Vec::new(),
            macros: Vec::new(),
            processing_instruction: None,
        }
    }
}

/// Parser-to-consumer boundary messages
enum Boundary {
    Root(Box<RootInfo>),
    UnitHeader(Box<Unit>),
    UnitBody(Box<Unit>),
    Done,
    Error(MarkupError),
}

enum ReaderState {
    Reading,
    /// A unit header was delivered; its body boundary is still pending
    BodyPending,
    Eof,
    Failed(MarkupError),
}

/// Consumer handle over a markup document
pub struct UnitReader {
    rx: Option<Receiver<Boundary>>,
    terminate: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    root: Option<RootInfo>,
    state: ReaderState,
}

impl UnitReader {
    /// Start reading a markup document; the parse runs on its own thread
    pub fn open(source: ByteSource) -> Result<Self> {
        let (tx, rx) = bounded::<Boundary>(0);
        let terminate = Arc::new(AtomicBool::new(false));
        let parser_terminate = Arc::clone(&terminate);
        let input = source.into_reader();
        let handle = std::thread::spawn(move || {
            let mut parser = Parser::new(input, tx, parser_terminate);
            parser.run();
        });
        Ok(Self {
            rx: Some(rx),
            terminate,
            handle: Some(handle),
            root: None,
            state: ReaderState::Reading,
        })
    }

    fn recv(&mut self) -> Result<Option<Boundary>> {
        let rx = match self.rx.as_ref() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.recv() {
            Ok(Boundary::Error(e)) => {
                self.state = ReaderState::Failed(e.clone());
                Err(e)
            }
            Ok(b) => Ok(Some(b)),
            Err(_) => {
                let e = MarkupError::parse("document ended unexpectedly");
                self.state = ReaderState::Failed(e.clone());
                Err(e)
            }
        }
    }

    fn check_state(&self) -> Result<bool> {
        match &self.state {
            ReaderState::Failed(e) => Err(e.clone()),
            ReaderState::Eof => Ok(false),
            _ => Ok(true),
        }
    }

    /// Root metadata. Idempotent: the first call advances the parse to the
    /// root boundary; later calls return the cached values untouched.
    pub fn read_root_unit_attributes(&mut self) -> Result<Option<&RootInfo>> {
        if !self.check_state()? {
            return Ok(self.root.as_ref());
        }
        if self.root.is_none() {
            match self.recv()? {
                Some(Boundary::Root(info)) => self.root = Some(*info),
                Some(Boundary::Done) | None => self.state = ReaderState::Eof,
                Some(_) => {
                    let e = MarkupError::parse("unexpected boundary before root");
                    self.state = ReaderState::Failed(e.clone());
                    return Err(e);
                }
            }
        }
        Ok(self.root.as_ref())
    }

    /// Advance to the next unit's header; `None` at end of the document
    pub fn read_unit_attributes(&mut self) -> Result<Option<Unit>> {
        if !self.check_state()? {
            return Ok(None);
        }
        self.read_root_unit_attributes()?;
        if matches!(self.state, ReaderState::BodyPending) {
            // skip the body of the unit whose header was already taken
            match self.recv()? {
                Some(Boundary::UnitBody(_)) => self.state = ReaderState::Reading,
                Some(Boundary::Done) | None => {
                    self.state = ReaderState::Eof;
                    return Ok(None);
                }
                Some(_) => return Err(self.fail("unexpected boundary while skipping a body")),
            }
        }
        match self.recv()? {
            Some(Boundary::UnitHeader(unit)) => {
                self.state = ReaderState::BodyPending;
                Ok(Some(*unit))
            }
            Some(Boundary::Done) | None => {
                self.state = ReaderState::Eof;
                Ok(None)
            }
            Some(_) => Err(self.fail("unexpected boundary before a unit header")),
        }
    }

    /// Advance to the next unit's end and return its verbatim XML as a single
    /// `<unit>…</unit>` string; `None` at end of the document
    pub fn read_srcml(&mut self) -> Result<Option<String>> {
        Ok(self.read_unit_body()?.and_then(|u| u.xml().map(str::to_string)))
    }

    /// Advance to the next unit's end and return the whole unit
    pub fn read_unit(&mut self) -> Result<Option<Unit>> {
        self.read_unit_body()
    }

    fn read_unit_body(&mut self) -> Result<Option<Unit>> {
        if !self.check_state()? {
            return Ok(None);
        }
        self.read_root_unit_attributes()?;
        if !matches!(self.state, ReaderState::BodyPending) {
            match self.recv()? {
                Some(Boundary::UnitHeader(_)) => self.state = ReaderState::BodyPending,
                Some(Boundary::Done) | None => {
                    self.state = ReaderState::Eof;
                    return Ok(None);
                }
                Some(_) => return Err(self.fail("unexpected boundary before a unit header")),
            }
        }
        match self.recv()? {
            Some(Boundary::UnitBody(unit)) => {
                self.state = ReaderState::Reading;
                Ok(Some(*unit))
            }
            Some(Boundary::Done) | None => {
                self.state = ReaderState::Eof;
                Ok(None)
            }
            Some(_) => Err(self.fail("unexpected boundary before a unit body")),
        }
    }

    fn fail(&mut self, message: &str) -> MarkupError {
        let e = MarkupError::parse(message);
        self.state = ReaderState::Failed(e.clone());
        e
    }

    /// Ask the parser to terminate at its next boundary check
    pub fn stop(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
        // dropping the channel unblocks a parser waiting at a boundary
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if !matches!(self.state, ReaderState::Failed(_)) {
            self.state = ReaderState::Eof;
        }
    }
}

impl Drop for UnitReader {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------
// Parser thread
// ----------------------------------------------------------------------

struct Parser {
    xml: Reader<BufReader<Box<dyn Read + Send>>>,
    tx: Sender<Boundary>,
    terminate: Arc<AtomicBool>,
}

impl Parser {
    fn new(input: Box<dyn Read + Send>, tx: Sender<Boundary>, terminate: Arc<AtomicBool>) -> Self {
        Self {
            xml: Reader::from_reader(BufReader::new(input)),
            tx,
            terminate,
        }
    }

    fn run(&mut self) {
        if let Err(e) = self.parse_document() {
            let _ = self.tx.send(Boundary::Error(e));
        }
    }

    /// Send a boundary; false means the consumer went away or stop() was
    /// called and the parse should end quietly
    fn boundary(&self, b: Boundary) -> bool {
        if self.terminate.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(b).is_ok()
    }

    fn parse_document(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        let mut info = RootInfo::default();

        // prolog: declaration, processing instructions, whitespace
        let (root_start, root_empty) = loop {
            buf.clear();
            match self.xml.read_event_into(&mut buf).map_err(parse_err)? {
                Event::Decl(d) => {
                    info.options.xml_decl = true;
                    if let Some(Ok(enc)) = d.encoding() {
                        info.encoding = String::from_utf8_lossy(&enc).into_owned();
                    }
                }
                Event::PI(pi) => {
                    info.processing_instruction = split_pi(&pi);
                }
                Event::Comment(_) | Event::DocType(_) | Event::Text(_) => {}
                Event::Start(e) => break (e.into_owned(), false),
                Event::Empty(e) => break (e.into_owned(), true),
                Event::Eof => return Err(MarkupError::parse("document has no root element")),
                _ => {}
            }
        };

        if local_name(&root_start) != b"unit" {
            return Err(MarkupError::parse(format!(
                "root element is not a unit: {}",
                String::from_utf8_lossy(root_start.name().into_inner())
            )));
        }

        let mut solo_unit = Unit::new();
        collect_root(&root_start, &mut info, &mut solo_unit)?;

        if root_empty {
            // the whole document is a self-closing unit element
            let raw = raw_start_tag(&root_start, true);
            finish_captured_unit(&mut solo_unit, raw, None)?;
            if !self.boundary(Boundary::Root(Box::new(info))) {
                return Ok(());
            }
            if !self.boundary(Boundary::UnitHeader(Box::new(header_of(&solo_unit)))) {
                return Ok(());
            }
            if !self.boundary(Boundary::UnitBody(Box::new(solo_unit))) {
                return Ok(());
            }
            self.boundary(Boundary::Done);
            return Ok(());
        }

        // scan the root's children far enough to classify archive vs solo
        let mut solo_buf = raw_start_tag(&root_start, false);
        let solo_content_begin = solo_buf.len();
        let pending: Option<(BytesStart<'static>, bool)>;
        let mut root_ended = false;
        loop {
            buf.clear();
            match self.xml.read_event_into(&mut buf).map_err(parse_err)? {
                Event::Text(t) => solo_buf.extend_from_slice(&t),
                Event::Comment(c) => {
                    solo_buf.extend_from_slice(b"<!--");
                    solo_buf.extend_from_slice(&c);
                    solo_buf.extend_from_slice(b"-->");
                }
                Event::Empty(e) if local_name(&e) == b"macro-list" => {
                    collect_macro(&e, &mut info)?;
                    solo_buf.extend_from_slice(&raw_start_tag(&e, true));
                }
                Event::Start(e) if local_name(&e) == b"unit" => {
                    info.is_archive = true;
                    pending = Some((e.into_owned(), false));
                    break;
                }
                Event::Empty(e) if local_name(&e) == b"unit" => {
                    info.is_archive = true;
                    pending = Some((e.into_owned(), true));
                    break;
                }
                Event::Start(e) => {
                    solo_buf.extend_from_slice(&raw_start_tag(&e, false));
                    pending = Some((e.into_owned(), false));
                    break;
                }
                Event::Empty(e) => {
                    solo_buf.extend_from_slice(&raw_start_tag(&e, true));
                    pending = None;
                    break;
                }
                Event::CData(c) => {
                    solo_buf.extend_from_slice(b"<![CDATA[");
                    solo_buf.extend_from_slice(&c);
                    solo_buf.extend_from_slice(b"]]>");
                    pending = None;
                    break;
                }
                Event::End(e) => {
                    solo_buf.extend_from_slice(b"</");
                    solo_buf.extend_from_slice(e.name().into_inner());
                    solo_buf.push(b'>');
                    root_ended = true;
                    pending = None;
                    break;
                }
                Event::Eof => return Err(MarkupError::parse("document truncated inside root")),
                _ => {}
            }
        }

        if info.is_archive {
            if !self.boundary(Boundary::Root(Box::new(info))) {
                return Ok(());
            }
            let (first, first_empty) = match pending {
                Some(first) => first,
                None => return Err(MarkupError::parse("archive without a first unit")),
            };
            self.parse_archive_units(first, first_empty)
        } else {
            if !self.boundary(Boundary::Root(Box::new(info))) {
                return Ok(());
            }
            self.parse_solo(solo_unit, solo_buf, solo_content_begin, pending, root_ended)
        }
    }

    /// Inner units of a full archive, one header/body boundary pair each
    fn parse_archive_units(
        &mut self,
        first: BytesStart<'static>,
        first_empty: bool,
    ) -> Result<()> {
        let mut buf = Vec::new();
        let mut next: Option<(BytesStart<'static>, bool)> = Some((first, first_empty));

        loop {
            let (start, empty) = match next.take() {
                Some(pending) => pending,
                None => {
                    // between units: whitespace and comments only
                    let found = loop {
                        buf.clear();
                        match self.xml.read_event_into(&mut buf).map_err(parse_err)? {
                            Event::Start(e) if local_name(&e) == b"unit" => {
                                break Some((e.into_owned(), false))
                            }
                            Event::Empty(e) if local_name(&e) == b"unit" => {
                                break Some((e.into_owned(), true))
                            }
                            Event::Text(_) | Event::Comment(_) => {}
                            Event::End(_) => break None,
                            Event::Eof => {
                                return Err(MarkupError::parse("archive truncated"))
                            }
                            other => {
                                return Err(MarkupError::parse(format!(
                                    "unexpected content between units: {other:?}"
                                )))
                            }
                        }
                    };
                    match found {
                        Some(pending) => pending,
                        None => {
                            self.boundary(Boundary::Done);
                            return Ok(());
                        }
                    }
                }
            };

            let mut unit = Unit::new();
            collect_unit(&start, &mut unit)?;
            if !self.boundary(Boundary::UnitHeader(Box::new(header_of(&unit)))) {
                return Ok(());
            }

            if empty {
                let raw = raw_start_tag(&start, true);
                finish_captured_unit(&mut unit, raw, None)?;
            } else {
                let mut capture = raw_start_tag(&start, false);
                let content_begin = capture.len();
                self.capture_element_body(&mut capture)?;
                finish_captured_unit(&mut unit, capture, Some(content_begin))?;
            }
            if !self.boundary(Boundary::UnitBody(Box::new(unit))) {
                return Ok(());
            }
        }
    }

    /// The root element is the unit: capture it to its end tag
    fn parse_solo(
        &mut self,
        mut unit: Unit,
        mut capture: Vec<u8>,
        content_begin: usize,
        pending: Option<(BytesStart<'static>, bool)>,
        root_ended: bool,
    ) -> Result<()> {
        if !root_ended {
            if let Some((_, false)) = pending {
                // a child element was opened during classification
                self.capture_element_body(&mut capture)?;
            }
            self.capture_element_body(&mut capture)?;
        }

        finish_captured_unit(&mut unit, capture, Some(content_begin))?;
        if !self.boundary(Boundary::UnitHeader(Box::new(header_of(&unit)))) {
            return Ok(());
        }
        if !self.boundary(Boundary::UnitBody(Box::new(unit))) {
            return Ok(());
        }
        self.boundary(Boundary::Done);
        Ok(())
    }

    /// Append raw events to `capture` until the element open at depth 1 closes.
    /// The closing tag itself is appended before returning.
    fn capture_element_body(&mut self, capture: &mut Vec<u8>) -> Result<()> {
        let mut depth = 1usize;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.xml.read_event_into(&mut buf).map_err(parse_err)? {
                Event::Start(e) => {
                    capture.extend_from_slice(&raw_start_tag(&e, false));
                    depth += 1;
                }
                Event::Empty(e) => capture.extend_from_slice(&raw_start_tag(&e, true)),
                Event::End(e) => {
                    depth -= 1;
                    capture.extend_from_slice(b"</");
                    capture.extend_from_slice(e.name().into_inner());
                    capture.push(b'>');
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Event::Text(t) => capture.extend_from_slice(&t),
                Event::CData(c) => {
                    capture.extend_from_slice(b"<![CDATA[");
                    capture.extend_from_slice(&c);
                    capture.extend_from_slice(b"]]>");
                }
                Event::Comment(c) => {
                    capture.extend_from_slice(b"<!--");
                    capture.extend_from_slice(&c);
                    capture.extend_from_slice(b"-->");
                }
                Event::PI(pi) => {
                    capture.extend_from_slice(b"<?");
                    capture.extend_from_slice(pi.target());
                    capture.extend_from_slice(pi.content());
                    capture.extend_from_slice(b"?>");
                }
                Event::Eof => return Err(MarkupError::parse("document truncated inside a unit")),
                _ => {}
            }
        }
    }
}

// ----------------------------------------------------------------------
// Event helpers
// ----------------------------------------------------------------------

fn parse_err(e: quick_xml::Error) -> MarkupError {
    MarkupError::parse(e.to_string())
}

fn local_name<'e>(e: &'e BytesStart<'_>) -> &'e [u8] {
    e.name().local_name().into_inner()
}

/// Reassemble the byte-exact start tag of an element
fn raw_start_tag(e: &BytesStart, empty: bool) -> Vec<u8> {
    let name = e.name().into_inner();
    let mut out = Vec::with_capacity(name.len() + e.attributes_raw().len() + 3);
    out.push(b'<');
    out.extend_from_slice(e.name().into_inner());
    out.extend_from_slice(e.attributes_raw());
    if empty {
        out.extend_from_slice(b"/>");
    } else {
        out.push(b'>');
    }
    out
}

/// Target and data of a processing instruction
fn split_pi(pi: &BytesPI) -> Option<(String, String)> {
    let target = String::from_utf8_lossy(pi.target()).into_owned();
    let data = String::from_utf8_lossy(pi.content())
        .trim_start()
        .to_string();
    Some((target, data))
}

/// A metadata-only copy for the header boundary
fn header_of(unit: &Unit) -> Unit {
    let mut header = unit.clone();
    header.xml = None;
    header.source = None;
    header.offsets = None;
    header
}

fn attr_pairs(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| MarkupError::parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.into_inner()).into_owned();
        let value = String::from_utf8_lossy(&unescape_entities(&attr.value)).into_owned();
        out.push((key, value));
    }
    Ok(out)
}

/// Root start tag: namespaces and recognized attributes into `info`, unit
/// identity attributes into `solo_unit` in case the document turns out solo
fn collect_root(e: &BytesStart, info: &mut RootInfo, solo_unit: &mut Unit) -> Result<()> {
    for (key, value) in attr_pairs(e)? {
        if let Some(prefix) = xmlns_prefix(&key) {
            info.namespaces
                .push((prefix.to_string(), normalize_uri(&value)));
            continue;
        }
        match key.as_str() {
            "language" => {
                info.language = Some(value.clone());
                if let Ok(lang) = Language::from_name(&value) {
                    solo_unit.set_language(lang);
                }
            }
            "url" => info.url = Some(value),
            "version" => {
                info.version = Some(value.clone());
                solo_unit.set_version(value);
            }
            "revision" => {
                info.revision = Some(value.clone());
                solo_unit.set_revision(value);
            }
            "tabs" | "pos:tabs" => info.tabstop = value.parse().ok(),
            "options" => info.options.apply_attribute(&value),
            "src-encoding" => {
                info.options.store_encoding = true;
                info.src_encoding = Some(value);
            }
            "filename" => {
                info.filename = Some(value.clone());
                solo_unit.set_filename(value);
            }
            "dir" => {
                info.dir = Some(value.clone());
                solo_unit.set_dir(value);
            }
            "timestamp" => solo_unit.set_timestamp(value),
            "hash" => {
                info.options.hash = true;
                solo_unit.set_hash(value);
            }
            _ => {
                info.attributes.push((key.clone(), value.clone()));
                solo_unit.add_attribute(key, value);
            }
        }
    }
    if !info.namespaces.is_empty() {
        info.options.namespace_decl = true;
    }
    Ok(())
}

/// Inner unit start tag into a fresh `Unit`
fn collect_unit(e: &BytesStart, unit: &mut Unit) -> Result<()> {
    for (key, value) in attr_pairs(e)? {
        if let Some(prefix) = xmlns_prefix(&key) {
            unit.namespaces.push(Namespace {
                prefix: prefix.to_string(),
                uri: normalize_uri(&value),
            });
            continue;
        }
        match key.as_str() {
            "language" => match Language::from_name(&value) {
                Ok(lang) => unit.set_language(lang),
                Err(_) => unit.add_attribute(key, value),
            },
            "filename" => unit.set_filename(value),
            "dir" => unit.set_dir(value),
            "version" => unit.set_version(value),
            "timestamp" => unit.set_timestamp(value),
            "hash" => unit.set_hash(value),
            "revision" => unit.set_revision(value),
            _ => unit.add_attribute(key, value),
        }
    }
    Ok(())
}

fn collect_macro(e: &BytesStart, info: &mut RootInfo) -> Result<()> {
    let mut token = None;
    let mut mtype = None;
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "token" => token = Some(value),
            "type" => mtype = Some(value),
            _ => {}
        }
    }
    if let (Some(token), Some(mtype)) = (token, mtype) {
        info.macros.push((token, mtype));
    }
    Ok(())
}

fn xmlns_prefix(key: &str) -> Option<&str> {
    if key == "xmlns" {
        Some("")
    } else {
        key.strip_prefix("xmlns:")
    }
}

/// Fill in the capture-derived fields: verbatim XML, splice offsets,
/// extracted source and line count
fn finish_captured_unit(
    unit: &mut Unit,
    capture: Vec<u8>,
    content_begin: Option<usize>,
) -> Result<()> {
    let offsets = match content_begin {
        Some(begin) => {
            let end = capture.len().saturating_sub(end_tag_len(&capture));
            SpliceOffsets {
                content_begin: begin,
                content_end: end,
                insert_begin: end,
                insert_end: end,
            }
        }
        None => {
            // self-closing: all offsets at the '/' of '/>'
            let at = capture.len().saturating_sub(2);
            SpliceOffsets {
                content_begin: at,
                content_end: at,
                insert_begin: at,
                insert_end: at,
            }
        }
    };
    let xml = String::from_utf8(capture)
        .map_err(|_| MarkupError::parse("unit XML is not valid UTF-8"))?;
    let source = source_from_markup(&xml)?;
    unit.loc = Some(source.iter().filter(|&&b| b == b'\n').count());
    unit.source = Some(source);
    unit.xml = Some(xml);
    unit.offsets = Some(offsets);
    Ok(())
}

/// Length of the trailing `</…>` tag in a captured element
fn end_tag_len(capture: &[u8]) -> usize {
    capture
        .iter()
        .rposition(|&b| b == b'<')
        .map(|p| capture.len() - p)
        .unwrap_or(0)
}

/// Extract the original source bytes from a unit's markup XML: concatenate
/// text content in document order, decode the XML entities the emitter
/// writes, and expand `<escape char="0x…"/>` elements back to their byte.
pub fn source_from_markup(xml: &str) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut out = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(parse_err)? {
            Event::Text(t) => out.extend_from_slice(&unescape_entities(&t)),
            Event::CData(c) => out.extend_from_slice(&c),
            Event::Empty(e) if local_name(&e) == b"escape" => {
                for attr in e.attributes().flatten() {
                    if attr.key.into_inner() == b"char" {
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        let hex = value.trim_start_matches("0x");
                        if let Ok(b) = u8::from_str_radix(hex, 16) {
                            out.push(b);
                        }
                    }
                }
            }
            Event::Eof => return Ok(out),
            _ => {}
        }
    }
}

/// Decode the predefined entities and character references on raw bytes,
/// leaving everything else untouched
fn unescape_entities(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            if let Some(semi) = bytes[i..].iter().position(|&b| b == b';') {
                let entity = &bytes[i + 1..i + semi];
                let decoded: Option<Vec<u8>> = match entity {
                    b"amp" => Some(b"&".to_vec()),
                    b"lt" => Some(b"<".to_vec()),
                    b"gt" => Some(b">".to_vec()),
                    b"quot" => Some(b"\"".to_vec()),
                    b"apos" => Some(b"'".to_vec()),
                    _ if entity.first() == Some(&b'#') => decode_char_ref(&entity[1..]),
                    _ => None,
                };
                if let Some(decoded) = decoded {
                    out.extend_from_slice(&decoded);
                    i += semi + 1;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn decode_char_ref(entity: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(entity).ok()?;
    let code = if let Some(hex) = text.strip_prefix('x') {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        text.parse().ok()?
    };
    let c = char::from_u32(code)?;
    let mut buf = [0u8; 4];
    Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHIVE_DOC: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
        <unit xmlns=\"http://www.sdml.info/srcML/src\" url=\"test\" version=\"1\" tabs=\"4\" foo=\"bar\">\n\n\
        <unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" filename=\"a.cpp\" version=\"1\"><expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>\n\n\
        <unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" filename=\"b.cpp\"><expr_stmt><expr><name>b</name></expr>;</expr_stmt>\n</unit>\n\n\
        </unit>\n";

    const SOLO_DOC: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
        <unit xmlns=\"http://www.sdml.info/srcML/src\" xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" filename=\"project\" version=\"1\"><expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>\n";

    fn reader_for(doc: &str) -> UnitReader {
        UnitReader::open(ByteSource::from_bytes(doc.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_root_attributes_of_archive() {
        let mut reader = reader_for(ARCHIVE_DOC);
        let root = reader.read_root_unit_attributes().unwrap().unwrap();
        assert!(root.is_archive);
        assert_eq!(root.encoding, "UTF-8");
        assert_eq!(root.url.as_deref(), Some("test"));
        assert_eq!(root.version.as_deref(), Some("1"));
        assert_eq!(root.tabstop, Some(4));
        assert_eq!(root.attributes, vec![("foo".to_string(), "bar".to_string())]);
        assert_eq!(
            root.namespaces,
            vec![("".to_string(), "http://www.sdml.info/srcML/src".to_string())]
        );
    }

    #[test]
    fn test_root_attributes_idempotent() {
        let mut reader = reader_for(ARCHIVE_DOC);
        let first = reader.read_root_unit_attributes().unwrap().unwrap().clone();
        let second = reader.read_root_unit_attributes().unwrap().unwrap().clone();
        assert_eq!(first.url, second.url);
        assert_eq!(first.attributes, second.attributes);
        // the parse did not advance: the first unit is still available
        let unit = reader.read_unit_attributes().unwrap().unwrap();
        assert_eq!(unit.filename(), Some("a.cpp"));
    }

    #[test]
    fn test_read_srcml_sequence() {
        let mut reader = reader_for(ARCHIVE_DOC);
        reader.read_root_unit_attributes().unwrap();
        let a = reader.read_srcml().unwrap().unwrap();
        assert_eq!(
            a,
            "<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" filename=\"a.cpp\" version=\"1\"><expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>"
        );
        let b = reader.read_srcml().unwrap().unwrap();
        assert!(b.contains("filename=\"b.cpp\""));
        assert!(reader.read_srcml().unwrap().is_none());
        // after EOF every call keeps returning none
        assert!(reader.read_srcml().unwrap().is_none());
        assert!(reader.read_unit_attributes().unwrap().is_none());
    }

    #[test]
    fn test_header_then_body_interleave() {
        let mut reader = reader_for(ARCHIVE_DOC);
        let header = reader.read_unit_attributes().unwrap().unwrap();
        assert_eq!(header.filename(), Some("a.cpp"));
        assert_eq!(header.language(), Some(Language::Cpp));
        assert!(header.xml().is_none());
        // body of the same unit
        let body = reader.read_srcml().unwrap().unwrap();
        assert!(body.contains("<name>a</name>"));
    }

    #[test]
    fn test_two_headers_skip_bodies() {
        let mut reader = reader_for(ARCHIVE_DOC);
        let a = reader.read_unit_attributes().unwrap().unwrap();
        let b = reader.read_unit_attributes().unwrap().unwrap();
        assert_eq!(a.filename(), Some("a.cpp"));
        assert_eq!(b.filename(), Some("b.cpp"));
        assert!(reader.read_unit_attributes().unwrap().is_none());
    }

    #[test]
    fn test_solo_detection_and_extraction() {
        let mut reader = reader_for(SOLO_DOC);
        let root = reader.read_root_unit_attributes().unwrap().unwrap();
        assert!(!root.is_archive);
        let unit = reader.read_unit().unwrap().unwrap();
        assert_eq!(unit.filename(), Some("project"));
        assert_eq!(unit.dir(), Some("test"));
        assert_eq!(unit.language(), Some(Language::Cpp));
        // the root element itself is the single unit
        let xml = unit.xml().unwrap();
        assert!(xml.starts_with("<unit xmlns="));
        assert!(xml.ends_with("</unit>"));
        assert_eq!(unit.source(), Some(&b"a;\n"[..]));
        assert_eq!(unit.loc(), Some(1));
        assert!(reader.read_unit().unwrap().is_none());
    }

    #[test]
    fn test_splice_offsets() {
        let mut reader = reader_for(ARCHIVE_DOC);
        let unit = reader.read_unit().unwrap().unwrap();
        let xml = unit.xml().unwrap();
        let off = unit.splice_offsets().unwrap();
        assert_eq!(
            &xml[off.content_begin..off.content_end],
            "<expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n"
        );
        assert_eq!(off.insert_begin, off.insert_end);
        assert_eq!(&xml[off.insert_begin..], "</unit>");
    }

    #[test]
    fn test_self_closing_unit_offsets() {
        let doc = "<unit xmlns=\"http://www.sdml.info/srcML/src\">\n\n\
                   <unit language=\"C\" filename=\"e.c\"/>\n\n</unit>\n";
        let mut reader = reader_for(doc);
        let unit = reader.read_unit().unwrap().unwrap();
        let off = unit.splice_offsets().unwrap();
        let xml = unit.xml().unwrap();
        assert_eq!(off.content_begin, off.content_end);
        assert_eq!(&xml[off.content_begin..], "/>");
        assert_eq!(unit.source(), Some(&b""[..]));
    }

    #[test]
    fn test_source_extraction_unescapes() {
        let xml = "<unit><expr_stmt>a &amp;&amp; b &lt; c;</expr_stmt>\n<escape char=\"0x0c\"/></unit>";
        let source = source_from_markup(xml).unwrap();
        assert_eq!(source, b"a && b < c;\n\x0c");
    }

    #[test]
    fn test_macro_list_collected() {
        let doc = "<unit xmlns=\"http://www.sdml.info/srcML/src\">\
                   <macro-list token=\"MACRO1\" type=\"src:macro\"/>\n\n\
                   <unit language=\"C\" filename=\"a.c\"/>\n\n</unit>\n";
        let mut reader = reader_for(doc);
        let root = reader.read_root_unit_attributes().unwrap().unwrap();
        assert!(root.is_archive);
        assert_eq!(
            root.macros,
            vec![("MACRO1".to_string(), "src:macro".to_string())]
        );
    }

    #[test]
    fn test_options_attribute_decoded() {
        let doc = "<unit xmlns=\"http://www.sdml.info/srcML/src\" options=\"LINE,FUTURE\">\n\n\
                   <unit language=\"C\" filename=\"a.c\"/>\n\n</unit>\n";
        let mut reader = reader_for(doc);
        let root = reader.read_root_unit_attributes().unwrap().unwrap();
        assert!(root.options.line);
        assert_eq!(root.options.unknown, vec!["FUTURE".to_string()]);
    }

    #[test]
    fn test_processing_instruction() {
        let doc = "<?xml-stylesheet type=\"text/xsl\" href=\"s.xsl\"?>\n\
                   <unit xmlns=\"http://www.sdml.info/srcML/src\" language=\"C\">x;\n</unit>";
        let mut reader = reader_for(doc);
        let root = reader.read_root_unit_attributes().unwrap().unwrap();
        assert_eq!(
            root.processing_instruction,
            Some((
                "xml-stylesheet".to_string(),
                "type=\"text/xsl\" href=\"s.xsl\"".to_string()
            ))
        );
    }

    #[test]
    fn test_unit_namespace_capture() {
        let mut reader = reader_for(ARCHIVE_DOC);
        let unit = reader.read_unit().unwrap().unwrap();
        assert_eq!(unit.namespaces().len(), 1);
        assert_eq!(unit.namespaces()[0].prefix, "cpp");
    }

    #[test]
    fn test_stop_terminates() {
        let mut reader = reader_for(ARCHIVE_DOC);
        reader.read_root_unit_attributes().unwrap();
        reader.stop();
        assert!(reader.read_unit_attributes().unwrap().is_none());
    }

    #[test]
    fn test_malformed_document_fails_sticky() {
        let mut reader = reader_for("<unit xmlns=\"http://www.sdml.info/srcML/src\"><bad");
        let err = reader.read_unit().unwrap_err();
        assert!(matches!(err, MarkupError::Parse(_)));
        let again = reader.read_unit().unwrap_err();
        assert!(matches!(again, MarkupError::Parse(_)));
    }

    #[test]
    fn test_non_unit_root_rejected() {
        let mut reader = reader_for("<other/>");
        assert!(reader.read_root_unit_attributes().is_err());
    }

    #[test]
    fn test_verbatim_capture_preserves_quoting() {
        let doc = "<unit xmlns=\"http://www.sdml.info/srcML/src\">\n\n\
                   <unit language=\"C\"  filename='a.c'>x;\n</unit>\n\n</unit>\n";
        let mut reader = reader_for(doc);
        let xml = reader.read_srcml().unwrap().unwrap();
        assert_eq!(xml, "<unit language=\"C\"  filename='a.c'>x;\n</unit>");
    }
}
