//! Reading markup documents: root metadata, per-unit headers, verbatim
//! bodies and end-of-archive behavior.

use srcmark::io::ByteSource;
use srcmark::{Archive, Language, UnitReader};

const ARCHIVE_DOC: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<unit xmlns=\"http://www.sdml.info/srcML/src\" url=\"test\" version=\"1\" tabs=\"4\" foo=\"bar\">\n\n\
<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" filename=\"a.cpp\" version=\"1\"><expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>\n\n\
<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" filename=\"b.cpp\"><expr_stmt><expr><name>b</name></expr>;</expr_stmt>\n</unit>\n\n\
</unit>\n";

const UNIT_A: &str = "<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" filename=\"a.cpp\" version=\"1\"><expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>";

const SOLO_DOC: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<unit xmlns=\"http://www.sdml.info/srcML/src\" xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" dir=\"test\" filename=\"project\" version=\"1\" tabs=\"4\" foo=\"bar\"><expr_stmt><expr><name>a</name></expr>;</expr_stmt>\n</unit>\n";

fn reader_for(doc: &str) -> UnitReader {
    UnitReader::open(ByteSource::from_bytes(doc.as_bytes().to_vec())).unwrap()
}

#[test]
fn root_then_two_bodies_then_eof() {
    let mut reader = reader_for(ARCHIVE_DOC);
    let root = reader.read_root_unit_attributes().unwrap().unwrap();
    assert!(root.is_archive);
    assert_eq!(root.url.as_deref(), Some("test"));
    assert_eq!(root.version.as_deref(), Some("1"));
    assert_eq!(root.tabstop, Some(4));
    assert_eq!(root.attributes, vec![("foo".into(), "bar".into())]);

    let a = reader.read_srcml().unwrap().unwrap();
    assert_eq!(a, UNIT_A);
    let b = reader.read_srcml().unwrap().unwrap();
    assert!(b.starts_with("<unit xmlns:cpp="));
    assert!(b.contains("filename=\"b.cpp\""));
    // third read reports end of archive, as does every later one
    assert!(reader.read_srcml().unwrap().is_none());
    assert!(reader.read_srcml().unwrap().is_none());
}

#[test]
fn root_attributes_are_idempotent() {
    let mut reader = reader_for(ARCHIVE_DOC);
    let first: Vec<(String, String)> = reader
        .read_root_unit_attributes()
        .unwrap()
        .unwrap()
        .attributes
        .clone();
    for _ in 0..3 {
        let again = reader.read_root_unit_attributes().unwrap().unwrap();
        assert_eq!(again.attributes, first);
        assert_eq!(again.url.as_deref(), Some("test"));
    }
    // no unit was consumed by the repeated calls
    let unit = reader.read_unit_attributes().unwrap().unwrap();
    assert_eq!(unit.filename(), Some("a.cpp"));
}

#[test]
fn header_calls_interleave_with_body_calls() {
    let mut reader = reader_for(ARCHIVE_DOC);
    let header = reader.read_unit_attributes().unwrap().unwrap();
    assert_eq!(header.language(), Some(Language::Cpp));
    assert_eq!(header.dir(), Some("test"));
    assert_eq!(header.version(), Some("1"));
    assert!(header.xml().is_none());

    let body = reader.read_srcml().unwrap().unwrap();
    assert_eq!(body, UNIT_A);

    let header = reader.read_unit_attributes().unwrap().unwrap();
    assert_eq!(header.filename(), Some("b.cpp"));
    assert!(reader.read_unit_attributes().unwrap().is_none());
}

#[test]
fn solo_document_exposes_root_as_single_unit() {
    let mut reader = reader_for(SOLO_DOC);
    let root = reader.read_root_unit_attributes().unwrap().unwrap();
    assert!(!root.is_archive);
    assert_eq!(root.tabstop, Some(4));
    assert_eq!(root.filename.as_deref(), Some("project"));
    assert_eq!(root.dir.as_deref(), Some("test"));

    let xml = reader.read_srcml().unwrap().unwrap();
    assert!(xml.starts_with("<unit xmlns=\"http://www.sdml.info/srcML/src\""));
    assert!(xml.ends_with("</unit>"));
    assert!(xml.contains("<name>a</name>"));
    assert!(reader.read_srcml().unwrap().is_none());
}

#[test]
fn prefixed_documents_are_captured_verbatim() {
    let doc = "<s:unit xmlns:s=\"http://www.sdml.info/srcML/src\" language=\"C++\" dir=\"test\" filename=\"project\" version=\"1\">\
<s:expr_stmt><s:expr><s:name>a</s:name></s:expr>;</s:expr_stmt>\n</s:unit>\n";
    let mut reader = reader_for(doc);
    let root = reader.read_root_unit_attributes().unwrap().unwrap();
    assert!(!root.is_archive);
    let xml = reader.read_srcml().unwrap().unwrap();
    assert!(xml.starts_with("<s:unit xmlns:s="));
    assert!(xml.contains("<s:name>a</s:name>"));
    assert!(xml.ends_with("</s:unit>"));
}

#[test]
fn empty_units_read_back_with_offsets_at_self_close() {
    let doc = "<unit xmlns=\"http://www.sdml.info/srcML/src\">\n\n\
<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" filename=\"a.cpp\"/>\n\n\
<unit xmlns:cpp=\"http://www.sdml.info/srcML/cpp\" language=\"C++\" filename=\"b.cpp\"/>\n\n\
</unit>";
    let mut reader = reader_for(doc);
    let a = reader.read_unit().unwrap().unwrap();
    assert_eq!(a.filename(), Some("a.cpp"));
    assert_eq!(a.source(), Some(&b""[..]));
    let off = a.splice_offsets().unwrap();
    assert_eq!(off.content_begin, off.content_end);
    assert_eq!(&a.xml().unwrap()[off.insert_begin..], "/>");
    let b = reader.read_unit().unwrap().unwrap();
    assert_eq!(b.filename(), Some("b.cpp"));
    assert!(reader.read_unit().unwrap().is_none());
}

#[test]
fn source_and_loc_recovered_per_unit() {
    let mut reader = reader_for(ARCHIVE_DOC);
    let a = reader.read_unit().unwrap().unwrap();
    assert_eq!(a.source(), Some(&b"a;\n"[..]));
    assert_eq!(a.loc(), Some(1));
}

#[test]
fn stop_ends_the_parse_at_the_next_boundary() {
    let mut reader = reader_for(ARCHIVE_DOC);
    let _ = reader.read_unit_attributes().unwrap().unwrap();
    reader.stop();
    assert!(reader.read_unit_attributes().unwrap().is_none());
    assert!(reader.read_srcml().unwrap().is_none());
}

#[test]
fn archive_api_merges_root_state_and_iterates_units() {
    let mut archive = Archive::new();
    archive
        .read_open_bytes(ARCHIVE_DOC.as_bytes().to_vec())
        .unwrap();
    assert_eq!(archive.url(), Some("test"));
    assert_eq!(archive.version(), Some("1"));
    assert_eq!(archive.tabstop(), Some(4));
    assert!(archive.is_full_archive());

    // header first, then the body of the same unit
    let header = archive.read_unit_header().unwrap().unwrap();
    assert_eq!(header.filename(), Some("a.cpp"));
    assert!(header.xml().is_none());
    let a = archive.read_unit().unwrap().unwrap();
    assert_eq!(a.filename(), Some("a.cpp"));
    assert!(a.xml().is_some());
    let b = archive.read_unit().unwrap().unwrap();
    assert_eq!(b.filename(), Some("b.cpp"));
    assert!(archive.read_unit().unwrap().is_none());
    archive.close().unwrap();
}

#[test]
fn second_open_of_a_reading_archive_fails() {
    let mut archive = Archive::new();
    archive
        .read_open_bytes(ARCHIVE_DOC.as_bytes().to_vec())
        .unwrap();
    assert!(archive.read_open_bytes(ARCHIVE_DOC.as_bytes().to_vec()).is_err());
    assert!(archive.write_open_memory().is_err());
}

#[test]
fn gzip_compressed_archives_are_detected() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(ARCHIVE_DOC.as_bytes()).unwrap();
    let compressed = gz.finish().unwrap();

    let mut archive = Archive::new();
    archive.read_open_bytes(compressed).unwrap();
    let a = archive.read_unit().unwrap().unwrap();
    assert_eq!(a.filename(), Some("a.cpp"));
}
