//! Byte I/O adapter
//!
//! Uniform byte source/sink over a filename, an already-open handle, an
//! in-memory buffer, or user callbacks. Reads are blocking and may be short;
//! EOF is the usual zero-length read. Writes are complete-or-fail. The
//! adapter closes only what it opened: handles and callback readers/writers
//! passed in by the caller are dropped, never explicitly closed.
//!
//! Gzip input is detected by its magic bytes and unwrapped transparently;
//! output is compressed only when the caller asks for it.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::core::error::Result;

/// Leading bytes of a gzip stream
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A readable byte stream with uniform construction
pub struct ByteSource {
    inner: Box<dyn Read + Send>,
}

impl ByteSource {
    /// Open a file by path, unwrapping gzip transparently
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(Box::new(file))
    }

    /// Adopt an already-open file. The adapter owns the handle from here on.
    pub fn from_file(file: File) -> Result<Self> {
        Self::from_reader(Box::new(file))
    }

    /// Read from an in-memory buffer
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            inner: Box::new(io::Cursor::new(bytes)),
        }
    }

    /// Read through a caller-supplied reader (callback mode). The underlying
    /// resource stays with the caller; dropping the source never closes it
    /// beyond dropping the box.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut buffered = BufReader::new(reader);
        let head = peek_bytes(&mut buffered, 2)?;
        let inner: Box<dyn Read + Send> = if head == GZIP_MAGIC {
            Box::new(GzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        Ok(Self { inner })
    }

    /// Drain the stream into memory
    pub fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.inner
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Reads `n` bytes ahead without consuming them
fn peek_bytes<R: Read>(reader: &mut BufReader<R>, n: usize) -> Result<Vec<u8>> {
    use std::io::BufRead;
    let buf = reader.fill_buf()?;
    Ok(buf[..buf.len().min(n)].to_vec())
}

/// Shared handle to the bytes accumulated by a memory sink
pub type MemoryBuffer = Arc<Mutex<Vec<u8>>>;

/// A writable byte stream with uniform construction
pub struct ByteSink {
    inner: Box<dyn Write + Send>,
}

impl ByteSink {
    /// Create or truncate a file; compress when asked
    pub fn to_path(path: impl AsRef<Path>, compress: bool) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::wrap(Box::new(file), compress))
    }

    /// Adopt an already-open file for writing
    pub fn to_file(file: File, compress: bool) -> Self {
        Self::wrap(Box::new(file), compress)
    }

    /// Write into a shared in-memory buffer; the returned handle yields the
    /// bytes once the archive is closed
    pub fn to_memory() -> (Self, MemoryBuffer) {
        let buffer: MemoryBuffer = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink {
            buffer: Arc::clone(&buffer),
        };
        (
            Self {
                inner: Box::new(sink),
            },
            buffer,
        )
    }

    /// Write through a caller-supplied writer (callback mode)
    pub fn to_writer(writer: Box<dyn Write + Send>, compress: bool) -> Self {
        Self::wrap(writer, compress)
    }

    fn wrap(writer: Box<dyn Write + Send>, compress: bool) -> Self {
        let inner: Box<dyn Write + Send> = if compress {
            Box::new(GzEncoder::new(writer, Compression::default()))
        } else {
            writer
        };
        Self { inner }
    }

    /// Flush and finalize. Gzip streams write their trailer here.
    pub fn finish(mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

impl Write for ByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct MemorySink {
    buffer: MemoryBuffer,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How the leading bytes of a stream classify it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Markup XML (a document this library wrote)
    Xml,
    /// Plain source text
    Source,
}

/// Classify a stream from its first bytes.
///
/// A UTF-8 BOM is skipped first. `<?xm` (an XML declaration) and `<uni` (a
/// bare unit element) both mean markup XML; anything else is source.
pub fn sniff_format(head: &[u8]) -> StreamFormat {
    let head = head.strip_prefix(&[0xef, 0xbb, 0xbf][..]).unwrap_or(head);
    if head.len() >= 4 && (&head[..4] == b"<?xm" || &head[..4] == b"<uni") {
        StreamFormat::Xml
    } else {
        StreamFormat::Source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_round_trip() {
        let (mut sink, buffer) = ByteSink::to_memory();
        sink.write_all(b"hello").unwrap();
        sink.finish().unwrap();
        assert_eq!(&*buffer.lock().unwrap(), b"hello");
    }

    #[test]
    fn test_bytes_source() {
        let source = ByteSource::from_bytes(b"abc".to_vec());
        assert_eq!(source.read_to_end().unwrap(), b"abc");
    }

    #[test]
    fn test_gzip_detection() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"int x;\n").unwrap();
        let compressed = gz.finish().unwrap();

        let source = ByteSource::from_reader(Box::new(io::Cursor::new(compressed))).unwrap();
        assert_eq!(source.read_to_end().unwrap(), b"int x;\n");
    }

    #[test]
    fn test_plain_passthrough_not_gunzipped() {
        let source = ByteSource::from_reader(Box::new(io::Cursor::new(b"a;\n".to_vec()))).unwrap();
        assert_eq!(source.read_to_end().unwrap(), b"a;\n");
    }

    #[test]
    fn test_compressed_sink_round_trip() {
        let (sink, buffer) = ByteSink::to_memory();
        {
            let mut gz = ByteSink::wrap(Box::new(sink), true);
            gz.write_all(b"a;\n").unwrap();
            gz.finish().unwrap();
        }
        let bytes = buffer.lock().unwrap().clone();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);
        let back = ByteSource::from_reader(Box::new(io::Cursor::new(bytes))).unwrap();
        assert_eq!(back.read_to_end().unwrap(), b"a;\n");
    }

    #[test]
    fn test_sniff_xml_declaration() {
        assert_eq!(sniff_format(b"<?xml version="), StreamFormat::Xml);
    }

    #[test]
    fn test_sniff_bare_unit() {
        assert_eq!(sniff_format(b"<unit xmlns="), StreamFormat::Xml);
    }

    #[test]
    fn test_sniff_source() {
        assert_eq!(sniff_format(b"int main"), StreamFormat::Source);
        assert_eq!(sniff_format(b"<<EOF"), StreamFormat::Source);
        assert_eq!(sniff_format(b""), StreamFormat::Source);
    }

    #[test]
    fn test_sniff_with_bom() {
        assert_eq!(
            sniff_format(&[0xef, 0xbb, 0xbf, b'<', b'?', b'x', b'm']),
            StreamFormat::Xml
        );
    }
}
