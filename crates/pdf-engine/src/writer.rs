//! File serializer
//!
//! A [`PdfWriter`] owns one output sink. Every call to [`PdfWriter::write`]
//! runs a fresh pass: header, page tree, catalog, Info, cross-reference table
//! and trailer. Object offsets are measured against the sink after flushing,
//! so buffered and unbuffered sinks produce identical files.

use crate::content::PageContents;
use crate::document::Document;
use crate::object::{text_string, IndirectObject, ObjectAllocator};
use crate::page_tree::{PageOutcome, PageTreeBuilder};
use crate::{PdfError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

/// Binary marker written after the version line
const BINARY_MARKER: [u8; 6] = [0x25, 0xE2, 0xE3, 0xCF, 0xD3, 0x0A];

/// A byte sink that can report how many bytes it has taken so far
pub trait OffsetSink: Write {
    /// Absolute offset of the next byte to be written
    fn offset(&mut self) -> io::Result<u64>;
}

/// Buffered file output; offsets come from the stream position
#[derive(Debug)]
pub struct FileSink {
    inner: BufWriter<File>,
}

impl FileSink {
    /// Create or truncate `path`
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            inner: BufWriter::new(File::create(path)?),
        })
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl OffsetSink for FileSink {
    fn offset(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }
}

/// Wraps any writer and counts the bytes it accepts
#[derive(Debug)]
pub struct CountingSink<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> OffsetSink for CountingSink<W> {
    fn offset(&mut self) -> io::Result<u64> {
        Ok(self.written)
    }
}

/// Writer configuration
///
/// ```
/// use pdf_engine::WriterOptions;
///
/// let options: WriterOptions = serde_json::from_str(r#"{ "compress_content": false }"#).unwrap();
/// assert!(!options.compress_content);
/// assert!(!options.abort_on_degraded_page);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// FlateDecode page content streams
    pub compress_content: bool,
    /// Fail the write instead of emitting a degraded page
    pub abort_on_degraded_page: bool,
    /// `/Producer` used when the document names none
    pub producer: Option<String>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compress_content: true,
            abort_on_degraded_page: false,
            producer: None,
        }
    }
}

impl WriterOptions {
    pub fn with_compress_content(mut self, compress: bool) -> Self {
        self.compress_content = compress;
        self
    }

    pub fn with_abort_on_degraded_page(mut self, abort: bool) -> Self {
        self.abort_on_degraded_page = abort;
        self
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }
}

/// Summary of one completed write pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Objects in the body, excluding the free entry 0
    pub object_count: u32,
    pub bytes_written: u64,
    /// Outcome of each page in document order
    pub pages: Vec<PageOutcome>,
}

impl WriteReport {
    /// Indices of pages written without content
    pub fn degraded_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_degraded())
            .map(|(index, _)| index)
            .collect()
    }
}

/// PDF writer over an offset-reporting sink
#[derive(Debug)]
pub struct PdfWriter<S: OffsetSink = FileSink> {
    sink: Option<S>,
    options: WriterOptions,
    report: Option<WriteReport>,
}

impl PdfWriter<FileSink> {
    /// Create (or truncate) the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let sink = FileSink::create(path).map_err(PdfError::CreateSink)?;
        Ok(Self::new(sink))
    }
}

impl<W: Write> PdfWriter<CountingSink<W>> {
    /// Write into any `Write`, counting bytes for the offsets
    pub fn from_writer(writer: W) -> Self {
        Self::new(CountingSink::new(writer))
    }
}

impl<S: OffsetSink> PdfWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Some(sink),
            options: WriterOptions::default(),
            report: None,
        }
    }

    pub fn with_options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Write `doc` with empty pages
    pub fn write(&mut self, doc: &Document) -> Result<&WriteReport> {
        self.write_with_content(doc, &PageContents::new())
    }

    /// Write `doc`, drawing `contents` on its pages
    ///
    /// Each call is a complete, independent pass: numbering restarts at 1 and
    /// nothing from a previous call is reused.
    pub fn write_with_content(
        &mut self,
        doc: &Document,
        contents: &PageContents,
    ) -> Result<&WriteReport> {
        let sink = self.sink.as_mut().ok_or(PdfError::WriterClosed)?;
        doc.validate()?;

        self.report = None;
        let report = WriteSession::new(sink, &self.options).run(doc, contents)?;
        Ok(self.report.insert(report))
    }

    /// Report of the last successful write
    pub fn last_report(&self) -> Option<&WriteReport> {
        self.report.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    /// Flush and release the sink; later calls do nothing
    pub fn close(&mut self) -> Result<()> {
        match self.sink.take() {
            Some(mut sink) => sink.flush().map_err(PdfError::io(Stage::Close)),
            None => Ok(()),
        }
    }

    /// Flush and hand back the sink
    pub fn finish(mut self) -> Result<S> {
        let mut sink = self.sink.take().ok_or(PdfError::WriterClosed)?;
        sink.flush().map_err(PdfError::io(Stage::Close))?;
        Ok(sink)
    }
}

/// State owned by one write pass
struct WriteSession<'a, S: OffsetSink> {
    sink: &'a mut S,
    options: &'a WriterOptions,
    allocator: ObjectAllocator,
    offsets: BTreeMap<u32, u64>,
    /// Sink offset at the start of the pass
    base: u64,
}

impl<'a, S: OffsetSink> WriteSession<'a, S> {
    fn new(sink: &'a mut S, options: &'a WriterOptions) -> Self {
        Self {
            sink,
            options,
            allocator: ObjectAllocator::new(),
            offsets: BTreeMap::new(),
            base: 0,
        }
    }

    fn run(mut self, doc: &Document, contents: &PageContents) -> Result<WriteReport> {
        self.base = self.sink.offset().map_err(PdfError::io(Stage::Header))?;
        log::debug!(
            "writing PDF {} with {} pages",
            doc.version.as_str(),
            doc.page_count()
        );

        self.write_header(doc)?;

        let tree = PageTreeBuilder::new(&mut self.allocator)
            .compress(self.options.compress_content)
            .abort_on_degraded_page(self.options.abort_on_degraded_page)
            .build(doc, contents)?;

        let catalog = self.allocator.allocate();
        let info = doc.has_metadata().then(|| self.allocator.allocate());

        let mut objects = Vec::with_capacity(tree.objects.len() + 2);
        objects.push(IndirectObject::new(catalog, catalog_dict(doc, tree.root)));
        objects.extend(tree.objects);
        if let Some(info) = info {
            let producer = self.options.producer.as_deref();
            objects.push(IndirectObject::new(info, doc.info_dict(producer)));
        }

        for object in &objects {
            self.write_object(object)?;
        }

        let xref = self.write_xref()?;
        self.write_trailer(catalog, info, xref)?;
        self.sink.flush().map_err(PdfError::io(Stage::Flush))?;

        let bytes_written = self.position(Stage::Flush)?;
        let report = WriteReport {
            object_count: self.allocator.allocated(),
            bytes_written,
            pages: tree.outcomes,
        };
        log::debug!(
            "wrote {} objects, {} bytes, {} degraded pages",
            report.object_count,
            report.bytes_written,
            report.degraded_pages().len()
        );
        Ok(report)
    }

    /// Offset relative to the start of this pass, measured after a flush
    fn position(&mut self, stage: Stage) -> Result<u64> {
        self.sink.flush().map_err(PdfError::io(stage))?;
        let offset = self.sink.offset().map_err(PdfError::io(stage))?;
        Ok(offset - self.base)
    }

    fn write_header(&mut self, doc: &Document) -> Result<()> {
        let line = format!("%PDF-{}\n", doc.version.as_str());
        self.sink
            .write_all(line.as_bytes())
            .and_then(|_| self.sink.write_all(&BINARY_MARKER))
            .map_err(PdfError::io(Stage::Header))
    }

    fn write_object(&mut self, object: &IndirectObject) -> Result<()> {
        let offset = self.position(Stage::Objects)?;
        self.offsets.insert(object.number, offset);
        object
            .write_to(&mut *self.sink)
            .map_err(PdfError::io(Stage::Objects))?;
        Ok(())
    }

    /// Write the xref section and return its offset
    fn write_xref(&mut self) -> Result<u64> {
        let size = self.allocator.next_number();
        let mut table = format!("xref\n0 {size}\n0000000000 65535 f \n");
        for number in 1..size {
            let offset = self
                .offsets
                .get(&number)
                .ok_or(PdfError::MissingOffset(number))?;
            table.push_str(&format!("{offset:010} 00000 n \n"));
        }

        let start = self.position(Stage::Xref)?;
        self.sink
            .write_all(table.as_bytes())
            .map_err(PdfError::io(Stage::Xref))?;
        Ok(start)
    }

    fn write_trailer(&mut self, catalog: u32, info: Option<u32>, xref: u64) -> Result<()> {
        let mut dict = format!(
            "<< /Size {} /Root {catalog} 0 R",
            self.allocator.next_number()
        );
        if let Some(info) = info {
            dict.push_str(&format!(" /Info {info} 0 R"));
        }
        dict.push_str(" >>");
        let trailer = format!("trailer\n{dict}\nstartxref\n{xref}\n%%EOF\n");
        self.sink
            .write_all(trailer.as_bytes())
            .map_err(PdfError::io(Stage::Trailer))
    }
}

fn catalog_dict(doc: &Document, pages_root: u32) -> String {
    let mut dict = format!("<< /Type /Catalog /Pages {pages_root} 0 R");
    if let Some(language) = doc.language.as_deref().filter(|l| !l.is_empty()) {
        dict.push_str(&format!(" /Lang {}", text_string(language)));
    }
    if let Some(mode) = doc.page_mode {
        dict.push_str(&format!(" /PageMode /{}", mode.as_name()));
    }
    dict.push_str(" >>");
    dict
}

/// Write `doc` into a fresh in-memory buffer
pub fn write_to_vec(
    doc: &Document,
    contents: &PageContents,
    options: WriterOptions,
) -> Result<Vec<u8>> {
    let mut writer = PdfWriter::from_writer(Vec::new()).with_options(options);
    writer.write_with_content(doc, contents)?;
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{PageContent, TextOp};
    use crate::document::{Page, PageMode, A4};
    use crate::font::Standard14Font;
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    fn fixed_doc() -> Document {
        let date = FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 10, 30, 0)
            .unwrap();
        let mut doc = Document::new().with_dates(date);
        doc.add_page(Page::new(A4));
        doc
    }

    /// Sink that fails every write after `limit` bytes
    struct FailingSink {
        written: u64,
        limit: u64,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() as u64 > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written += buf.len() as u64;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl OffsetSink for FailingSink {
        fn offset(&mut self) -> io::Result<u64> {
            Ok(self.written)
        }
    }

    #[test]
    fn test_minimal_file_layout() {
        let bytes = write_to_vec(&fixed_doc(), &PageContents::new(), WriterOptions::default())
            .expect("Failed to write PDF");

        assert!(bytes.starts_with(b"%PDF-1.7\n"));
        assert_eq!(&bytes[9..15], &BINARY_MARKER);

        let out = String::from_utf8_lossy(&bytes).into_owned();
        // catalog 3, pages root 1, page 2
        assert!(out.contains("3 0 obj\n<< /Type /Catalog /Pages 1 0 R >>\nendobj\n"));
        assert!(out.contains("1 0 obj\n<< /Type /Pages /Kids [2 0 R] /Count 1 >>\nendobj\n"));
        assert!(out.contains("xref\n0 4\n0000000000 65535 f \n"));
        assert!(out.contains("trailer\n<< /Size 4 /Root 3 0 R >>\nstartxref\n"));
        assert!(out.ends_with("%%EOF\n"));
        assert_eq!(out.matches("%%EOF").count(), 1);
        assert!(!out.contains("/Info"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let bytes = write_to_vec(&fixed_doc(), &PageContents::new(), WriterOptions::default())
            .expect("Failed to write PDF");

        let xref_at = bytes
            .windows(6)
            .rposition(|w| w == b"\nxref\n")
            .expect("xref missing")
            + 1;
        let tail = std::str::from_utf8(&bytes[xref_at..]).expect("xref section is not ASCII");

        let entries: Vec<&str> = tail.lines().skip(3).take(3).collect();
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.len(), 19);
            let offset: usize = entry[..10].parse().expect("Failed to parse offset");
            let expected = format!("{} 0 obj", i + 1);
            assert!(bytes[offset..].starts_with(expected.as_bytes()), "entry {}", i + 1);
        }

        let value: usize = tail
            .lines()
            .skip_while(|line| *line != "startxref")
            .nth(1)
            .and_then(|line| line.parse().ok())
            .expect("startxref missing");
        assert_eq!(value, xref_at);
    }

    #[test]
    fn test_info_written_with_metadata() {
        let doc = fixed_doc().with_title("Report");
        let options = WriterOptions::default().with_producer("pdf-engine");
        let bytes = write_to_vec(&doc, &PageContents::new(), options).expect("Failed to write PDF");
        let out = String::from_utf8_lossy(&bytes).into_owned();

        assert!(out.contains("/Size 5 /Root 3 0 R /Info 4 0 R"));
        assert!(out.contains(
            "4 0 obj\n<< /Title (Report) /Producer (pdf-engine) \
             /CreationDate (D:20240115103000+07'00') /ModDate (D:20240115103000+07'00') >>"
        ));
    }

    #[test]
    fn test_catalog_attributes() {
        let doc = fixed_doc()
            .with_language("en-US")
            .with_page_mode(PageMode::UseOutlines);
        let bytes = write_to_vec(&doc, &PageContents::new(), WriterOptions::default())
            .expect("Failed to write PDF");
        let out = String::from_utf8_lossy(&bytes).into_owned();
        assert!(out.contains("<< /Type /Catalog /Pages 1 0 R /Lang (en-US) /PageMode /UseOutlines >>"));
    }

    #[test]
    fn test_write_twice_restarts_numbering() {
        let mut writer = PdfWriter::from_writer(Vec::new());
        let mut big = fixed_doc();
        big.add_page(Page::new(A4));
        big.add_page(Page::new(A4));
        writer.write(&big).expect("Failed to write first document");
        assert_eq!(writer.last_report().unwrap().object_count, 5);

        let report = writer.write(&fixed_doc()).expect("Failed to write second document");
        assert_eq!(report.object_count, 3);

        let bytes = writer.finish().unwrap().into_inner();
        let out = String::from_utf8_lossy(&bytes).into_owned();
        let second = &out[out.rfind("%PDF-").unwrap()..];
        assert!(second.contains("trailer\n<< /Size 4 /Root 3 0 R >>"));
        assert!(!second.contains("4 0 obj"));
        assert_eq!(second.matches("%%EOF").count(), 1);
    }

    #[test]
    fn test_report_counts_bytes() {
        let mut writer = PdfWriter::from_writer(Vec::new());
        let report = writer.write(&fixed_doc()).expect("Failed to write PDF").clone();
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(report.bytes_written, bytes.len() as u64);
        assert_eq!(report.pages, vec![PageOutcome::Complete]);
        assert!(report.degraded_pages().is_empty());
    }

    #[test]
    fn test_validation_fails_before_output() {
        let mut writer = PdfWriter::from_writer(Vec::new());
        match writer.write(&Document::new()) {
            Err(PdfError::Validation(msg)) => {
                assert_eq!(msg, "document must have at least one page")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(writer.finish().unwrap().into_inner().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut writer = PdfWriter::from_writer(Vec::new());
        writer.write(&fixed_doc()).expect("Failed to write PDF");
        writer.close().expect("Failed to close writer");
        assert!(writer.is_closed());
        writer.close().expect("Second close should be a no-op");

        match writer.write(&fixed_doc()) {
            Err(PdfError::WriterClosed) => {}
            other => panic!("expected WriterClosed, got {other:?}"),
        }
        assert!(matches!(writer.finish(), Err(PdfError::WriterClosed)));
    }

    #[test]
    fn test_io_failure_names_stage() {
        let sink = FailingSink {
            written: 0,
            limit: 20,
        };
        let mut writer = PdfWriter::new(sink);
        match writer.write(&fixed_doc()) {
            Err(err @ PdfError::Io { stage: Stage::Objects, .. }) => {
                assert_eq!(err.to_string(), "objects: disk full");
            }
            other => panic!("expected objects I/O error, got {other:?}"),
        }
        assert!(writer.last_report().is_none());
    }

    #[test]
    fn test_uncompressed_content() {
        let mut contents = PageContents::new();
        contents.insert(
            0,
            PageContent::new().with_text(TextOp::new(
                "Hi",
                72.0,
                720.0,
                Standard14Font::Courier.into(),
                10.0,
            )),
        );
        let options = WriterOptions::default().with_compress_content(false);
        let bytes = write_to_vec(&fixed_doc(), &contents, options).expect("Failed to write PDF");
        let out = String::from_utf8_lossy(&bytes).into_owned();
        assert!(out.contains("(Hi) Tj"));
        assert!(!out.contains("/FlateDecode"));
        assert!(out.contains("/BaseFont /Courier"));
    }

    #[test]
    fn test_options_from_json() {
        let options: WriterOptions = serde_json::from_str(
            r#"{ "abort_on_degraded_page": true, "producer": "acme" }"#,
        )
        .expect("Failed to parse options");
        assert_eq!(
            options,
            WriterOptions::default()
                .with_abort_on_degraded_page(true)
                .with_producer("acme")
        );

        let json = serde_json::to_string(&WriterOptions::default()).unwrap();
        assert_eq!(
            json,
            r#"{"compress_content":true,"abort_on_degraded_page":false,"producer":null}"#
        );
    }
}
