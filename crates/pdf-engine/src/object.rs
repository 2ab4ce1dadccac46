//! Object numbering and indirect objects

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Write};

/// An indirect object: number, generation and the raw body bytes
///
/// The body is everything between `N G obj` and `endobj`, e.g. a dictionary
/// or a dictionary followed by a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectObject {
    pub number: u32,
    pub generation: u16,
    pub body: Vec<u8>,
}

impl IndirectObject {
    /// Create a generation-0 object
    pub fn new(number: u32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            generation: 0,
            body: body.into(),
        }
    }

    /// Write `"<number> <gen> obj\n<body>\nendobj\n"` and return the byte count
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let head = format!("{} {} obj\n", self.number, self.generation);
        writer.write_all(head.as_bytes())?;
        writer.write_all(&self.body)?;
        writer.write_all(b"\nendobj\n")?;
        Ok(head.len() + self.body.len() + b"\nendobj\n".len())
    }

    /// Serialized form as bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 32);
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }
}

/// Monotonic object-number sequence for one write pass
///
/// Numbering starts at 1; 0 is the head of the free list.
#[derive(Debug)]
pub struct ObjectAllocator {
    next: u32,
}

impl ObjectAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Return the next unused number and advance the sequence
    pub fn allocate(&mut self) -> u32 {
        let number = self.next;
        self.next += 1;
        number
    }

    /// The number the next call to `allocate` will return
    pub fn next_number(&self) -> u32 {
        self.next
    }

    /// How many numbers have been issued
    pub fn allocated(&self) -> u32 {
        self.next - 1
    }
}

impl Default for ObjectAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape a literal string body (without the surrounding parentheses)
pub(crate) fn escape_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Encode a text string for use in a dictionary (Info entries, annotation contents)
///
/// ASCII text becomes an escaped literal `(...)`; anything else is written as
/// UTF-16BE hex with a byte-order mark.
pub(crate) fn text_string(input: &str) -> String {
    if input.is_ascii() {
        return format!("({})", escape_literal(input));
    }

    let mut out = String::from("<FEFF");
    for unit in input.encode_utf16() {
        out.push_str(&format!("{unit:04X}"));
    }
    out.push('>');
    out
}

/// Format a number the way PDF expects: no exponent, trailing zeros trimmed
pub(crate) fn fmt_num(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let s = format!("{value:.4}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Zlib-compress a stream body for `/Filter /FlateDecode`
pub(crate) fn flate_compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Stream object body: `<dict entries> /Length L >>\nstream\n<data>\nendstream`
///
/// `dict_entries` is the dictionary content without the closing `>>`,
/// e.g. `"<< /Type /XObject /Subtype /Image"`.
pub(crate) fn stream_body(dict_entries: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!("{dict_entries} /Length {} >>\nstream\n", data.len()).into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(b"\nendstream");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_starts_at_one() {
        let mut alloc = ObjectAllocator::new();
        assert_eq!(alloc.allocated(), 0);
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 3);
        assert_eq!(alloc.next_number(), 4);
        assert_eq!(alloc.allocated(), 3);
    }

    #[test]
    fn test_indirect_object_envelope() {
        let obj = IndirectObject::new(7, b"<< /Type /Catalog >>".to_vec());
        assert_eq!(obj.generation, 0);
        assert_eq!(obj.to_bytes(), b"7 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec());
    }

    #[test]
    fn test_write_to_reports_length() {
        let obj = IndirectObject::new(12, "<< >>");
        let mut out = Vec::new();
        let written = obj.write_to(&mut out).unwrap();
        assert_eq!(written, out.len());
    }

    #[test]
    fn test_empty_body() {
        let obj = IndirectObject::new(1, Vec::new());
        assert_eq!(obj.to_bytes(), b"1 0 obj\n\nendobj\n".to_vec());
    }

    #[test]
    fn test_text_string_ascii_is_escaped() {
        assert_eq!(text_string("a (b) \\ c"), "(a \\(b\\) \\\\ c)");
    }

    #[test]
    fn test_text_string_unicode_uses_utf16() {
        assert_eq!(text_string("é"), "<FEFF00E9>");
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(612.0), "612");
        assert_eq!(fmt_num(0.5), "0.5");
        assert_eq!(fmt_num(-10.25), "-10.25");
        assert_eq!(fmt_num(1.0 / 3.0), "0.3333");
        assert_eq!(fmt_num(-0.00001), "0");
    }

    #[test]
    fn test_stream_body() {
        let body = stream_body("<< /Filter /FlateDecode", b"abc");
        assert_eq!(
            body,
            b"<< /Filter /FlateDecode /Length 3 >>\nstream\nabc\nendstream".to_vec()
        );
    }

    #[test]
    fn test_flate_compress_is_zlib() {
        let compressed = flate_compress(b"hello hello hello hello").unwrap();
        // zlib header, default compression
        assert_eq!(compressed[0], 0x78);
    }
}
