//! Document model: pages, boxes, metadata and annotations

use crate::content::Color;
use crate::object::{escape_literal, fmt_num, text_string};
use crate::{PdfError, Result};
use chrono::{DateTime, FixedOffset, Local};

/// A rectangle in user space (lower-left and upper-right corners)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}

impl Rectangle {
    pub const fn new(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        Self { llx, lly, urx, ury }
    }

    /// Rectangle anchored at the origin
    pub const fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn width(&self) -> f64 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f64 {
        self.ury - self.lly
    }

    /// True if the box has positive area and finite corners
    pub fn is_valid(&self) -> bool {
        [self.llx, self.lly, self.urx, self.ury]
            .iter()
            .all(|v| v.is_finite())
            && self.width() > 0.0
            && self.height() > 0.0
    }

    /// `[llx lly urx ury]`
    pub(crate) fn to_array(&self) -> String {
        format!(
            "[{} {} {} {}]",
            fmt_num(self.llx),
            fmt_num(self.lly),
            fmt_num(self.urx),
            fmt_num(self.ury)
        )
    }
}

/// A4 (210 x 297 mm)
pub const A4: Rectangle = Rectangle::from_size(595.0, 842.0);
/// US Letter (8.5 x 11 in)
pub const LETTER: Rectangle = Rectangle::from_size(612.0, 792.0);
/// US Legal (8.5 x 14 in)
pub const LEGAL: Rectangle = Rectangle::from_size(612.0, 1008.0);

/// PDF version written into the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfVersion {
    V1_4,
    V1_5,
    V1_6,
    #[default]
    V1_7,
    V2_0,
}

impl PdfVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfVersion::V1_4 => "1.4",
            PdfVersion::V1_5 => "1.5",
            PdfVersion::V1_6 => "1.6",
            PdfVersion::V1_7 => "1.7",
            PdfVersion::V2_0 => "2.0",
        }
    }
}

/// How a viewer should open the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    UseNone,
    UseOutlines,
    UseThumbs,
    FullScreen,
}

impl PageMode {
    pub fn as_name(&self) -> &'static str {
        match self {
            PageMode::UseNone => "UseNone",
            PageMode::UseOutlines => "UseOutlines",
            PageMode::UseThumbs => "UseThumbs",
            PageMode::FullScreen => "FullScreen",
        }
    }
}

/// Page annotation
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    /// Clickable area opening a URI
    Link { rect: Rectangle, uri: String },
    /// Sticky note
    Text {
        rect: Rectangle,
        contents: String,
        open: bool,
    },
    /// Highlight markup; `quad_points` holds groups of 8 numbers
    Highlight {
        rect: Rectangle,
        color: Color,
        quad_points: Vec<f64>,
        contents: Option<String>,
    },
}

impl Annotation {
    /// Link annotation with no border
    pub fn link(rect: Rectangle, uri: impl Into<String>) -> Self {
        Annotation::Link {
            rect,
            uri: uri.into(),
        }
    }

    /// Closed sticky note
    pub fn note(rect: Rectangle, contents: impl Into<String>) -> Self {
        Annotation::Text {
            rect,
            contents: contents.into(),
            open: false,
        }
    }

    /// Highlight covering the whole rectangle
    pub fn highlight(rect: Rectangle, color: Color) -> Self {
        let quad_points = vec![
            rect.llx, rect.ury, rect.urx, rect.ury, rect.llx, rect.lly, rect.urx, rect.lly,
        ];
        Annotation::Highlight {
            rect,
            color,
            quad_points,
            contents: None,
        }
    }

    pub fn rect(&self) -> &Rectangle {
        match self {
            Annotation::Link { rect, .. }
            | Annotation::Text { rect, .. }
            | Annotation::Highlight { rect, .. } => rect,
        }
    }

    /// Check the annotation can be serialized
    pub fn validate(&self) -> Result<()> {
        if !self.rect().is_valid() {
            return Err(PdfError::InvalidOperation(format!(
                "annotation rectangle is empty: {}",
                self.rect().to_array()
            )));
        }
        match self {
            Annotation::Link { uri, .. } if uri.is_empty() => Err(
                PdfError::InvalidOperation("link annotation URI is empty".to_string()),
            ),
            Annotation::Highlight { quad_points, .. }
                if quad_points.is_empty() || quad_points.len() % 8 != 0 =>
            {
                Err(PdfError::InvalidOperation(format!(
                    "highlight quad points must be a multiple of 8, got {}",
                    quad_points.len()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Annotation dictionary referencing its page
    pub(crate) fn to_dict(&self, page_number: u32) -> Result<Vec<u8>> {
        self.validate()?;

        let rect = self.rect().to_array();
        let dict = match self {
            Annotation::Link { uri, .. } => format!(
                "<< /Type /Annot /Subtype /Link /Rect {rect} /P {page_number} 0 R /Border [0 0 0] \
                 /A << /Type /Action /S /URI /URI {} >> >>",
                uri_string(uri)
            ),
            Annotation::Text { contents, open, .. } => format!(
                "<< /Type /Annot /Subtype /Text /Rect {rect} /P {page_number} 0 R /Contents {} \
                 /Open {open} /Name /Note >>",
                text_string(contents)
            ),
            Annotation::Highlight {
                color,
                quad_points,
                contents,
                ..
            } => {
                let quads: Vec<String> = quad_points.iter().map(|v| fmt_num(*v)).collect();
                let contents = contents
                    .as_deref()
                    .map(|c| format!(" /Contents {}", text_string(c)))
                    .unwrap_or_default();
                format!(
                    "<< /Type /Annot /Subtype /Highlight /Rect {rect} /P {page_number} 0 R \
                     /C [{} {} {}] /QuadPoints [{}]{contents} >>",
                    fmt_num(color.r as f64),
                    fmt_num(color.g as f64),
                    fmt_num(color.b as f64),
                    quads.join(" ")
                )
            }
        };
        Ok(dict.into_bytes())
    }
}

/// A single page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub media_box: Rectangle,
    pub crop_box: Option<Rectangle>,
    /// Clockwise rotation in degrees, a multiple of 90
    pub rotation: i32,
    pub annotations: Vec<Annotation>,
}

impl Page {
    pub fn new(size: Rectangle) -> Self {
        Self {
            media_box: size,
            crop_box: None,
            rotation: 0,
            annotations: Vec::new(),
        }
    }

    pub fn with_crop_box(mut self, crop_box: Rectangle) -> Self {
        self.crop_box = Some(crop_box);
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    pub fn validate(&self) -> Result<()> {
        if !self.media_box.is_valid() {
            return Err(PdfError::Validation(format!(
                "invalid MediaBox {}",
                self.media_box.to_array()
            )));
        }
        if let Some(crop) = &self.crop_box {
            if !crop.is_valid() {
                return Err(PdfError::Validation(format!(
                    "invalid CropBox {}",
                    crop.to_array()
                )));
            }
        }
        if self.rotation % 90 != 0 {
            return Err(PdfError::Validation(format!(
                "rotation must be a multiple of 90, got {}",
                self.rotation
            )));
        }
        Ok(())
    }

    /// Rotation normalized to 0, 90, 180 or 270
    pub fn normalized_rotation(&self) -> i32 {
        self.rotation.rem_euclid(360)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(A4)
    }
}

/// In-memory document handed to the writer
#[derive(Debug, Clone)]
pub struct Document {
    pub version: PdfVersion,
    pages: Vec<Page>,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub creator: String,
    pub producer: String,
    pub keywords: String,
    pub creation_date: DateTime<FixedOffset>,
    pub mod_date: DateTime<FixedOffset>,
    /// Natural language for the catalog `/Lang` entry (e.g. "en-US")
    pub language: Option<String>,
    pub page_mode: Option<PageMode>,
}

impl Document {
    /// Empty PDF 1.7 document stamped with the current local time
    pub fn new() -> Self {
        let now = Local::now().fixed_offset();
        Self {
            version: PdfVersion::default(),
            pages: Vec::new(),
            title: String::new(),
            author: String::new(),
            subject: String::new(),
            creator: String::new(),
            producer: String::new(),
            keywords: String::new(),
            creation_date: now,
            mod_date: now,
            language: None,
            page_mode: None,
        }
    }

    pub fn with_version(mut self, version: PdfVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_page_mode(mut self, mode: PageMode) -> Self {
        self.page_mode = Some(mode);
        self
    }

    /// Pin both timestamps, mostly for reproducible output
    pub fn with_dates(mut self, date: DateTime<FixedOffset>) -> Self {
        self.creation_date = date;
        self.mod_date = date;
        self
    }

    /// Append a page and return its index
    pub fn add_page(&mut self, page: Page) -> usize {
        self.pages.push(page);
        self.pages.len() - 1
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page at `index` (0-based)
    pub fn page(&self, index: usize) -> Result<&Page> {
        self.pages
            .get(index)
            .ok_or(PdfError::PageOutOfRange(index, self.pages.len()))
    }

    pub fn page_mut(&mut self, index: usize) -> Result<&mut Page> {
        let count = self.pages.len();
        self.pages
            .get_mut(index)
            .ok_or(PdfError::PageOutOfRange(index, count))
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Structural checks run before any byte is written
    pub fn validate(&self) -> Result<()> {
        if self.pages.is_empty() {
            return Err(PdfError::Validation(
                "document must have at least one page".to_string(),
            ));
        }
        for (index, page) in self.pages.iter().enumerate() {
            page.validate().map_err(|e| match e {
                PdfError::Validation(msg) => PdfError::Validation(format!("page {index}: {msg}")),
                other => other,
            })?;
        }
        Ok(())
    }

    /// True if an Info dictionary should be written
    pub fn has_metadata(&self) -> bool {
        !self.title.is_empty() || !self.author.is_empty() || !self.subject.is_empty()
    }

    /// Info dictionary body
    ///
    /// `fallback_producer` is used when the document itself names no producer.
    pub(crate) fn info_dict(&self, fallback_producer: Option<&str>) -> Vec<u8> {
        let mut out = String::from("<<");
        let producer = if self.producer.is_empty() {
            fallback_producer.unwrap_or_default()
        } else {
            self.producer.as_str()
        };
        for (key, value) in [
            ("Title", self.title.as_str()),
            ("Author", self.author.as_str()),
            ("Subject", self.subject.as_str()),
            ("Keywords", self.keywords.as_str()),
            ("Creator", self.creator.as_str()),
            ("Producer", producer),
        ] {
            if !value.is_empty() {
                out.push_str(&format!(" /{key} {}", text_string(value)));
            }
        }
        out.push_str(&format!(
            " /CreationDate ({}) /ModDate ({})",
            pdf_date(&self.creation_date),
            pdf_date(&self.mod_date)
        ));
        out.push_str(" >>");
        out.into_bytes()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// `D:YYYYMMDDHHmmSS+HH'mm'`
pub(crate) fn pdf_date(date: &DateTime<FixedOffset>) -> String {
    let offset = date.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.abs();
    format!(
        "D:{}{}{:02}'{:02}'",
        date.format("%Y%m%d%H%M%S"),
        sign,
        offset / 3600,
        (offset % 3600) / 60
    )
}

/// URI action target: a 7-bit ASCII string, with other bytes percent-encoded
fn uri_string(uri: &str) -> String {
    let mut ascii = String::with_capacity(uri.len());
    for byte in uri.bytes() {
        if (0x21..=0x7e).contains(&byte) {
            ascii.push(byte as char);
        } else {
            ascii.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("({})", escape_literal(&ascii))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bangkok_date() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 14, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_rectangle_dimensions() {
        let rect = Rectangle::new(10.0, 20.0, 110.0, 70.0);
        assert_eq!(rect.width(), 100.0);
        assert_eq!(rect.height(), 50.0);
        assert_eq!(rect.to_array(), "[10 20 110 70]");
        assert!(rect.is_valid());
        assert!(!Rectangle::new(10.0, 10.0, 10.0, 50.0).is_valid());
    }

    #[test]
    fn test_page_sizes() {
        assert_eq!(A4.width(), 595.0);
        assert_eq!(LETTER.height(), 792.0);
        assert_eq!(LEGAL.height(), 1008.0);
    }

    #[test]
    fn test_empty_document_fails_validation() {
        let doc = Document::new();
        match doc.validate() {
            Err(PdfError::Validation(msg)) => assert!(msg.contains("at least one page")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rotation_must_be_multiple_of_90() {
        let mut doc = Document::new();
        doc.add_page(Page::new(A4).with_rotation(45));
        match doc.validate() {
            Err(PdfError::Validation(msg)) => {
                assert_eq!(msg, "page 0: rotation must be a multiple of 90, got 45")
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let page = Page::new(A4).with_rotation(-90);
        assert!(page.validate().is_ok());
        assert_eq!(page.normalized_rotation(), 270);
    }

    #[test]
    fn test_page_lookup_out_of_range() {
        let mut doc = Document::new();
        doc.add_page(Page::new(A4));
        assert!(doc.page(0).is_ok());
        match doc.page(3) {
            Err(PdfError::PageOutOfRange(3, 1)) => {}
            other => panic!("expected PageOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_has_metadata() {
        let mut doc = Document::new();
        assert!(!doc.has_metadata());
        doc.creator = "tool".to_string();
        assert!(!doc.has_metadata());
        doc.subject = "Quarterly".to_string();
        assert!(doc.has_metadata());
    }

    #[test]
    fn test_pdf_date_format() {
        assert_eq!(pdf_date(&bangkok_date()), "D:20240305143000+07'00'");

        let west = FixedOffset::west_opt(5 * 3600 + 30 * 60)
            .unwrap()
            .with_ymd_and_hms(2023, 12, 31, 23, 59, 59)
            .unwrap();
        assert_eq!(pdf_date(&west), "D:20231231235959-05'30'");
    }

    #[test]
    fn test_info_dict() {
        let doc = Document::new()
            .with_title("Report (draft)")
            .with_author("Somchai")
            .with_dates(bangkok_date());
        let info = String::from_utf8(doc.info_dict(Some("pdf-engine"))).unwrap();

        assert_eq!(
            info,
            "<< /Title (Report \\(draft\\)) /Author (Somchai) /Producer (pdf-engine) \
             /CreationDate (D:20240305143000+07'00') /ModDate (D:20240305143000+07'00') >>"
        );
    }

    #[test]
    fn test_link_annotation_dict() {
        let link = Annotation::link(Rectangle::new(72.0, 700.0, 200.0, 720.0), "https://example.com");
        let dict = String::from_utf8(link.to_dict(4).unwrap()).unwrap();
        assert!(dict.starts_with("<< /Type /Annot /Subtype /Link /Rect [72 700 200 720] /P 4 0 R"));
        assert!(dict.contains("/URI (https://example.com)"));
    }

    #[test]
    fn test_link_uri_is_percent_encoded() {
        assert_eq!(uri_string("https://example.com/café"), "(https://example.com/caf%C3%A9)");
        assert_eq!(uri_string("https://example.com/a b(1)"), "(https://example.com/a%20b\\(1\\))");

        let link = Annotation::link(Rectangle::new(0.0, 0.0, 10.0, 10.0), "https://ไทย.example/");
        let dict = String::from_utf8(link.to_dict(1).unwrap()).unwrap();
        assert!(dict.contains("/URI (https://%E0%B9%84%E0%B8%97%E0%B8%A2.example/)"));
        assert!(!dict.contains("FEFF"));
    }

    #[test]
    fn test_highlight_annotation_dict() {
        let hl = Annotation::highlight(Rectangle::new(0.0, 0.0, 10.0, 5.0), Color::rgb(1.0, 1.0, 0.0));
        let dict = String::from_utf8(hl.to_dict(2).unwrap()).unwrap();
        assert!(dict.contains("/C [1 1 0]"));
        assert!(dict.contains("/QuadPoints [0 5 10 5 0 0 10 0]"));
    }

    #[test]
    fn test_invalid_annotation_is_rejected() {
        let link = Annotation::link(Rectangle::new(0.0, 0.0, 10.0, 10.0), "");
        match link.to_dict(1) {
            Err(PdfError::InvalidOperation(msg)) => assert_eq!(msg, "link annotation URI is empty"),
            other => panic!("expected InvalidOperation, got {other:?}"),
        }
    }
}
