//! PDF Engine - Assembles an in-memory document model into a PDF file
//!
//! This crate provides functionality for:
//! - Issuing object numbers and framing indirect objects
//! - Managing per-page resource namespaces (fonts, images, graphics states)
//! - Building the page tree in the order fonts, content and images require
//! - Writing the header, body, cross-reference table and trailer
//!
//! # Example
//!
//! ```ignore
//! use pdf_engine::{Document, Page, PdfWriter, PageContent, PageContents, TextOp, Standard14Font, A4};
//!
//! let mut doc = Document::new();
//! doc.add_page(Page::new(A4));
//!
//! let mut contents = PageContents::new();
//! contents.insert(0, PageContent::default().with_text(
//!     TextOp::new("Hello, World!", 72.0, 720.0, Standard14Font::Helvetica.into(), 12.0),
//! ));
//!
//! let mut writer = PdfWriter::create("output.pdf")?;
//! writer.write_with_content(&doc, &contents)?;
//! writer.close()?;
//! ```

mod content;
mod document;
mod font;
mod image;
mod object;
mod page_tree;
mod resources;
mod writer;

pub use content::{
    generate_content_stream, Align, BezierSegment, Color, Dash, GraphicsOp, ImageDraw,
    PageContent, PageContents, Point, ShapeStyle, Stroke, TextBlock, TextOp, Watermark,
};
pub use document::{
    Annotation, Document, Page, PageMode, PdfVersion, Rectangle, A4, LEGAL, LETTER,
};
pub use font::{
    BuiltFonts, EmbeddedFont, FontCollection, FontRef, FontSubset, Standard14Font,
    TrueTypeFontWriter,
};
pub use image::{
    calculate_scaled_dimensions, detect_format, image_xobject, smask_xobject, ImageData,
    ImageFormat, ImageScaleMode,
};
pub use object::{IndirectObject, ObjectAllocator};
pub use page_tree::{PageOutcome, PageTree, PageTreeBuilder};
pub use resources::{Binding, ResourceKind, ResourceRegistry};
pub use writer::{
    write_to_vec, CountingSink, FileSink, OffsetSink, PdfWriter, WriteReport, WriterOptions,
};

use std::fmt;
use thiserror::Error;

/// Pipeline stage a fatal error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    PageTree,
    Objects,
    Xref,
    Trailer,
    Flush,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Header => "header",
            Stage::PageTree => "page-tree",
            Stage::Objects => "objects",
            Stage::Xref => "xref",
            Stage::Trailer => "trailer",
            Stage::Flush => "flush",
            Stage::Close => "close",
        };
        f.write_str(label)
    }
}

/// Errors that can occur during PDF operations
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("document validation failed: {0}")]
    Validation(String),

    #[error("failed to create output: {0}")]
    CreateSink(#[source] std::io::Error),

    #[error("writer is closed")]
    WriterClosed,

    #[error("{stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("xref: missing offset for object {0}")]
    MissingOffset(u32),

    #[error("Invalid page index: {0} (document has {1} pages)")]
    PageOutOfRange(usize, usize),

    #[error("page-tree: page {page} aborted: {cause}")]
    PageAborted { page: usize, cause: String },

    #[error("resource {0} is still pending an object number")]
    UnboundResource(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("Font not found: {0}")]
    FontNotFound(String),

    #[error("Failed to parse font: {0}")]
    FontParseError(String),

    #[error("Font subset error: {0}")]
    FontSubsetError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PdfError {
    /// Wrap an I/O failure with the stage it happened in
    pub(crate) fn io(stage: Stage) -> impl FnOnce(std::io::Error) -> PdfError {
        move |source| PdfError::Io { stage, source }
    }
}

/// Result type for PDF operations
pub type Result<T> = std::result::Result<T, PdfError>;
