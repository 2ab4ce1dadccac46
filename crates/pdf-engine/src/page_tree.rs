//! Page tree construction
//!
//! Builds every page in document order, with a fixed protocol per page:
//!
//! 1. allocate the page number
//! 2. collect the page's fonts and build every embedded subset
//! 3. generate the content stream against the built fonts
//! 4. create font objects and bind them by font ID
//! 5. create graphics-state objects for the opacities the content uses
//! 6. create image XObjects (and soft masks) in drawing order
//! 7. create annotation objects
//! 8. wrap the content stream
//! 9. assemble the page dictionary
//!
//! A page whose fonts or content cannot be produced is degraded: it keeps its
//! boxes and annotations but gets `/Resources << >>` and no `/Contents`.

use crate::content::{generate_content_stream, PageContent, PageContents};
use crate::document::{Document, Page};
use crate::font::{BuiltFonts, FontCollection, TrueTypeFontWriter};
use crate::image::{image_xobject, smask_xobject};
use crate::object::{flate_compress, fmt_num, stream_body, IndirectObject, ObjectAllocator};
use crate::resources::ResourceRegistry;
use crate::{PdfError, Result};

/// Result of building one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Complete,
    /// Written without resources or content
    Degraded { cause: String },
}

impl PageOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PageOutcome::Degraded { .. })
    }
}

/// Objects of the whole page tree, Pages root first
#[derive(Debug)]
pub struct PageTree {
    /// Object number of the Pages root
    pub root: u32,
    /// Page object numbers in document order
    pub pages: Vec<u32>,
    pub objects: Vec<IndirectObject>,
    pub outcomes: Vec<PageOutcome>,
}

/// Content stream bytes, serialized resources and the objects they reference
struct BuiltContent {
    stream: Vec<u8>,
    compressed: bool,
    resources: Vec<u8>,
    objects: Vec<IndirectObject>,
}

/// Builds the page tree from one allocator
pub struct PageTreeBuilder<'a> {
    allocator: &'a mut ObjectAllocator,
    compress: bool,
    abort_on_degraded: bool,
}

impl<'a> PageTreeBuilder<'a> {
    pub fn new(allocator: &'a mut ObjectAllocator) -> Self {
        Self {
            allocator,
            compress: true,
            abort_on_degraded: false,
        }
    }

    /// FlateDecode content streams and embedded font data
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Fail the build on the first degraded page
    pub fn abort_on_degraded_page(mut self, abort: bool) -> Self {
        self.abort_on_degraded = abort;
        self
    }

    /// Build all pages of `doc`, drawing `contents` on them
    pub fn build(mut self, doc: &Document, contents: &PageContents) -> Result<PageTree> {
        // Pages must know their parent before it is assembled
        let root = self.allocator.allocate();

        let mut pages = Vec::with_capacity(doc.page_count());
        let mut objects = Vec::new();
        let mut outcomes = Vec::with_capacity(doc.page_count());

        for index in 0..doc.page_count() {
            let page = doc.page(index)?;
            let before = objects.len();
            let (number, outcome) =
                self.build_page(index, page, contents.get(index), root, &mut objects)?;
            log::debug!(
                "page {index}: object {number}, {} objects",
                objects.len() - before
            );
            pages.push(number);
            outcomes.push(outcome);
        }

        for index in contents.indices().filter(|i| *i >= doc.page_count()) {
            log::warn!(
                "skipping content for page {index}: document has {} pages",
                doc.page_count()
            );
        }

        let kids: Vec<String> = pages.iter().map(|n| format!("{n} 0 R")).collect();
        let root_dict = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        );
        objects.insert(0, IndirectObject::new(root, root_dict));

        Ok(PageTree {
            root,
            pages,
            objects,
            outcomes,
        })
    }

    fn build_page(
        &mut self,
        index: usize,
        page: &Page,
        content: Option<&PageContent>,
        parent: u32,
        objects: &mut Vec<IndirectObject>,
    ) -> Result<(u32, PageOutcome)> {
        let number = self.allocator.allocate();
        let mark = self.allocator.next_number();

        let (built, outcome) = match content.filter(|c| !c.is_empty()) {
            None => (None, PageOutcome::Complete),
            Some(content) => match self.build_content(content) {
                Ok(built) => (Some(built), PageOutcome::Complete),
                Err(err) => (None, self.degrade(index, mark, err, objects)?),
            },
        };

        let annots = self.build_annotations(index, page, number, objects);

        let (resources, contents_ref) = match built {
            Some(built) => {
                objects.extend(built.objects);
                let stream_num = self.allocator.allocate();
                let dict = if built.compressed {
                    "<< /Filter /FlateDecode"
                } else {
                    "<<"
                };
                objects.push(IndirectObject::new(
                    stream_num,
                    stream_body(dict, &built.stream),
                ));
                (built.resources, Some(stream_num))
            }
            None => (b"<< >>".to_vec(), None),
        };

        let mut dict = format!(
            "<< /Type /Page /Parent {parent} 0 R /MediaBox {}",
            page.media_box.to_array()
        );
        if let Some(crop) = &page.crop_box {
            dict.push_str(&format!(" /CropBox {}", crop.to_array()));
        }
        if page.normalized_rotation() != 0 {
            dict.push_str(&format!(" /Rotate {}", page.normalized_rotation()));
        }
        dict.push_str(" /Resources ");
        let mut body = dict.into_bytes();
        body.extend_from_slice(&resources);
        let mut tail = String::new();
        if let Some(stream_num) = contents_ref {
            tail.push_str(&format!(" /Contents {stream_num} 0 R"));
        }
        if !annots.is_empty() {
            let refs: Vec<String> = annots.iter().map(|n| format!("{n} 0 R")).collect();
            tail.push_str(&format!(" /Annots [{}]", refs.join(" ")));
        }
        tail.push_str(" >>");
        body.extend_from_slice(tail.as_bytes());

        objects.push(IndirectObject::new(number, body));
        Ok((number, outcome))
    }

    /// Steps 2-6 and the serialized Resources dictionary
    ///
    /// Any error here degrades the page.
    fn build_content(&mut self, content: &PageContent) -> Result<BuiltContent> {
        let fonts = if content.has_text() {
            FontCollection::collect(&content.text, &content.graphics).build()?
        } else {
            BuiltFonts::empty()
        };

        let (stream, mut resources) =
            generate_content_stream(&content.text, &content.graphics, &fonts)?;

        let mut objects = Vec::new();
        self.create_fonts(&fonts, &mut resources, &mut objects)?;
        self.create_ext_gstates(&mut resources, &mut objects);
        self.create_images(content, &mut resources, &mut objects)?;

        let resources = resources.to_bytes()?;
        let (stream, compressed) = if self.compress {
            (flate_compress(&stream)?, true)
        } else {
            (stream, false)
        };

        Ok(BuiltContent {
            stream,
            compressed,
            resources,
            objects,
        })
    }

    fn create_fonts(
        &mut self,
        fonts: &BuiltFonts,
        resources: &mut ResourceRegistry,
        objects: &mut Vec<IndirectObject>,
    ) -> Result<()> {
        for font in fonts.standard_fonts() {
            let font_id = font.font_id();
            if resources.font_resource_name(&font_id).is_none() {
                continue;
            }
            let number = self.allocator.allocate();
            let mut envelope = Vec::new();
            font.write_font_object(number, &mut envelope)?;
            objects.push(IndirectObject::new(number, dictionary_body(&envelope)?));
            resources.set_font_object_number_by_id(&font_id, number);
        }

        for subset in fonts.subsets() {
            let font_id = subset.font().font_id();
            if resources.font_resource_name(&font_id).is_none() {
                continue;
            }
            let mut writer = TrueTypeFontWriter::new(subset);
            if !self.compress {
                writer = writer.uncompressed();
            }
            let allocator = &mut *self.allocator;
            let (primary, font_objects) = writer.write_font(&mut || allocator.allocate())?;
            objects.extend(font_objects);
            resources.set_font_object_number_by_id(&font_id, primary);
        }
        Ok(())
    }

    fn create_ext_gstates(
        &mut self,
        resources: &mut ResourceRegistry,
        objects: &mut Vec<IndirectObject>,
    ) {
        for (name, opacity) in resources.pending_ext_gstates() {
            let number = self.allocator.allocate();
            let alpha = fmt_num(opacity);
            objects.push(IndirectObject::new(
                number,
                format!("<< /Type /ExtGState /CA {alpha} /ca {alpha} >>"),
            ));
            resources.set_ext_gstate_object_number(&name, number);
        }
    }

    /// Images are named `Im1`, `Im2`, ... in drawing order
    ///
    /// Images that cannot be framed were left out of the content stream and
    /// take no name.
    fn create_images(
        &mut self,
        content: &PageContent,
        resources: &mut ResourceRegistry,
        objects: &mut Vec<IndirectObject>,
    ) -> Result<()> {
        for (k, image) in content.framed_images().enumerate() {
            let name = format!("Im{}", k + 1);
            let number = self.allocator.allocate();
            let smask = if image.has_alpha() {
                let smask_num = self.allocator.allocate();
                objects.push(smask_xobject(smask_num, image)?);
                Some(smask_num)
            } else {
                None
            };
            objects.push(image_xobject(number, image, smask)?);
            resources.set_image_object_number(&name, number);
        }
        Ok(())
    }

    fn build_annotations(
        &mut self,
        index: usize,
        page: &Page,
        page_number: u32,
        objects: &mut Vec<IndirectObject>,
    ) -> Vec<u32> {
        let mut numbers = Vec::new();
        for annotation in &page.annotations {
            let body = match annotation.to_dict(page_number) {
                Ok(body) => body,
                Err(err) => {
                    log::warn!("page {index}: skipping annotation: {err}");
                    continue;
                }
            };
            let number = self.allocator.allocate();
            objects.push(IndirectObject::new(number, body));
            numbers.push(number);
        }
        numbers
    }

    /// Turn a content failure into a degraded page, or abort
    ///
    /// Numbers the page took from `mark` on are kept as `null` objects.
    fn degrade(
        &self,
        index: usize,
        mark: u32,
        err: PdfError,
        objects: &mut Vec<IndirectObject>,
    ) -> Result<PageOutcome> {
        let cause = err.to_string();
        if self.abort_on_degraded {
            return Err(PdfError::PageAborted { page: index, cause });
        }
        log::warn!("page {index} degraded: {cause}");
        self.fill_allocated(mark, objects);
        Ok(PageOutcome::Degraded { cause })
    }

    /// Write `null` for every number taken since `mark` by a failed page
    ///
    /// Objects already created for the page are discarded; the numbers stay
    /// in the xref so numbering remains gap-free.
    fn fill_allocated(&self, mark: u32, objects: &mut Vec<IndirectObject>) {
        for number in mark..self.allocator.next_number() {
            objects.push(IndirectObject::new(number, "null"));
        }
    }
}

/// Dictionary between the first `<<` and the last `>>` of a full object envelope
fn dictionary_body(envelope: &[u8]) -> Result<Vec<u8>> {
    let start = envelope.windows(2).position(|w| w == b"<<");
    let end = envelope.windows(2).rposition(|w| w == b">>");
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(envelope[start..end + 2].to_vec()),
        _ => Err(PdfError::InvalidOperation(
            "font object has no dictionary".to_string(),
        )),
    }
}
