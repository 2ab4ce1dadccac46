//! Fonts: the standard 14, embedded TrueType subsets and their PDF objects
//!
//! A page's fonts go through three states, each its own type:
//! [`FontCollection`] (which fonts the page uses), [`BuiltFonts`] (every
//! embedded subset physically built, glyph remapping fixed) and finally the
//! objects produced by [`Standard14Font::write_font_object`] and
//! [`TrueTypeFontWriter`]. The content-stream generator only accepts
//! `BuiltFonts`, so text cannot be encoded against an unbuilt subset.

use crate::content::{GraphicsOp, TextOp};
use crate::object::{flate_compress, stream_body, IndirectObject};
use crate::{PdfError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write};
use std::sync::Arc;
use subsetter::GlyphRemapper;

/// The 14 standard Type 1 fonts every viewer provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Standard14Font {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
    Symbol,
    ZapfDingbats,
}

impl Standard14Font {
    pub const ALL: [Standard14Font; 14] = [
        Standard14Font::Helvetica,
        Standard14Font::HelveticaBold,
        Standard14Font::HelveticaOblique,
        Standard14Font::HelveticaBoldOblique,
        Standard14Font::TimesRoman,
        Standard14Font::TimesBold,
        Standard14Font::TimesItalic,
        Standard14Font::TimesBoldItalic,
        Standard14Font::Courier,
        Standard14Font::CourierBold,
        Standard14Font::CourierOblique,
        Standard14Font::CourierBoldOblique,
        Standard14Font::Symbol,
        Standard14Font::ZapfDingbats,
    ];

    /// PostScript name used as `/BaseFont`
    pub fn base_name(&self) -> &'static str {
        match self {
            Standard14Font::Helvetica => "Helvetica",
            Standard14Font::HelveticaBold => "Helvetica-Bold",
            Standard14Font::HelveticaOblique => "Helvetica-Oblique",
            Standard14Font::HelveticaBoldOblique => "Helvetica-BoldOblique",
            Standard14Font::TimesRoman => "Times-Roman",
            Standard14Font::TimesBold => "Times-Bold",
            Standard14Font::TimesItalic => "Times-Italic",
            Standard14Font::TimesBoldItalic => "Times-BoldItalic",
            Standard14Font::Courier => "Courier",
            Standard14Font::CourierBold => "Courier-Bold",
            Standard14Font::CourierOblique => "Courier-Oblique",
            Standard14Font::CourierBoldOblique => "Courier-BoldOblique",
            Standard14Font::Symbol => "Symbol",
            Standard14Font::ZapfDingbats => "ZapfDingbats",
        }
    }

    /// Look up by PostScript name, e.g. "Times-Bold"
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.base_name() == name)
    }

    /// Stable ID used to deduplicate font resources, e.g. "std:Helvetica"
    pub fn font_id(&self) -> String {
        format!("std:{}", self.base_name())
    }

    /// Symbol fonts carry their own encoding
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Standard14Font::Symbol | Standard14Font::ZapfDingbats)
    }

    /// Approximate advance width in 1/1000 em
    ///
    /// Used for alignment and wrapping of text blocks only; viewers use their
    /// own metrics for the standard fonts.
    pub fn approx_char_width(&self, c: char) -> f64 {
        match self {
            Standard14Font::Courier
            | Standard14Font::CourierBold
            | Standard14Font::CourierOblique
            | Standard14Font::CourierBoldOblique => 600.0,
            _ if c == ' ' => 250.0,
            Standard14Font::TimesRoman
            | Standard14Font::TimesBold
            | Standard14Font::TimesItalic
            | Standard14Font::TimesBoldItalic => 500.0,
            _ if c.is_ascii_uppercase() => 667.0,
            _ => 556.0,
        }
    }

    /// Write a complete `N 0 obj ... endobj` Type 1 font object
    pub fn write_font_object<W: Write + ?Sized>(&self, number: u32, writer: &mut W) -> io::Result<()> {
        let encoding = if self.is_symbolic() {
            ""
        } else {
            " /Encoding /WinAnsiEncoding"
        };
        write!(
            writer,
            "{number} 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /{}{encoding} >>\nendobj\n",
            self.base_name()
        )
    }
}

/// A TrueType font that can be subset and embedded
///
/// The face is re-parsed from the owned bytes when needed, so the struct has
/// no borrowed lifetime and can be shared between pages behind an `Arc`.
#[derive(Debug)]
pub struct EmbeddedFont {
    id: String,
    postscript_name: String,
    data: Vec<u8>,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    cap_height: i16,
    bbox: [i16; 4],
    italic: bool,
}

impl EmbeddedFont {
    /// Parse TrueType bytes
    ///
    /// # Arguments
    /// * `id` - Caller-chosen identifier, unique per document
    /// * `data` - TrueType font file bytes
    pub fn from_ttf(id: &str, data: Vec<u8>) -> Result<Self> {
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|e| PdfError::FontParseError(format!("{id}: {e}")))?;

        let postscript_name = face
            .names()
            .into_iter()
            .find(|name| name.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
            .and_then(|name| name.to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| id.to_string());
        // Names are written as PDF names; keep them to the regular character set
        let postscript_name: String = postscript_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();

        let rect = face.global_bounding_box();
        let ascender = face.ascender();

        Ok(Self {
            id: id.to_string(),
            postscript_name,
            units_per_em: face.units_per_em(),
            ascender,
            descender: face.descender(),
            cap_height: face.capital_height().unwrap_or(ascender),
            bbox: [rect.x_min, rect.y_min, rect.x_max, rect.y_max],
            italic: face.is_italic(),
            data,
        })
    }

    /// Read and parse a font file
    pub fn from_file(id: &str, path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| PdfError::FontNotFound(format!("{}: {e}", path.display())))?;
        Self::from_ttf(id, data)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stable ID used to deduplicate font resources, e.g. "custom:body"
    pub fn font_id(&self) -> String {
        format!("custom:{}", self.id)
    }

    pub fn postscript_name(&self) -> &str {
        &self.postscript_name
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em
    }

    pub fn ascender(&self) -> i16 {
        self.ascender
    }

    pub fn descender(&self) -> i16 {
        self.descender
    }

    fn face(&self) -> Result<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, 0)
            .map_err(|e| PdfError::FontParseError(format!("{}: {e}", self.id)))
    }

    /// Original glyph ID for a character, if the font maps it
    pub fn glyph_id(&self, c: char) -> Option<u16> {
        let face = self.face().ok()?;
        face.glyph_index(c).map(|gid| gid.0)
    }

    /// Width of `text` in points at `font_size`
    pub fn text_width(&self, text: &str, font_size: f64) -> f64 {
        let Ok(face) = self.face() else {
            return 0.0;
        };
        let units: u32 = text
            .chars()
            .filter_map(|c| face.glyph_index(c))
            .filter_map(|gid| face.glyph_hor_advance(gid))
            .map(u32::from)
            .sum();
        units as f64 / self.units_per_em as f64 * font_size
    }
}

/// Font used by a text operation
#[derive(Debug, Clone)]
pub enum FontRef {
    Standard(Standard14Font),
    Embedded(Arc<EmbeddedFont>),
}

impl FontRef {
    pub fn font_id(&self) -> String {
        match self {
            FontRef::Standard(font) => font.font_id(),
            FontRef::Embedded(font) => font.font_id(),
        }
    }
}

impl From<Standard14Font> for FontRef {
    fn from(font: Standard14Font) -> Self {
        FontRef::Standard(font)
    }
}

impl From<Arc<EmbeddedFont>> for FontRef {
    fn from(font: Arc<EmbeddedFont>) -> Self {
        FontRef::Embedded(font)
    }
}

/// Glyph data fixed by building a subset
#[derive(Debug, Clone)]
struct SubsetData {
    data: Vec<u8>,
    /// Character -> glyph ID in the subset
    char_to_gid: HashMap<char, u16>,
    /// Subset glyph ID -> advance width in font units
    widths: BTreeMap<u16, u16>,
    /// Subset glyph ID -> first character mapped to it
    gid_to_char: BTreeMap<u16, char>,
}

/// The characters one page uses from an embedded font
#[derive(Debug, Clone)]
pub struct FontSubset {
    font: Arc<EmbeddedFont>,
    used_chars: BTreeSet<char>,
    built: Option<SubsetData>,
}

impl FontSubset {
    pub fn new(font: Arc<EmbeddedFont>) -> Self {
        Self {
            font,
            used_chars: BTreeSet::new(),
            built: None,
        }
    }

    pub fn font(&self) -> &Arc<EmbeddedFont> {
        &self.font
    }

    /// Record characters to keep; clears any previous build
    pub fn add_text(&mut self, text: &str) {
        let before = self.used_chars.len();
        self.used_chars.extend(text.chars());
        if self.used_chars.len() != before {
            self.built = None;
        }
    }

    pub fn used_chars(&self) -> &BTreeSet<char> {
        &self.used_chars
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Subset the font to the used characters and fix the glyph mapping
    ///
    /// Characters the font does not map are drawn with `.notdef`.
    pub fn build(&mut self) -> Result<()> {
        let face = self.font.face()?;
        let mut remapper = GlyphRemapper::new();
        let mut char_to_gid = HashMap::new();
        let mut widths = BTreeMap::new();
        let mut gid_to_char = BTreeMap::new();

        for &c in &self.used_chars {
            let old = face.glyph_index(c).unwrap_or(ttf_parser::GlyphId(0));
            let new = remapper.remap(old.0);
            widths
                .entry(new)
                .or_insert_with(|| face.glyph_hor_advance(old).unwrap_or(0));
            if old.0 != 0 {
                gid_to_char.entry(new).or_insert(c);
            }
            char_to_gid.insert(c, new);
        }

        let data = subsetter::subset(&self.font.data, 0, &remapper)
            .map_err(|e| PdfError::FontSubsetError(format!("{}: {e:?}", self.font.id)))?;

        log::debug!(
            "built subset of {}: {} chars, {} bytes",
            self.font.id,
            self.used_chars.len(),
            data.len()
        );

        self.built = Some(SubsetData {
            data,
            char_to_gid,
            widths,
            gid_to_char,
        });
        Ok(())
    }

    fn built(&self) -> Result<&SubsetData> {
        self.built.as_ref().ok_or_else(|| {
            PdfError::FontSubsetError(format!("subset of {} has not been built", self.font.id))
        })
    }

    /// Subset glyph ID for a character
    pub fn glyph_id(&self, c: char) -> Option<u16> {
        self.built.as_ref()?.char_to_gid.get(&c).copied()
    }

    /// Encode text as a hex string of 2-byte subset glyph IDs, e.g. `<00010002>`
    pub fn encode_hex(&self, text: &str) -> Result<String> {
        let built = self.built()?;
        let mut out = String::with_capacity(text.len() * 4 + 2);
        out.push('<');
        for c in text.chars() {
            let gid = built.char_to_gid.get(&c).ok_or_else(|| {
                PdfError::FontSubsetError(format!(
                    "character {c:?} is not in the subset of {}",
                    self.font.id
                ))
            })?;
            out.push_str(&format!("{gid:04X}"));
        }
        out.push('>');
        Ok(out)
    }

    /// Six-letter tag prefixed to the subset's BaseFont
    pub fn tag(&self) -> String {
        // FNV-1a over the used characters
        let mut hash: u32 = 0x811c_9dc5;
        for c in &self.used_chars {
            for byte in (*c as u32).to_be_bytes() {
                hash ^= byte as u32;
                hash = hash.wrapping_mul(0x0100_0193);
            }
        }
        (0..6)
            .map(|i| (b'A' + ((hash >> (i * 5)) % 26) as u8) as char)
            .collect()
    }
}

/// Fonts used by one page, before any subset is built
#[derive(Debug, Default)]
pub struct FontCollection {
    standard: Vec<Standard14Font>,
    subsets: Vec<FontSubset>,
}

impl FontCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gather fonts from text operations and text-bearing graphics operations
    pub fn collect(text_ops: &[TextOp], graphics_ops: &[GraphicsOp]) -> Self {
        let mut collection = Self::new();
        for op in text_ops {
            collection.add(&op.font, &op.text);
        }
        for op in graphics_ops {
            match op {
                GraphicsOp::TextBlock(block) => collection.add(&block.font, &block.text),
                GraphicsOp::Watermark(mark) => {
                    if let Some(font) = &mark.font {
                        collection.add(font, &mark.text);
                    }
                }
                _ => {}
            }
        }
        collection
    }

    /// Register a font and the text drawn with it
    pub fn add(&mut self, font: &FontRef, text: &str) {
        match font {
            FontRef::Standard(font) => {
                if !self.standard.contains(font) {
                    self.standard.push(*font);
                }
            }
            FontRef::Embedded(font) => {
                let index = match self.subsets.iter().position(|s| s.font.id == font.id) {
                    Some(index) => index,
                    None => {
                        self.subsets.push(FontSubset::new(Arc::clone(font)));
                        self.subsets.len() - 1
                    }
                };
                self.subsets[index].add_text(text);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.standard.is_empty() && self.subsets.is_empty()
    }

    /// Build every embedded subset
    pub fn build(self) -> Result<BuiltFonts> {
        let mut subsets = self.subsets;
        for subset in &mut subsets {
            subset.build()?;
        }
        let index = subsets
            .iter()
            .enumerate()
            .map(|(i, s)| (s.font.font_id(), i))
            .collect();
        Ok(BuiltFonts {
            standard: self.standard,
            subsets,
            index,
        })
    }
}

/// A page's fonts with every subset built
#[derive(Debug, Default)]
pub struct BuiltFonts {
    standard: Vec<Standard14Font>,
    subsets: Vec<FontSubset>,
    index: HashMap<String, usize>,
}

impl BuiltFonts {
    /// Fonts for a page that draws no text
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard_fonts(&self) -> &[Standard14Font] {
        &self.standard
    }

    pub fn subsets(&self) -> &[FontSubset] {
        &self.subsets
    }

    /// Built subset by font ID ("custom:<id>")
    pub fn subset(&self, font_id: &str) -> Option<&FontSubset> {
        self.index.get(font_id).map(|&i| &self.subsets[i])
    }
}

/// Writes the five objects that embed a TrueType subset
///
/// Type0 (primary) -> CIDFontType2 -> FontDescriptor -> FontFile2, plus a
/// ToUnicode CMap referenced from the Type0 font.
pub struct TrueTypeFontWriter<'a> {
    subset: &'a FontSubset,
    compress: bool,
}

impl<'a> TrueTypeFontWriter<'a> {
    pub fn new(subset: &'a FontSubset) -> Self {
        Self {
            subset,
            compress: true,
        }
    }

    /// Store FontFile2 and ToUnicode uncompressed
    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }

    /// Allocate numbers through `allocate` and build the font objects
    ///
    /// Returns the Type0 object number and all objects, Type0 first.
    pub fn write_font(&self, allocate: &mut dyn FnMut() -> u32) -> Result<(u32, Vec<IndirectObject>)> {
        let built = self.subset.built()?;
        let font = &self.subset.font;

        let type0_num = allocate();
        let cid_num = allocate();
        let descriptor_num = allocate();
        let file_num = allocate();
        let tounicode_num = allocate();

        let base_font = format!("{}+{}", self.subset.tag(), font.postscript_name);

        let type0 = format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{base_font} /Encoding /Identity-H \
             /DescendantFonts [{cid_num} 0 R] /ToUnicode {tounicode_num} 0 R >>"
        );

        let cid = format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{base_font} \
             /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
             /FontDescriptor {descriptor_num} 0 R /CIDToGIDMap /Identity /DW 1000 /W {} >>",
            self.widths_array(built)
        );

        let scale = |v: i16| (v as i32) * 1000 / font.units_per_em.max(1) as i32;
        // Symbolic, plus italic when the face says so
        let flags = if font.italic { 4 | 64 } else { 4 };
        let descriptor = format!(
            "<< /Type /FontDescriptor /FontName /{base_font} /Flags {flags} \
             /FontBBox [{} {} {} {}] /ItalicAngle 0 /Ascent {} /Descent {} /CapHeight {} \
             /StemV 80 /FontFile2 {file_num} 0 R >>",
            scale(font.bbox[0]),
            scale(font.bbox[1]),
            scale(font.bbox[2]),
            scale(font.bbox[3]),
            scale(font.ascender),
            scale(font.descender),
            scale(font.cap_height)
        );

        let font_file = self.stream(&format!("<< /Length1 {}", built.data.len()), &built.data)?;
        let cmap = generate_tounicode_cmap(built);
        let tounicode = self.stream("<<", cmap.as_bytes())?;

        Ok((
            type0_num,
            vec![
                IndirectObject::new(type0_num, type0),
                IndirectObject::new(cid_num, cid),
                IndirectObject::new(descriptor_num, descriptor),
                IndirectObject::new(file_num, font_file),
                IndirectObject::new(tounicode_num, tounicode),
            ],
        ))
    }

    fn stream(&self, dict_entries: &str, data: &[u8]) -> Result<Vec<u8>> {
        if self.compress {
            let compressed = flate_compress(data)?;
            Ok(stream_body(
                &format!("{dict_entries} /Filter /FlateDecode"),
                &compressed,
            ))
        } else {
            Ok(stream_body(dict_entries, data))
        }
    }

    /// `/W` array in runs of consecutive glyph IDs: `[1 [500 600] 7 [250]]`
    fn widths_array(&self, built: &SubsetData) -> String {
        let upem = self.subset.font.units_per_em.max(1) as u32;
        let mut runs: Vec<(u16, Vec<u32>)> = Vec::new();
        for (&gid, &advance) in &built.widths {
            let width = advance as u32 * 1000 / upem;
            match runs.last_mut() {
                Some((start, widths)) if *start as usize + widths.len() == gid as usize => {
                    widths.push(width)
                }
                _ => runs.push((gid, vec![width])),
            }
        }

        let body: Vec<String> = runs
            .iter()
            .map(|(start, widths)| {
                let widths: Vec<String> = widths.iter().map(u32::to_string).collect();
                format!("{start} [{}]", widths.join(" "))
            })
            .collect();
        format!("[{}]", body.join(" "))
    }
}

/// ToUnicode CMap mapping subset glyph IDs back to Unicode
fn generate_tounicode_cmap(built: &SubsetData) -> String {
    let mut cmap = String::new();

    cmap.push_str("/CIDInit /ProcSet findresource begin\n");
    cmap.push_str("12 dict begin\n");
    cmap.push_str("begincmap\n");
    cmap.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    cmap.push_str("/CMapName /Adobe-Identity-UCS def\n");
    cmap.push_str("/CMapType 2 def\n");
    cmap.push_str("1 begincodespacerange\n");
    cmap.push_str("<0000> <FFFF>\n");
    cmap.push_str("endcodespacerange\n");

    let entries: Vec<(&u16, &char)> = built.gid_to_char.iter().collect();
    // At most 100 entries per bfchar block
    for chunk in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, c) in chunk {
            let mut utf16 = [0u16; 2];
            let unicode: String = c
                .encode_utf16(&mut utf16)
                .iter()
                .map(|unit| format!("{unit:04X}"))
                .collect();
            cmap.push_str(&format!("<{gid:04X}> <{unicode}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\n");
    cmap.push_str("CMapName currentdict /CMap defineresource pop\n");
    cmap.push_str("end\n");
    cmap.push_str("end\n");

    cmap
}
