//! Content-stream generation
//!
//! Turns a page's text and graphics operations into PDF operators. Every
//! font, image and graphics state the operators reference is registered in a
//! fresh [`ResourceRegistry`] as a pending entry; the page tree binds the real
//! object numbers once those objects exist.

use crate::font::{BuiltFonts, FontRef, Standard14Font};
use crate::image::{calculate_scaled_dimensions, ImageData, ImageScaleMode};
use crate::object::{escape_literal, fmt_num};
use crate::resources::ResourceRegistry;
use crate::{PdfError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Control-point distance for approximating a quarter circle with a cubic curve
const KAPPA: f64 = 0.552_284_749_8;

/// RGB Color (values 0.0 - 1.0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    /// Create a new RGB color (values 0.0 - 1.0)
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Create color from RGB values (0-255)
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }

    pub fn black() -> Self {
        Self::rgb(0.0, 0.0, 0.0)
    }

    pub fn white() -> Self {
        Self::rgb(1.0, 1.0, 1.0)
    }

    pub fn red() -> Self {
        Self::rgb(1.0, 0.0, 0.0)
    }

    pub fn gray(level: f32) -> Self {
        Self::rgb(level, level, level)
    }

    fn validate(&self) -> Result<()> {
        if [self.r, self.g, self.b]
            .iter()
            .all(|c| (0.0..=1.0).contains(c))
        {
            Ok(())
        } else {
            Err(PdfError::InvalidOperation(format!(
                "color components must be between 0.0 and 1.0: {:.2} {:.2} {:.2}",
                self.r, self.g, self.b
            )))
        }
    }

    fn components(&self) -> String {
        format!(
            "{} {} {}",
            fmt_num(self.r as f64),
            fmt_num(self.g as f64),
            fmt_num(self.b as f64)
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::black()
    }
}

/// Horizontal alignment of text relative to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Dash pattern: `[on off ...] phase d`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dash {
    pub pattern: Vec<f64>,
    pub phase: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f64,
    pub dash: Option<Dash>,
}

impl Stroke {
    pub fn new(color: Color, width: f64) -> Self {
        Self {
            color,
            width,
            dash: None,
        }
    }

    pub fn dashed(mut self, pattern: Vec<f64>, phase: f64) -> Self {
        self.dash = Some(Dash { pattern, phase });
        self
    }
}

/// Stroke, fill and opacity shared by closed shapes
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeStyle {
    pub stroke: Option<Stroke>,
    pub fill: Option<Color>,
    /// 0.0 (invisible) to 1.0 (opaque)
    pub opacity: f64,
}

impl ShapeStyle {
    pub fn stroked(stroke: Stroke) -> Self {
        Self {
            stroke: Some(stroke),
            ..Self::default()
        }
    }

    pub fn filled(color: Color) -> Self {
        Self {
            fill: Some(color),
            ..Self::default()
        }
    }

    pub fn with_fill(mut self, color: Color) -> Self {
        self.fill = Some(color);
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            stroke: None,
            fill: None,
            opacity: 1.0,
        }
    }
}

/// One cubic segment; `start` must equal the previous segment's `end`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BezierSegment {
    pub start: Point,
    pub c1: Point,
    pub c2: Point,
    pub end: Point,
}

/// A single line of text
#[derive(Debug, Clone)]
pub struct TextOp {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font: FontRef,
    pub size: f64,
    pub color: Color,
    pub align: Align,
}

impl TextOp {
    pub fn new(text: impl Into<String>, x: f64, y: f64, font: FontRef, size: f64) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            font,
            size,
            color: Color::black(),
            align: Align::Left,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }
}

/// Word-wrapped text inside a fixed width, first baseline at `y`
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub font: FontRef,
    pub size: f64,
    /// Baseline distance as a multiple of `size`
    pub line_height: f64,
    pub align: Align,
    pub color: Color,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, x: f64, y: f64, width: f64, font: FontRef, size: f64) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
            font,
            size,
            line_height: 1.2,
            align: Align::Left,
            color: Color::black(),
        }
    }

    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }
}

/// Text stamped across a page, centered on (`x`, `y`)
#[derive(Debug, Clone)]
pub struct Watermark {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font: Option<FontRef>,
    pub size: f64,
    pub color: Color,
    pub opacity: f64,
    /// Counter-clockwise, in degrees
    pub rotation: f64,
}

impl Watermark {
    /// Gray, half-transparent, rotated 45 degrees, centered on A4
    pub fn new(text: impl Into<String>, font: impl Into<FontRef>, size: f64) -> Self {
        Self {
            text: text.into(),
            x: 297.5,
            y: 421.0,
            font: Some(font.into()),
            size,
            color: Color::gray(0.5),
            opacity: 0.5,
            rotation: 45.0,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    fn validate(&self) -> Result<&FontRef> {
        if self.text.is_empty() {
            return Err(PdfError::InvalidOperation(
                "watermark text is empty".to_string(),
            ));
        }
        let font = self.font.as_ref().ok_or_else(|| {
            PdfError::InvalidOperation("watermark font is not set".to_string())
        })?;
        if self.size <= 0.0 {
            return Err(PdfError::InvalidOperation(format!(
                "watermark font size must be positive: {:.2}",
                self.size
            )));
        }
        Ok(font)
    }
}

/// An image placed in a box
#[derive(Debug, Clone)]
pub struct ImageDraw {
    pub image: Arc<ImageData>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale_mode: ImageScaleMode,
    pub opacity: f64,
}

impl ImageDraw {
    pub fn new(image: Arc<ImageData>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            image,
            x,
            y,
            width,
            height,
            scale_mode: ImageScaleMode::Stretch,
            opacity: 1.0,
        }
    }

    pub fn with_scale_mode(mut self, mode: ImageScaleMode) -> Self {
        self.scale_mode = mode;
        self
    }
}

/// A drawing operation
#[derive(Debug, Clone)]
pub enum GraphicsOp {
    Line {
        from: Point,
        to: Point,
        stroke: Stroke,
        opacity: f64,
    },
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        style: ShapeStyle,
    },
    Ellipse {
        center: Point,
        rx: f64,
        ry: f64,
        style: ShapeStyle,
    },
    Polygon {
        vertices: Vec<Point>,
        style: ShapeStyle,
    },
    Polyline {
        points: Vec<Point>,
        stroke: Stroke,
        opacity: f64,
    },
    Bezier {
        segments: Vec<BezierSegment>,
        closed: bool,
        style: ShapeStyle,
    },
    Image(ImageDraw),
    Watermark(Watermark),
    TextBlock(TextBlock),
}

impl GraphicsOp {
    pub fn line(from: Point, to: Point, stroke: Stroke) -> Self {
        GraphicsOp::Line {
            from,
            to,
            stroke,
            opacity: 1.0,
        }
    }

    pub fn rect(x: f64, y: f64, width: f64, height: f64, style: ShapeStyle) -> Self {
        GraphicsOp::Rect {
            x,
            y,
            width,
            height,
            style,
        }
    }

    pub fn circle(center: Point, radius: f64, style: ShapeStyle) -> Self {
        GraphicsOp::Ellipse {
            center,
            rx: radius,
            ry: radius,
            style,
        }
    }

    /// True for operations that draw text
    pub fn has_text(&self) -> bool {
        matches!(self, GraphicsOp::Watermark(_) | GraphicsOp::TextBlock(_))
    }
}

/// Operations drawn on one page
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub text: Vec<TextOp>,
    pub graphics: Vec<GraphicsOp>,
}

impl PageContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, op: TextOp) -> Self {
        self.text.push(op);
        self
    }

    pub fn with_graphics(mut self, op: GraphicsOp) -> Self {
        self.graphics.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.graphics.is_empty()
    }

    /// True if any operation needs fonts
    pub fn has_text(&self) -> bool {
        !self.text.is_empty() || self.graphics.iter().any(GraphicsOp::has_text)
    }

    /// Images in the order they are drawn
    pub fn images(&self) -> impl Iterator<Item = &Arc<ImageData>> {
        self.graphics.iter().filter_map(|op| match op {
            GraphicsOp::Image(draw) => Some(&draw.image),
            _ => None,
        })
    }

    /// Images that get an XObject, in drawing order
    ///
    /// The k-th item here is the one the content stream draws as `Im<k+1>`.
    pub(crate) fn framed_images(&self) -> impl Iterator<Item = &Arc<ImageData>> {
        self.images().filter(|image| image.validate_frame().is_ok())
    }
}

/// Page content keyed by 0-based page index
#[derive(Debug, Clone, Default)]
pub struct PageContents {
    pages: BTreeMap<usize, PageContent>,
}

impl PageContents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: usize, content: PageContent) -> Option<PageContent> {
        self.pages.insert(page, content)
    }

    pub fn get(&self, page: usize) -> Option<&PageContent> {
        self.pages.get(&page)
    }

    pub fn get_mut(&mut self, page: usize) -> &mut PageContent {
        self.pages.entry(page).or_default()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Page indices that have content, ascending
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Generate one page's content stream
///
/// Graphics are drawn first, then text on top. `fonts` must hold every
/// embedded font the operations use, already built.
///
/// # Returns
/// The operator bytes and a registry whose entries are all still pending
pub fn generate_content_stream(
    text_ops: &[TextOp],
    graphics_ops: &[GraphicsOp],
    fonts: &BuiltFonts,
) -> Result<(Vec<u8>, ResourceRegistry)> {
    let mut generator = Generator {
        ops: String::new(),
        resources: ResourceRegistry::new(),
        fonts,
    };

    for op in graphics_ops {
        generator.graphics(op)?;
    }
    for op in text_ops {
        generator.text(op)?;
    }

    Ok((generator.ops.into_bytes(), generator.resources))
}

struct Generator<'a> {
    ops: String,
    resources: ResourceRegistry,
    fonts: &'a BuiltFonts,
}

impl Generator<'_> {
    fn push(&mut self, line: &str) {
        self.ops.push_str(line);
        self.ops.push('\n');
    }

    /// `/GSn gs` for opacity below 1
    fn opacity(&mut self, opacity: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(PdfError::InvalidOperation(format!(
                "opacity must be between 0.0 and 1.0: {opacity:.2}"
            )));
        }
        if opacity < 1.0 {
            let (name, _) = self.resources.get_or_create_ext_gstate(opacity);
            self.push(&format!("/{name} gs"));
        }
        Ok(())
    }

    fn font_name(&mut self, font: &FontRef) -> String {
        self.resources.add_font_with_id(0, &font.font_id())
    }

    /// Encoded string operand for `Tj`
    fn encode(&self, font: &FontRef, text: &str) -> Result<String> {
        match font {
            FontRef::Standard(_) => {
                let encoded = encode_winansi(text);
                if encoded.replaced > 0 {
                    log::warn!(
                        "{} character(s) not representable in WinAnsiEncoding replaced with '?'",
                        encoded.replaced
                    );
                }
                Ok(format!("({})", encoded.text))
            }
            FontRef::Embedded(font) => {
                let id = font.font_id();
                self.fonts
                    .subset(&id)
                    .ok_or(PdfError::FontNotFound(id))?
                    .encode_hex(text)
            }
        }
    }

    fn stroke(&mut self, stroke: &Stroke) -> Result<()> {
        ensure_finite("stroke", &[stroke.width])?;
        if let Some(dash) = &stroke.dash {
            ensure_finite("dash pattern", &dash.pattern)?;
            ensure_finite("dash pattern", &[dash.phase])?;
        }
        if stroke.width < 0.0 {
            return Err(PdfError::InvalidOperation(
                "stroke width must be non-negative".to_string(),
            ));
        }
        stroke.color.validate()?;
        self.push(&format!("{} RG", stroke.color.components()));
        self.push(&format!("{} w", fmt_num(stroke.width)));
        if let Some(dash) = &stroke.dash {
            let pattern: Vec<String> = dash.pattern.iter().map(|v| fmt_num(*v)).collect();
            self.push(&format!("[{}] {} d", pattern.join(" "), fmt_num(dash.phase)));
        }
        Ok(())
    }

    /// Set colors, returning the painting operator
    fn style(&mut self, shape: &str, style: &ShapeStyle) -> Result<&'static str> {
        if style.stroke.is_none() && style.fill.is_none() {
            return Err(PdfError::InvalidOperation(format!(
                "{shape} must have at least stroke or fill color"
            )));
        }
        self.opacity(style.opacity)?;
        if let Some(stroke) = &style.stroke {
            self.stroke(stroke)?;
        }
        if let Some(fill) = &style.fill {
            fill.validate()?;
            self.push(&format!("{} rg", fill.components()));
        }
        Ok(match (&style.stroke, &style.fill) {
            (Some(_), Some(_)) => "B",
            (None, Some(_)) => "f",
            _ => "S",
        })
    }

    fn graphics(&mut self, op: &GraphicsOp) -> Result<()> {
        match op {
            GraphicsOp::Line {
                from,
                to,
                stroke,
                opacity,
            } => {
                ensure_finite("line", &point_values([from, to]))?;
                self.push("q");
                self.opacity(*opacity)?;
                self.stroke(stroke)?;
                self.push(&format!("{} {} m", fmt_num(from.x), fmt_num(from.y)));
                self.push(&format!("{} {} l", fmt_num(to.x), fmt_num(to.y)));
                self.push("S");
                self.push("Q");
            }
            GraphicsOp::Rect {
                x,
                y,
                width,
                height,
                style,
            } => {
                ensure_finite("rectangle", &[*x, *y, *width, *height])?;
                if *width < 0.0 || *height < 0.0 {
                    return Err(PdfError::InvalidOperation(
                        "rectangle width and height must be non-negative".to_string(),
                    ));
                }
                self.push("q");
                let paint = self.style("rectangle", style)?;
                self.push(&format!(
                    "{} {} {} {} re",
                    fmt_num(*x),
                    fmt_num(*y),
                    fmt_num(*width),
                    fmt_num(*height)
                ));
                self.push(paint);
                self.push("Q");
            }
            GraphicsOp::Ellipse {
                center,
                rx,
                ry,
                style,
            } => {
                ensure_finite("ellipse", &[center.x, center.y, *rx, *ry])?;
                if *rx < 0.0 {
                    return Err(PdfError::InvalidOperation(
                        "horizontal radius must be non-negative".to_string(),
                    ));
                }
                if *ry < 0.0 {
                    return Err(PdfError::InvalidOperation(
                        "vertical radius must be non-negative".to_string(),
                    ));
                }
                self.push("q");
                let paint = self.style("ellipse", style)?;
                self.ellipse_path(*center, *rx, *ry);
                self.push(paint);
                self.push("Q");
            }
            GraphicsOp::Polygon { vertices, style } => {
                if vertices.len() < 3 {
                    return Err(PdfError::InvalidOperation(
                        "polygon must have at least 3 vertices".to_string(),
                    ));
                }
                ensure_finite("polygon", &point_values(vertices))?;
                self.push("q");
                let paint = self.style("polygon", style)?;
                self.path(vertices);
                self.push("h");
                self.push(paint);
                self.push("Q");
            }
            GraphicsOp::Polyline {
                points,
                stroke,
                opacity,
            } => {
                if points.len() < 2 {
                    return Err(PdfError::InvalidOperation(
                        "polyline must have at least 2 points".to_string(),
                    ));
                }
                ensure_finite("polyline", &point_values(points))?;
                self.push("q");
                self.opacity(*opacity)?;
                self.stroke(stroke)?;
                self.path(points);
                self.push("S");
                self.push("Q");
            }
            GraphicsOp::Bezier {
                segments,
                closed,
                style,
            } => self.bezier(segments, *closed, style)?,
            GraphicsOp::Image(draw) => self.image(draw)?,
            GraphicsOp::Watermark(mark) => self.watermark(mark)?,
            GraphicsOp::TextBlock(block) => self.text_block(block)?,
        }
        Ok(())
    }

    fn path(&mut self, points: &[Point]) {
        for (i, p) in points.iter().enumerate() {
            let op = if i == 0 { "m" } else { "l" };
            self.push(&format!("{} {} {op}", fmt_num(p.x), fmt_num(p.y)));
        }
    }

    fn ellipse_path(&mut self, c: Point, rx: f64, ry: f64) {
        let (kx, ky) = (rx * KAPPA, ry * KAPPA);
        let n = |v: f64| fmt_num(v);
        self.push(&format!("{} {} m", n(c.x + rx), n(c.y)));
        self.push(&format!(
            "{} {} {} {} {} {} c",
            n(c.x + rx),
            n(c.y + ky),
            n(c.x + kx),
            n(c.y + ry),
            n(c.x),
            n(c.y + ry)
        ));
        self.push(&format!(
            "{} {} {} {} {} {} c",
            n(c.x - kx),
            n(c.y + ry),
            n(c.x - rx),
            n(c.y + ky),
            n(c.x - rx),
            n(c.y)
        ));
        self.push(&format!(
            "{} {} {} {} {} {} c",
            n(c.x - rx),
            n(c.y - ky),
            n(c.x - kx),
            n(c.y - ry),
            n(c.x),
            n(c.y - ry)
        ));
        self.push(&format!(
            "{} {} {} {} {} {} c",
            n(c.x + kx),
            n(c.y - ry),
            n(c.x + rx),
            n(c.y - ky),
            n(c.x + rx),
            n(c.y)
        ));
        self.push("h");
    }

    fn bezier(&mut self, segments: &[BezierSegment], closed: bool, style: &ShapeStyle) -> Result<()> {
        let Some(first) = segments.first() else {
            return Err(PdfError::InvalidOperation(
                "bezier curve must have at least 1 segment".to_string(),
            ));
        };
        if segments.windows(2).any(|pair| pair[0].end != pair[1].start) {
            return Err(PdfError::InvalidOperation(
                "bezier segments must be continuous (segment start point must match previous segment end point)"
                    .to_string(),
            ));
        }
        if style.fill.is_some() && !closed {
            return Err(PdfError::InvalidOperation(
                "fill color requires closed curve".to_string(),
            ));
        }

        let points = segments.iter().flat_map(|seg| [&seg.start, &seg.c1, &seg.c2, &seg.end]);
        ensure_finite("bezier curve", &point_values(points))?;

        self.push("q");
        let paint = self.style("bezier curve", style)?;
        self.push(&format!("{} {} m", fmt_num(first.start.x), fmt_num(first.start.y)));
        for seg in segments {
            self.push(&format!(
                "{} {} {} {} {} {} c",
                fmt_num(seg.c1.x),
                fmt_num(seg.c1.y),
                fmt_num(seg.c2.x),
                fmt_num(seg.c2.y),
                fmt_num(seg.end.x),
                fmt_num(seg.end.y)
            ));
        }
        if closed {
            self.push("h");
        }
        self.push(paint);
        self.push("Q");
        Ok(())
    }

    fn image(&mut self, draw: &ImageDraw) -> Result<()> {
        // Names stay positional over the images that can be framed
        if let Err(err) = draw.image.validate_frame() {
            log::warn!("skipping image: {err}");
            return Ok(());
        }

        let (width, height) = calculate_scaled_dimensions(
            draw.image.width,
            draw.image.height,
            draw.width,
            draw.height,
            draw.scale_mode,
        );
        ensure_finite("image", &[draw.x, draw.y, width, height])?;
        if width <= 0.0 || height <= 0.0 {
            return Err(PdfError::InvalidOperation(format!(
                "image size must be positive: {width:.2}x{height:.2}"
            )));
        }

        let name = self.resources.add_image_placeholder();
        self.push("q");
        self.opacity(draw.opacity)?;
        self.push(&format!(
            "{} 0 0 {} {} {} cm",
            fmt_num(width),
            fmt_num(height),
            fmt_num(draw.x),
            fmt_num(draw.y)
        ));
        self.push(&format!("/{name} Do"));
        self.push("Q");
        Ok(())
    }

    fn watermark(&mut self, mark: &Watermark) -> Result<()> {
        let font = mark.validate()?;
        ensure_finite("watermark", &[mark.x, mark.y, mark.size, mark.rotation])?;
        mark.color.validate()?;
        let encoded = self.encode(font, &mark.text)?;
        let font_name = self.font_name(font);
        let half_width = text_width(font, &mark.text, mark.size) / 2.0;

        let (sin, cos) = mark.rotation.to_radians().sin_cos();
        self.push("q");
        self.opacity(mark.opacity)?;
        self.push(&format!(
            "{} {} {} {} {} {} cm",
            fmt_num(cos),
            fmt_num(sin),
            fmt_num(-sin),
            fmt_num(cos),
            fmt_num(mark.x),
            fmt_num(mark.y)
        ));
        self.push("BT");
        self.push(&format!("{} rg", mark.color.components()));
        self.push(&format!("/{font_name} {} Tf", fmt_num(mark.size)));
        self.push(&format!("{} 0 Td", fmt_num(-half_width)));
        self.push(&format!("{encoded} Tj"));
        self.push("ET");
        self.push("Q");
        Ok(())
    }

    fn show_line(
        &mut self,
        font: &FontRef,
        font_name: &str,
        size: f64,
        color: Color,
        text: &str,
        at: Point,
    ) -> Result<()> {
        let encoded = self.encode(font, text)?;
        self.push("BT");
        self.push(&format!("{} rg", color.components()));
        self.push(&format!("/{font_name} {} Tf", fmt_num(size)));
        self.push(&format!("{} {} Td", fmt_num(at.x), fmt_num(at.y)));
        self.push(&format!("{encoded} Tj"));
        self.push("ET");
        Ok(())
    }

    fn text(&mut self, op: &TextOp) -> Result<()> {
        ensure_finite("text", &[op.x, op.y, op.size])?;
        if op.size <= 0.0 {
            return Err(PdfError::InvalidOperation(format!(
                "font size must be positive: {:.2}",
                op.size
            )));
        }
        op.color.validate()?;
        if op.text.is_empty() {
            return Ok(());
        }

        let font_name = self.font_name(&op.font);
        let x = op.x - align_offset(op.align, text_width(&op.font, &op.text, op.size));
        self.show_line(&op.font, &font_name, op.size, op.color, &op.text, Point::new(x, op.y))
    }

    fn text_block(&mut self, block: &TextBlock) -> Result<()> {
        ensure_finite(
            "text block",
            &[block.x, block.y, block.width, block.size, block.line_height],
        )?;
        if block.size <= 0.0 {
            return Err(PdfError::InvalidOperation(format!(
                "font size must be positive: {:.2}",
                block.size
            )));
        }
        if block.width <= 0.0 {
            return Err(PdfError::InvalidOperation(format!(
                "text block width must be positive: {:.2}",
                block.width
            )));
        }
        block.color.validate()?;

        let lines = wrap_lines(&block.text, |s| text_width(&block.font, s, block.size), block.width);
        if lines.is_empty() {
            return Ok(());
        }

        let font_name = self.font_name(&block.font);
        let leading = block.size * block.line_height;
        for (i, line) in lines.iter().enumerate() {
            let line_width = text_width(&block.font, line, block.size);
            let x = block.x
                + match block.align {
                    Align::Left => 0.0,
                    Align::Center => (block.width - line_width) / 2.0,
                    Align::Right => block.width - line_width,
                };
            let y = block.y - leading * i as f64;
            self.show_line(&block.font, &font_name, block.size, block.color, line, Point::new(x, y))?;
        }
        Ok(())
    }
}

/// NaN and infinities have no PDF number syntax
fn ensure_finite(what: &str, values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(PdfError::InvalidOperation(format!(
            "{what} coordinates and sizes must be finite"
        )))
    }
}

fn point_values<'p>(points: impl IntoIterator<Item = &'p Point>) -> Vec<f64> {
    points.into_iter().flat_map(|p| [p.x, p.y]).collect()
}

/// Shift of the anchor for single-line alignment
fn align_offset(align: Align, width: f64) -> f64 {
    match align {
        Align::Left => 0.0,
        Align::Center => width / 2.0,
        Align::Right => width,
    }
}

/// Width of `text` in points
fn text_width(font: &FontRef, text: &str, size: f64) -> f64 {
    match font {
        FontRef::Standard(font) => standard_text_width(*font, text, size),
        FontRef::Embedded(font) => font.text_width(text, size),
    }
}

fn standard_text_width(font: Standard14Font, text: &str, size: f64) -> f64 {
    text.chars().map(|c| font.approx_char_width(c)).sum::<f64>() / 1000.0 * size
}

/// Greedy word wrap on whitespace; explicit newlines always break
///
/// A single word wider than `max_width` gets a line of its own.
fn wrap_lines(text: &str, measure: impl Fn(&str) -> f64, max_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
                continue;
            }
            let candidate = format!("{current} {word}");
            if measure(&candidate) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        lines.push(current);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

struct WinAnsiEncoded {
    text: String,
    replaced: usize,
}

/// Encode as an escaped WinAnsi (cp1252) literal string body
fn encode_winansi(input: &str) -> WinAnsiEncoded {
    let mut out = String::with_capacity(input.len());
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' | b'(' | b')' | b'\n' | b'\r' => {
                out.push_str(&escape_literal(&(byte as char).to_string()))
            }
            b if !(0x20..0x7f).contains(&b) => out.push_str(&format!("\\{b:03o}")),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded {
        text: out,
        replaced,
    }
}
