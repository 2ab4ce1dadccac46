//! Image decoding and Image XObject framing

use crate::object::{flate_compress, stream_body, IndirectObject};
use crate::{PdfError, Result};
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;

impl From<image::ImageError> for PdfError {
    fn from(err: image::ImageError) -> Self {
        PdfError::ImageError(err.to_string())
    }
}

/// Source format of an image, which decides its stream filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Passed through untouched, `/DCTDecode`
    Jpeg,
    /// Decoded and re-compressed, `/FlateDecode`
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    fn filter(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "DCTDecode",
            ImageFormat::Png => "FlateDecode",
        }
    }
}

/// How an image is fitted into its target box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageScaleMode {
    /// Stretch to exact dimensions
    #[default]
    Stretch,
    /// Keep aspect ratio, width wins
    FitWidth,
    /// Keep aspect ratio, height wins
    FitHeight,
    /// Fit within the box, preserving aspect ratio
    FitBox,
}

/// Calculate display dimensions based on scaling mode
///
/// # Arguments
/// * `original_width` - Image width in pixels
/// * `original_height` - Image height in pixels
/// * `target_width` - Target width in points
/// * `target_height` - Target height in points
/// * `mode` - Scaling mode
///
/// # Returns
/// (width, height) in points
pub fn calculate_scaled_dimensions(
    original_width: u32,
    original_height: u32,
    target_width: f64,
    target_height: f64,
    mode: ImageScaleMode,
) -> (f64, f64) {
    if original_width == 0 || original_height == 0 {
        return (target_width, target_height);
    }
    let (w, h) = (original_width as f64, original_height as f64);
    match mode {
        ImageScaleMode::Stretch => (target_width, target_height),
        ImageScaleMode::FitWidth => (target_width, target_width * h / w),
        ImageScaleMode::FitHeight => (target_height * w / h, target_height),
        ImageScaleMode::FitBox => {
            let scale = (target_width / w).min(target_height / h);
            (w * scale, h * scale)
        }
    }
}

/// Detect image format from magic bytes
pub fn detect_format(data: &[u8]) -> Result<ImageFormat> {
    if data.len() < 8 {
        return Err(PdfError::ImageError("Image data too short".to_string()));
    }

    if data[0..3] == [0xFF, 0xD8, 0xFF] {
        return Ok(ImageFormat::Jpeg);
    }

    if data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Ok(ImageFormat::Png);
    }

    Err(PdfError::ImageError("Unknown image format".to_string()))
}

/// Frame header fields of a JPEG
#[derive(Debug, Clone, Copy)]
struct JpegInfo {
    width: u32,
    height: u32,
    precision: u8,
    num_components: u8,
}

/// Walk the marker segments up to the first SOF
fn get_jpeg_info(data: &[u8]) -> Result<JpegInfo> {
    // SOF segment: marker (2) length (2) precision (1) height (2) width (2) components (1)
    let mut i = 2;
    while i + 9 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }

        let marker = data[i + 1];

        // SOF0..SOF15, except DHT, JPG and DAC
        if (0xC0..=0xCF).contains(&marker) && marker != 0xC4 && marker != 0xC8 && marker != 0xCC {
            return Ok(JpegInfo {
                precision: data[i + 4],
                height: u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32,
                width: u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32,
                num_components: data[i + 9],
            });
        }

        let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if length < 2 {
            break;
        }
        i += 2 + length;
    }

    Err(PdfError::ImageError("Could not parse JPEG info".to_string()))
}

/// A decoded image ready to be framed as an XObject
///
/// `data` is already filtered (DCT for JPEG, zlib for PNG). `alpha_mask`,
/// when present, is zlib-compressed 8-bit gray of `width * height` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// "DeviceRGB", "DeviceGray" or "DeviceCMYK"
    pub color_space: String,
    pub bits_per_component: u8,
    pub format: ImageFormat,
    pub data: Vec<u8>,
    pub alpha_mask: Option<Vec<u8>>,
}

impl ImageData {
    /// Decode JPEG or PNG bytes, sniffing the format
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match detect_format(data)? {
            ImageFormat::Jpeg => Self::from_jpeg(data),
            ImageFormat::Png => Self::from_png(data),
        }
    }

    /// Wrap JPEG data
    ///
    /// Only the frame header is parsed; the bytes are embedded as-is.
    pub fn from_jpeg(data: &[u8]) -> Result<Self> {
        let info = get_jpeg_info(data)?;

        let color_space = match info.num_components {
            1 => "DeviceGray",
            4 => "DeviceCMYK",
            _ => "DeviceRGB",
        };

        Ok(Self {
            width: info.width,
            height: info.height,
            color_space: color_space.to_string(),
            bits_per_component: info.precision,
            format: ImageFormat::Jpeg,
            data: data.to_vec(),
            alpha_mask: None,
        })
    }

    /// Decode PNG data
    ///
    /// Color samples are re-encoded as 8-bit gray or RGB with zlib. An alpha
    /// channel is split out into `alpha_mask` instead of being blended; a fully
    /// opaque alpha channel is dropped.
    pub fn from_png(data: &[u8]) -> Result<Self> {
        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        let decoder = reader.into_decoder()?;

        let (width, height) = decoder.dimensions();
        let color_type = decoder.color_type();
        let image = DynamicImage::from_decoder(decoder)?;

        let pixels = (width as usize) * (height as usize);
        let (raw, alpha, color_space) = match color_type {
            image::ColorType::L8 | image::ColorType::L16 => {
                (image.to_luma8().into_raw(), None, "DeviceGray")
            }
            image::ColorType::La8 | image::ColorType::La16 => {
                let la = image.to_luma_alpha8();
                let mut gray = Vec::with_capacity(pixels);
                let mut alpha = Vec::with_capacity(pixels);
                for pixel in la.pixels() {
                    gray.push(pixel[0]);
                    alpha.push(pixel[1]);
                }
                (gray, Some(alpha), "DeviceGray")
            }
            image::ColorType::Rgba8 | image::ColorType::Rgba16 | image::ColorType::Rgba32F => {
                let rgba = image.to_rgba8();
                let mut rgb = Vec::with_capacity(pixels * 3);
                let mut alpha = Vec::with_capacity(pixels);
                for pixel in rgba.pixels() {
                    rgb.extend_from_slice(&pixel.0[..3]);
                    alpha.push(pixel[3]);
                }
                (rgb, Some(alpha), "DeviceRGB")
            }
            _ => (image.to_rgb8().into_raw(), None, "DeviceRGB"),
        };

        let alpha_mask = match alpha {
            Some(alpha) if alpha.iter().any(|&a| a != u8::MAX) => Some(flate_compress(&alpha)?),
            _ => None,
        };

        Ok(Self {
            width,
            height,
            color_space: color_space.to_string(),
            bits_per_component: 8,
            format: ImageFormat::Png,
            data: flate_compress(&raw)?,
            alpha_mask,
        })
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha_mask.as_ref().is_some_and(|mask| !mask.is_empty())
    }

    /// Check the image can be framed as an XObject
    pub(crate) fn validate_frame(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PdfError::ImageError(format!(
                "image has zero size: {}x{}",
                self.width, self.height
            )));
        }
        if self.data.is_empty() {
            return Err(PdfError::ImageError("image has no data".to_string()));
        }
        Ok(())
    }
}

/// Frame an Image XObject
///
/// `smask` is the object number of the soft mask created by
/// [`smask_xobject`], if the image has one.
pub fn image_xobject(number: u32, image: &ImageData, smask: Option<u32>) -> Result<IndirectObject> {
    image.validate_frame()?;

    let mut dict = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /{} \
         /BitsPerComponent {} /Filter /{}",
        image.width,
        image.height,
        image.color_space,
        image.bits_per_component,
        image.format.filter()
    );
    if let Some(smask) = smask {
        dict.push_str(&format!(" /SMask {smask} 0 R"));
    }

    Ok(IndirectObject::new(number, stream_body(&dict, &image.data)))
}

/// Frame the soft mask of an image: 8-bit DeviceGray, FlateDecode
pub fn smask_xobject(number: u32, image: &ImageData) -> Result<IndirectObject> {
    let mask = match &image.alpha_mask {
        Some(mask) if !mask.is_empty() => mask,
        _ => {
            return Err(PdfError::ImageError(
                "image has no alpha mask".to_string(),
            ))
        }
    };

    let dict = format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray \
         /BitsPerComponent 8 /Filter /FlateDecode",
        image.width, image.height
    );
    Ok(IndirectObject::new(number, stream_body(&dict, mask)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("Failed to encode PNG");
        buf
    }

    fn minimal_jpeg() -> Vec<u8> {
        vec![
            0xFF, 0xD8, // SOI
            0xFF, 0xC0, // SOF0
            0x00, 0x11, // Length
            0x08, // Precision
            0x00, 0x64, // Height (100)
            0x00, 0xC8, // Width (200)
            0x03, // Components
            0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01, 0xFF, 0xD9, // EOI
        ]
    }

    fn body_str(obj: &IndirectObject) -> String {
        String::from_utf8_lossy(&obj.body).into_owned()
    }

    #[test]
    fn test_detect_jpeg() {
        let jpeg_header = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        assert_eq!(detect_format(&jpeg_header).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_detect_png() {
        let png_header = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect_format(&png_header).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_detect_unknown_and_short() {
        assert!(detect_format(&[0u8; 8]).is_err());
        assert!(detect_format(&[0xFF, 0xD8, 0xFF]).is_err());
    }

    #[test]
    fn test_from_jpeg() {
        let image = ImageData::from_jpeg(&minimal_jpeg()).expect("Failed to parse JPEG");
        assert_eq!(image.width, 200);
        assert_eq!(image.height, 100);
        assert_eq!(image.color_space, "DeviceRGB");
        assert_eq!(image.bits_per_component, 8);
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.data, minimal_jpeg());
        assert!(!image.has_alpha());
    }

    #[test]
    fn test_get_jpeg_info_invalid() {
        let data = vec![0xFF, 0xD8, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(get_jpeg_info(&data).is_err());
    }

    #[test]
    fn test_from_png_rgb_has_no_mask() {
        let png = encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            3,
            2,
            Rgb([10, 20, 30]),
        )));
        let image = ImageData::from_png(&png).expect("Failed to decode PNG");

        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.color_space, "DeviceRGB");
        assert_eq!(image.format, ImageFormat::Png);
        assert!(image.alpha_mask.is_none());
    }

    #[test]
    fn test_from_png_splits_alpha() {
        let png = encode_png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([255, 0, 0, 128]),
        )));
        let image = ImageData::from_bytes(&png).expect("Failed to decode PNG");

        assert_eq!(image.color_space, "DeviceRGB");
        assert!(image.has_alpha());

        let mut decoded = Vec::new();
        let mask = image.alpha_mask.as_ref().unwrap();
        std::io::Read::read_to_end(
            &mut flate2::read::ZlibDecoder::new(&mask[..]),
            &mut decoded,
        )
        .unwrap();
        assert_eq!(decoded, vec![128u8; 16]);
    }

    #[test]
    fn test_from_png_opaque_alpha_is_dropped() {
        let png = encode_png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            2,
            2,
            Rgba([0, 0, 0, 255]),
        )));
        let image = ImageData::from_png(&png).unwrap();
        assert!(image.alpha_mask.is_none());
    }

    #[test]
    fn test_image_xobject_jpeg() {
        let image = ImageData::from_jpeg(&minimal_jpeg()).unwrap();
        let obj = image_xobject(9, &image, None).unwrap();

        assert_eq!(obj.number, 9);
        let body = body_str(&obj);
        assert!(body.starts_with(
            "<< /Type /XObject /Subtype /Image /Width 200 /Height 100 /ColorSpace /DeviceRGB \
             /BitsPerComponent 8 /Filter /DCTDecode /Length 23 >>\nstream\n"
        ));
        assert!(!body.contains("/SMask"));
        assert!(body.ends_with("\nendstream"));
    }

    #[test]
    fn test_image_xobject_with_smask() {
        let png = encode_png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            2,
            2,
            Rgba([0, 255, 0, 64]),
        )));
        let image = ImageData::from_png(&png).unwrap();

        let mask = smask_xobject(11, &image).unwrap();
        let obj = image_xobject(10, &image, Some(11)).unwrap();

        assert!(body_str(&obj).contains("/Filter /FlateDecode /SMask 11 0 R /Length"));
        let mask_body = body_str(&mask);
        assert!(mask_body.contains("/ColorSpace /DeviceGray /BitsPerComponent 8 /Filter /FlateDecode"));
    }

    #[test]
    fn test_smask_requires_alpha() {
        let image = ImageData::from_jpeg(&minimal_jpeg()).unwrap();
        match smask_xobject(3, &image) {
            Err(PdfError::ImageError(msg)) => assert_eq!(msg, "image has no alpha mask"),
            other => panic!("expected ImageError, got {other:?}"),
        }
    }

    #[test]
    fn test_image_xobject_rejects_empty_image() {
        let image = ImageData {
            width: 0,
            height: 0,
            color_space: "DeviceRGB".to_string(),
            bits_per_component: 8,
            format: ImageFormat::Jpeg,
            data: vec![],
            alpha_mask: None,
        };
        assert!(image_xobject(1, &image, None).is_err());
    }

    #[test]
    fn test_calculate_scaled_dimensions() {
        assert_eq!(
            calculate_scaled_dimensions(800, 600, 100.0, 200.0, ImageScaleMode::Stretch),
            (100.0, 200.0)
        );
        assert_eq!(
            calculate_scaled_dimensions(800, 600, 100.0, 200.0, ImageScaleMode::FitWidth),
            (100.0, 75.0)
        );
        assert_eq!(
            calculate_scaled_dimensions(800, 600, 100.0, 150.0, ImageScaleMode::FitHeight),
            (200.0, 150.0)
        );
        assert_eq!(
            calculate_scaled_dimensions(600, 800, 200.0, 100.0, ImageScaleMode::FitBox),
            (75.0, 100.0)
        );
    }
}
