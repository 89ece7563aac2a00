//! Pixel engine built on the `image` crate.
//!
//! Decoding applies the EXIF orientation of the source, so every operation
//! works on the image as displayed. Output defaults to the source format
//! when it can be encoded, JPEG otherwise.
//!
//! SVG, HEIF and AVIF inputs pass media type validation but cannot be
//! decoded here; they fail with [`TransformError::Decode`].

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use serde::Serialize;

use super::{Gravity, ImageOptions, Operation, TransformEngine, TransformOutput, TransformRequest};
use crate::error::TransformError;
use crate::format::OutputFormat;

/// Default encoder quality (1-100).
pub const DEFAULT_QUALITY: u8 = 80;

/// Minimum allowed encoder quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum allowed encoder quality.
pub const MAX_QUALITY: u8 = 100;

/// Largest width or height an operation may produce.
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest accepted zoom factor.
const MAX_ZOOM_FACTOR: f32 = 16.0;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

// =============================================================================
// Image Engine
// =============================================================================

/// [`TransformEngine`] implemented with the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageEngine {}

impl ImageEngine {
    pub fn new() -> Self {
        Self {}
    }
}

impl TransformEngine for ImageEngine {
    fn version(&self) -> String {
        "image-rs 0.25".to_string()
    }

    fn run(&self, request: &TransformRequest) -> Result<TransformOutput, TransformError> {
        let options = &request.options;
        validate_encoder_options(options)?;

        let decoded = decode(&request.input)?;

        let image = match request.operation {
            Operation::Resize => resize(&decoded.image, options)?,
            Operation::Enlarge => enlarge(&decoded.image, options)?,
            Operation::Crop => crop(&decoded.image, options)?,
            Operation::Extract => extract(&decoded.image, options)?,
            Operation::Zoom => zoom(&decoded.image, options)?,
            Operation::Thumbnail => thumbnail(&decoded.image, options)?,
            Operation::Rotate => rotate(decoded.image, options)?,
            Operation::AutoRotate => decoded.image,
            Operation::Flip => decoded.image.flipv(),
            Operation::Flop => decoded.image.fliph(),
            Operation::Convert => {
                if request.output_format.is_none() {
                    return Err(TransformError::InvalidParameter(
                        "missing required param: type".to_string(),
                    ));
                }
                decoded.image
            }
            Operation::Blur => blur(&decoded.image, options)?,
            Operation::WatermarkImage => {
                let overlay = request.overlay.as_deref().ok_or_else(|| {
                    TransformError::InvalidParameter("missing required param: image".to_string())
                })?;
                watermark(decoded.image, overlay, options)?
            }
            Operation::Info => return info(&decoded),
        };

        let format = request
            .output_format
            .unwrap_or_else(|| default_output(decoded.format));
        let body = encode(&image, format, options)?;

        Ok(TransformOutput {
            body,
            mime: format.mime().to_string(),
        })
    }
}

// =============================================================================
// Decoding
// =============================================================================

struct Decoded {
    image: DynamicImage,
    format: Option<ImageFormat>,
    orientation: u8,
}

fn decode(data: &[u8]) -> Result<Decoded, TransformError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(e.to_string()))?;
    let format = reader.format();

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| TransformError::Decode(e.to_string()))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|e| TransformError::Decode(e.to_string()))?;
    image.apply_orientation(orientation);

    Ok(Decoded {
        image,
        format,
        orientation: orientation.to_exif(),
    })
}

fn default_output(format: Option<ImageFormat>) -> OutputFormat {
    match format {
        Some(ImageFormat::Png) => OutputFormat::Png,
        Some(ImageFormat::WebP) => OutputFormat::Webp,
        Some(ImageFormat::Gif) => OutputFormat::Gif,
        Some(ImageFormat::Tiff) => OutputFormat::Tiff,
        _ => OutputFormat::Jpeg,
    }
}

// =============================================================================
// Operations
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageInfo {
    width: u32,
    height: u32,
    #[serde(rename = "type")]
    media_type: String,
    has_alpha: bool,
    orientation: u8,
}

fn info(decoded: &Decoded) -> Result<TransformOutput, TransformError> {
    let (width, height) = decoded.image.dimensions();
    let media_type = decoded
        .format
        .map(|f| format!("{:?}", f).to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());

    let body = serde_json::to_vec(&ImageInfo {
        width,
        height,
        media_type,
        has_alpha: decoded.image.color().has_alpha(),
        orientation: decoded.orientation,
    })
    .map_err(|e| TransformError::Encode(e.to_string()))?;

    Ok(TransformOutput {
        body: Bytes::from(body),
        mime: "application/json".to_string(),
    })
}

fn resize(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let (width, height) = requested_size(options)?;
    match (width, height) {
        (Some(w), Some(h)) if options.force => Ok(image.resize_exact(w, h, RESIZE_FILTER)),
        (Some(w), Some(h)) => Ok(image.resize(w, h, RESIZE_FILTER)),
        _ => {
            let (w, h) = proportional_size(image.dimensions(), width, height)?;
            Ok(image.resize_exact(w, h, RESIZE_FILTER))
        }
    }
}

fn enlarge(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let (width, height) = requested_size(options)?;
    let (Some(w), Some(h)) = (width, height) else {
        return Err(TransformError::InvalidParameter(
            "missing required params: width, height".to_string(),
        ));
    };

    if options.force {
        Ok(image.resize_exact(w, h, RESIZE_FILTER))
    } else {
        fill(image, (w, h), Gravity::Centre)
    }
}

fn crop(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let (width, height) = requested_size(options)?;
    let (src_w, src_h) = image.dimensions();
    let w = width.unwrap_or(src_w);
    let h = height.unwrap_or(src_h);

    fill(image, (w, h), options.gravity)
}

/// Scale to cover the `(w, h)` box, then cut the box at the gravity anchor.
fn fill(
    image: &DynamicImage,
    (w, h): (u32, u32),
    gravity: Gravity,
) -> Result<DynamicImage, TransformError> {
    let (src_w, src_h) = image.dimensions();
    let (cw, ch) = cover_size((src_w, src_h), (w, h))?;

    let covered = if (cw, ch) != (src_w, src_h) {
        image.resize_exact(cw, ch, RESIZE_FILTER)
    } else {
        image.clone()
    };

    let (x, y) = gravity_offset(gravity, (cw, ch), (w, h));
    Ok(covered.crop_imm(x, y, w.min(cw), h.min(ch)))
}

/// Smallest size with the source aspect ratio that covers the target box.
fn cover_size(
    (src_w, src_h): (u32, u32),
    (w, h): (u32, u32),
) -> Result<(u32, u32), TransformError> {
    let scale = (w as f64 / src_w as f64).max(h as f64 / src_h as f64);
    if (scale - 1.0).abs() <= f64::EPSILON {
        return Ok((src_w, src_h));
    }

    let cw = ((src_w as f64 * scale).ceil() as u32).max(w);
    let ch = ((src_h as f64 * scale).ceil() as u32).max(h);
    Ok((check_dimension(cw)?, check_dimension(ch)?))
}

fn extract(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let (Some(area_w), Some(area_h)) = (
        options.areawidth.filter(|v| *v > 0),
        options.areaheight.filter(|v| *v > 0),
    ) else {
        return Err(TransformError::InvalidParameter(
            "missing required params: areawidth, areaheight".to_string(),
        ));
    };
    let left = options.left.unwrap_or(0);
    let top = options.top.unwrap_or(0);

    let (src_w, src_h) = image.dimensions();
    let fits_x = left.checked_add(area_w).is_some_and(|r| r <= src_w);
    let fits_y = top.checked_add(area_h).is_some_and(|b| b <= src_h);
    if !fits_x || !fits_y {
        return Err(TransformError::InvalidParameter(format!(
            "extract area {}x{}+{}+{} is outside the {}x{} image",
            area_w, area_h, left, top, src_w, src_h
        )));
    }

    Ok(image.crop_imm(left, top, area_w, area_h))
}

fn zoom(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let factor = options.factor.ok_or_else(|| {
        TransformError::InvalidParameter("missing required param: factor".to_string())
    })?;
    if !factor.is_finite() || factor <= 0.0 || factor > MAX_ZOOM_FACTOR {
        return Err(TransformError::InvalidParameter(format!(
            "factor must be in (0, {}], got {}",
            MAX_ZOOM_FACTOR, factor
        )));
    }

    let source = if options.areawidth.is_some() || options.areaheight.is_some() {
        extract(image, options)?
    } else {
        image.clone()
    };

    let (w, h) = source.dimensions();
    let zw = ((w as f32 * factor).round() as u32).max(1);
    let zh = ((h as f32 * factor).round() as u32).max(1);
    check_dimension(zw)?;
    check_dimension(zh)?;

    Ok(source.resize_exact(zw, zh, RESIZE_FILTER))
}

fn thumbnail(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let (width, height) = requested_size(options)?;
    let (w, h) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        _ => proportional_size(image.dimensions(), width, height)?,
    };
    Ok(image.thumbnail(w, h))
}

fn rotate(image: DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let angle = options.rotate.ok_or_else(|| {
        TransformError::InvalidParameter("missing required param: rotate".to_string())
    })?;

    match angle % 360 {
        0 => Ok(image),
        90 => Ok(image.rotate90()),
        180 => Ok(image.rotate180()),
        270 => Ok(image.rotate270()),
        other => Err(TransformError::InvalidParameter(format!(
            "rotate must be a multiple of 90, got {}",
            other
        ))),
    }
}

fn blur(image: &DynamicImage, options: &ImageOptions) -> Result<DynamicImage, TransformError> {
    let sigma = options.sigma.ok_or_else(|| {
        TransformError::InvalidParameter("missing required param: sigma".to_string())
    })?;
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(TransformError::InvalidParameter(format!(
            "sigma must be positive, got {}",
            sigma
        )));
    }
    Ok(image.blur(sigma))
}

fn watermark(
    image: DynamicImage,
    overlay: &[u8],
    options: &ImageOptions,
) -> Result<DynamicImage, TransformError> {
    let opacity = options.opacity.unwrap_or(1.0);
    if !(0.0..=1.0).contains(&opacity) {
        return Err(TransformError::InvalidParameter(format!(
            "opacity must be between 0 and 1, got {}",
            opacity
        )));
    }

    let mut mark = decode(overlay)?.image.to_rgba8();
    if opacity < 1.0 {
        for pixel in mark.pixels_mut() {
            pixel[3] = (pixel[3] as f32 * opacity).round() as u8;
        }
    }

    let mut base = image.to_rgba8();
    let (x, y) = match (options.left, options.top) {
        (None, None) => gravity_offset(options.gravity, base.dimensions(), mark.dimensions()),
        (left, top) => (left.unwrap_or(0), top.unwrap_or(0)),
    };
    image::imageops::overlay(&mut base, &mark, x as i64, y as i64);

    Ok(DynamicImage::ImageRgba8(base))
}

// =============================================================================
// Encoding
// =============================================================================

fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    options: &ImageOptions,
) -> Result<Bytes, TransformError> {
    let mut output = Vec::new();
    let encode_err = |e: image::ImageError| TransformError::Encode(e.to_string());

    match format {
        OutputFormat::Jpeg => {
            let quality = options.quality.unwrap_or(DEFAULT_QUALITY);
            let encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(encode_err)?;
        }
        OutputFormat::Png => {
            let compression = match options.compression.unwrap_or(6) {
                0..=3 => CompressionType::Fast,
                4..=6 => CompressionType::Default,
                _ => CompressionType::Best,
            };
            let encoder =
                PngEncoder::new_with_quality(&mut output, compression, PngFilter::Adaptive);
            to_8bit(image).write_with_encoder(encoder).map_err(encode_err)?;
        }
        OutputFormat::Webp | OutputFormat::Gif | OutputFormat::Tiff => {
            to_8bit(image)
                .write_to(&mut Cursor::new(&mut output), format.image_format())
                .map_err(encode_err)?;
        }
    }

    Ok(Bytes::from(output))
}

fn to_8bit(image: &DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate an encoder quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_QUALITY..=MAX_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}

fn validate_encoder_options(options: &ImageOptions) -> Result<(), TransformError> {
    if let Some(quality) = options.quality {
        if !is_valid_quality(quality) {
            return Err(TransformError::InvalidParameter(format!(
                "quality must be between {} and {}, got {}",
                MIN_QUALITY, MAX_QUALITY, quality
            )));
        }
    }
    if let Some(compression) = options.compression {
        if compression > 9 {
            return Err(TransformError::InvalidParameter(format!(
                "compression must be between 0 and 9, got {}",
                compression
            )));
        }
    }
    Ok(())
}

fn check_dimension(value: u32) -> Result<u32, TransformError> {
    if value > MAX_DIMENSION {
        return Err(TransformError::InvalidParameter(format!(
            "dimension {} exceeds the maximum of {}",
            value, MAX_DIMENSION
        )));
    }
    Ok(value)
}

/// Width and height from the options; zero means unset.
fn requested_size(options: &ImageOptions) -> Result<(Option<u32>, Option<u32>), TransformError> {
    let width = options.width.filter(|w| *w > 0).map(check_dimension).transpose()?;
    let height = options.height.filter(|h| *h > 0).map(check_dimension).transpose()?;

    if width.is_none() && height.is_none() {
        return Err(TransformError::InvalidParameter(
            "missing required param: width or height".to_string(),
        ));
    }
    Ok((width, height))
}

/// Complete a single requested dimension from the source aspect ratio.
fn proportional_size(
    (src_w, src_h): (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(u32, u32), TransformError> {
    let (w, h) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, ((src_h as f64 * w as f64 / src_w as f64).round() as u32).max(1)),
        (None, Some(h)) => (((src_w as f64 * h as f64 / src_h as f64).round() as u32).max(1), h),
        (None, None) => (src_w, src_h),
    };
    Ok((check_dimension(w)?, check_dimension(h)?))
}

/// Top-left corner that places `inner` inside `outer` at `gravity`.
fn gravity_offset(gravity: Gravity, outer: (u32, u32), inner: (u32, u32)) -> (u32, u32) {
    let free_x = outer.0.saturating_sub(inner.0);
    let free_y = outer.1.saturating_sub(inner.1);

    match gravity {
        Gravity::Centre => (free_x / 2, free_y / 2),
        Gravity::North => (free_x / 2, 0),
        Gravity::South => (free_x / 2, free_y),
        Gravity::East => (free_x, free_y / 2),
        Gravity::West => (0, free_y / 2),
    }
}

// =============================================================================
// Tests
// =============================================================================
