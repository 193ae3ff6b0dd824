//! Raster decoding, resizing, and metadata inspection
//!
//! Turns fetched bytes into per-size JPEG outputs:
//! - Fit policies: cover, contain, fill, inside, outside; an unrecognized
//!   policy string degrades to cover instead of failing a batch
//! - Output is always JPEG at fixed quality, composited onto opaque white
//!   (downstream ad surfaces do not support transparency)
//! - [`metadata`] inspects dimensions/format without re-encoding
//! - [`process_for_sizes`] keeps per-size failures scoped to their own
//!   output record; a batch never aborts early

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed JPEG quality for all encoded outputs.
pub const JPEG_QUALITY: u8 = 80;

/// Maximum accepted target dimension. Prevents CPU/memory exhaustion from
/// a hostile or typoed size preset.
pub const MAX_TARGET_DIMENSION: u32 = 10_000;

/// Errors from decoding or resizing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResizeError {
    /// Bytes are not a valid raster image, or the resize/encode step
    /// failed for a specific target.
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("unsupported or undetected image format")]
    UnsupportedFormat,

    #[error("invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Cropping/scaling strategy when source and target aspect ratios differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Fill the target, cropping overflow. Never distorts.
    #[default]
    Cover,
    /// Fit within the target, letterboxing onto white to exact dimensions.
    Contain,
    /// Stretch to exact dimensions, ignoring aspect ratio.
    Fill,
    /// Fit within the target without padding; output may be smaller.
    Inside,
    /// Scale so both dimensions meet or exceed the target, no cropping.
    Outside,
}

impl FitPolicy {
    /// Parse a caller-supplied policy name. Unrecognized values fall back
    /// to `Cover` so a bad preset degrades gracefully instead of blocking
    /// a batch.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "contain" => Self::Contain,
            "fill" => Self::Fill,
            "inside" => Self::Inside,
            "outside" => Self::Outside,
            _ => Self::Cover,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Contain => "contain",
            Self::Fill => "fill",
            Self::Inside => "inside",
            Self::Outside => "outside",
        }
    }
}

/// A named output specification, caller-owned.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetSize {
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub aspect_ratio: String,
}

/// One output record of a batch resize.
///
/// On a per-size failure `error` is set and `data` is empty; the rest of
/// the batch is unaffected.
#[derive(Debug, Clone, Serialize)]
pub struct ResizedImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
    /// Encoded JPEG bytes; base64 on the serde boundary.
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
    pub byte_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only inspection result; never re-encodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub size: u64,
    pub aspect_ratio: f64,
}

fn serialize_base64<S: serde::Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// Decode bytes and produce one resized JPEG.
pub fn resize(bytes: &[u8], width: u32, height: u32, fit: FitPolicy) -> Result<Vec<u8>, ResizeError> {
    let img = decode(bytes)?;
    resize_decoded(&img, width, height, fit)
}

/// Inspect intrinsic dimensions and format without a full decode.
pub fn metadata(bytes: &[u8]) -> Result<ImageMetadata, ResizeError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ResizeError::Decode(e.to_string()))?;

    let format = reader.format().ok_or(ResizeError::UnsupportedFormat)?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ResizeError::Decode(e.to_string()))?;

    Ok(ImageMetadata {
        width,
        height,
        format: format!("{format:?}").to_lowercase(),
        size: bytes.len() as u64,
        aspect_ratio: f64::from(width) / f64::from(height),
    })
}

/// Resize the same source for every requested size, in input order.
///
/// Returns exactly one record per input size. A decode failure tags every
/// record; a per-size failure tags only its own record.
pub fn process_for_sizes(bytes: &[u8], sizes: &[TargetSize], fit: FitPolicy) -> Vec<ResizedImage> {
    let decoded = decode(bytes);

    sizes
        .iter()
        .map(|size| {
            let result = match &decoded {
                Ok(img) => resize_decoded(img, size.width, size.height, fit),
                Err(err) => Err(err.clone()),
            };

            match result {
                Ok(data) => ResizedImage {
                    name: size.name.clone(),
                    width: size.width,
                    height: size.height,
                    aspect_ratio: size.aspect_ratio.clone(),
                    byte_size: data.len() as u64,
                    data,
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(
                        target: "resize",
                        name = %size.name,
                        width = size.width,
                        height = size.height,
                        error = %err,
                        "target size failed"
                    );
                    ResizedImage {
                        name: size.name.clone(),
                        width: size.width,
                        height: size.height,
                        aspect_ratio: size.aspect_ratio.clone(),
                        data: Vec::new(),
                        byte_size: 0,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect()
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, ResizeError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ResizeError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| ResizeError::Decode(e.to_string()))
}

fn resize_decoded(
    img: &DynamicImage,
    width: u32,
    height: u32,
    fit: FitPolicy,
) -> Result<Vec<u8>, ResizeError> {
    if width == 0 || height == 0 || width > MAX_TARGET_DIMENSION || height > MAX_TARGET_DIMENSION {
        return Err(ResizeError::InvalidDimensions { width, height });
    }

    let resized = match fit {
        FitPolicy::Cover => img.resize_to_fill(width, height, FilterType::Lanczos3),
        FitPolicy::Fill => img.resize_exact(width, height, FilterType::Lanczos3),
        FitPolicy::Contain | FitPolicy::Inside => img.resize(width, height, FilterType::Lanczos3),
        FitPolicy::Outside => {
            // Uniform scale so both dimensions meet or exceed the target.
            let scale = f64::max(
                f64::from(width) / f64::from(img.width()),
                f64::from(height) / f64::from(img.height()),
            );
            let out_w = (f64::from(img.width()) * scale).round().max(1.0) as u32;
            let out_h = (f64::from(img.height()) * scale).round().max(1.0) as u32;
            img.resize_exact(out_w, out_h, FilterType::Lanczos3)
        }
    };

    // Contain letterboxes up to the exact target; the rest keep the
    // resized dimensions.
    let (canvas_w, canvas_h) = match fit {
        FitPolicy::Contain => (width, height),
        _ => (resized.width(), resized.height()),
    };

    let flattened = composite_on_white(&resized, canvas_w, canvas_h);
    encode_jpeg(&flattened)
}

/// Center the image on an opaque white canvas and drop alpha.
fn composite_on_white(img: &DynamicImage, canvas_w: u32, canvas_h: u32) -> RgbImage {
    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([255, 255, 255, 255]));
    let x = i64::from(canvas_w.saturating_sub(img.width()) / 2);
    let y = i64::from(canvas_h.saturating_sub(img.height()) / 2);
    imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>, ResizeError> {
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .map_err(|e| ResizeError::Decode(format!("encode failed: {e}")))?;
    Ok(out.into_inner())
}
