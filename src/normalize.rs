//! Turns whatever an upstream served into the catalog's canonical square asset.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Scale to fit inside the square and pad with the background colour.
    #[default]
    Contain,
    /// Scale to fill the square and crop the overflow.
    Cover,
}

impl FromStr for FitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contain" => Ok(Self::Contain),
            "cover" => Ok(Self::Cover),
            other => Err(format!("unknown fit policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    /// Lossless; the quality setting does not apply.
    #[default]
    Webp,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    /// Edge length of the square output.
    pub size: u32,
    pub quality: u8,
    /// Sources wider than this (width / height) are screenshots or banners, not covers.
    pub max_aspect_ratio: f32,
    pub fit: FitPolicy,
    pub format: OutputFormat,
    pub background: [u8; 3],
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            size: 500,
            quality: 85,
            max_aspect_ratio: 1.8,
            fit: FitPolicy::Contain,
            format: OutputFormat::Webp,
            background: [255, 255, 255],
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedAsset {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: u8,
    pub source_width: u32,
    pub source_height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedAsset, ResolveError> {
        let cfg = &self.config;
        let decoded = decode_with_fallback(raw)
            .ok_or_else(|| ResolveError::validation("body is not a decodable image"))?;
        let (source_width, source_height) = decoded.dimensions();
        if source_width == 0 || source_height == 0 {
            return Err(ResolveError::validation("image has no pixels"));
        }
        let aspect = source_width as f32 / source_height as f32;
        if aspect > cfg.max_aspect_ratio {
            return Err(ResolveError::validation(format!(
                "aspect ratio {aspect:.2} ({source_width}x{source_height}) exceeds {:.2}",
                cfg.max_aspect_ratio
            )));
        }

        let size = cfg.size.max(1);
        let fitted = match cfg.fit {
            FitPolicy::Contain => decoded.resize(size, size, FilterType::Lanczos3),
            FitPolicy::Cover => decoded.resize_to_fill(size, size, FilterType::Lanczos3),
        };
        let flattened = flatten_onto(&fitted, size, cfg.background);
        let bytes = encode(&flattened, cfg.format, cfg.quality)?;
        debug!(
            source_width,
            source_height,
            size,
            format = %cfg.format,
            bytes = bytes.len(),
            "normalized"
        );
        Ok(NormalizedAsset {
            bytes,
            width: size,
            height: size,
            format: cfg.format,
            quality: cfg.quality,
            source_width,
            source_height,
        })
    }
}

/// Centre `image` on an opaque square canvas; transparent pixels take the background.
fn flatten_onto(image: &DynamicImage, size: u32, background: [u8; 3]) -> DynamicImage {
    let [r, g, b] = background;
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba([r, g, b, 255]));
    let (w, h) = image.dimensions();
    let x = (size.saturating_sub(w) / 2) as i64;
    let y = (size.saturating_sub(h) / 2) as i64;
    imageops::overlay(&mut canvas, &image.to_rgba8(), x, y);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>, ResolveError> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => image.write_with_encoder(JpegEncoder::new_with_quality(
            &mut buf,
            quality.clamp(1, 100),
        )),
        OutputFormat::Png => image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
        OutputFormat::Webp => image.write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
    };
    result.map_err(|e| ResolveError::validation(format!("encoding {format}: {e}")))?;
    Ok(buf)
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

/// Lenient decode for JPEGs the strict decoder refuses (truncated scans, bad markers).
fn decode_jpeg_lenient(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }
    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

fn decode_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_lenient(bytes))
}
