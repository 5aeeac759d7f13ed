//! Optional resize + re-encode stage for uploads.
//!
//! Vector and animated formats are never touched. Everything else is shrunk to
//! fit the configured box (never enlarged) and re-encoded to the configured
//! format. Callers treat any error here as "store the original bytes".

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Target encoding for transcoded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Always WebP.
    #[default]
    Webp,
    /// JPEG, except PNGs with transparency which stay PNG.
    Jpeg,
    /// Same as `Jpeg`.
    Auto,
    /// Keep the source format.
    Original,
}

/// Compression settings. Adjustable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    pub enabled: bool,
    /// Encoder quality, 1-100. Applies to JPEG and WebP.
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
    pub format: OutputFormat,
    /// Also keep the untouched upload next to a transcoded file.
    pub save_original: bool,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            quality: 75,
            max_width: 1920,
            max_height: 1920,
            format: OutputFormat::Webp,
            save_original: false,
        }
    }
}

impl TranscodeSettings {
    pub fn clamp_quality(quality: i64) -> u8 {
        quality.clamp(1, 100) as u8
    }

    /// Copy of these settings with every field present in `update` replaced.
    pub fn apply(&self, update: &CompressionUpdate) -> Self {
        let mut next = self.clone();
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(quality) = update.quality {
            next.quality = Self::clamp_quality(quality);
        }
        if let Some(max_width) = update.max_width {
            next.max_width = max_width;
        }
        if let Some(max_height) = update.max_height {
            next.max_height = max_height;
        }
        if let Some(format) = update.format {
            next.format = format;
        }
        if let Some(save_original) = update.save_original {
            next.save_original = save_original;
        }
        next
    }
}

/// Partial settings change. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionUpdate {
    pub enabled: Option<bool>,
    pub quality: Option<i64>,
    #[serde(alias = "max_width")]
    pub max_width: Option<u32>,
    #[serde(alias = "max_height")]
    pub max_height: Option<u32>,
    pub format: Option<OutputFormat>,
    #[serde(alias = "save_original")]
    pub save_original: Option<bool>,
}

/// Result of a successful transcode.
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub data: Vec<u8>,
    /// Extension with leading dot matching the encoded format.
    pub extension: &'static str,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    /// Whether the image was scaled down to fit the configured box.
    pub resized: bool,
}

#[derive(Debug)]
pub enum TranscodeError {
    /// Input could not be identified as a raster format we handle.
    Unsupported(String),
    Decode(String),
    Encode(String),
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::Unsupported(msg) => write!(f, "Unsupported image: {}", msg),
            TranscodeError::Decode(msg) => write!(f, "Decode failed: {}", msg),
            TranscodeError::Encode(msg) => write!(f, "Encode failed: {}", msg),
        }
    }
}

impl std::error::Error for TranscodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Jpeg,
    Png,
    WebP,
}

/// Whether an upload of this MIME type and content may be transcoded.
pub fn should_transcode(mime_type: &str, data: &[u8]) -> bool {
    match mime_type {
        "image/svg+xml" | "image/gif" => false,
        "image/webp" => !is_animated_webp(data),
        _ => true,
    }
}

/// Checks the VP8X header for the animation flag.
pub fn is_animated_webp(data: &[u8]) -> bool {
    data.len() > 20
        && &data[0..4] == b"RIFF"
        && &data[8..12] == b"WEBP"
        && &data[12..16] == b"VP8X"
        && data[20] & 0x02 != 0
}

/// Largest size that fits in `max_width` x `max_height` keeping the aspect
/// ratio. Never upscales. A zero bound means unbounded on that axis.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let max_width = if max_width == 0 { u32::MAX } else { max_width };
    let max_height = if max_height == 0 { u32::MAX } else { max_height };

    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let ratio = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, max_width);
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, max_height);
    (new_width, new_height)
}

/// Decode `data`, shrink it to fit and re-encode per `settings`.
///
/// CPU bound; run it on the blocking pool.
pub fn transcode(data: &[u8], settings: &TranscodeSettings) -> Result<Transcoded, TranscodeError> {
    let source = image::guess_format(data).map_err(|e| TranscodeError::Unsupported(e.to_string()))?;
    let img = image::load_from_memory_with_format(data, source)
        .map_err(|e| TranscodeError::Decode(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    let (target_width, target_height) =
        fit_within(width, height, settings.max_width, settings.max_height);
    let img = if (target_width, target_height) != (width, height) {
        log::debug!(
            "Resizing {}x{} to {}x{}",
            width,
            height,
            target_width,
            target_height
        );
        img.resize_exact(target_width, target_height, FilterType::Lanczos3)
    } else {
        img
    };

    let target = match settings.format {
        OutputFormat::Webp => Target::WebP,
        OutputFormat::Jpeg | OutputFormat::Auto => {
            if source == ImageFormat::Png && img.color().has_alpha() {
                Target::Png
            } else {
                Target::Jpeg
            }
        }
        OutputFormat::Original => match source {
            ImageFormat::Jpeg => Target::Jpeg,
            ImageFormat::Png => Target::Png,
            ImageFormat::WebP => Target::WebP,
            other => {
                return Err(TranscodeError::Unsupported(format!(
                    "cannot re-encode {:?} in place",
                    other
                )))
            }
        },
    };

    let data = encode(&img, target, settings.quality)?;
    let (extension, mime_type) = match target {
        Target::Jpeg => (".jpg", "image/jpeg"),
        Target::Png => (".png", "image/png"),
        Target::WebP => (".webp", "image/webp"),
    };

    Ok(Transcoded {
        data,
        extension,
        mime_type,
        width: img.width(),
        height: img.height(),
        resized: (target_width, target_height) != (width, height),
    })
}

fn encode(img: &DynamicImage, target: Target, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let mut buf = Vec::new();
    let result = match target {
        Target::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            img.to_rgb8().write_with_encoder(encoder)
        }
        Target::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)
        }
        Target::WebP => return encode_webp(img, quality),
    };
    result.map_err(|e| TranscodeError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Lossy WebP at `quality`. libwebp only takes 8-bit RGB or RGBA input.
fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let img = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => Cow::Borrowed(img),
        other if other.color().has_alpha() => Cow::Owned(DynamicImage::ImageRgba8(other.to_rgba8())),
        other => Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
    };
    let encoder =
        webp::Encoder::from_image(&img).map_err(|e| TranscodeError::Encode(e.to_string()))?;
    Ok(encoder.encode(f32::from(quality.clamp(1, 100))).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn transparent_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_fit_within_large_landscape() {
        assert_eq!(fit_within(4000, 3000, 1920, 1920), (1920, 1440));
    }

    #[test]
    fn test_fit_within_large_portrait() {
        assert_eq!(fit_within(3000, 4000, 1920, 1920), (1440, 1920));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(800, 600, 1920, 1920), (800, 600));
        assert_eq!(fit_within(1920, 1920, 1920, 1920), (1920, 1920));
    }

    #[test]
    fn test_fit_within_extreme_ratio_keeps_one_pixel() {
        assert_eq!(fit_within(10000, 1, 100, 100), (100, 1));
    }

    #[test]
    fn test_fit_within_zero_bound_is_unbounded() {
        assert_eq!(fit_within(4000, 3000, 0, 1500), (2000, 1500));
    }

    #[test]
    fn test_should_transcode() {
        assert!(!should_transcode("image/svg+xml", b"<svg/>"));
        assert!(!should_transcode("image/gif", b"GIF89a"));
        assert!(should_transcode("image/png", b""));
        assert!(should_transcode("image/jpeg", b""));
        assert!(should_transcode("image/webp", b"RIFF\0\0\0\0WEBPVP8 "));
    }

    #[test]
    fn test_animated_webp_detected() {
        let mut header = Vec::new();
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&[0, 0, 0, 0]);
        header.extend_from_slice(b"WEBPVP8X");
        header.extend_from_slice(&[10, 0, 0, 0]);
        header.push(0x02);
        header.extend_from_slice(&[0; 9]);

        assert!(is_animated_webp(&header));
        assert!(!should_transcode("image/webp", &header));

        header[20] = 0x10;
        assert!(!is_animated_webp(&header));
    }

    #[test]
    fn test_transcode_resizes_and_converts_to_webp() {
        let settings = TranscodeSettings {
            max_width: 192,
            max_height: 192,
            ..TranscodeSettings::default()
        };
        let out = transcode(&png_bytes(400, 300), &settings).unwrap();

        assert_eq!(out.extension, ".webp");
        assert_eq!(out.mime_type, "image/webp");
        assert_eq!((out.width, out.height), (192, 144));
        assert!(out.resized);

        let decoded = image::load_from_memory(&out.data).unwrap();
        assert_eq!(decoded.dimensions(), (192, 144));
        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::WebP);
    }

    /// Photo-like content: smooth gradients plus per-pixel grain.
    fn photo_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let grain = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729)).wrapping_mul(2_654_435_761) >> 27;
            Rgb([
                ((x * 255 / width) as u8).saturating_add(grain as u8),
                ((y * 255 / height) as u8).saturating_add(grain as u8),
                (((x + y) % 256) as u8).saturating_sub(grain as u8),
            ])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_webp_quality_controls_size() {
        let photo = photo_jpeg_bytes(640, 480);
        let low = TranscodeSettings {
            quality: 20,
            ..TranscodeSettings::default()
        };
        let high = TranscodeSettings {
            quality: 95,
            ..TranscodeSettings::default()
        };

        let small = transcode(&photo, &low).unwrap();
        let large = transcode(&photo, &high).unwrap();

        assert_eq!(image::guess_format(&small.data).unwrap(), ImageFormat::WebP);
        assert!(!small.resized);
        assert!(small.data.len() < large.data.len());
    }

    #[test]
    fn test_webp_photo_is_smaller_than_jpeg_source() {
        let photo = photo_jpeg_bytes(640, 480);
        let out = transcode(&photo, &TranscodeSettings::default()).unwrap();

        assert!(out.data.len() < photo.len());
    }

    #[test]
    fn test_transcode_jpeg_keeps_transparent_png() {
        let settings = TranscodeSettings {
            format: OutputFormat::Jpeg,
            ..TranscodeSettings::default()
        };

        let opaque = transcode(&png_bytes(32, 32), &settings).unwrap();
        assert_eq!(opaque.extension, ".jpg");
        assert_eq!(image::guess_format(&opaque.data).unwrap(), ImageFormat::Jpeg);

        let transparent = transcode(&transparent_png_bytes(32, 32), &settings).unwrap();
        assert_eq!(transparent.extension, ".png");
    }

    #[test]
    fn test_transcode_original_keeps_format() {
        let settings = TranscodeSettings {
            format: OutputFormat::Original,
            ..TranscodeSettings::default()
        };
        let out = transcode(&png_bytes(16, 16), &settings).unwrap();
        assert_eq!(out.extension, ".png");
        assert_eq!(out.mime_type, "image/png");
    }

    #[test]
    fn test_transcode_rejects_garbage() {
        let err = transcode(b"definitely not an image", &TranscodeSettings::default());
        assert!(matches!(err, Err(TranscodeError::Unsupported(_))));
    }

    #[test]
    fn test_apply_partial_update() {
        let update: CompressionUpdate =
            serde_json::from_str(r#"{"quality": 500, "maxWidth": 800, "format": "jpeg"}"#).unwrap();
        let next = TranscodeSettings::default().apply(&update);

        assert_eq!(next.quality, 100);
        assert_eq!(next.max_width, 800);
        assert_eq!(next.max_height, 1920);
        assert_eq!(next.format, OutputFormat::Jpeg);
        assert!(next.enabled);
    }

    #[test]
    fn test_quality_clamp() {
        assert_eq!(TranscodeSettings::clamp_quality(0), 1);
        assert_eq!(TranscodeSettings::clamp_quality(250), 100);
        assert_eq!(TranscodeSettings::clamp_quality(80), 80);
    }
}
