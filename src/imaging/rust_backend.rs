//! Pure Rust image backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG) | `image::load_from_memory_with_format` |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder::new_lossless` |
//! | Recompress PNG | `PngEncoder` with `CompressionType::Best`, adaptive filtering |
//! | Recompress JPEG | `JpegEncoder::new_with_quality` |
//! | Minify SVG | [`minify_svg`], regex passes over the markup |
//! | WebP | passed through unchanged |

use super::backend::{BackendError, ImageBackend};
use super::params::{CompressParams, ImageKind};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use std::sync::LazyLock;

static SVG_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static SVG_PROLOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\?xml.*?\?>|<!DOCTYPE[^>\[]*(\[[^\]]*\])?\s*>").expect("valid regex")
});
static SVG_BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

/// Pure Rust backend using the `image` crate encoders.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(source: &[u8]) -> Result<DynamicImage, BackendError> {
    image::load_from_memory(source)
        .map_err(|e| BackendError::ProcessingFailed(format!("Failed to decode image: {e}")))
}

fn decode_as(source: &[u8], format: ImageFormat) -> Result<DynamicImage, BackendError> {
    image::load_from_memory_with_format(source, format).map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to decode {format:?}: {e}"))
    })
}

fn encode_failed(format: &'static str) -> impl FnOnce(image::ImageError) -> BackendError {
    move |e| BackendError::ProcessingFailed(format!("Failed to encode {format}: {e}"))
}

/// Drop everything from SVG markup that does not affect rendering: comments,
/// the XML declaration, the doctype and whitespace-only runs between tags.
pub fn minify_svg(svg: &str) -> String {
    let svg = SVG_COMMENT.replace_all(svg, "");
    let svg = SVG_PROLOG.replace_all(&svg, "");
    let svg = SVG_BETWEEN_TAGS.replace_all(&svg, "><");
    svg.trim().to_string()
}

impl ImageBackend for RustBackend {
    fn to_webp(&self, source: &[u8]) -> Result<Vec<u8>, BackendError> {
        let img = decode(source)?;
        // The lossless encoder takes 8-bit RGB(A) only.
        let img = if img.color().has_alpha() {
            DynamicImage::ImageRgba8(img.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
        };
        let mut out = Vec::new();
        img.write_with_encoder(WebPEncoder::new_lossless(&mut out))
            .map_err(encode_failed("WebP"))?;
        Ok(out)
    }

    fn compress(
        &self,
        kind: ImageKind,
        source: &[u8],
        params: &CompressParams,
    ) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::new();
        match kind {
            ImageKind::Png => {
                let img = decode_as(source, ImageFormat::Png)?;
                let encoder = PngEncoder::new_with_quality(
                    &mut out,
                    CompressionType::Best,
                    FilterType::Adaptive,
                );
                img.write_with_encoder(encoder)
                    .map_err(encode_failed("PNG"))?;
            }
            ImageKind::Jpeg => {
                let img = decode_as(source, ImageFormat::Jpeg)?;
                let img = DynamicImage::ImageRgb8(img.to_rgb8());
                let quality = params.jpeg_quality.value() as u8;
                img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
                    .map_err(encode_failed("JPEG"))?;
            }
            ImageKind::Svg => {
                let text = std::str::from_utf8(source).map_err(|e| {
                    BackendError::ProcessingFailed(format!("SVG is not UTF-8: {e}"))
                })?;
                out = minify_svg(text).into_bytes();
            }
            ImageKind::WebP => out.extend_from_slice(source),
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Quality;
    use crate::test_helpers::sample_image;

    #[test]
    fn webp_conversion_produces_riff_container() {
        let png = sample_image(32, 24, ImageFormat::Png);
        let webp = RustBackend::new().to_webp(&png).unwrap();
        assert_eq!(&webp[0..4], b"RIFF");
        assert_eq!(&webp[8..12], b"WEBP");

        let decoded = image::load_from_memory_with_format(&webp, ImageFormat::WebP).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn webp_conversion_of_jpeg() {
        let jpeg = sample_image(40, 40, ImageFormat::Jpeg);
        let webp = RustBackend::new().to_webp(&jpeg).unwrap();
        assert_eq!(&webp[8..12], b"WEBP");
    }

    #[test]
    fn webp_conversion_rejects_garbage() {
        let result = RustBackend::new().to_webp(b"not an image");
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
    }

    #[test]
    fn png_recompression_keeps_pixels() {
        let png = sample_image(50, 30, ImageFormat::Png);
        let out = RustBackend::new()
            .compress(ImageKind::Png, &png, &CompressParams::default())
            .unwrap();
        let before = image::load_from_memory(&png).unwrap().to_rgb8();
        let after = image::load_from_memory(&out).unwrap().to_rgb8();
        assert_eq!(before, after);
    }

    #[test]
    fn jpeg_recompression_decodes_at_same_size() {
        let jpeg = sample_image(64, 48, ImageFormat::Jpeg);
        let params = CompressParams {
            jpeg_quality: Quality::new(40),
        };
        let out = RustBackend::new()
            .compress(ImageKind::Jpeg, &jpeg, &params)
            .unwrap();
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn jpeg_with_png_bytes_is_an_error() {
        let png = sample_image(8, 8, ImageFormat::Png);
        let result = RustBackend::new().compress(ImageKind::Jpeg, &png, &CompressParams::default());
        assert!(result.is_err());
    }

    #[test]
    fn webp_is_passed_through() {
        let bytes = b"RIFF\0\0\0\0WEBPdata";
        let out = RustBackend::new()
            .compress(ImageKind::WebP, bytes, &CompressParams::default())
            .unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn svg_minifier_strips_non_rendering_markup() {
        let svg = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
            <!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd\">\n\
            <!-- Generator: hand -->\n\
            <svg xmlns=\"http://www.w3.org/2000/svg\">\n  <g>\n    <text>two words</text>\n  </g>\n</svg>\n";
        assert_eq!(
            minify_svg(svg),
            "<svg xmlns=\"http://www.w3.org/2000/svg\"><g><text>two words</text></g></svg>"
        );
    }

    #[test]
    fn svg_must_be_utf8() {
        let result =
            RustBackend::new().compress(ImageKind::Svg, &[0xff, 0xfe, 0x00], &CompressParams::default());
        assert!(result.is_err());
    }
}
