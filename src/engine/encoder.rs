// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (oxipng), WebP (libwebp), plus
// ICC/EXIF carry-over from the source container to the re-encoded one.

use crate::engine::common::run_with_panic_policy;
use crate::engine::MAX_DIMENSION;
use crate::error::CompressError;
use crate::format::{SourceFormat, MAX_PNG_PRESET};
use image::DynamicImage;
use img_parts::jpeg::Jpeg;
use img_parts::webp::WebP;
use img_parts::{Bytes, ImageEXIF, ImageICC};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;

type EncoderResult<T> = std::result::Result<T, CompressError>;

/// Derives per-codec tuning from a single 0-100 quality value.
/// Bands are fixed:
/// - High (>=85): visual quality first
/// - Balanced (70-84): the gallery default lands here
/// - Fast (50-69) / Fastest (<50): size first
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100) as f32,
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    pub fn jpeg_smoothing(&self) -> u8 {
        match self.band() {
            QualityBand::High => 0,
            QualityBand::Balanced => 5,
            QualityBand::Fast => 10,
            QualityBand::Fastest => 18,
        }
    }

    // Background job: spend the time on a better method than the request path would.
    pub fn webp_method(&self) -> i32 {
        6
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            QualityBand::Balanced | QualityBand::Fast | QualityBand::Fastest => 0,
        }
    }
}

/// Encode to JPEG using mozjpeg: progressive, optimized Huffman tables,
/// 4:2:0 chroma.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let settings = QualitySettings::new(quality);

        // Zero-copy when the decoder already produced RGB8 (the mozjpeg path always does)
        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(CompressError::encode_failed(
                "jpeg",
                "width or height is zero",
            ));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(CompressError::dimension_exceeds_limit(
                w.max(h),
                MAX_DIMENSION,
            ));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                CompressError::encode_failed("jpeg", format!("failed to start compress: {e:?}"))
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    CompressError::encode_failed(
                        "jpeg",
                        format!("failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                CompressError::encode_failed("jpeg", format!("failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Losslessly recompress an encoded PNG with oxipng.
///
/// The PNG is never decoded to pixels here, so the image is bit-identical
/// after recompression; only the deflate stream and filters change.
pub fn optimize_png(data: &[u8], preset: u8, keep_metadata: bool) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut options = oxipng::Options::from_preset(preset.min(MAX_PNG_PRESET));
        options.strip = if keep_metadata {
            oxipng::StripChunks::None
        } else {
            oxipng::StripChunks::Safe
        };

        oxipng::optimize_from_memory(data, &options)
            .map_err(|e| CompressError::encode_failed("png", format!("oxipng: {e}")))
    })
}

/// Encode to WebP (lossy). Alpha is kept only when the source has it.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = (img.width(), img.height());
        if w == 0 || h == 0 {
            return Err(CompressError::encode_failed(
                "webp",
                "width or height is zero",
            ));
        }

        let rgba;
        let rgb;
        let encoder = if img.color().has_alpha() {
            rgba = img.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), w, h)
        } else {
            rgb = match img {
                DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
                _ => Cow::Owned(img.to_rgb8()),
            };
            webp::Encoder::from_rgb(rgb.as_raw(), w, h)
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| CompressError::encode_failed("webp", "failed to create WebPConfig"))?;

        let settings = QualitySettings::new(quality);
        config.quality = settings.quality();
        config.method = settings.webp_method();
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let mem = encoder
            .encode_advanced(&config)
            .map_err(|e| CompressError::encode_failed("webp", format!("{e:?}")))?;

        Ok(mem.to_vec())
    })
}

/// Copy the ICC profile and EXIF block of `source` into `encoded`.
///
/// Only JPEG and WebP need this; oxipng keeps PNG chunks itself. When the
/// source has neither (or cannot be parsed as a container) the encoded
/// bytes are returned untouched.
pub fn carry_metadata(
    format: SourceFormat,
    source: &[u8],
    encoded: Vec<u8>,
) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:metadata", || match format {
        SourceFormat::Jpeg => {
            let Ok(src) = Jpeg::from_bytes(Bytes::copy_from_slice(source)) else {
                return Ok(encoded);
            };
            let (icc, exif) = (src.icc_profile(), src.exif());
            if icc.is_none() && exif.is_none() {
                return Ok(encoded);
            }

            let mut out = Jpeg::from_bytes(Bytes::from(encoded)).map_err(|e| {
                CompressError::encode_failed("jpeg", format!("re-parse for metadata: {e}"))
            })?;
            out.set_icc_profile(icc);
            out.set_exif(exif);

            let mut output = Vec::new();
            out.encoder().write_to(&mut output).map_err(|e| {
                CompressError::encode_failed("jpeg", format!("write with metadata: {e}"))
            })?;
            Ok(output)
        }
        SourceFormat::WebP => {
            let Ok(src) = WebP::from_bytes(Bytes::copy_from_slice(source)) else {
                return Ok(encoded);
            };
            let (icc, exif) = (src.icc_profile(), src.exif());
            if icc.is_none() && exif.is_none() {
                return Ok(encoded);
            }

            let mut out = WebP::from_bytes(Bytes::from(encoded)).map_err(|e| {
                CompressError::encode_failed("webp", format!("re-parse for metadata: {e}"))
            })?;
            out.set_icc_profile(icc);
            out.set_exif(exif);

            let mut output = Vec::new();
            out.encoder().write_to(&mut output).map_err(|e| {
                CompressError::encode_failed("webp", format!("write with metadata: {e}"))
            })?;
            Ok(output)
        }
        SourceFormat::Png => Ok(encoded),
    })
}
