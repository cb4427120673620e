// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), WebP (libwebp). PNG is never decoded;
// oxipng works on the encoded stream directly.

use crate::engine::common::run_with_panic_policy;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::CompressError;
use image::{DynamicImage, RgbImage};
use mozjpeg::Decompress;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};

type DecoderResult<T> = std::result::Result<T, CompressError>;

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo).
///
/// Output is always RGB8; CMYK and other colour spaces libjpeg-turbo cannot
/// convert fail here and the file is left as it was.
pub fn decode_jpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:jpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(CompressError::decode_failed(
                "jpeg: missing EOI marker (truncated upload?)",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            CompressError::decode_failed(format!("jpeg: decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            CompressError::decode_failed(format!("jpeg: rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(CompressError::dimension_exceeds_limit(
                width.max(height).min(u32::MAX as usize) as u32,
                MAX_DIMENSION,
            ));
        }
        let width_u32 = width as u32;
        let height_u32 = height as u32;
        check_dimensions(width_u32, height_u32)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            CompressError::decode_failed(format!("jpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        let rgb_image =
            RgbImage::from_raw(width_u32, height_u32, flat_pixels).ok_or_else(|| {
                CompressError::decode_failed("jpeg: scanline count does not match header")
            })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// Whether `data` is an animated WebP container.
pub fn is_animated_webp(data: &[u8]) -> bool {
    BitstreamFeatures::new(data).is_some_and(|features| features.has_animation())
}

/// Decode a still WebP using libwebp. Animated files are refused, since
/// re-encoding one frame would drop the rest.
pub fn decode_webp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            CompressError::decode_failed("webp: failed to read bitstream features")
        })?;

        let width = features.width();
        let height = features.height();
        check_dimensions(width, height)?;

        if features.has_animation() {
            return Err(CompressError::decode_failed(
                "webp: animated images cannot be re-encoded frame by frame",
            ));
        }

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| CompressError::decode_failed("webp: decode failed"))?;

        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(CompressError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(CompressError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}
