// src/engine.rs
//
// The compression unit: recompress one image file in place, keeping its
// format, and report what happened. Everything here is synchronous and
// stateless; the pool decides which thread runs it.
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA. Beyond this is likely malicious.
pub const MAX_PIXELS: u64 = 100_000_000;

mod common;
mod decoder;
mod encoder;
mod io;
mod recompress;

pub use common::run_with_panic_policy;
pub(crate) use common::panic_message;
pub use decoder::{check_dimensions, decode_jpeg, decode_webp, is_animated_webp};
pub use encoder::{carry_metadata, encode_jpeg, encode_webp, optimize_png, QualitySettings};
pub use io::{file_size, read_source, replace_atomically};
pub use recompress::{CompressionOutcome, ImageRecompressor, Recompress};
