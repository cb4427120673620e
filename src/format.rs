// src/format.rs
//
// Source format detection and recompression settings.
// Formats are chosen by file extension only; the bytes are never sniffed to
// pick a codec, so a mislabeled file fails instead of changing type.

use std::path::Path;

/// JPEG re-encode quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// WebP re-encode quality.
pub const DEFAULT_WEBP_QUALITY: u8 = 70;

/// oxipng preset used for PNG (6 is the slowest, smallest preset).
pub const DEFAULT_PNG_PRESET: u8 = 6;

/// Highest preset oxipng accepts.
pub const MAX_PNG_PRESET: u8 = 6;

/// Reason reported for files whose extension has no codec.
pub const UNSUPPORTED_FORMAT_REASON: &str = "unsupported format";

/// Reason reported for animated WebP uploads, which are left as they are.
pub const ANIMATED_WEBP_REASON: &str = "animated webp";

/// Image formats the compression unit re-encodes in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Jpeg,
    Png,
    WebP,
}

impl SourceFormat {
    /// Map a path's extension (case-insensitive) to a format.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(SourceFormat::Jpeg),
            "png" => Some(SourceFormat::Png),
            "webp" => Some(SourceFormat::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Png => "png",
            SourceFormat::WebP => "webp",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec knobs for the compression unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecompressSettings {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// WebP quality (1-100)
    pub webp_quality: u8,
    /// oxipng preset (0-6)
    pub png_preset: u8,
    /// Carry ICC profile and EXIF over to the re-encoded file
    pub keep_metadata: bool,
}

impl Default for RecompressSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            webp_quality: DEFAULT_WEBP_QUALITY,
            png_preset: DEFAULT_PNG_PRESET,
            keep_metadata: true,
        }
    }
}
