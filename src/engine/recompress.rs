// src/engine/recompress.rs
//
// The compression unit contract and its image implementation.

use crate::engine::decoder::{decode_jpeg, decode_webp, is_animated_webp};
use crate::engine::encoder::{carry_metadata, encode_jpeg, encode_webp, optimize_png};
use crate::engine::io::{file_size, read_source, replace_atomically};
use crate::error::{CompressError, Result};
use crate::format::{
    RecompressSettings, SourceFormat, ANIMATED_WEBP_REASON, UNSUPPORTED_FORMAT_REASON,
};
use std::borrow::Cow;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Terminal result of recompressing one path.
#[derive(Debug)]
pub enum CompressionOutcome {
    /// File replaced; `new_size` is read back from disk after the rename.
    Ok { new_size: u64 },
    /// Nothing done, file untouched. Not an error.
    Skipped { reason: Cow<'static, str> },
    /// Nothing replaced; the original bytes are still at the path.
    Failed { error: CompressError },
}

impl CompressionOutcome {
    pub fn skipped(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(error: CompressError) -> Self {
        Self::Failed { error }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// A compression unit: recompress the file at `path` in place.
///
/// Implementations run on pool worker threads and must report every
/// failure through the returned outcome. Unwinding out of `recompress` is
/// treated as a crash of the worker's execution context.
pub trait Recompress: Send + Sync + 'static {
    fn recompress(&self, path: &Path) -> CompressionOutcome;
}

impl<F> Recompress for F
where
    F: Fn(&Path) -> CompressionOutcome + Send + Sync + 'static,
{
    fn recompress(&self, path: &Path) -> CompressionOutcome {
        self(path)
    }
}

/// Recompresses JPEG, PNG and WebP files, keeping their format.
#[derive(Debug, Clone, Default)]
pub struct ImageRecompressor {
    settings: RecompressSettings,
}

impl ImageRecompressor {
    pub fn new(settings: RecompressSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RecompressSettings {
        &self.settings
    }

    /// Re-encode in-memory bytes of a known format.
    pub fn reencode(&self, format: SourceFormat, data: &[u8]) -> Result<Vec<u8>> {
        let encoded = match format {
            SourceFormat::Jpeg => {
                let img = decode_jpeg(data)?;
                encode_jpeg(&img, self.settings.jpeg_quality)?
            }
            SourceFormat::Png => {
                return optimize_png(data, self.settings.png_preset, self.settings.keep_metadata)
            }
            SourceFormat::WebP => {
                let img = decode_webp(data)?;
                encode_webp(&img, self.settings.webp_quality)?
            }
        };

        if self.settings.keep_metadata {
            carry_metadata(format, data, encoded)
        } else {
            Ok(encoded)
        }
    }

    fn recompress_file(&self, path: &Path, format: SourceFormat) -> Result<CompressionOutcome> {
        let start = Instant::now();
        let data = read_source(path)?;
        let original_size = data.len();

        if format == SourceFormat::WebP && is_animated_webp(&data) {
            debug!(path = %path.display(), "skipping animated webp");
            return Ok(CompressionOutcome::skipped(ANIMATED_WEBP_REASON));
        }

        let encoded = self.reencode(format, &data)?;
        drop(data);

        replace_atomically(path, |file| file.write_all(&encoded))?;
        let new_size = file_size(path)?;

        let file = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        info!(
            %file,
            %format,
            original_size,
            new_size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "recompressed"
        );
        Ok(CompressionOutcome::Ok { new_size })
    }
}

impl Recompress for ImageRecompressor {
    fn recompress(&self, path: &Path) -> CompressionOutcome {
        let Some(format) = SourceFormat::from_path(path) else {
            debug!(path = %path.display(), "skipping unsupported format");
            return CompressionOutcome::skipped(UNSUPPORTED_FORMAT_REASON);
        };
        self.recompress_file(path, format)
            .unwrap_or_else(CompressionOutcome::failed)
    }
}
