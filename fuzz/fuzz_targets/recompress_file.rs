#![no_main]

use arbitrary::Arbitrary;
use gallery_compressor::{CompressionOutcome, ImageRecompressor, Recompress};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Extension {
    Jpg,
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl Extension {
    fn as_str(&self) -> &'static str {
        match self {
            Extension::Jpg => "jpg",
            Extension::Jpeg => "JPEG",
            Extension::Png => "png",
            Extension::Webp => "webp",
            Extension::Gif => "gif",
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    extension: Extension,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let path = dir.path().join(format!("upload.{}", input.extension.as_str()));
    if std::fs::write(&path, &input.bytes).is_err() {
        return;
    }

    // must never panic; on failure the original bytes must still be there
    match ImageRecompressor::default().recompress(&path) {
        CompressionOutcome::Ok { new_size } => {
            let on_disk = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            assert_eq!(new_size, on_disk);
        }
        CompressionOutcome::Skipped { .. } | CompressionOutcome::Failed { .. } => {
            assert_eq!(std::fs::read(&path).ok().as_deref(), Some(&input.bytes[..]));
        }
    }
});
