// src/engine/io.rs
//
// File I/O for the compression unit: read the source, replace it atomically.

use crate::error::{CompressError, Result};
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

/// Read the whole source file.
pub fn read_source(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => CompressError::file_not_found(path),
        _ => CompressError::file_read_failed(path, e),
    })
}

/// Size of the file currently at `path`, as the filesystem reports it.
pub fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| CompressError::file_read_failed(path, e))
}

/// Replace the file at `path` with whatever `write` produces.
///
/// `write` fills a temporary sibling file (same directory, so the final
/// rename never crosses filesystems). The temp file is synced, then renamed
/// over `path`. The replacement takes over the permissions of the file it
/// replaces. If `write` fails or unwinds, the temp file is deleted on drop
/// and `path` keeps its original bytes.
pub fn replace_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = match path.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => ".recompress.".to_string(),
    };

    let mut temp_file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| CompressError::file_write_failed(dir, e))?;

    // tempfile creates 0600; an in-place replacement keeps the upload's mode
    match std::fs::metadata(path) {
        Ok(existing) => temp_file
            .as_file()
            .set_permissions(existing.permissions())
            .map_err(|e| CompressError::file_write_failed(temp_file.path(), e))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(CompressError::file_read_failed(path, e)),
    }

    write(temp_file.as_file_mut())
        .map_err(|e| CompressError::file_write_failed(temp_file.path(), e))?;

    temp_file
        .as_file_mut()
        .sync_all()
        .map_err(|e| CompressError::file_write_failed(temp_file.path(), e))?;

    // tempfile removes the temp file itself if the rename fails
    temp_file
        .persist(path)
        .map_err(|e| CompressError::file_write_failed(path, e.error))?;

    Ok(())
}
