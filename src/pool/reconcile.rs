// src/pool/reconcile.rs
//
// Metadata reconciliation: after a file has been replaced on disk, write its
// new size to the record that describes it.
//
// Records are keyed by canonical storage path ("/users/alice/images-1.jpg"),
// the form the upload handler stored when it created the record. The update
// is apply-by-path and last-write-wins, so retrying it is safe.

use crate::engine::panic_message;
use crate::error::{CompressError, ReconcileError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Log target for file/metadata divergence.
///
/// A record under this target means the file on disk was recompressed but
/// its stored size is stale. Route it to an alerting sink.
pub const DIVERGENCE_TARGET: &str = "gallery_compressor::divergence";

const DEFAULT_STORAGE_DIR: &str = "users";
const DEFAULT_URL_PREFIX: &str = "/users";

/// Persistent metadata the pool writes back into.
///
/// Called on the pool's coordinator thread before the job's handle
/// resolves, so implementations should return quickly. A panic inside
/// `update_stored_size` is reported as a failed write for that one job.
pub trait MetadataStore: Send + Sync + 'static {
    fn update_stored_size(
        &self,
        canonical_path: &str,
        new_size: u64,
    ) -> std::result::Result<(), ReconcileError>;
}

impl<F> MetadataStore for F
where
    F: Fn(&str, u64) -> std::result::Result<(), ReconcileError> + Send + Sync + 'static,
{
    fn update_stored_size(
        &self,
        canonical_path: &str,
        new_size: u64,
    ) -> std::result::Result<(), ReconcileError> {
        self(canonical_path, new_size)
    }
}

/// Where uploads live on disk and how their records refer to them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    url_prefix: String,
}

impl Default for StorageLayout {
    /// `./users` under the working directory, served as `/users`.
    fn default() -> Self {
        let root = std::env::current_dir()
            .map(|cwd| cwd.join(DEFAULT_STORAGE_DIR))
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR));
        Self::new(root, DEFAULT_URL_PREFIX)
    }
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into();
        let trimmed = url_prefix.trim_end_matches('/');
        let url_prefix = if trimmed.starts_with('/') || trimmed.is_empty() {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Canonical record key for a file under the storage root.
    ///
    /// `{root}/alice/images-1.jpg` maps to `{url_prefix}/alice/images-1.jpg`
    /// with `/` separators on every platform. Paths that are not strictly
    /// below the root, or that climb out of it with `..`, are rejected.
    pub fn canonical_path(&self, path: &Path) -> Result<String> {
        let outside = || CompressError::outside_storage_root(path, &self.root);
        let relative = path.strip_prefix(&self.root).map_err(|_| outside())?;

        let mut canonical = self.url_prefix.clone();
        let mut segments = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    canonical.push('/');
                    canonical.push_str(&segment.to_string_lossy());
                    segments += 1;
                }
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        if segments == 0 {
            return Err(outside());
        }
        Ok(canonical)
    }
}

/// Writes a recompressed file's size back to its record.
pub(crate) struct Reconciler {
    layout: StorageLayout,
    store: Arc<dyn MetadataStore>,
}

impl Reconciler {
    pub(crate) fn new(layout: StorageLayout, store: Arc<dyn MetadataStore>) -> Self {
        Self { layout, store }
    }

    /// Update the stored size for `path`. Failures are logged as divergence
    /// and returned; the file itself is not rolled back.
    pub(crate) fn reconcile(&self, path: &Path, new_size: u64) -> Result<()> {
        let canonical = self.layout.canonical_path(path).map_err(|err| {
            warn!(
                target: DIVERGENCE_TARGET,
                path = %path.display(),
                new_size,
                error = %err,
                "recompressed file has no canonical record path"
            );
            err
        })?;

        let written = catch_unwind(AssertUnwindSafe(|| {
            self.store.update_stored_size(&canonical, new_size)
        }))
        .unwrap_or_else(|payload| {
            Err(format!("metadata store panicked: {}", panic_message(payload.as_ref())).into())
        });

        match written {
            Ok(()) => {
                debug!(record = %canonical, new_size, "stored size updated");
                Ok(())
            }
            Err(source) => {
                warn!(
                    target: DIVERGENCE_TARGET,
                    path = %path.display(),
                    record = %canonical,
                    new_size,
                    error = %source,
                    "file recompressed but stored size not updated"
                );
                Err(CompressError::metadata_write_failed(path, source))
            }
        }
    }
}

/// Thread-safe in-memory record store keyed by canonical path.
///
/// Updating a record that was never inserted is an error, the same way a
/// database update matching no document is.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    records: Mutex<HashMap<String, u64>>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a record, as the upload handler does.
    pub fn insert(&self, canonical_path: impl Into<String>, size: u64) {
        self.records.lock().insert(canonical_path.into(), size);
    }

    pub fn get(&self, canonical_path: &str) -> Option<u64> {
        self.records.lock().get(canonical_path).copied()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl MetadataStore for InMemoryMetadata {
    fn update_stored_size(
        &self,
        canonical_path: &str,
        new_size: u64,
    ) -> std::result::Result<(), ReconcileError> {
        match self.records.lock().get_mut(canonical_path) {
            Some(size) => {
                *size = new_size;
                Ok(())
            }
            None => Err(format!("no image record for '{canonical_path}'").into()),
        }
    }
}
