// src/error.rs
//
// Unified error handling for gallery-compressor
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - Codec: re-encoding failed, original file untouched
// - Io: reading the source or writing the replacement failed
// - WorkerCrash: the execution context died mid-job
// - Metadata: file recompressed, stored size not updated
// - Timeout: job exceeded its allotted time, worker recycled
// - Rejected: job never admitted (queue full, pool shut down)
// - Config: invalid pool configuration

use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

/// Error returned by a [`crate::pool::MetadataStore`] implementation.
pub type ReconcileError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error taxonomy for job outcomes.
///
/// Callers that only need to decide between "log and move on" and
/// "resubmit later" can match on the category instead of every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Corrupt input, unsupported colour space, encoder failure
    Codec,
    /// Filesystem errors around the source or its replacement
    Io,
    /// The worker's execution context died
    WorkerCrash,
    /// File and stored metadata diverged
    Metadata,
    /// Per-job deadline exceeded
    Timeout,
    /// Job was not admitted to the pool
    Rejected,
    /// Invalid configuration
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Codec => "codec",
            ErrorCategory::Io => "io",
            ErrorCategory::WorkerCrash => "worker_crash",
            ErrorCategory::Metadata => "metadata",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::Config => "config",
        }
    }
}

/// gallery-compressor error types
#[derive(Debug, Error)]
pub enum CompressError {
    // File I/O Errors
    #[error("File not found: {path}")]
    FileNotFound { path: Cow<'static, str> },

    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Codec Errors
    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Codec panicked during {stage}: {message}")]
    InternalPanic {
        stage: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Worker Errors
    #[error("Worker {worker} crashed while processing '{path}': {message}")]
    WorkerCrashed {
        worker: usize,
        path: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Failed to spawn {context} thread: {source}")]
    SpawnFailed {
        context: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Job for '{path}' timed out after {timeout_ms}ms on worker {worker}")]
    JobTimedOut {
        worker: usize,
        path: Cow<'static, str>,
        timeout_ms: u64,
    },

    // Metadata Errors
    #[error("Recompressed '{path}' but failed to update stored size: {source}")]
    MetadataWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: ReconcileError,
    },

    #[error("Path '{path}' is outside storage root '{root}'")]
    OutsideStorageRoot {
        path: Cow<'static, str>,
        root: Cow<'static, str>,
    },

    // Admission Errors
    #[error("Job queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("Compression pool is shut down")]
    PoolShutDown,

    // Configuration Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidConfig {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },
}

fn display_path(path: &Path) -> Cow<'static, str> {
    Cow::Owned(path.to_string_lossy().into_owned())
}

// Constructor Helpers
impl CompressError {
    pub fn file_not_found(path: &Path) -> Self {
        Self::FileNotFound {
            path: display_path(path),
        }
    }

    pub fn file_read_failed(path: &Path, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: display_path(path),
            source,
        }
    }

    pub fn file_write_failed(path: &Path, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: display_path(path),
            source,
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn internal_panic(
        stage: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InternalPanic {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn worker_crashed(
        worker: usize,
        path: &Path,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::WorkerCrashed {
            worker,
            path: display_path(path),
            message: message.into(),
        }
    }

    pub fn spawn_failed(context: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            context: context.into(),
            source,
        }
    }

    pub fn job_timed_out(worker: usize, path: &Path, timeout_ms: u64) -> Self {
        Self::JobTimedOut {
            worker,
            path: display_path(path),
            timeout_ms,
        }
    }

    pub fn metadata_write_failed(path: &Path, source: ReconcileError) -> Self {
        Self::MetadataWriteFailed {
            path: display_path(path),
            source,
        }
    }

    pub fn outside_storage_root(path: &Path, root: &Path) -> Self {
        Self::OutsideStorageRoot {
            path: display_path(path),
            root: display_path(root),
        }
    }

    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    pub fn pool_shut_down() -> Self {
        Self::PoolShutDown
    }

    pub fn invalid_config(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::InternalPanic { .. } => ErrorCategory::Codec,

            Self::FileNotFound { .. }
            | Self::FileReadFailed { .. }
            | Self::FileWriteFailed { .. } => ErrorCategory::Io,

            Self::WorkerCrashed { .. } | Self::SpawnFailed { .. } => {
                ErrorCategory::WorkerCrash
            }

            Self::MetadataWriteFailed { .. } | Self::OutsideStorageRoot { .. } => {
                ErrorCategory::Metadata
            }

            Self::JobTimedOut { .. } => ErrorCategory::Timeout,

            Self::QueueFull { .. } | Self::PoolShutDown => ErrorCategory::Rejected,

            Self::InvalidConfig { .. } => ErrorCategory::Config,
        }
    }

    /// Whether resubmitting the same path may succeed.
    ///
    /// Codec errors are deterministic for a given file and configuration
    /// errors need a code change; everything else depends on transient state.
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::Codec | ErrorCategory::Config => false,
            ErrorCategory::Io
            | ErrorCategory::WorkerCrash
            | ErrorCategory::Metadata
            | ErrorCategory::Timeout
            | ErrorCategory::Rejected => true,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, CompressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompressError::file_not_found(Path::new("/users/alice/photo.jpg"));
        assert!(err.to_string().contains("/users/alice/photo.jpg"));
    }

    #[test]
    fn test_timeout_display_includes_worker_and_duration() {
        let err = CompressError::job_timed_out(3, Path::new("/tmp/a.png"), 1500);
        let msg = err.to_string();
        assert!(msg.contains("1500ms"));
        assert!(msg.contains("worker 3"));
    }

    #[test]
    fn test_metadata_error_keeps_source() {
        let source: ReconcileError = "record not found".into();
        let err = CompressError::metadata_write_failed(Path::new("/tmp/a.jpg"), source);
        let inner = std::error::Error::source(&err).expect("source should be preserved");
        assert_eq!(inner.to_string(), "record not found");
    }

    #[test]
    fn test_error_category_codec() {
        assert_eq!(
            CompressError::decode_failed("bad marker").category(),
            ErrorCategory::Codec
        );
        assert_eq!(
            CompressError::encode_failed("webp", "oom").category(),
            ErrorCategory::Codec
        );
        assert_eq!(
            CompressError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::Codec
        );
        assert_eq!(
            CompressError::internal_panic("encode:jpeg", "boom").category(),
            ErrorCategory::Codec
        );
    }

    #[test]
    fn test_error_category_pool() {
        assert_eq!(
            CompressError::worker_crashed(0, Path::new("a.jpg"), "panic").category(),
            ErrorCategory::WorkerCrash
        );
        assert_eq!(
            CompressError::job_timed_out(0, Path::new("a.jpg"), 10).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            CompressError::queue_full(8).category(),
            ErrorCategory::Rejected
        );
        assert_eq!(
            CompressError::pool_shut_down().category(),
            ErrorCategory::Rejected
        );
        assert_eq!(
            CompressError::outside_storage_root(Path::new("/etc/x.jpg"), Path::new("/srv"))
                .category(),
            ErrorCategory::Metadata
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(!CompressError::decode_failed("x").is_retryable());
        assert!(!CompressError::invalid_config("pool_size", "0", "must be >= 1").is_retryable());
        assert!(CompressError::pool_shut_down().is_retryable());
        assert!(CompressError::job_timed_out(1, Path::new("a.png"), 5).is_retryable());
        assert!(CompressError::file_read_failed(
            Path::new("a.png"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied)
        )
        .is_retryable());
    }

    #[test]
    fn test_category_as_str() {
        assert_eq!(ErrorCategory::WorkerCrash.as_str(), "worker_crash");
        assert_eq!(ErrorCategory::Metadata.as_str(), "metadata");
    }
}
