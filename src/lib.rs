// lib.rs
//
// gallery-compressor: background recompression for image-gallery uploads
//
// Design goals:
// - Uploads return immediately; compression happens off the request path
// - Bounded CPU: a fixed pool of workers, everything else waits in a queue
// - A codec crash costs one job, never the service
// - The file on disk and its stored size never silently disagree

// Memory allocator optimization - jemalloc for long-running services
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod engine;
pub mod error;
pub mod format;
pub mod pool;

pub use engine::{CompressionOutcome, ImageRecompressor, Recompress};
pub use error::{CompressError, ErrorCategory, ReconcileError, Result};
pub use format::{RecompressSettings, SourceFormat};
pub use pool::{
    CompressionPool, InMemoryMetadata, JobHandle, JobId, JobOutcome, JobResult, MetadataStore,
    PoolConfig, PoolStats, StorageLayout,
};

/// Get library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
