// src/pool.rs
//
// Bounded background compression pool.
//
// A fixed number of worker slots, each backed by its own OS thread, pull
// jobs from a single FIFO queue owned by a coordinator thread. Callers get
// a `JobHandle` back immediately and never wait on compression unless they
// choose to. When a file is replaced, the coordinator writes its new size
// to the metadata store before the handle resolves.
//
// **Isolation**: a worker thread shares nothing with the pool except the
// compression unit and an event channel. A panic inside a codec takes down
// only that thread; the coordinator rejects its job and spawns a fresh
// context in the same slot.
//
// This file is a facade over the modules in pool/

mod config;
mod dispatch;
mod job;
mod reconcile;
mod sizing;
mod worker;

pub use config::PoolConfig;
pub use dispatch::{CompressionPool, PoolStats};
pub use job::{JobHandle, JobId, JobOutcome, JobResult};
pub use reconcile::{InMemoryMetadata, MetadataStore, StorageLayout, DIVERGENCE_TARGET};
pub use sizing::{default_pool_size, pool_size_for, MAX_POOL_SIZE};
