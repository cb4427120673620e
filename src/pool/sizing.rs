// src/pool/sizing.rs
//
// Default worker count.
//
// **Thread Count Calculation**:
// - Uses std::thread::available_parallelism() to respect cgroup/CPU quota
// - Reserves one core for the request-handling side of the process
// - Never goes below MIN_WORKERS, so a single-core box still compresses

/// Cores left to the host process (request handling, the coordinator).
pub const RESERVED_CORES: usize = 1;

/// Minimum number of workers, used when detection fails too.
const MIN_WORKERS: usize = 1;

/// Upper bound on worker slots, detected or configured.
pub const MAX_POOL_SIZE: usize = 256;

/// Pool size for a machine with `parallelism` usable cores.
pub fn pool_size_for(parallelism: usize) -> usize {
    parallelism
        .saturating_sub(RESERVED_CORES)
        .clamp(MIN_WORKERS, MAX_POOL_SIZE)
}

/// Pool size for this machine.
pub fn default_pool_size() -> usize {
    let detected = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_WORKERS);
    pool_size_for(detected)
}
