use std::time::Duration;

/// Engine-wide tuning knobs.
///
/// These are configuration, not code: tests shrink the pool and log buffer to
/// force eviction and group-commit paths with tiny workloads.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool
    pub pool_size: usize,

    /// Size of each write-ahead log buffer in bytes
    pub log_buffer_size: usize,

    /// Deadline for the background log flusher
    pub log_timeout: Duration,

    /// Fixed bucket capacity of the page-table hash
    pub bucket_size: usize,

    /// Strict 2PL: locks may only be released after commit/abort
    pub strict_2pl: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            log_buffer_size: 64 * 1024,
            log_timeout: Duration::from_secs(1),
            bucket_size: 64,
            strict_2pl: true,
        }
    }
}
