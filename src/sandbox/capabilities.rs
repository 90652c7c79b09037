//! Capability envelope granted to a sandbox instance.
//!
//! Constructed once, immutable for the sandbox's lifetime, shared
//! read-only across all calls. Every limit here is enforced by the
//! runtime host: memory through store limits, time through epoch
//! interruption, filesystem through WASI preopens, env through an
//! explicit allow-list.

use std::path::PathBuf;
use std::time::Duration;

/// Size of one Wasm linear-memory page.
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Maximum addressable pages on wasm32 (4 GiB address space).
pub const MAX_WASM32_PAGES: u64 = 65_536;

/// Default guest memory limit (16 MiB).
pub const DEFAULT_MAX_MEMORY: u64 = 16 * 1024 * 1024;

/// Default per-call execution time limit.
pub const DEFAULT_MAX_EXEC_TIME: Duration = Duration::from_secs(30);

/// Filesystem grant: a root directory plus optional finer-grained paths.
#[derive(Debug, Clone)]
pub struct FilesystemCapability {
    /// Directory mounted as the guest's root.
    pub root: PathBuf,
    /// Paths preopened read-only inside the guest.
    pub read_only_paths: Vec<PathBuf>,
    /// Paths preopened read-write inside the guest.
    pub write_paths: Vec<PathBuf>,
}

/// Immutable resource/permission envelope for a sandbox instance.
#[derive(Debug, Clone)]
pub struct CapabilityConfig {
    /// Guest memory limit in bytes, converted to pages at store creation.
    pub max_memory_bytes: u64,
    /// Per-call execution time limit.
    pub max_exec_time: Duration,
    /// Whether the guest may open network connections.
    /// WASI preview 1 exposes no socket host calls, so this grants
    /// nothing today; the flag is carried so enabling it later is a
    /// config no-op for callers.
    pub network_allowed: bool,
    /// Filesystem grant; `None` means no filesystem access at all.
    pub filesystem: Option<FilesystemCapability>,
    /// Names of host environment variables visible to the guest.
    /// Variables absent from the host environment are omitted, never
    /// substituted with an empty value.
    pub env_allowlist: Vec<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY,
            max_exec_time: DEFAULT_MAX_EXEC_TIME,
            network_allowed: false,
            filesystem: None,
            env_allowlist: Vec::new(),
        }
    }
}

impl CapabilityConfig {
    /// Guest memory limit expressed in Wasm pages: rounded up, clamped to
    /// the wasm32 addressable maximum, never less than one page.
    pub fn max_memory_pages(&self) -> u64 {
        let pages = self.max_memory_bytes.div_ceil(WASM_PAGE_SIZE);
        pages.clamp(1, MAX_WASM32_PAGES)
    }

    /// Memory limit as enforced, in bytes (whole pages).
    pub fn effective_memory_bytes(&self) -> u64 {
        self.max_memory_pages() * WASM_PAGE_SIZE
    }
}
