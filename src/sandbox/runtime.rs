//! Runtime host: owns the wasmtime engine and builds per-call stores.
//!
//! One engine is shared by every execution. Deadlines are enforced with
//! epoch interruption: a background ticker thread increments the engine
//! epoch at a fixed interval and each store gets a deadline in ticks.
//! Memory is bounded per store through [`StoreLimits`], sized from the
//! capability envelope's page count.
//!
//! The host-function surface is WASI preview 1 with captured pipes:
//! the input payload is offered on stdin, stdout/stderr are collected in
//! memory. Filesystem preopens and environment variables are added only
//! when the corresponding capability is enabled; no network host calls
//! are exposed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, Linker, Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use super::capabilities::CapabilityConfig;

/// Interval between engine epoch increments.
pub(crate) const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Maximum bytes retained from the guest's stdout or stderr.
const MAX_CAPTURED_OUTPUT: usize = 4 * 1024 * 1024;

/// Per-store state: the WASI context plus the resource limiter.
pub struct GuestState {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) limits: StoreLimits,
}

/// Captured output channels of one guest instance.
pub struct GuestIo {
    pub stdout: MemoryOutputPipe,
    pub stderr: MemoryOutputPipe,
}

/// The shared runtime host.
///
/// Cheap to share behind an [`Arc`]; stores and linkers are created per
/// call so concurrent executions never share guest state.
pub struct WasmRuntime {
    engine: Engine,
    caps: CapabilityConfig,
    ticker_stop: Arc<AtomicBool>,
}

impl WasmRuntime {
    /// Build an engine from the capability envelope and start the epoch
    /// ticker.
    pub fn new(caps: CapabilityConfig) -> Result<Self> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).context("failed to create wasm engine")?;

        let ticker_stop = Arc::new(AtomicBool::new(false));
        let ticker_engine = engine.clone();
        let stop = Arc::clone(&ticker_stop);
        std::thread::Builder::new()
            .name("crucible-epoch".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    ticker_engine.increment_epoch();
                }
            })
            .context("failed to spawn epoch ticker thread")?;

        if caps.network_allowed {
            warn!("network_allowed is set but WASI preview 1 exposes no socket host calls");
        }
        info!(
            max_memory_pages = caps.max_memory_pages(),
            max_exec_time_ms = caps.max_exec_time.as_millis() as u64,
            filesystem = caps.filesystem.is_some(),
            "wasm runtime ready"
        );

        Ok(Self {
            engine,
            caps,
            ticker_stop,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn capabilities(&self) -> &CapabilityConfig {
        &self.caps
    }

    /// Convert a remaining duration into an epoch-tick deadline.
    /// Always at least one tick so a positive remainder never rounds to
    /// an immediate trap.
    pub(crate) fn deadline_ticks(remaining: Duration) -> u64 {
        let ticks = remaining.as_millis().div_ceil(EPOCH_TICK.as_millis()) as u64;
        ticks.max(1)
    }

    /// Create a linker with the WASI preview 1 host surface.
    pub(crate) fn new_linker(&self) -> Result<Linker<GuestState>> {
        let mut linker = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)
            .context("failed to add WASI to linker")?;
        Ok(linker)
    }

    /// Create a fresh store for one execution.
    ///
    /// The input payload is offered to the guest on stdin; stdout and
    /// stderr are captured in memory. The store's memory limit comes from
    /// the envelope's page count.
    pub(crate) fn new_store(&self, input: &[u8]) -> Result<(Store<GuestState>, GuestIo)> {
        let stdout = MemoryOutputPipe::new(MAX_CAPTURED_OUTPUT);
        let stderr = MemoryOutputPipe::new(MAX_CAPTURED_OUTPUT);

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdin(MemoryInputPipe::new(input.to_vec()))
            .stdout(stdout.clone())
            .stderr(stderr.clone());

        for name in &self.caps.env_allowlist {
            match std::env::var(name) {
                Ok(value) => {
                    builder.env(name, &value);
                }
                // Unset variables are omitted, never passed as empty.
                Err(_) => debug!(var = %name, "allowed env var not set in host, omitting"),
            }
        }

        if let Some(fs) = &self.caps.filesystem {
            builder
                .preopened_dir(&fs.root, "/", DirPerms::all(), FilePerms::all())
                .with_context(|| format!("failed to preopen root {}", fs.root.display()))?;
            for path in &fs.read_only_paths {
                builder
                    .preopened_dir(
                        path,
                        path.to_string_lossy(),
                        DirPerms::READ,
                        FilePerms::READ,
                    )
                    .with_context(|| format!("failed to preopen {}", path.display()))?;
            }
            for path in &fs.write_paths {
                builder
                    .preopened_dir(path, path.to_string_lossy(), DirPerms::all(), FilePerms::all())
                    .with_context(|| format!("failed to preopen {}", path.display()))?;
            }
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.caps.effective_memory_bytes() as usize)
            .build();

        let mut store = Store::new(
            &self.engine,
            GuestState {
                wasi: builder.build_p1(),
                limits,
            },
        );
        store.limiter(|state| &mut state.limits);

        Ok((store, GuestIo { stdout, stderr }))
    }

    /// Stop the epoch ticker. Idempotent; also called on drop.
    pub(crate) fn shutdown(&self) {
        self.ticker_stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capabilities::WASM_PAGE_SIZE;

    #[test]
    fn test_runtime_constructs_with_defaults() {
        let runtime = WasmRuntime::new(CapabilityConfig::default()).unwrap();
        assert_eq!(
            runtime.capabilities().effective_memory_bytes(),
            16 * 1024 * 1024
        );
    }

    #[test]
    fn test_runtime_constructs_with_sub_page_memory() {
        // 1024 bytes still yields a working runtime with one page
        let caps = CapabilityConfig {
            max_memory_bytes: 1024,
            ..Default::default()
        };
        let runtime = WasmRuntime::new(caps).unwrap();
        assert_eq!(
            runtime.capabilities().effective_memory_bytes(),
            WASM_PAGE_SIZE
        );
    }

    #[test]
    fn test_deadline_ticks_rounds_up_and_floors_at_one() {
        assert_eq!(WasmRuntime::deadline_ticks(Duration::from_millis(1)), 1);
        assert_eq!(WasmRuntime::deadline_ticks(Duration::from_millis(10)), 1);
        assert_eq!(WasmRuntime::deadline_ticks(Duration::from_millis(11)), 2);
        assert_eq!(WasmRuntime::deadline_ticks(Duration::ZERO), 1);
    }

    #[test]
    fn test_store_creation_with_filesystem_capability() {
        let dir = tempfile::tempdir().unwrap();
        let caps = CapabilityConfig {
            filesystem: Some(crate::sandbox::capabilities::FilesystemCapability {
                root: dir.path().to_path_buf(),
                read_only_paths: vec![],
                write_paths: vec![],
            }),
            ..Default::default()
        };
        let runtime = WasmRuntime::new(caps).unwrap();
        let (_store, _io) = runtime.new_store(b"{}").unwrap();
    }
}
