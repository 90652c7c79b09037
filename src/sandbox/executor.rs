//! Per-call execution coordinator.
//!
//! One call runs: module lookup → deadline → fresh instance → entry-point
//! resolution → marshal → invoke → unwrap. A tool without a loaded module
//! falls back to its native implementation — isolation is adopted
//! incrementally, one module at a time, and never becomes a hard
//! dependency for otherwise-functional tools.
//!
//! Entry-point resolution is a convention, applied in strict order:
//! the tool's explicit entry-point name, then `"execute"`, then the
//! `"_start"` process convention.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};
use wasmtime::{Func, Instance, Memory, Module, Store, Trap, Val, ValType};

use crate::error::SandboxError;
use crate::tool::Tool;

use super::capabilities::CapabilityConfig;
use super::marshal::{self, ALLOC_EXPORT, DEALLOC_EXPORT, MEMORY_EXPORT};
use super::runtime::{GuestState, WasmRuntime};
use super::store::ModuleStore;
use super::Sandbox;

/// Conventional entry-point export for tool modules.
const ENTRY_EXECUTE: &str = "execute";

/// Conventional process-start export (WASI command modules).
const ENTRY_START: &str = "_start";

/// WebAssembly-backed sandbox: a long-lived runtime host plus an owned
/// module store, shared by many concurrent callers. Every execution gets
/// a fresh guest instance; instances are never pooled.
pub struct WasmSandbox {
    runtime: Arc<WasmRuntime>,
    modules: ModuleStore,
}

impl WasmSandbox {
    pub fn new(caps: CapabilityConfig) -> anyhow::Result<Self> {
        Ok(Self {
            runtime: Arc::new(WasmRuntime::new(caps)?),
            modules: ModuleStore::new(),
        })
    }

    /// Compile and install a module under `name`, replacing any prior
    /// module with that name.
    pub async fn load(&self, name: &str, bytes: &[u8]) -> Result<(), SandboxError> {
        self.modules.load(self.runtime.engine(), name, bytes).await
    }

    pub async fn unload(&self, name: &str) -> Result<(), SandboxError> {
        self.modules.unload(name).await
    }

    pub async fn has(&self, name: &str) -> bool {
        self.modules.has(name).await
    }

    pub async fn list(&self) -> Vec<String> {
        self.modules.list().await
    }

    pub fn capabilities(&self) -> &CapabilityConfig {
        self.runtime.capabilities()
    }

    /// Close every cached module and stop the runtime's epoch ticker.
    /// Callers must guarantee no execution is in flight.
    pub async fn close(&self) {
        self.modules.clear().await;
        self.runtime.shutdown();
    }
}

#[async_trait]
impl Sandbox for WasmSandbox {
    async fn execute(
        &self,
        tool: &dyn Tool,
        input: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, SandboxError> {
        let Some(module) = self.modules.get(tool.name()).await else {
            debug!(tool = %tool.name(), "no module loaded, executing natively");
            return tool.execute(input).await.map_err(SandboxError::Tool);
        };

        // Effective deadline: configured limit, tightened by the caller.
        let configured = Instant::now() + self.runtime.capabilities().max_exec_time;
        let effective = deadline.map_or(configured, |d| d.min(configured));
        let remaining = effective
            .checked_duration_since(Instant::now())
            .filter(|r| !r.is_zero())
            .ok_or(SandboxError::Timeout)?;
        let ticks = WasmRuntime::deadline_ticks(remaining);

        let runtime = Arc::clone(&self.runtime);
        let entry_override = tool.entry_point().map(str::to_owned);
        let payload = input.to_vec();
        let raw = tokio::task::spawn_blocking(move || {
            run_guest_call(&runtime, &module, entry_override.as_deref(), &payload, ticks)
        })
        .await
        .map_err(|e| SandboxError::GuestFault(format!("execution task failed: {e}")))??;

        debug!(tool = %tool.name(), bytes = raw.len(), "guest call completed");
        Ok(unwrap_output(raw))
    }
}

/// Run one guest call to completion. Blocking; the store (and with it
/// the guest instance and memory) is released when this returns, on
/// every path.
fn run_guest_call(
    runtime: &WasmRuntime,
    module: &Module,
    entry_override: Option<&str>,
    input: &[u8],
    deadline_ticks: u64,
) -> Result<Vec<u8>, SandboxError> {
    let linker = runtime
        .new_linker()
        .map_err(|e| SandboxError::InstantiationFailed(e.to_string()))?;
    let (mut store, io) = runtime
        .new_store(input)
        .map_err(|e| SandboxError::InstantiationFailed(e.to_string()))?;
    store.set_epoch_deadline(deadline_ticks);

    let instance = linker.instantiate(&mut store, module).map_err(|e| {
        if matches!(e.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
            SandboxError::Timeout
        } else {
            SandboxError::InstantiationFailed(e.to_string())
        }
    })?;

    let entry = resolve_entry(&mut store, &instance, entry_override)?;

    let output = match allocator_pair(&mut store, &instance) {
        Some((alloc, dealloc, memory)) => {
            let buf = marshal::alloc_input(&mut store, &alloc, input.len())?;
            // The buffer is released exactly once, whatever the call did.
            let outcome = marshal::copy_input(&mut store, &memory, buf, input)
                .and_then(|()| marshal::invoke_entry(&mut store, &entry, buf));
            marshal::release_input(&mut store, &dealloc, buf);
            match outcome? {
                Some(region) => marshal::read_output(&mut store, &memory, region)?,
                None => io.stdout.contents().to_vec(),
            }
        }
        None => {
            invoke_captured(&mut store, &entry)?;
            io.stdout.contents().to_vec()
        }
    };

    let stderr = io.stderr.contents();
    if !stderr.is_empty() {
        warn!(stderr = %String::from_utf8_lossy(&stderr), "guest wrote to stderr");
    }
    Ok(output)
}

/// Resolve the guest entry point by precedence: explicit tool-supplied
/// name, then the `execute` convention, then the process-start
/// convention.
fn resolve_entry(
    store: &mut Store<GuestState>,
    instance: &Instance,
    explicit: Option<&str>,
) -> Result<Func, SandboxError> {
    let mut tried = Vec::new();
    for name in explicit.into_iter().chain([ENTRY_EXECUTE, ENTRY_START]) {
        if let Some(func) = instance.get_func(&mut *store, name) {
            debug!(entry = %name, "resolved entry point");
            return Ok(func);
        }
        tried.push(name);
    }
    Err(SandboxError::EntryPointNotFound(tried.join(", ")))
}

/// Detect the marshaling ABI: exported linear memory plus a matching
/// allocator pair. The allocator must be `alloc(i32) -> i32`; anything
/// else routes the module through output capture instead.
fn allocator_pair(
    store: &mut Store<GuestState>,
    instance: &Instance,
) -> Option<(Func, Func, Memory)> {
    let memory = instance.get_memory(&mut *store, MEMORY_EXPORT)?;
    let alloc = instance.get_func(&mut *store, ALLOC_EXPORT)?;
    let dealloc = instance.get_func(&mut *store, DEALLOC_EXPORT)?;

    let ty = alloc.ty(&*store);
    let params: Vec<ValType> = ty.params().collect();
    let results: Vec<ValType> = ty.results().collect();
    if !matches!(params[..], [ValType::I32]) || !matches!(results[..], [ValType::I32]) {
        return None;
    }
    Some((alloc, dealloc, memory))
}

/// Invoke the entry point with no arguments; the guest communicates
/// through the captured output channel. `proc_exit(0)` counts as normal
/// completion.
fn invoke_captured(store: &mut Store<GuestState>, entry: &Func) -> Result<(), SandboxError> {
    let ty = entry.ty(&*store);
    if ty.params().len() != 0 {
        return Err(SandboxError::GuestFault(
            "entry point expects parameters but module exports no allocator pair".to_string(),
        ));
    }
    let mut results = vec![Val::I64(0); ty.results().len()];
    match entry.call(&mut *store, &[], &mut results) {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(exit) = e.downcast_ref::<wasmtime_wasi::I32Exit>() {
                if exit.0 == 0 {
                    return Ok(());
                }
                return Err(SandboxError::GuestFault(format!(
                    "guest exited with status {}",
                    exit.0
                )));
            }
            Err(marshal::classify_call_error(e, SandboxError::GuestFault))
        }
    }
}

/// Callers always receive a structured payload: valid JSON is returned
/// verbatim, anything else is wrapped as `{"output": <text>}`.
fn unwrap_output(raw: Vec<u8>) -> Vec<u8> {
    if !raw.is_empty() && serde_json::from_slice::<serde_json::Value>(&raw).is_ok() {
        return raw;
    }
    let wrapped = serde_json::json!({ "output": String::from_utf8_lossy(&raw) });
    serde_json::to_vec(&wrapped).unwrap_or_default()
}
