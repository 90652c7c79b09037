//! Compile-once module cache keyed by tool name.
//!
//! Compilation is costly relative to invocation, so modules are compiled
//! at load time and cached; every execution still gets a fresh
//! instantiation. Writers (`load`/`unload`) are mutually exclusive;
//! reads (`has`/`list`/`get`) proceed concurrently.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};
use wasmtime::{Engine, Module};

use crate::error::SandboxError;

/// Owned store of compiled guest modules.
///
/// Each sandbox owns its store by handle; unrelated sandbox instances
/// never share module state.
pub struct ModuleStore {
    modules: RwLock<HashMap<String, Module>>,
}

impl Default for ModuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleStore {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Compile `bytes` and install the module under `name`.
    ///
    /// Loading an already-present name replaces the prior module: the old
    /// one is dropped under the write lock, so callers never observe two
    /// live modules sharing a name. Malformed input is a validation
    /// failure, not a panic.
    pub async fn load(&self, engine: &Engine, name: &str, bytes: &[u8]) -> Result<(), SandboxError> {
        // Compilation can be slow for large modules; keep it off the
        // async executor threads.
        let engine = engine.clone();
        let owned = bytes.to_vec();
        let module = tokio::task::spawn_blocking(move || Module::new(&engine, &owned))
            .await
            .map_err(|e| SandboxError::InvalidModule(format!("compilation task failed: {e}")))?
            .map_err(|e| SandboxError::InvalidModule(e.to_string()))?;

        let replaced = self
            .modules
            .write()
            .await
            .insert(name.to_string(), module)
            .is_some();
        info!(module = %name, replaced, "loaded wasm module");
        Ok(())
    }

    /// Remove the module under `name`, dropping the compiled unit.
    pub async fn unload(&self, name: &str) -> Result<(), SandboxError> {
        match self.modules.write().await.remove(name) {
            Some(_) => {
                info!(module = %name, "unloaded wasm module");
                Ok(())
            }
            None => Err(SandboxError::ModuleNotFound(name.to_string())),
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.modules.read().await.contains_key(name)
    }

    pub async fn list(&self) -> Vec<String> {
        self.modules.read().await.keys().cloned().collect()
    }

    /// Fetch a handle to the compiled module for execution.
    /// `Module` is cheaply cloneable; the lock is released immediately.
    pub async fn get(&self, name: &str) -> Option<Module> {
        self.modules.read().await.get(name).cloned()
    }

    /// Drop every cached module.
    pub async fn clear(&self) {
        let mut modules = self.modules.write().await;
        let count = modules.len();
        modules.clear();
        debug!(count, "cleared module store");
    }
}
