//! Sandboxed execution of tool logic.
//!
//! The security model is layered:
//!
//! 1. Declarative capabilities ([`CapabilityConfig`]) — human reads and approves
//! 2. Policy gate ([`policy`]) — annotation-driven routing before every call
//! 3. Wasm runtime (wasmtime) — isolated modules, epoch-interrupted
//! 4. Per-call instances — fresh memory and stack, never pooled
//!
//! [`Sandbox`] is the polymorphic seam: [`NoopSandbox`] runs the tool's
//! native implementation directly, [`WasmSandbox`] routes through the
//! isolation runtime with native fallback for tools without a loaded
//! module.

pub mod capabilities;
pub mod executor;
pub mod marshal;
pub mod policy;
pub mod runtime;
pub mod store;

use std::time::Instant;

use async_trait::async_trait;

use crate::error::SandboxError;
use crate::tool::Tool;

pub use capabilities::{CapabilityConfig, FilesystemCapability};
pub use executor::WasmSandbox;
pub use policy::{PolicyGate, SandboxRoute, SandboxedTool};
pub use store::ModuleStore;

/// An execution environment for tool calls.
///
/// A sandbox presents the same `execute(input) -> output` shape as a
/// plain tool, so middleware can insert it transparently as a decorator
/// in front of any tool.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute a tool call with the given input payload.
    ///
    /// `deadline` carries caller-supplied cancellation; the sandbox
    /// combines it with its own configured execution time limit.
    async fn execute(
        &self,
        tool: &dyn Tool,
        input: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, SandboxError>;
}

/// A sandbox that performs no isolation: every call runs the tool's
/// native implementation. Useful in trusted contexts and as the default
/// when no isolation runtime is configured.
pub struct NoopSandbox;

#[async_trait]
impl Sandbox for NoopSandbox {
    async fn execute(
        &self,
        tool: &dyn Tool,
        input: &[u8],
        _deadline: Option<Instant>,
    ) -> Result<Vec<u8>, SandboxError> {
        tool.execute(input).await.map_err(SandboxError::Tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolAnnotations;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations::default()
        }
        async fn execute(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(input.to_vec())
        }
    }

    #[tokio::test]
    async fn test_noop_sandbox_runs_native() {
        let sandbox = NoopSandbox;
        let out = sandbox
            .execute(&EchoTool, b"{\"success\":true}", None)
            .await
            .unwrap();
        assert_eq!(out, b"{\"success\":true}");
    }
}
