pub mod registry;

use async_trait::async_trait;
use serde::Deserialize;

/// Risk ordinal attached to a tool definition.
///
/// The policy gate compares this against its configured threshold when
/// deciding whether a call must be routed through the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Safety annotations declared by a tool definition.
///
/// Owned by the tool, consulted by the policy gate, never mutated by the
/// sandbox.
#[derive(Debug, Clone, Default)]
pub struct ToolAnnotations {
    /// The tool observes state but never changes it.
    pub read_only: bool,
    /// The tool can cause irreversible changes.
    pub destructive: bool,
    /// Repeating the call with the same input is safe.
    pub idempotent: bool,
    /// Ordinal risk estimate.
    pub risk_level: RiskLevel,
    /// The tool explicitly requests sandboxed execution.
    pub sandboxed: bool,
}

/// A tool that the agent can invoke.
///
/// All tools (builtin, Wasm-isolated, remote) implement this trait.
/// `execute()` is the native implementation; when a Wasm module is loaded
/// under the tool's name, the sandbox runs the module instead and this
/// native path becomes the fallback.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier, also the module-store key.
    /// Must be lowercase alphanumeric + underscores (e.g. "web_search").
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM so it knows
    /// when to invoke this tool.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters this tool accepts.
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    /// Safety annotations consulted by the policy gate.
    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::default()
    }

    /// Explicit guest entry-point export name, if the tool ships a Wasm
    /// module with a non-conventional entry point.
    fn entry_point(&self) -> Option<&str> {
        None
    }

    /// Execute the tool natively with the given input payload.
    /// The returned bytes are sent back to the caller as the tool result.
    async fn execute(&self, input: &[u8]) -> anyhow::Result<Vec<u8>>;
}

pub use registry::ToolRegistry;
