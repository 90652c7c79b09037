//! Crucible — a framework for tool-invoking agents.
//!
//! Tools are registered capabilities with declared safety annotations.
//! High-risk or explicitly untrusted tool logic runs inside a
//! WebAssembly sandbox with enforced memory, time, and capability
//! limits; everything else executes natively. The policy gate decides,
//! per call, which path a tool takes — and a tool without a loaded Wasm
//! module always falls back to its native implementation, so isolation
//! can be adopted one tool at a time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crucible::sandbox::{CapabilityConfig, PolicyGate, WasmSandbox};
//! use crucible::tool::{RiskLevel, ToolRegistry};
//!
//! # async fn setup() -> anyhow::Result<()> {
//! let sandbox = Arc::new(WasmSandbox::new(CapabilityConfig::default())?);
//! sandbox.load("web_search", &std::fs::read("tools/web_search.wasm")?).await?;
//!
//! let gate = PolicyGate::new(RiskLevel::High).with_standard_sandbox(sandbox);
//! let registry = ToolRegistry::with_policy(gate);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod sandbox;
pub mod tool;

pub use config::Config;
pub use error::SandboxError;
pub use sandbox::{CapabilityConfig, NoopSandbox, PolicyGate, Sandbox, WasmSandbox};
pub use tool::{RiskLevel, Tool, ToolAnnotations, ToolRegistry};
