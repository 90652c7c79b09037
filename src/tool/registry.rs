//! Tool registry: discovery plus policy-gated execution routing.
//!
//! Tools are wrapped by the policy gate at registration time, so a
//! sandboxed tool and a direct one look identical to callers. Tools can
//! be registered and unregistered at runtime with thread-safe concurrent
//! access.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::sandbox::PolicyGate;
use crate::tool::Tool;

/// Central registry of invocable tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    gate: PolicyGate,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Registry with the default policy gate (no sandboxes configured,
    /// so every tool executes directly).
    pub fn new() -> Self {
        Self::with_policy(PolicyGate::default())
    }

    pub fn with_policy(gate: PolicyGate) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            gate,
        }
    }

    /// Register a tool, applying the policy gate. Registering an
    /// existing name replaces the prior tool.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let routed = self.gate.apply(tool);
        self.tools.write().await.insert(name.clone(), routed);
        info!(tool = %name, "registered tool");
    }

    /// Remove a tool by name.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        match self.tools.write().await.remove(name) {
            Some(_) => {
                info!(tool = %name, "unregistered tool");
                Ok(())
            }
            None => Err(anyhow!("tool not found: {name}")),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Names of all registered tools.
    pub async fn list(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Execute a registered tool by name. The policy routing decided at
    /// registration applies transparently.
    pub async fn execute(&self, name: &str, input: &[u8]) -> Result<Vec<u8>> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| anyhow!("unknown tool: {name}"))?;
        debug!(tool = %name, "executing tool");
        tool.execute(input).await
    }
}
