//! Policy gate: decides, before every tool call, whether the call is
//! routed through a sandbox at all — and through which one.
//!
//! Sandboxing is strictly additive. A route with no configured sandbox
//! falls through to direct execution, so isolation never becomes a hard
//! dependency for otherwise-functional tools.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::tool::{RiskLevel, Tool, ToolAnnotations};

use super::Sandbox;

/// Where a tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxRoute {
    /// Native execution, no isolation.
    Direct,
    /// The sandbox reserved for read-only tools.
    ReadOnly,
    /// The default sandbox for everything else.
    Standard,
}

/// Injectable predicate that can override the routing decision entirely,
/// e.g. to disable sandboxing in a trusted context.
pub type RouteOverride = Arc<dyn Fn(&ToolAnnotations) -> Option<SandboxRoute> + Send + Sync>;

/// Annotation-driven routing decision ahead of every tool call.
pub struct PolicyGate {
    risk_threshold: RiskLevel,
    read_only: Option<Arc<dyn Sandbox>>,
    standard: Option<Arc<dyn Sandbox>>,
    route_override: Option<RouteOverride>,
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new(RiskLevel::High)
    }
}

impl PolicyGate {
    pub fn new(risk_threshold: RiskLevel) -> Self {
        Self {
            risk_threshold,
            read_only: None,
            standard: None,
            route_override: None,
        }
    }

    /// Sandbox used for the [`SandboxRoute::Standard`] route.
    pub fn with_standard_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.standard = Some(sandbox);
        self
    }

    /// Sandbox used for the [`SandboxRoute::ReadOnly`] route.
    pub fn with_read_only_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.read_only = Some(sandbox);
        self
    }

    /// Install a predicate consulted before the annotation rules.
    pub fn with_route_override(mut self, predicate: RouteOverride) -> Self {
        self.route_override = Some(predicate);
        self
    }

    /// Decide the route for a tool with the given annotations.
    ///
    /// Sandboxed iff the tool is marked `sandboxed`, or `destructive`,
    /// or its risk level is at or above the configured threshold.
    /// Read-only tools get the read-only route, everything else the
    /// standard one. The override predicate, when present, wins.
    pub fn route(&self, annotations: &ToolAnnotations) -> SandboxRoute {
        if let Some(overridden) = self.route_override.as_ref().and_then(|f| f(annotations)) {
            return overridden;
        }
        let must_isolate = annotations.sandboxed
            || annotations.destructive
            || annotations.risk_level >= self.risk_threshold;
        if !must_isolate {
            return SandboxRoute::Direct;
        }
        if annotations.read_only {
            SandboxRoute::ReadOnly
        } else {
            SandboxRoute::Standard
        }
    }

    /// The sandbox configured for a route, if any.
    pub fn sandbox_for(&self, route: SandboxRoute) -> Option<Arc<dyn Sandbox>> {
        match route {
            SandboxRoute::Direct => None,
            SandboxRoute::ReadOnly => self.read_only.clone(),
            SandboxRoute::Standard => self.standard.clone(),
        }
    }

    /// Apply the gate to a tool: returns either the tool unchanged or a
    /// [`SandboxedTool`] decorator routing its calls through the selected
    /// sandbox.
    pub fn apply(&self, tool: Arc<dyn Tool>) -> Arc<dyn Tool> {
        let route = self.route(&tool.annotations());
        match self.sandbox_for(route) {
            Some(sandbox) => {
                debug!(tool = %tool.name(), ?route, "routing tool through sandbox");
                Arc::new(SandboxedTool::new(tool, sandbox))
            }
            None => {
                debug!(tool = %tool.name(), ?route, "tool executes directly");
                tool
            }
        }
    }
}

/// Decorator presenting the same shape as a plain tool while routing
/// every call through a sandbox. The rest of the system never knows
/// isolation is involved.
pub struct SandboxedTool {
    inner: Arc<dyn Tool>,
    sandbox: Arc<dyn Sandbox>,
}

impl SandboxedTool {
    pub fn new(inner: Arc<dyn Tool>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { inner, sandbox }
    }
}

#[async_trait]
impl Tool for SandboxedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.inner.parameters_schema()
    }

    fn annotations(&self) -> ToolAnnotations {
        self.inner.annotations()
    }

    fn entry_point(&self) -> Option<&str> {
        self.inner.entry_point()
    }

    async fn execute(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.sandbox
            .execute(self.inner.as_ref(), input, None)
            .await
            .map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::sandbox::NoopSandbox;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct PlainTool {
        annotations: ToolAnnotations,
    }

    #[async_trait]
    impl Tool for PlainTool {
        fn name(&self) -> &str {
            "plain"
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn annotations(&self) -> ToolAnnotations {
            self.annotations.clone()
        }
        async fn execute(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(input.to_vec())
        }
    }

    /// Sandbox mock counting how many calls it received.
    struct CountingSandbox {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sandbox for CountingSandbox {
        async fn execute(
            &self,
            tool: &dyn Tool,
            input: &[u8],
            _deadline: Option<Instant>,
        ) -> Result<Vec<u8>, SandboxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tool.execute(input).await.map_err(SandboxError::Tool)
        }
    }

    fn annotations(
        read_only: bool,
        destructive: bool,
        risk_level: RiskLevel,
        sandboxed: bool,
    ) -> ToolAnnotations {
        ToolAnnotations {
            read_only,
            destructive,
            idempotent: false,
            risk_level,
            sandboxed,
        }
    }

    #[test]
    fn test_low_risk_tool_runs_direct() {
        let gate = PolicyGate::new(RiskLevel::High);
        let route = gate.route(&annotations(false, false, RiskLevel::Low, false));
        assert_eq!(route, SandboxRoute::Direct);
    }

    #[test]
    fn test_sandboxed_flag_forces_isolation() {
        let gate = PolicyGate::new(RiskLevel::High);
        let route = gate.route(&annotations(false, false, RiskLevel::Low, true));
        assert_eq!(route, SandboxRoute::Standard);
    }

    #[test]
    fn test_destructive_forces_isolation() {
        let gate = PolicyGate::new(RiskLevel::High);
        let route = gate.route(&annotations(false, true, RiskLevel::Low, false));
        assert_eq!(route, SandboxRoute::Standard);
    }

    #[test]
    fn test_risk_threshold_is_inclusive() {
        let gate = PolicyGate::new(RiskLevel::High);
        assert_eq!(
            gate.route(&annotations(false, false, RiskLevel::High, false)),
            SandboxRoute::Standard
        );
        assert_eq!(
            gate.route(&annotations(false, false, RiskLevel::Medium, false)),
            SandboxRoute::Direct
        );
    }

    #[test]
    fn test_read_only_tools_get_read_only_route() {
        let gate = PolicyGate::new(RiskLevel::High);
        let route = gate.route(&annotations(true, false, RiskLevel::Critical, false));
        assert_eq!(route, SandboxRoute::ReadOnly);
    }

    #[test]
    fn test_override_predicate_wins() {
        let gate = PolicyGate::new(RiskLevel::High)
            .with_route_override(Arc::new(|_| Some(SandboxRoute::Direct)));
        // Destructive + critical would normally be sandboxed
        let route = gate.route(&annotations(false, true, RiskLevel::Critical, true));
        assert_eq!(route, SandboxRoute::Direct);
    }

    #[test]
    fn test_override_none_falls_back_to_annotations() {
        let gate = PolicyGate::new(RiskLevel::High).with_route_override(Arc::new(|_| None));
        let route = gate.route(&annotations(false, true, RiskLevel::Low, false));
        assert_eq!(route, SandboxRoute::Standard);
    }

    #[tokio::test]
    async fn test_apply_without_sandbox_returns_tool_unchanged() {
        let gate = PolicyGate::new(RiskLevel::High);
        let tool: Arc<dyn Tool> = Arc::new(PlainTool {
            annotations: annotations(false, true, RiskLevel::Critical, false),
        });
        // Sandboxed route selected, but no sandbox configured → direct
        let wrapped = gate.apply(Arc::clone(&tool));
        let out = wrapped.execute(b"payload").await.unwrap();
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn test_apply_routes_through_standard_sandbox() {
        let sandbox = Arc::new(CountingSandbox {
            calls: AtomicUsize::new(0),
        });
        let gate =
            PolicyGate::new(RiskLevel::High).with_standard_sandbox(Arc::clone(&sandbox) as _);
        let tool: Arc<dyn Tool> = Arc::new(PlainTool {
            annotations: annotations(false, false, RiskLevel::Critical, false),
        });

        let wrapped = gate.apply(tool);
        let out = wrapped.execute(b"{}").await.unwrap();
        assert_eq!(out, b"{}");
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_only_route_ignores_standard_sandbox() {
        let sandbox = Arc::new(CountingSandbox {
            calls: AtomicUsize::new(0),
        });
        let gate =
            PolicyGate::new(RiskLevel::High).with_standard_sandbox(Arc::clone(&sandbox) as _);
        let tool: Arc<dyn Tool> = Arc::new(PlainTool {
            annotations: annotations(true, false, RiskLevel::Critical, false),
        });

        // Read-only route has no sandbox configured → direct execution
        let wrapped = gate.apply(tool);
        let out = wrapped.execute(b"{}").await.unwrap();
        assert_eq!(out, b"{}");
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decorator_preserves_tool_surface() {
        let tool: Arc<dyn Tool> = Arc::new(PlainTool {
            annotations: annotations(false, false, RiskLevel::Low, true),
        });
        let decorated = SandboxedTool::new(Arc::clone(&tool), Arc::new(NoopSandbox));
        assert_eq!(decorated.name(), "plain");
        assert_eq!(decorated.description(), "test tool");
        assert!(decorated.annotations().sandboxed);
    }
}
