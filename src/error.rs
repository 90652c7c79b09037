use thiserror::Error;

/// Classified errors surfaced by the sandbox.
///
/// Module-management errors (`InvalidModule`, `ModuleNotFound`) return to
/// the management caller; everything else returns to the invoking caller.
/// Nothing is retried inside the sandbox — retry policy belongs to the
/// calling middleware, gated by the tool's own annotations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The supplied bytes did not compile to a valid module.
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Unload or lookup referenced a name with no loaded module.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// No usable entry point after trying every recognized convention.
    #[error("no entry point found (tried: {0})")]
    EntryPointNotFound(String),

    /// The execution deadline expired during instantiation or invocation.
    #[error("execution deadline exceeded")]
    Timeout,

    /// A guest allocation or memory write was rejected by bounds checking.
    #[error("guest memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// Guest pointer arithmetic exceeded the 32-bit address width.
    #[error("guest address overflow: {0}")]
    AddressOverflow(String),

    /// The guest could not be instantiated (not deadline-related).
    #[error("instantiation failed: {0}")]
    InstantiationFailed(String),

    /// The entry-point invocation raised an unclassified fault.
    #[error("guest fault: {0}")]
    GuestFault(String),

    /// The tool's native implementation failed (fallback path).
    #[error("tool execution failed: {0}")]
    Tool(#[source] anyhow::Error),
}
