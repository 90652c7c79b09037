use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::sandbox::{CapabilityConfig, FilesystemCapability};
use crate::tool::RiskLevel;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Resource and capability limits for the isolation runtime.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,
    #[serde(default = "default_max_exec_time_secs")]
    pub max_exec_time_secs: u64,
    #[serde(default)]
    pub network_allowed: bool,
    /// Directory mounted as the guest's filesystem root.
    /// Omitting it denies all filesystem access.
    pub fs_root: Option<PathBuf>,
    #[serde(default)]
    pub read_only_paths: Vec<PathBuf>,
    #[serde(default)]
    pub write_paths: Vec<PathBuf>,
    /// Host env var names visible to guests. Supports ${ENV_VAR}
    /// substitution in the values at load time.
    #[serde(default)]
    pub env_allowlist: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// Tools at or above this risk level are sandboxed.
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: RiskLevel,
}

fn default_max_memory_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_max_exec_time_secs() -> u64 {
    30
}

fn default_risk_threshold() -> RiskLevel {
    RiskLevel::High
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory_bytes(),
            max_exec_time_secs: default_max_exec_time_secs(),
            network_allowed: false,
            fs_root: None,
            read_only_paths: Vec::new(),
            write_paths: Vec::new(),
            env_allowlist: Vec::new(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            risk_threshold: default_risk_threshold(),
        }
    }
}

impl SandboxConfig {
    /// Translate into the immutable capability envelope handed to the
    /// runtime host.
    pub fn capabilities(&self) -> CapabilityConfig {
        CapabilityConfig {
            max_memory_bytes: self.max_memory_bytes,
            max_exec_time: Duration::from_secs(self.max_exec_time_secs),
            network_allowed: self.network_allowed,
            filesystem: self.fs_root.as_ref().map(|root| FilesystemCapability {
                root: root.clone(),
                read_only_paths: self.read_only_paths.clone(),
                write_paths: self.write_paths.clone(),
            }),
            env_allowlist: self.env_allowlist.clone(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${SANDBOX_ROOT}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
