//! Agent configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use device_agent_shared::limits;
use serde::Deserialize;

use crate::cloud::{BackoffPolicy, LinkConfig};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "DEVICE_AGENT_CONFIG";

/// A device definition document and the category it is loaded as
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DefinitionSource {
    pub category: String,
    pub path: PathBuf,
}

/// Configuration for the device agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Device ID reported in logs
    pub device_id: String,
    /// Cloud endpoint address
    pub cloud_address: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// How long finished commands stay in the queue
    pub command_retention_ms: u64,
    /// Interval between queue cleanups
    pub cleanup_interval_ms: u64,
    /// Recorded state changes kept before the oldest are merged
    pub state_queue_size: usize,
    /// Retry policy for command updates
    pub backoff: BackoffPolicy,
    /// Base command definitions
    pub base_definitions: Option<PathBuf>,
    /// Device command definitions, loaded in order
    pub definitions: Vec<DefinitionSource>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "device-001".into(),
            cloud_address: "127.0.0.1:8080".into(),
            connect_timeout_ms: 5000,
            request_timeout_ms: 15_000,
            command_retention_ms: limits::COMMAND_RETENTION_MS,
            cleanup_interval_ms: 60_000,
            state_queue_size: limits::STATE_QUEUE_MAX_SIZE,
            backoff: BackoffPolicy::default(),
            base_definitions: None,
            definitions: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Read a JSON configuration file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load the file named by `DEVICE_AGENT_CONFIG`, or use defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn command_retention(&self) -> Duration {
        Duration::from_millis(self.command_retention_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            address: self.cloud_address.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}
