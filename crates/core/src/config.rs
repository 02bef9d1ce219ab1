//! Engine configuration loader.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Recognized engine options. Every field has a default, so a partial YAML
/// document (or an empty mapping) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub max_concurrent_executions: usize,
    /// Milliseconds.
    #[serde(alias = "timeoutMs")]
    pub default_timeout: u64,
    pub retry_attempts: u32,
    /// Milliseconds; the n-th retry waits `retry_delay * n`.
    pub retry_delay: u64,
    pub sandbox_mode: bool,
    pub enable_rate_limiting: bool,
    pub history_capacity: usize,
    pub isolation: IsolationConfig,
    pub virtual_fs: VirtualFsConfig,
    pub limits: LimitsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            default_timeout: 30_000,
            retry_attempts: 3,
            retry_delay: 1_000,
            sandbox_mode: true,
            enable_rate_limiting: true,
            history_capacity: 10_000,
            isolation: IsolationConfig::default(),
            virtual_fs: VirtualFsConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsolationConfig {
    pub allowed_paths: Vec<String>,
    pub blocked_paths: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub max_network_requests: Option<u32>,
    pub allowed_apis: Vec<String>,
    pub blocked_apis: Vec<String>,
    pub max_api_calls: Option<u32>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            blocked_paths: ["/etc", "/proc", "/sys", "/dev"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_domains: Vec::new(),
            blocked_domains: ["localhost", "127.0.0.1", "0.0.0.0", "169.254.169.254"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_network_requests: None,
            allowed_apis: Vec::new(),
            blocked_apis: Vec::new(),
            max_api_calls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualFsConfig {
    #[serde(rename = "maxFileSizeMB", alias = "maxFileSizeMb")]
    pub max_file_size_mb: u64,
    pub max_files: usize,
}

impl Default for VirtualFsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            max_files: 100,
        }
    }
}

impl VirtualFsConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsConfig {
    pub max_execution_time_ms: u64,
    #[serde(rename = "maxMemoryMB", alias = "maxMemoryMb")]
    pub max_memory_mb: u64,
    pub max_network_requests: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 30_000,
            max_memory_mb: 512,
            max_network_requests: 100,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        if content.trim().is_empty() {
            return Err(EngineError::Config("Config file is empty".to_string()));
        }

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_concurrent_executions == 0 {
            return Err(EngineError::Config(
                "maxConcurrentExecutions must be at least 1".to_string(),
            ));
        }
        if self.default_timeout == 0 {
            return Err(EngineError::Config(
                "defaultTimeout must be greater than zero".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(EngineError::Config(
                "historyCapacity must be at least 1".to_string(),
            ));
        }
        if self.virtual_fs.max_files == 0 || self.virtual_fs.max_file_size_mb == 0 {
            return Err(EngineError::Config(
                "virtualFs limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<bool>("TOOLGATE_SANDBOX_MODE") {
            debug!("sandboxMode overridden from environment: {}", v);
            self.sandbox_mode = v;
        }
        if let Some(v) = env_parse::<u64>("TOOLGATE_TIMEOUT_MS") {
            debug!("defaultTimeout overridden from environment: {}", v);
            self.default_timeout = v;
        }
        if let Some(v) = env_parse::<usize>("TOOLGATE_MAX_CONCURRENT") {
            debug!("maxConcurrentExecutions overridden from environment: {}", v);
            self.max_concurrent_executions = v;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
