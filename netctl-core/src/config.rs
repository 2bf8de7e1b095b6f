//! Configuration management.

use crate::error::{NetctlError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persistent configuration for netctl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection_uri: String,
    pub bridge: String,
    /// Name reserved for the private network created by minikube
    pub reserved_network_name: String,
    pub lock_dir: String,
    pub subnet_step: u8,
    pub subnet_tries: u32,
    pub create_attempts: u32,
    pub delete_timeout_secs: u64,
    pub reservation_timeout_ms: u64,
    pub lock_poll_interval_ms: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_uri: "qemu:///system".to_string(),
            bridge: "virbr0".to_string(),
            reserved_network_name: "minikube-net".to_string(),
            lock_dir: paths::lock_dir().to_string_lossy().to_string(),
            subnet_step: 11,
            subnet_tries: 20,
            create_attempts: 5,
            delete_timeout_secs: 10,
            reservation_timeout_ms: 1,
            lock_poll_interval_ms: 500,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from disk, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| NetctlError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| NetctlError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the allocator or create loop meaningless.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Err(NetctlError::InvalidConfig { reason: reason.to_string() });
        if self.subnet_step == 0 {
            return invalid("subnet_step must be at least 1");
        }
        if self.subnet_tries == 0 {
            return invalid("subnet_tries must be at least 1");
        }
        if self.create_attempts == 0 {
            return invalid("create_attempts must be at least 1");
        }
        if self.reserved_network_name.is_empty() {
            return invalid("reserved_network_name must not be empty");
        }
        Ok(())
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            reserved_network_name: self.reserved_network_name.clone(),
            subnet_step: self.subnet_step,
            subnet_tries: self.subnet_tries,
            create_attempts: self.create_attempts,
            delete_timeout: Duration::from_secs(self.delete_timeout_secs),
        }
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Tunables of the network lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub reserved_network_name: String,
    pub subnet_step: u8,
    pub subnet_tries: u32,
    pub create_attempts: u32,
    /// Ceiling for the destroy/undefine retry loop
    pub delete_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Config::default().lifecycle_settings()
    }
}
