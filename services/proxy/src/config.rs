//! Proxy configuration.
//!
//! TOML-backed with serde defaults, so an empty file (or no file at all)
//! yields a runnable development configuration. `validate()` is called once
//! at startup; invalid values fail fast before any broker interaction.

use crate::router::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_app_id() -> String {
    "topic-bridge".to_string()
}

fn default_registry_topic() -> String {
    "mcp_service_registry".to_string()
}

fn default_partitions() -> u32 {
    6
}

fn default_replication() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Application identity; consumer group ids derive from it.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    #[serde(default)]
    pub router: RouterConfig,
}

/// Registry topic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Compacted topic holding the registration map.
    #[serde(default = "default_registry_topic")]
    pub topic: String,
}

/// Topic creation defaults for the registry and the data topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Desired replication; capped to the live broker count at creation.
    #[serde(default = "default_replication")]
    pub replication_factor: u32,
}

/// Request/response routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Upper bound on a request's wait for its response.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Expiry sweep period; defaults to half the request timeout.
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            registry: RegistryConfig::default(),
            provisioning: ProvisioningConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            topic: default_registry_topic(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            replication_factor: default_replication(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            sweep_interval_ms: None,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl ProxyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            return Err(ConfigError::Invalid("app_id must not be empty".to_string()));
        }
        if self.registry.topic.is_empty() {
            return Err(ConfigError::Invalid(
                "registry.topic must not be empty".to_string(),
            ));
        }
        if self.provisioning.partitions == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.partitions must be at least 1".to_string(),
            ));
        }
        if self.provisioning.replication_factor == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.replication_factor must be at least 1".to_string(),
            ));
        }
        if self.router.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "router.request_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.router.sweep_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "router.sweep_interval_ms must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Consumer group of the registry mirror.
    pub fn registry_group(&self) -> String {
        format!("{}-registry", self.app_id)
    }

    /// Consumer group of the response router.
    pub fn responses_group(&self) -> String {
        format!("{}-responses", self.app_id)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.router.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        match self.router.sweep_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis(self.router.request_timeout_ms / 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ProxyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.registry_group(), "topic-bridge-registry");
        assert_eq!(config.responses_group(), "topic-bridge-responses");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(15));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
app_id = "bridge-test"

[router]
request_timeout_ms = 5000
duplicate_policy = "replace_original"
"#
        )
        .unwrap();

        let config = ProxyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.app_id, "bridge-test");
        assert_eq!(config.registry.topic, "mcp_service_registry");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.router.duplicate_policy, DuplicatePolicy::ReplaceOriginal);
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = ProxyConfig::default();
        config.router.request_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_registry_topic() {
        let mut config = ProxyConfig::default();
        config.registry.topic.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
