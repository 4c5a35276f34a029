use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub balancer: BalancerConfig,
    pub backend: BackendConfig,
    pub dtmf: DtmfConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// "round_robin" or "media_affinity"
    pub strategy: String,
    pub probe_interval_secs: u64,
    /// Consecutive probe failures before a host is taken offline
    pub failure_threshold: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: "round_robin".to_string(),
            probe_interval_secs: 15,
            failure_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub request_timeout_secs: u64,
    /// Codec cross-host video transposers are pinned to
    pub transposition_codec: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            transposition_codec: "H264".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmfConfig {
    /// Inter-digit timeout; a stale queue is discarded past it
    pub timeout_ms: u64,
    /// Digits per command
    pub code_length: usize,
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            code_length: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (CONFAB_BALANCER_STRATEGY, etc.)
        builder = builder.add_source(
            Environment::with_prefix("CONFAB")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.balancer.strategy, "round_robin");
        assert_eq!(config.dtmf.timeout_ms, 3000);
        assert_eq!(config.dtmf.code_length, 2);
        assert_eq!(config.backend.transposition_codec, "H264");
    }

    #[test]
    fn test_load_with_defaults() {
        let config = Config::from_env().unwrap_or_default();
        assert!(config.backend.request_timeout_secs > 0);
        assert!(!config.logging.level.is_empty());
    }
}
