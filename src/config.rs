use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::{GateConfig, RetryPolicy};
use crate::throttle::ThrottleSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub http: HttpConfig,
    pub gate: GateSettings,
    pub throttle: ThrottleSettings,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub default_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: f64,
    pub timeout_ms: u64,
    pub body_log_limit: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30000,
            jitter: 0.1,
            timeout_ms: 30000,
            body_log_limit: 200,
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.default_retries,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.jitter,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub max_concurrent: usize,
    pub min_request_interval_ms: u64,
    pub rate_limit_backoff_ms: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            min_request_interval_ms: 200,
            rate_limit_backoff_ms: 5000,
        }
    }
}

impl GateSettings {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            max_concurrent: self.max_concurrent,
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            rate_limit_backoff: Duration::from_millis(self.rate_limit_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://jules.googleapis.com/v1alpha".to_string(),
            api_key_env: "JULES_API_KEY".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            http: HttpConfig::default(),
            gate: GateSettings::default(),
            throttle: ThrottleSettings::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.http.default_retries == 0 {
            eyre::bail!("http.default_retries must be > 0");
        }
        if self.http.base_backoff_ms > self.http.max_backoff_ms {
            eyre::bail!("http.base_backoff_ms must not exceed http.max_backoff_ms");
        }
        if !(0.0..=1.0).contains(&self.http.jitter) {
            eyre::bail!("http.jitter must be within [0, 1]");
        }
        if self.http.timeout_ms == 0 {
            eyre::bail!("http.timeout_ms must be > 0");
        }
        if self.gate.max_concurrent == 0 {
            eyre::bail!("gate.max_concurrent must be > 0");
        }
        Ok(())
    }

    /// Read the session API key from the configured environment variable
    pub fn api_key(&self) -> crate::Result<String> {
        std::env::var(&self.api.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| crate::SessionGuardError::MissingApiKey {
                env_var: self.api.api_key_env.clone(),
            })
    }
}
