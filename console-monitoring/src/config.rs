//! Configuration management for the query browser
//!
//! This module provides a centralized configuration system that loads settings from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::duration::{self, ONE_SECOND};
use crate::logging::LoggingConfig;

/// Main configuration struct for the query browser
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Metrics endpoint configuration
    pub endpoint: EndpointConfig,
    /// Polling configuration
    pub polling: PollingConfig,
    /// Resolution limits
    pub limits: SamplingLimits,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Console base URL; query paths are appended to it
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Namespace for tenancy-scoped queries
    pub namespace: Option<String>,
    /// Server-side query timeout, e.g. "30s"
    pub query_timeout: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            token: None,
            namespace: None,
            query_timeout: "30s".to_string(),
        }
    }
}

/// How often graphs are refreshed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "mode", content = "interval_ms")]
pub enum PollSetting {
    /// Derived from the span
    #[default]
    Auto,
    /// Fixed interval in milliseconds
    Fixed(u64),
    /// Never refresh
    Off,
}

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub poll: PollSetting,
    /// Initial span text
    pub default_span: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll: PollSetting::Auto,
            default_span: "30m".to_string(),
        }
    }
}

/// Resolution limits for the adaptive sampler
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingLimits {
    /// Try to keep the total number of rendered points under this
    pub max_data_points_soft: usize,
    /// Refuse to render past this many points once at minimum resolution
    pub max_data_points_hard: usize,
    /// Sample count bounds per series
    pub min_samples: usize,
    pub max_samples: usize,
    /// Fall back to line graphs past this many series
    pub max_stacks: usize,
    /// Relative change needed before re-fetching at a new sample count
    pub samples_leeway: f64,
    /// Smallest step between samples, in milliseconds
    pub min_step: f64,
    /// Narrowest zoom window, in milliseconds
    pub min_span: f64,
    /// Shortest automatic poll interval, in milliseconds
    pub min_poll_interval: f64,
}

impl Default for SamplingLimits {
    fn default() -> Self {
        Self {
            max_data_points_soft: 6000,
            max_data_points_hard: 10000,
            min_samples: 10,
            max_samples: 300,
            max_stacks: 20,
            samples_leeway: 0.2,
            min_step: 5.0 * ONE_SECOND,
            min_span: 30.0 * ONE_SECOND,
            min_poll_interval: 10.0 * ONE_SECOND,
        }
    }
}

impl SamplingLimits {
    /// Reject limits the sampler cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples == 0 || self.min_samples > self.max_samples {
            return Err(ConfigError::Invalid(format!(
                "sample bounds must satisfy 0 < min_samples <= max_samples (got {}..{})",
                self.min_samples, self.max_samples
            )));
        }
        if self.max_data_points_soft == 0 || self.max_data_points_soft > self.max_data_points_hard {
            return Err(ConfigError::Invalid(
                "max_data_points_soft must be positive and not exceed max_data_points_hard".to_string(),
            ));
        }
        if !(self.samples_leeway >= 0.0) {
            return Err(ConfigError::Invalid("samples_leeway must be >= 0".to_string()));
        }
        for (name, value) in [
            ("min_step", self.min_step),
            ("min_span", self.min_span),
            ("min_poll_interval", self.min_poll_interval),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl MonitoringConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(config_path) = Self::find_config_file() {
            match Self::load_from_file(&config_path) {
                Ok(file_config) => config = file_config,
                Err(e) => tracing::warn!("Ignoring config file: {}", e),
            }
        }

        config.apply_env_overrides();

        config
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        duration::parse_span(&self.polling.default_span)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let PollSetting::Fixed(0) = self.polling.poll {
            return Err(ConfigError::Invalid("fixed poll interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Initial span in milliseconds
    pub fn default_span(&self) -> f64 {
        duration::parse_span(&self.polling.default_span).unwrap_or(duration::DEFAULT_TIMESPAN)
    }

    /// Server-side query timeout, if it parses
    pub fn query_timeout(&self) -> Option<Duration> {
        duration::parse_span(&self.endpoint.query_timeout)
            .ok()
            .map(|ms| Duration::from_millis(ms as u64))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Environment variable override
            std::env::var("CONSOLE_MONITORING_CONFIG").ok().map(PathBuf::from),
            // Standard locations
            Some(PathBuf::from("/etc/console/monitoring.toml")),
            Some(PathBuf::from("./monitoring.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CONSOLE_PROMETHEUS_URL") {
            self.endpoint.base_url = url;
        }
        if let Ok(namespace) = std::env::var("CONSOLE_NAMESPACE") {
            self.endpoint.namespace = Some(namespace).filter(|n| !n.is_empty());
        }
        if let Ok(token) = std::env::var("CONSOLE_TOKEN") {
            self.endpoint.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(interval) = std::env::var("CONSOLE_POLL_INTERVAL") {
            self.polling.poll = match interval.as_str() {
                "off" => PollSetting::Off,
                "auto" => PollSetting::Auto,
                text => match duration::parse_span(text) {
                    Ok(ms) => PollSetting::Fixed(ms as u64),
                    Err(_) => self.polling.poll,
                },
            };
        }
        if let Ok(level) = std::env::var("CONSOLE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}
