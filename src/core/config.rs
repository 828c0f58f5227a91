//! # Configuration Module
//!
//! This module holds the deployment settings the reconciler consumes: which strategy to
//! use, how to reach the gateway admin API, which tags scope the sync, and the knobs of
//! the periodic driver.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support (`RECONCILER_<FIELD>`)
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::config_error;
use crate::core::error::{ReconcileError, ReconcileResult};

/// Main reconciler configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Reconciliation strategy (deployment-mode flag)
    #[serde(default)]
    pub mode: SyncMode,

    /// Gateway admin API settings
    pub gateway: GatewayConnection,

    /// Always run a full pass, ignoring the fingerprint of the last sync
    #[serde(default)]
    pub reverse_sync: bool,

    /// Optional `namespace/name` reference to a secret holding custom entities
    #[serde(default)]
    pub custom_entities_secret: Option<String>,

    /// Interval between two sync invocations of the driver
    #[serde(with = "humantime_serde", default = "default_sync_period")]
    pub sync_period: Duration,

    /// Path of the desired-state snapshot read by the driver
    #[serde(default)]
    pub desired_state_path: Option<PathBuf>,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconciliation strategy selected once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replace the whole gateway configuration through the bulk endpoint
    #[default]
    FullPush,
    /// Compute and apply an entity-level delta
    DiffApply,
}

/// How to reach and scope the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConnection {
    /// Base URL of the admin API
    pub admin_url: String,

    /// Value of the `Kong-Admin-Token` header, when the admin API is protected
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Gateway version, used as a compatibility hint when rendering target state
    #[serde(default)]
    pub version: Option<semver::Version>,

    /// Whether the gateway supports tagging entities
    #[serde(default)]
    pub has_tag_support: bool,

    /// Tags scoping the entities this reconciler owns
    #[serde(default)]
    pub filter_tags: Vec<String>,

    /// Concurrency bound handed to the solver
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for a single admin API request
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

fn default_sync_period() -> Duration {
    Duration::from_secs(3)
}

fn default_concurrency() -> usize {
    10
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Default for GatewayConnection {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:8001".to_string(),
            admin_token: None,
            version: None,
            has_tag_support: false,
            filter_tags: Vec::new(),
            concurrency: default_concurrency(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            gateway: GatewayConnection::default(),
            reverse_sync: false,
            custom_entities_secret: None,
            sync_period: default_sync_period(),
            desired_state_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a YAML file (or JSON, decided by the extension)
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ReconcileResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ReconcileError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: SyncConfig = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .map_err(|e| ReconcileError::config(format!("Failed to parse JSON config: {}", e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| ReconcileError::config(format!("Failed to parse config: {}", e)))?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: RECONCILER_<FIELD>
    /// For example: RECONCILER_ADMIN_URL=http://kong-admin:8001
    pub fn apply_env_overrides(&mut self) -> ReconcileResult<()> {
        use std::env;

        if let Ok(mode) = env::var("RECONCILER_MODE") {
            self.mode = match mode.as_str() {
                "full_push" => SyncMode::FullPush,
                "diff_apply" => SyncMode::DiffApply,
                other => return Err(config_error!("Invalid RECONCILER_MODE: {}", other)),
            };
        }

        if let Ok(url) = env::var("RECONCILER_ADMIN_URL") {
            self.gateway.admin_url = url;
        }

        if let Ok(token) = env::var("RECONCILER_ADMIN_TOKEN") {
            self.gateway.admin_token = Some(token);
        }

        if let Ok(version) = env::var("RECONCILER_GATEWAY_VERSION") {
            self.gateway.version = Some(
                version
                    .parse()
                    .map_err(|e| config_error!("Invalid RECONCILER_GATEWAY_VERSION: {}", e))?,
            );
        }

        if let Ok(tags) = env::var("RECONCILER_FILTER_TAGS") {
            self.gateway.filter_tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(concurrency) = env::var("RECONCILER_CONCURRENCY") {
            self.gateway.concurrency = concurrency
                .parse()
                .map_err(|e| config_error!("Invalid RECONCILER_CONCURRENCY: {}", e))?;
        }

        if let Ok(enabled) = env::var("RECONCILER_REVERSE_SYNC") {
            self.reverse_sync = enabled
                .parse()
                .map_err(|e| config_error!("Invalid RECONCILER_REVERSE_SYNC: {}", e))?;
        }

        if let Ok(secret) = env::var("RECONCILER_CUSTOM_ENTITIES_SECRET") {
            self.custom_entities_secret = Some(secret);
        }

        if let Ok(period) = env::var("RECONCILER_SYNC_PERIOD") {
            self.sync_period = humantime::parse_duration(&period)
                .map_err(|e| config_error!("Invalid RECONCILER_SYNC_PERIOD: {}", e))?;
        }

        if let Ok(level) = env::var("RECONCILER_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> ReconcileResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Url::parse(&self.gateway.admin_url) {
            errors.push(format!("Invalid admin_url '{}': {}", self.gateway.admin_url, e));
        }

        if self.gateway.concurrency == 0 {
            errors.push("concurrency must be greater than 0".to_string());
        }

        if self.gateway.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }

        if self.sync_period.is_zero() {
            errors.push("sync_period must be greater than 0".to_string());
        }

        if let Some(secret) = &self.custom_entities_secret {
            if crate::custom_entities::SecretRef::parse(secret).is_err() {
                errors.push(format!(
                    "custom_entities_secret must be of the form namespace/name, got '{}'",
                    secret
                ));
            }
        }

        if self.gateway.filter_tags.iter().any(|t| t.is_empty()) {
            errors.push("filter_tags cannot contain empty tags".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if !errors.is_empty() {
            return Err(ReconcileError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Tags used to scope the sync, empty when the gateway cannot filter by tag
    pub fn selector_tags(&self) -> Vec<String> {
        if self.gateway.has_tag_support {
            self.gateway.filter_tags.clone()
        } else {
            Vec::new()
        }
    }
}
