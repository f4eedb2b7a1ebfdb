//! Configuration Loader
//!
//! Environment-aware loading: discovers the base and per-environment TOML files,
//! applies `OPSFLOW__*` overrides, validates, and logs a masked copy.

use ::config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::OrchestratorConfig;
use crate::constants::system;
use crate::error::Result;

const BASE_FILE_STEM: &str = "opsflow";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Like [`load_from_directory_with_env`](Self::load_from_directory_with_env) but
    /// reads overrides from `overrides` instead of the process environment.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config: OrchestratorConfig = Config::builder()
            .add_source(File::from(Self::base_file(&config_directory)).required(false))
            .add_source(
                File::from(Self::environment_file(&config_directory, environment)).required(false),
            )
            .add_source(
                Environment::with_prefix(system::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(overrides),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&manager.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %manager.environment,
            worker_pool_size = manager.config.scheduler.worker_pool_size,
            database = %mask_database_url(&manager.config.database.url),
            "Configuration loaded"
        );

        Ok(Arc::new(manager))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked, for logging and diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        if let Some(url) = value.pointer_mut("/database/url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(mask_database_url(raw));
            }
        }
        sanitize_json_recursive(&mut value, &["password", "secret", "token", "credential"]);
        value
    }

    /// `OPSFLOW_ENV`, lowercased, or `development`
    fn detect_environment() -> String {
        env::var("OPSFLOW_ENV")
            .unwrap_or_else(|_| system::DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase()
    }

    fn base_file(config_directory: &Path) -> PathBuf {
        config_directory.join(format!("{BASE_FILE_STEM}.toml"))
    }

    fn environment_file(config_directory: &Path, environment: &str) -> PathBuf {
        config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"))
    }
}

/// Replace the password component of a connection URL
pub fn mask_database_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &url[authority_start..];
    let Some(at) = rest.find('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..authority_start],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                if sensitive_patterns.iter().any(|p| key_lower.contains(p)) {
                    *val = serde_json::Value::String("[MASKED]".to_string());
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}
