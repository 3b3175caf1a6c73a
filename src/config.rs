//! Application configuration files.
//!
//! A configuration has three sections, each optional:
//!
//! ```toml
//! [app]
//! dev = true
//! handler_timeout_ms = 2000
//!
//! [network]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [logging]
//! level = "debug"
//! format = "pretty"
//!
//! [env]
//! FEATURE_FLAG = "on"
//! ```
//!
//! Files are TOML, JSON, or YAML, picked by extension. Unknown keys are
//! rejected so typos fail loudly at startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::logging::LogConfig;

/// File names looked up by [`discover_config`], in priority order.
pub const CONFIG_TARGETS: [&str; 4] = ["view.toml", "view.json", "view.yaml", "view.yml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported config format for {0} (expected .toml, .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Dev mode: failure details are included in built-in error bodies
    pub dev: bool,
    /// Deadline for suspended handlers; `None` waits indefinitely
    pub handler_timeout_ms: Option<u64>,
}

impl AppConfig {
    #[must_use]
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl NetworkConfig {
    /// `host:port`, ready for `ToSocketAddrs`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub app: AppConfig,
    pub network: NetworkConfig,
    pub logging: LogConfig,
    /// Environment variables exported before the application starts
    pub env: BTreeMap<String, String>,
}

impl Config {
    /// Build a configuration from a JSON value (e.g. overrides assembled in
    /// code). Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] for unknown keys or wrong types,
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge `overrides` on top of this configuration. Objects merge key by
    /// key; any other value replaces.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_value`] for the merged result.
    pub fn with_overrides(&self, overrides: Value) -> Result<Self, ConfigError> {
        let mut base = serde_json::to_value(self)?;
        merge(&mut base, overrides);
        Self::from_value(base)
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a zero port or an empty host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.port == 0 {
            return Err(ConfigError::Invalid("network.port must not be 0".into()));
        }
        if self.network.host.trim().is_empty() {
            return Err(ConfigError::Invalid("network.host must not be empty".into()));
        }
        if self.app.handler_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "app.handler_timeout_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Export the `[env]` section into the process environment.
    pub fn export_env(&self) {
        for (key, value) in &self.env {
            std::env::set_var(key, value);
        }
    }
}

fn merge(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Load a configuration file, choosing the parser by extension.
///
/// # Errors
///
/// Any [`ConfigError`]: unreadable file, unknown extension, parse failure,
/// unknown keys, or failed validation.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let config: Config = match ext.as_deref() {
        Some("toml") => toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?,
        Some("json") => serde_json::from_str(&content)?,
        Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };

    config.validate()?;
    debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Load the first of [`CONFIG_TARGETS`] present in `dir`, or the defaults
/// when none exists.
///
/// # Errors
///
/// Errors from [`load_config`] for the file that was found.
pub fn discover_config(dir: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let dir = dir.as_ref();
    for name in CONFIG_TARGETS {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return load_config(candidate);
        }
    }
    debug!(dir = %dir.display(), "No configuration file found, using defaults");
    Ok(Config::default())
}
