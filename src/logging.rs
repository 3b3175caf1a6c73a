//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a JSON
//! or pretty `fmt` layer. Configuration comes from the `[logging]` section of
//! the config file or from the environment:
//!
//! - `VIEW_LOG_LEVEL`: trace/debug/info/warn/error (default `info`)
//! - `VIEW_LOG_FORMAT`: `json` (default) or `pretty`
//! - `VIEW_LOG_TARGET_FILTER`: extra comma-separated filter directives
//! - `VIEW_LOG_INCLUDE_LOCATION`: `true` to log file and line
//!
//! `RUST_LOG`, when set, takes precedence over the level.

use std::env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub level: String,
    pub format: LogFormat,
    /// Extra filter directives (comma-separated), e.g. `view_dispatch::router=debug`
    pub target_filter: Option<String>,
    /// Include file:line location
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Parse configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Environment variables override the values already set.
    #[must_use]
    pub fn merge_env(mut self) -> Self {
        if let Ok(level) = env::var("VIEW_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("VIEW_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        if let Ok(filter) = env::var("VIEW_LOG_TARGET_FILTER") {
            self.target_filter = Some(filter);
        }
        if let Some(location) = env::var("VIEW_LOG_INCLUDE_LOCATION")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.include_location = location;
        }
        self
    }

    /// Configuration for local development.
    #[must_use]
    pub fn default_dev() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            target_filter: None,
            include_location: true,
        }
    }

    fn level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));

        // may_minihttp logs every client disconnect; keep warn and above.
        if let Ok(directive) = "may_minihttp::http_server=warn".parse() {
            filter = filter.add_directive(directive);
        }

        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {directive}"),
                }
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")
}
