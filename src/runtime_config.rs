//! # Runtime Configuration
//!
//! Coroutine runtime settings loaded from environment variables.
//!
//! ### `VIEW_STACK_SIZE`
//!
//! Stack size of handler coroutines, decimal (`65536`) or hexadecimal
//! (`0x10000`). Default: `0x10000` (64 KB).
//!
//! Total virtual memory is roughly `stack_size × concurrent suspended
//! handlers`. Too small overflows the stack; too large wastes memory.
//!
//! ### `VIEW_WORKERS`
//!
//! Number of `may` scheduler threads. Default: `1`, a single cooperative
//! scheduler. Raising it runs coroutines in parallel; handlers must then be
//! prepared for true concurrency.
//!
//! ```rust
//! use view_dispatch::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! assert!(config.stack_size > 0);
//! ```

use std::env;

use tracing::info;

/// Default coroutine stack size (64 KB).
pub const DEFAULT_STACK_SIZE: usize = 0x10000;
/// Default scheduler thread count.
pub const DEFAULT_WORKERS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes
    pub stack_size: usize,
    /// `may` scheduler threads
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables. Unparseable or zero
    /// values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_values(
            env::var("VIEW_STACK_SIZE").ok().as_deref(),
            env::var("VIEW_WORKERS").ok().as_deref(),
        )
    }

    fn from_values(stack_size: Option<&str>, workers: Option<&str>) -> Self {
        let stack_size = stack_size
            .and_then(parse_size)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_STACK_SIZE);
        let workers = workers
            .and_then(|w| w.trim().parse().ok())
            .filter(|w| *w > 0)
            .unwrap_or(DEFAULT_WORKERS);
        Self {
            stack_size,
            workers,
        }
    }

    /// Configure the global `may` runtime. Call once, before serving.
    pub fn apply(&self) {
        may::config()
            .set_workers(self.workers)
            .set_stack_size(self.stack_size);
        info!(
            stack_size = self.stack_size,
            workers = self.workers,
            "Coroutine runtime configured"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_and_decimal_stack_size() {
        assert_eq!(RuntimeConfig::from_values(Some("0x8000"), None).stack_size, 0x8000);
        assert_eq!(RuntimeConfig::from_values(Some("32768"), None).stack_size, 32768);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = RuntimeConfig::from_values(Some("huge"), Some("0"));
        assert_eq!(config, RuntimeConfig::default());
        let config = RuntimeConfig::from_values(Some("0xZZ"), Some("many"));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_workers() {
        assert_eq!(RuntimeConfig::from_values(None, Some("4")).workers, 4);
    }
}
