//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments
//!
//! Every section is optional in the file; missing sections take their
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod types;

pub use types::{
    ClipboardConfig, DisplayConfig, EventLoopConfig, LoggingConfig, MonitorConfig,
    ScreenSaverConfig,
};

use crate::clipboard::SlotOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Display selection
    #[serde(default)]
    pub display: DisplayConfig,
    /// Event loop configuration
    #[serde(default)]
    pub event_loop: EventLoopConfig,
    /// Clipboard configuration
    #[serde(default)]
    pub clipboard: ClipboardConfig,
    /// Screen saver configuration
    #[serde(default)]
    pub screensaver: ScreenSaverConfig,
    /// Monitor binary configuration
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.event_loop.wait_strategy.as_str() {
            "auto" | "poll" | "sleep" => {}
            _ => anyhow::bail!(
                "Invalid wait strategy: {}",
                self.event_loop.wait_strategy
            ),
        }

        if self.event_loop.sleep_interval_ms == 0 {
            anyhow::bail!("event_loop.sleep_interval_ms must be greater than 0");
        }

        if self.clipboard.conversion_timeout_ms == 0 {
            anyhow::bail!("clipboard.conversion_timeout_ms must be greater than 0");
        }

        if self.monitor.heartbeat_interval_ms == 0 {
            anyhow::bail!("monitor.heartbeat_interval_ms must be greater than 0");
        }

        if self.display.fallback.is_empty() {
            anyhow::bail!("display.fallback cannot be empty");
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, display: Option<String>) -> Self {
        if let Some(name) = display {
            self.display.name = Some(name);
        }
        self
    }

    /// Display to open: explicit name, then `DISPLAY`, then the fallback
    pub fn resolve_display(&self) -> String {
        self.resolve_display_with(std::env::var("DISPLAY").ok())
    }

    fn resolve_display_with(&self, env_display: Option<String>) -> String {
        self.display
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .or(env_display.filter(|name| !name.is_empty()))
            .unwrap_or_else(|| self.display.fallback.clone())
    }

    /// Clipboard slot tunables
    pub fn slot_options(&self) -> SlotOptions {
        SlotOptions {
            conversion_timeout: Duration::from_millis(self.clipboard.conversion_timeout_ms),
            chunk_size: self.clipboard.chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.display.fallback, ":0.0");
        assert_eq!(config.event_loop.wait_strategy, "auto");
        assert_eq!(config.event_loop.sleep_interval(), Duration::from_millis(10));
        assert_eq!(config.clipboard.conversion_timeout_ms, 1000);
        assert!(config.screensaver.notify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_strategy() {
        let mut config = Config::default_config();
        config.event_loop.wait_strategy = "busy".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_interval() {
        let mut config = Config::default_config();
        config.event_loop.sleep_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_heartbeat() {
        let mut config = Config::default_config();
        config.monitor.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_level() {
        let mut config = Config::default_config();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[display]\nname = \":3\"\n").unwrap();
        assert_eq!(config.display.name.as_deref(), Some(":3"));
        assert_eq!(config.display.fallback, ":0.0");
        assert_eq!(config.event_loop.sleep_interval_ms, 10);
    }

    #[test]
    fn test_display_resolution_order() {
        let mut config = Config::default_config();
        assert_eq!(config.resolve_display_with(None), ":0.0");
        assert_eq!(config.resolve_display_with(Some(":5".into())), ":5");
        assert_eq!(config.resolve_display_with(Some(String::new())), ":0.0");

        config = config.with_overrides(Some(":9".into()));
        assert_eq!(config.resolve_display_with(Some(":5".into())), ":9");
    }

    #[test]
    fn test_slot_options() {
        let mut config = Config::default_config();
        config.clipboard.chunk_size = 4096;
        let options = config.slot_options();
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.conversion_timeout, Duration::from_secs(1));
    }
}
