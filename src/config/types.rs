//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Display selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Display to open (e.g. ":1"); takes precedence over `DISPLAY`
    #[serde(default)]
    pub name: Option<String>,

    /// Display used when neither `name` nor `DISPLAY` is set
    #[serde(default = "default_display_fallback")]
    pub fallback: String,
}

fn default_display_fallback() -> String {
    ":0.0".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            name: None,
            fallback: default_display_fallback(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLoopConfig {
    /// How the loop waits for events ("auto", "poll", "sleep")
    #[serde(default = "default_wait_strategy")]
    pub wait_strategy: String,

    /// Sleep between event checks when waiting by sleep-and-repoll
    #[serde(default = "default_sleep_interval_ms")]
    pub sleep_interval_ms: u64,
}

fn default_wait_strategy() -> String {
    "auto".to_string()
}

fn default_sleep_interval_ms() -> u64 {
    10
}

impl EventLoopConfig {
    /// Sleep interval as a duration
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            wait_strategy: default_wait_strategy(),
            sleep_interval_ms: default_sleep_interval_ms(),
        }
    }
}

/// Clipboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    /// How long to wait for a selection owner to answer (milliseconds)
    #[serde(default = "default_conversion_timeout_ms")]
    pub conversion_timeout_ms: u64,

    /// Largest reply written in one property before switching to INCR
    /// (bytes, 0 = derive from the server's request limit)
    #[serde(default)]
    pub chunk_size: usize,
}

fn default_conversion_timeout_ms() -> u64 {
    1000
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            conversion_timeout_ms: default_conversion_timeout_ms(),
            chunk_size: 0,
        }
    }
}

/// Screen saver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenSaverConfig {
    /// Report screen saver activation to the event handler
    #[serde(default = "default_true")]
    pub notify: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScreenSaverConfig {
    fn default() -> Self {
        Self { notify: true }
    }
}

/// Settings for the bundled monitor binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Period of the heartbeat that logs the pointer position; must be
    /// greater than 0
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error") used when no
    /// `-v` is given
    pub level: String,

    /// Directory for `lamco-x11-screen.log` when no `--log-file` is given
    /// (None = stdout only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}
