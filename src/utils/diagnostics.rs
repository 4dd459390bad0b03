//! Session Diagnostics
//!
//! Describes the graphical session the screen is about to connect to.

use tracing::{info, warn};

/// Session environment relevant to X11
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// `DISPLAY`
    pub display: Option<String>,
    /// `XDG_SESSION_TYPE` (x11, wayland, tty)
    pub session_type: Option<String>,
    /// `XDG_CURRENT_DESKTOP`
    pub desktop: Option<String>,
    /// `WAYLAND_DISPLAY`; set when talking to Xwayland
    pub wayland_display: Option<String>,
    /// `XAUTHORITY`
    pub xauthority: Option<String>,
}

impl SessionInfo {
    /// Read the session from the environment
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            display: get("DISPLAY"),
            session_type: get("XDG_SESSION_TYPE"),
            desktop: get("XDG_CURRENT_DESKTOP"),
            wayland_display: get("WAYLAND_DISPLAY"),
            xauthority: get("XAUTHORITY"),
        }
    }

    /// X clients here go through Xwayland
    pub fn is_xwayland(&self) -> bool {
        self.wayland_display.is_some() || self.session_type.as_deref() == Some("wayland")
    }

    /// Log session information
    pub fn log(&self) {
        let or_unset = |value: &Option<String>| value.clone().unwrap_or_else(|| "(unset)".into());

        info!("=== Session ===");
        info!("  DISPLAY: {}", or_unset(&self.display));
        info!("  Session type: {}", or_unset(&self.session_type));
        info!("  Desktop: {}", or_unset(&self.desktop));
        info!("  XAUTHORITY: {}", or_unset(&self.xauthority));
        if self.is_xwayland() {
            warn!("  Running under Xwayland; clipboard and screen saver reach X clients only");
        }
    }
}

/// Log complete diagnostics on startup
pub fn log_startup_diagnostics() {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║          Startup Diagnostics                               ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    SessionInfo::gather().log();

    info!("=== Build ===");
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));
    #[cfg(debug_assertions)]
    info!("  Build: debug");
    #[cfg(not(debug_assertions))]
    info!("  Build: release");
}
