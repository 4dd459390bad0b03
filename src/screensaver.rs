//! Screen saver control
//!
//! [`XScreenSaver`] drives the core-protocol screen saver. It remembers the
//! server's timeout when created so `disable()`/`enable()` can toggle it, and
//! restores the original parameters when dropped.
//!
//! Activation changes made through this object are announced to the notify
//! window with a 32-bit `SCREENSAVER` client message (1 = activated,
//! 0 = deactivated), which the screen turns into
//! [`ScreenEventHandler::on_screensaver`](crate::screen::ScreenEventHandler::on_screensaver).

use std::sync::Arc;

use tracing::{debug, warn};
use x11rb::protocol::xproto::{Atom, Window};
use x11rb::protocol::Event;

use crate::display::{DisplayConnection, ScreenSaverSettings};
use crate::error::Result;

/// Screen saver collaborator
#[cfg_attr(test, mockall::automock)]
pub trait ScreenSaver: Send {
    /// Let the screen saver start on idle again
    fn enable(&mut self);

    /// Keep the screen saver from starting on idle
    fn disable(&mut self);

    /// Window that receives activation notices (`None` to stop)
    fn set_notify(&mut self, window: Option<Window>);

    /// Start the screen saver now
    fn activate(&mut self);

    /// Stop the screen saver now
    fn deactivate(&mut self);

    /// Look at an event before the screen handles it; true consumes it
    fn on_pre_dispatch(&mut self, event: &Event) -> bool;
}

/// Core-protocol screen saver
pub struct XScreenSaver {
    display: Arc<dyn DisplayConnection>,
    signal: Atom,
    original: ScreenSaverSettings,
    notify: Option<Window>,
    disabled: bool,
}

impl XScreenSaver {
    /// Take over the screen saver; `signal` is the `SCREENSAVER` atom
    pub fn new(display: Arc<dyn DisplayConnection>, signal: Atom) -> Result<Self> {
        let original = display.screen_saver()?;
        debug!(
            "Screen saver timeout {}s, interval {}s",
            original.timeout, original.interval
        );
        Ok(Self {
            display,
            signal,
            original,
            notify: None,
            disabled: false,
        })
    }

    /// Whether idle activation is currently suppressed
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn apply_timeout(&self, timeout: i16) {
        let settings = ScreenSaverSettings {
            timeout,
            ..self.original
        };
        if let Err(e) = self.display.set_screen_saver(&settings) {
            warn!("Failed to set screen saver timeout: {}", e);
        }
    }

    fn force(&self, active: bool) {
        if let Err(e) = self.display.force_screen_saver(active) {
            warn!("Failed to force screen saver: {}", e);
            return;
        }
        if let Some(window) = self.notify {
            let data = [u32::from(active), 0, 0, 0, 0];
            if let Err(e) = self.display.send_client_message(window, self.signal, data) {
                warn!("Failed to send screen saver notice: {}", e);
            }
        }
    }
}

impl ScreenSaver for XScreenSaver {
    fn enable(&mut self) {
        self.disabled = false;
        self.apply_timeout(self.original.timeout);
    }

    fn disable(&mut self) {
        self.disabled = true;
        self.apply_timeout(0);
    }

    fn set_notify(&mut self, window: Option<Window>) {
        self.notify = window;
    }

    fn activate(&mut self) {
        self.force(true);
    }

    fn deactivate(&mut self) {
        self.force(false);
    }

    fn on_pre_dispatch(&mut self, event: &Event) -> bool {
        if let Event::DestroyNotify(ev) = event {
            if Some(ev.window) == self.notify {
                debug!("Screen saver notify window 0x{:x} destroyed", ev.window);
                self.notify = None;
            }
        }
        false
    }
}

impl Drop for XScreenSaver {
    fn drop(&mut self) {
        if let Err(e) = self.display.set_screen_saver(&self.original) {
            debug!("Could not restore screen saver settings: {}", e);
        }
    }
}
