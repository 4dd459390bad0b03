//! Collaborator factory
//!
//! The screen never names a concrete connection, screen saver or clipboard
//! slot; it asks a [`DisplayBackend`] for them. [`X11Backend`] builds the
//! x11rb-based ones.

use std::sync::Arc;

use x11rb::protocol::xproto::{Atom, Window};

use crate::clipboard::{ClipboardId, ClipboardSlot, SlotOptions, XClipboardSlot};
use crate::config::Config;
use crate::display::{DisplayConnection, X11Display};
use crate::error::Result;
use crate::screensaver::{ScreenSaver, XScreenSaver};

/// Builds the connection and the objects that live on it
#[cfg_attr(test, mockall::automock)]
pub trait DisplayBackend: Send + Sync {
    /// Connect to display `name`
    fn connect(&self, name: &str) -> Result<Arc<dyn DisplayConnection>>;

    /// Screen saver driver; `signal` is the `SCREENSAVER` atom
    fn create_screensaver(
        &self,
        display: &Arc<dyn DisplayConnection>,
        signal: Atom,
    ) -> Result<Box<dyn ScreenSaver>>;

    /// Clipboard slot for `id` owned through `window`
    fn create_clipboard(
        &self,
        display: &Arc<dyn DisplayConnection>,
        window: Window,
        id: ClipboardId,
    ) -> Result<Box<dyn ClipboardSlot>>;
}

/// Production backend over x11rb
#[derive(Debug, Clone, Default)]
pub struct X11Backend {
    slot_options: SlotOptions,
}

impl X11Backend {
    /// Backend using the clipboard settings from `config`
    pub fn new(config: &Config) -> Self {
        Self {
            slot_options: config.slot_options(),
        }
    }
}

impl DisplayBackend for X11Backend {
    fn connect(&self, name: &str) -> Result<Arc<dyn DisplayConnection>> {
        Ok(Arc::new(X11Display::connect(name)?))
    }

    fn create_screensaver(
        &self,
        display: &Arc<dyn DisplayConnection>,
        signal: Atom,
    ) -> Result<Box<dyn ScreenSaver>> {
        Ok(Box::new(XScreenSaver::new(Arc::clone(display), signal)?))
    }

    fn create_clipboard(
        &self,
        display: &Arc<dyn DisplayConnection>,
        window: Window,
        id: ClipboardId,
    ) -> Result<Box<dyn ClipboardSlot>> {
        Ok(Box::new(XClipboardSlot::new(
            Arc::clone(display),
            window,
            id,
            self.slot_options,
        )?))
    }
}
