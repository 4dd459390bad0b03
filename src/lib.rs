//! # lamco-x11-screen
//!
//! X11 screen backend for input-sharing and remote-desktop servers.
//!
//! This crate owns the connection to an X server and provides:
//! - [`screen::Screen`] - display lifecycle, event loop, cursor and geometry
//! - [`clipboard`] - selection ownership for `CLIPBOARD` and `PRIMARY`
//! - [`timer`] - periodic jobs driven by the event loop
//! - [`screensaver`] - screen saver suppression and activation notices
//!
//! # Architecture
//!
//! ```text
//! lamco-x11-screen
//!   ├─> Screen (main lock: connection, window, slots, screen saver, stop flag)
//!   │     ├─> EventLoop (poll on display fd + wake socket, timers, dispatch)
//!   │     ├─> Dispatcher (selection protocol, screen saver signal)
//!   │     └─> ClipboardSlotSet (one X11 slot per clipboard id)
//!   ├─> TimerQueue (own lock, weak job handles)
//!   └─> DisplayLifecycle (process-wide disconnect handler, exit status 17)
//! ```
//!
//! # Data Flow
//!
//! **Events:** X server → EventLoop → Dispatcher → slot / screen saver → handler
//!
//! **Clipboard out:** `set_clipboard` → slot takes ownership → peers' requests answered by the loop
//!
//! **Clipboard in:** `SelectionClear` → receiver → `get_clipboard` → selection conversion

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Clipboard model and X11 selection slots
pub mod clipboard;

/// Configuration
pub mod config;

/// Display connection and process-wide lifecycle
pub mod display;

/// Error types
pub mod error;

/// Screen shape and blank cursor
pub mod geometry;

/// Screen facade, event loop and protocol dispatch
pub mod screen;

/// Screen saver control
pub mod screensaver;

/// Periodic timers
pub mod timer;

/// Utility functions
pub mod utils;

pub use error::{Result, ScreenError};
pub use screen::{LoopExit, Screen, ScreenEventHandler, ScreenReceiver};
