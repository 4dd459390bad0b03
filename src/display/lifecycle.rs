//! Process-wide display state
//!
//! Two pieces of state live here and nowhere else:
//!
//! - the **I/O error handler** the connection layer calls when the server
//!   drops the connection. It is a free function with no context argument,
//!   like Xlib's `XSetIOErrorHandler`.
//! - the **active screen registry**: at most one screen exists per process,
//!   and the handler resolves it (and the connection it owns) from here.
//!
//! The screen claims the registry at construction, binds its connection at
//! `open()`, unbinds at `close()` and releases at drop. No other component
//! reads the registry.
//!
//! The handler runs inside the failing request, often with the screen's
//! main lock held. A notified screen only records the loss there; it calls
//! its receiver (and exits, for [`fatal_disconnect`]) once the lock is free.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use super::ConnectionId;
use crate::error::{Result, ScreenError};

/// Exit status used when the display connection is lost
pub const DISCONNECT_EXIT_CODE: i32 = 17;

/// Signature of the process-wide disconnect handler
pub type IoErrorHandler = fn(ConnectionId);

/// What the screen does after reporting a lost connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterDisconnect {
    /// Stay closed until reopened
    Continue,
    /// Terminate with [`DISCONNECT_EXIT_CODE`]
    Exit,
}

/// Outcome of [`notify_disconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notice {
    /// The owning screen was told
    Delivered,
    /// The owning screen was told earlier
    AlreadyDelivered,
    /// No live screen owns the connection
    Unowned,
}

/// Something that must be told when its connection dies
pub(crate) trait DisconnectTarget: Send + Sync {
    /// Record the loss. Runs inside the failing request: must not touch the
    /// connection or wait for a lock the caller may hold.
    fn on_disconnect(&self, then: AfterDisconnect);
}

struct ActiveScreen {
    target: Weak<dyn DisconnectTarget>,
    connection: Option<ConnectionId>,
    lost: Option<ConnectionId>,
}

static IO_ERROR_HANDLER: RwLock<Option<IoErrorHandler>> = parking_lot::const_rwlock(None);
static ACTIVE: Mutex<Option<ActiveScreen>> = parking_lot::const_mutex(None);

/// Install (or with `None`, remove) the disconnect handler
pub fn set_io_error_handler(handler: Option<IoErrorHandler>) {
    *IO_ERROR_HANDLER.write() = handler;
}

/// Called by the connection layer on any connection-level failure
pub(crate) fn report_io_error(id: ConnectionId) {
    let handler = *IO_ERROR_HANDLER.read();
    if let Some(handler) = handler {
        handler(id);
    }
}

/// Default handler: notify the active screen, then terminate the process.
///
/// There is no way to recover a severed X connection, so the process exits
/// with [`DISCONNECT_EXIT_CODE`]. A notified screen exits itself after
/// calling its receiver; without one the exit happens here.
pub fn fatal_disconnect(id: ConnectionId) {
    warn!("X display has unexpectedly disconnected");
    match notify_disconnect(id, AfterDisconnect::Exit) {
        Notice::Delivered | Notice::AlreadyDelivered => {}
        Notice::Unowned => exit_disconnected(),
    }
}

/// Terminate after a lost connection
pub(crate) fn exit_disconnected() -> ! {
    error!("quitting due to X display disconnection");
    std::process::exit(DISCONNECT_EXIT_CODE)
}

/// Notify the screen owning connection `id`, at most once
pub(crate) fn notify_disconnect(id: ConnectionId, then: AfterDisconnect) -> Notice {
    let target = {
        let mut active = ACTIVE.lock();
        match active.as_mut() {
            Some(entry) if entry.connection == Some(id) => {
                entry.connection = None;
                entry.lost = Some(id);
                entry.target.upgrade()
            }
            Some(entry) if entry.lost == Some(id) && entry.target.strong_count() > 0 => {
                return Notice::AlreadyDelivered;
            }
            _ => None,
        }
    };

    match target {
        Some(target) => {
            target.on_disconnect(then);
            Notice::Delivered
        }
        None => Notice::Unowned,
    }
}

/// Register the process's single screen instance
pub(crate) fn claim(target: Weak<dyn DisconnectTarget>) -> Result<()> {
    let mut active = ACTIVE.lock();
    if let Some(entry) = active.as_ref() {
        if entry.target.strong_count() > 0 {
            return Err(ScreenError::InstanceActive);
        }
    }
    *active = Some(ActiveScreen {
        target,
        connection: None,
        lost: None,
    });
    Ok(())
}

/// Forget the registered instance if it is `target`
pub(crate) fn release(target: &Arc<dyn DisconnectTarget>) {
    let mut active = ACTIVE.lock();
    let is_ours = active
        .as_ref()
        .map(|entry| same_target(&entry.target, target))
        .unwrap_or(false);
    if is_ours {
        *active = None;
    }
}

/// Record the connection owned by the active instance
pub(crate) fn bind_connection(id: ConnectionId) {
    if let Some(entry) = ACTIVE.lock().as_mut() {
        entry.connection = Some(id);
        entry.lost = None;
    }
}

/// Clear the connection binding of the active instance
pub(crate) fn unbind_connection() {
    if let Some(entry) = ACTIVE.lock().as_mut() {
        entry.connection = None;
    }
}

fn same_target(weak: &Weak<dyn DisconnectTarget>, strong: &Arc<dyn DisconnectTarget>) -> bool {
    weak.as_ptr() as *const () == Arc::as_ptr(strong) as *const ()
}
