//! Display Connection
//!
//! The connection handle to the windowing server and the process-wide state
//! that goes with it.
//!
//! # Architecture
//!
//! ```text
//! Screen ──> Arc<dyn DisplayConnection> ──> X11Display (x11rb RustConnection)
//!                     │
//!                     └── connection failure ──> lifecycle::report_io_error()
//!                                                   └─> installed handler
//!                                                         └─> active screen
//! ```
//!
//! [`DisplayConnection`] is the only way the rest of the crate talks to the
//! server, so the screen, clipboard slots and screensaver can all run against
//! a fake connection in tests.

use std::os::fd::BorrowedFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use x11rb::protocol::xproto::{
    Atom, Blanking, Cursor, EventMask, Exposures, Keycode, Keysym, MappingNotifyEvent, Pixmap,
    Timestamp, Window,
};
use x11rb::protocol::Event;

use crate::error::Result;

pub mod lifecycle;
pub mod x11;

#[cfg(test)]
pub(crate) mod fake;

pub use lifecycle::{set_io_error_handler, IoErrorHandler, DISCONNECT_EXIT_CODE};
pub use x11::X11Display;

/// Process-unique identity of a display connection
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh connection id
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Value of a window property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    /// Property type atom
    pub type_: Atom,
    /// Element size in bits (8, 16 or 32)
    pub format: u8,
    /// Raw bytes in client byte order
    pub data: Vec<u8>,
}

impl PropertyValue {
    /// Interpret a 32-bit property as a list of values
    pub fn as_u32s(&self) -> Vec<u32> {
        if self.format != 32 {
            return Vec::new();
        }
        self.data
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

/// Core-protocol screen saver parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSaverSettings {
    /// Seconds of idle time before activation (0 disables)
    pub timeout: i16,
    /// Seconds between pattern changes
    pub interval: i16,
    /// Blanking preference
    pub prefer_blanking: Blanking,
    /// Exposure preference
    pub allow_exposures: Exposures,
}

/// The live link to the windowing server
///
/// Implementations must be usable from several threads; the screen serializes
/// all calls that matter for protocol ordering under its main lock.
pub trait DisplayConnection: Send + Sync {
    /// Identity used by the disconnect handler
    fn id(&self) -> ConnectionId;

    /// Descriptor that becomes readable when the server sends data.
    /// `None` makes the event loop fall back to sleep-and-repoll.
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Next queued event without blocking
    fn poll_event(&self) -> Result<Option<Event>>;

    /// Send buffered requests
    fn flush(&self) -> Result<()>;

    /// Root window of the default screen
    fn root(&self) -> Window;

    /// Width and height of the default screen
    fn screen_size(&self) -> (u16, u16);

    /// Intern `name`, creating the atom if needed
    fn intern_atom(&self, name: &str) -> Result<Atom>;

    /// Pointer position relative to `window`'s root
    fn query_pointer(&self, window: Window) -> Result<(i16, i16)>;

    /// Closest cursor size the server supports for the requested size
    fn query_best_cursor(&self, width: u16, height: u16) -> Result<(u16, u16)>;

    /// Depth-1 pixmap from byte-padded rows (`(width + 7) / 8` bytes each)
    fn create_bitmap(&self, width: u16, height: u16, data: &[u8]) -> Result<Pixmap>;

    /// Cursor from shape and mask bitmaps, black on black, hotspot at origin
    fn create_pixmap_cursor(&self, source: Pixmap, mask: Pixmap) -> Result<Cursor>;

    /// Release a pixmap
    fn free_pixmap(&self, pixmap: Pixmap) -> Result<()>;

    /// Release a cursor
    fn free_cursor(&self, cursor: Cursor) -> Result<()>;

    /// Reload the cached keyboard mapping after a `MappingNotify`
    fn refresh_keyboard_mapping(&self, event: &MappingNotifyEvent) -> Result<()>;

    /// Keysym at `column` for `keycode` from the cached mapping
    fn keysym(&self, keycode: Keycode, column: usize) -> Option<Keysym>;

    /// Unmapped 1x1 child of the root selecting `event_mask`
    fn create_window(&self, event_mask: EventMask) -> Result<Window>;

    /// Destroy a window created with [`DisplayConnection::create_window`]
    fn destroy_window(&self, window: Window) -> Result<()>;

    /// Replace this client's event mask on `window`
    fn select_input(&self, window: Window, event_mask: EventMask) -> Result<()>;

    /// Current owner of `selection` (`NONE` if unowned)
    fn selection_owner(&self, selection: Atom) -> Result<Window>;

    /// Make `owner` the owner of `selection` as of `time`
    fn set_selection_owner(&self, owner: Window, selection: Atom, time: Timestamp) -> Result<()>;

    /// Ask the owner of `selection` to convert it to `target`, wait for the
    /// answer, and read it (following incremental transfers). `Ok(None)` if
    /// the owner refused.
    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
        timeout: Duration,
    ) -> Result<Option<PropertyValue>>;

    /// Replace an 8-bit property
    fn change_property8(&self, window: Window, property: Atom, type_: Atom, data: &[u8])
        -> Result<()>;

    /// Replace a 32-bit property
    fn change_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<()>;

    /// Read a whole property; `None` if it does not exist
    fn get_property(&self, window: Window, property: Atom, delete: bool)
        -> Result<Option<PropertyValue>>;

    /// Delete a property
    fn delete_property(&self, window: Window, property: Atom) -> Result<()>;

    /// Answer a conversion request (`property` is `NONE` on refusal)
    fn send_selection_notify(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()>;

    /// Send a 32-bit client message to `window`
    fn send_client_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> Result<()>;

    /// Current server time as seen through a property change on `window`.
    /// `window` must select `PropertyChange`.
    fn server_time(&self, window: Window, timeout: Duration) -> Result<Timestamp>;

    /// Largest request the server accepts, in bytes
    fn max_request_bytes(&self) -> usize;

    /// Current screen saver parameters
    fn screen_saver(&self) -> Result<ScreenSaverSettings>;

    /// Set screen saver parameters
    fn set_screen_saver(&self, settings: &ScreenSaverSettings) -> Result<()>;

    /// Activate (`true`) or reset (`false`) the screen saver
    fn force_screen_saver(&self, active: bool) -> Result<()>;
}
