//! Clipboard Selection Ownership
//!
//! X11 has no clipboard object; it has *selections*, ownership tokens held by
//! one client at a time. Data moves only when a peer asks the owner to
//! convert the selection to a target format, and the owner answers through a
//! property on the peer's window.
//!
//! # Architecture
//!
//! ```text
//! Screen
//!   └─> ClipboardSlotSet (bound to the screen's window)
//!         ├─> [ClipboardId::Clipboard] ─> XClipboardSlot ("CLIPBOARD")
//!         └─> [ClipboardId::Selection] ─> XClipboardSlot ("PRIMARY")
//! ```
//!
//! - [`Clipboard`] / [`MemoryClipboard`] / [`copy`] - content on the far side
//!   of the screen boundary
//! - [`ClipboardSlot`] - one selection owned (or read) through a window
//! - [`ClipboardSlotSet`] - all slots, rebuilt as a unit when the window changes
//! - [`XClipboardSlot`] - the selection protocol over a display connection
//!
//! # Ownership transfer
//!
//! ```text
//! Peer                      Server                      Slot
//! ━━━━                      ━━━━━━                      ━━━━
//! ConvertSelection ───────> SelectionRequest ─────────> add_request()
//!                                                         ├─ small: ChangeProperty + SelectionNotify
//!                                                         └─ large: INCR, then one chunk per
//! delete property ────────> PropertyNotify(Delete) ───> process_request()
//! SetSelectionOwner ──────> SelectionClear ───────────> lost()
//! ```

use x11rb::protocol::xproto::{Atom, Timestamp, Window};

mod data;
mod slot_set;
pub mod x11;

pub use data::{copy, Clipboard, ClipboardFormat, MemoryClipboard};
pub use slot_set::ClipboardSlotSet;
pub use x11::{SlotOptions, XClipboardSlot};

/// Clipboard identifiers, one per backing selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipboardId {
    /// The explicit copy/paste clipboard (`CLIPBOARD`)
    Clipboard,
    /// The implicit select/middle-click clipboard (`PRIMARY`)
    Selection,
}

impl ClipboardId {
    /// Every identifier, in slot order
    pub const ALL: [ClipboardId; 2] = [ClipboardId::Clipboard, ClipboardId::Selection];

    /// Number of identifiers
    pub const COUNT: usize = Self::ALL.len();

    /// Slot index
    pub fn index(self) -> usize {
        match self {
            ClipboardId::Clipboard => 0,
            ClipboardId::Selection => 1,
        }
    }

    /// Identifier for a slot index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Name of the X selection backing this clipboard
    pub fn selection_name(self) -> &'static str {
        match self {
            ClipboardId::Clipboard => "CLIPBOARD",
            ClipboardId::Selection => "PRIMARY",
        }
    }
}

impl std::fmt::Display for ClipboardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipboardId::Clipboard => write!(f, "clipboard"),
            ClipboardId::Selection => write!(f, "selection"),
        }
    }
}

/// A clipboard backed by one selection, owned through one window
///
/// All methods are called with the screen's main lock held.
pub trait ClipboardSlot: Clipboard + Send {
    /// Another client took the selection at `time`
    fn lost(&mut self, time: Timestamp);

    /// Answer a conversion request. `property` may be `NONE` for obsolete
    /// requestors.
    fn add_request(
        &mut self,
        owner: Window,
        requestor: Window,
        target: Atom,
        time: Timestamp,
        property: Atom,
    );

    /// Continue a transfer after `requestor` deleted `property`.
    /// Returns true if a pending transfer matched.
    fn process_request(&mut self, requestor: Window, time: Timestamp, property: Atom) -> bool;

    /// Abort transfers to a destroyed window. Returns true if any existed.
    fn destroy_request(&mut self, requestor: Window) -> bool;

    /// Backing selection atom
    fn selection(&self) -> Atom;

    /// Window the slot owns the selection through
    fn window(&self) -> Window;
}
