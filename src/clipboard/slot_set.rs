use x11rb::protocol::xproto::{Atom, Timestamp, Window};

use super::{ClipboardId, ClipboardSlot};

/// One optional slot per [`ClipboardId`], bound to a single window
///
/// A slot exists exactly when a window is bound. Rebinding destroys every
/// slot before new ones are built.
#[derive(Default)]
pub struct ClipboardSlotSet {
    window: Option<Window>,
    slots: [Option<Box<dyn ClipboardSlot>>; ClipboardId::COUNT],
}

impl ClipboardSlotSet {
    /// Set with no window bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroy all slots, then bind to `window` and build one slot per
    /// identifier with `make`. `None` leaves every slot absent.
    ///
    /// A slot whose construction fails stays absent.
    pub fn bind<F>(&mut self, window: Option<Window>, mut make: F)
    where
        F: FnMut(Window, ClipboardId) -> Option<Box<dyn ClipboardSlot>>,
    {
        self.clear();
        let Some(window) = window else {
            return;
        };
        self.window = Some(window);
        for id in ClipboardId::ALL {
            self.slots[id.index()] = make(window, id);
        }
    }

    /// Destroy all slots and unbind
    pub fn clear(&mut self) {
        self.slots = Default::default();
        self.window = None;
    }

    /// Bound window
    pub fn window(&self) -> Option<Window> {
        self.window
    }

    /// Slot for `id`
    pub fn get_mut(&mut self, id: ClipboardId) -> Option<&mut (dyn ClipboardSlot + 'static)> {
        self.slots[id.index()].as_deref_mut()
    }

    /// Whether a slot for `id` exists
    pub fn is_bound(&self, id: ClipboardId) -> bool {
        self.slots[id.index()].is_some()
    }

    /// Clipboard backed by `selection`, if any slot uses it
    pub fn lookup_by_selection(&self, selection: Atom) -> Option<ClipboardId> {
        ClipboardId::ALL.into_iter().find(|id| {
            self.slots[id.index()]
                .as_ref()
                .is_some_and(|slot| slot.selection() == selection)
        })
    }

    /// Offer a property deletion to every slot until one claims it
    pub fn process_request(&mut self, requestor: Window, time: Timestamp, property: Atom) -> bool {
        self.slots
            .iter_mut()
            .flatten()
            .any(|slot| slot.process_request(requestor, time, property))
    }

    /// Abort transfers to `requestor` in every slot
    pub fn destroy_request(&mut self, requestor: Window) -> bool {
        let mut any = false;
        for slot in self.slots.iter_mut().flatten() {
            any |= slot.destroy_request(requestor);
        }
        any
    }
}
