//! In-memory display connection for unit tests
//!
//! Behaves like a single-client X server: atoms, selection owners, window
//! properties and an event queue. Events pushed with [`FakeDisplay::push_event`]
//! make the poll descriptor readable, so the real event loop can run against
//! it. Selections owned by "other clients" are answered from
//! [`FakeDisplay::serve_selection`].

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use parking_lot::Mutex;
use x11rb::protocol::xproto::{
    Atom, Blanking, ClientMessageEvent, Cursor, DestroyNotifyEvent, EventMask, ExposeEvent,
    Exposures, Keycode, Keysym, Mapping, MappingNotifyEvent, Pixmap, Property,
    PropertyNotifyEvent, SelectionClearEvent, SelectionRequestEvent, Timestamp, Window,
    DESTROY_NOTIFY_EVENT, EXPOSE_EVENT, MAPPING_NOTIFY_EVENT, PROPERTY_NOTIFY_EVENT,
    SELECTION_CLEAR_EVENT, SELECTION_REQUEST_EVENT,
};
use x11rb::protocol::Event;

use super::{next_connection_id, ConnectionId, DisplayConnection, PropertyValue, ScreenSaverSettings};
use crate::error::{Result, ScreenError};

pub(crate) const ROOT: Window = 1;

/// A `SelectionNotify` the fake server delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SentNotify {
    pub(crate) requestor: Window,
    pub(crate) selection: Atom,
    pub(crate) target: Atom,
    pub(crate) property: Atom,
    pub(crate) time: Timestamp,
}

struct FakeState {
    events: VecDeque<Event>,
    atoms: HashMap<String, Atom>,
    next_atom: Atom,
    next_resource: u32,
    owners: HashMap<Atom, Window>,
    properties: HashMap<(Window, Atom), PropertyValue>,
    served: HashMap<Atom, HashMap<Atom, PropertyValue>>,
    notifies: Vec<SentNotify>,
    client_messages: Vec<(Window, Atom, [u32; 5])>,
    selected: HashMap<Window, EventMask>,
    windows: Vec<Window>,
    freed_cursors: Vec<Cursor>,
    pointer: Option<(i16, i16)>,
    size: (u16, u16),
    best_cursor: (u16, u16),
    time: Timestamp,
    fail_all: bool,
    calls: usize,
    keymap_refreshes: usize,
    max_request_bytes: usize,
    saver: ScreenSaverSettings,
    forced: Vec<bool>,
}

/// Test double for [`DisplayConnection`]
pub(crate) struct FakeDisplay {
    id: ConnectionId,
    state: Mutex<FakeState>,
    ready: Option<(UnixStream, UnixStream)>,
}

impl FakeDisplay {
    /// Fake with a pollable descriptor
    pub(crate) fn new() -> Self {
        let ready = UnixStream::pair().ok().map(|(reader, writer)| {
            let _ = reader.set_nonblocking(true);
            (reader, writer)
        });
        Self::build(ready)
    }

    /// Fake without a descriptor, forcing the sleep-poll strategy
    pub(crate) fn without_fd() -> Self {
        Self::build(None)
    }

    fn build(ready: Option<(UnixStream, UnixStream)>) -> Self {
        Self {
            id: next_connection_id(),
            state: Mutex::new(FakeState {
                events: VecDeque::new(),
                atoms: HashMap::new(),
                next_atom: 100,
                next_resource: 0x0020_0000,
                owners: HashMap::new(),
                properties: HashMap::new(),
                served: HashMap::new(),
                notifies: Vec::new(),
                client_messages: Vec::new(),
                selected: HashMap::new(),
                windows: Vec::new(),
                freed_cursors: Vec::new(),
                pointer: Some((10, 20)),
                size: (1920, 1080),
                best_cursor: (16, 16),
                time: 1000,
                fail_all: false,
                calls: 0,
                keymap_refreshes: 0,
                max_request_bytes: 262_140,
                saver: ScreenSaverSettings {
                    timeout: 600,
                    interval: 600,
                    prefer_blanking: Blanking::PREFERRED,
                    allow_exposures: Exposures::ALLOWED,
                },
                forced: Vec::new(),
            }),
            ready,
        }
    }

    // ---- scripting ----

    pub(crate) fn push_event(&self, event: Event) {
        self.state.lock().events.push_back(event);
        if let Some((_, writer)) = &self.ready {
            let _ = (&*writer).write_all(&[1]);
        }
    }

    pub(crate) fn set_pointer(&self, pointer: Option<(i16, i16)>) {
        self.state.lock().pointer = pointer;
    }

    pub(crate) fn set_size(&self, width: u16, height: u16) {
        self.state.lock().size = (width, height);
    }

    pub(crate) fn set_max_request_bytes(&self, bytes: usize) {
        self.state.lock().max_request_bytes = bytes;
    }

    /// Make every further request fail as if the server went away
    pub(crate) fn fail_all(&self) {
        self.state.lock().fail_all = true;
    }

    /// Let another client own `selection` and answer conversions from `answers`
    pub(crate) fn serve_selection(
        &self,
        selection: Atom,
        owner: Window,
        answers: Vec<(Atom, PropertyValue)>,
    ) {
        let mut state = self.state.lock();
        state.owners.insert(selection, owner);
        state.served.insert(selection, answers.into_iter().collect());
    }

    /// Simulate another client taking `selection`
    pub(crate) fn steal_selection(&self, selection: Atom, owner: Window) {
        self.state.lock().owners.insert(selection, owner);
    }

    // ---- inspection ----

    pub(crate) fn atom(&self, name: &str) -> Atom {
        self.intern(name)
    }

    pub(crate) fn property(&self, window: Window, property: Atom) -> Option<PropertyValue> {
        self.state.lock().properties.get(&(window, property)).cloned()
    }

    pub(crate) fn notifies(&self) -> Vec<SentNotify> {
        self.state.lock().notifies.clone()
    }

    pub(crate) fn client_messages(&self) -> Vec<(Window, Atom, [u32; 5])> {
        self.state.lock().client_messages.clone()
    }

    pub(crate) fn selected_input(&self, window: Window) -> Option<EventMask> {
        self.state.lock().selected.get(&window).copied()
    }

    pub(crate) fn freed_cursors(&self) -> Vec<Cursor> {
        self.state.lock().freed_cursors.clone()
    }

    pub(crate) fn owner_of(&self, selection: Atom) -> Window {
        self.state.lock().owners.get(&selection).copied().unwrap_or(x11rb::NONE)
    }

    pub(crate) fn saver(&self) -> ScreenSaverSettings {
        self.state.lock().saver
    }

    pub(crate) fn forced(&self) -> Vec<bool> {
        self.state.lock().forced.clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.lock().calls
    }

    pub(crate) fn keymap_refreshes(&self) -> usize {
        self.state.lock().keymap_refreshes
    }

    pub(crate) fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    // ---- internals ----

    fn intern(&self, name: &str) -> Atom {
        let mut state = self.state.lock();
        if let Some(&atom) = state.atoms.get(name) {
            return atom;
        }
        let atom = state.next_atom;
        state.next_atom += 1;
        state.atoms.insert(name.to_string(), atom);
        atom
    }

    fn begin(&self) -> Result<parking_lot::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.fail_all {
            return Err(ScreenError::Connection("fake server went away".into()));
        }
        Ok(state)
    }

    fn next_resource(state: &mut FakeState) -> u32 {
        state.next_resource += 1;
        state.next_resource
    }
}

impl DisplayConnection for FakeDisplay {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.ready.as_ref().map(|(reader, _)| reader.as_fd())
    }

    fn poll_event(&self) -> Result<Option<Event>> {
        let event = self.begin()?.events.pop_front();
        if event.is_some() {
            if let Some((reader, _)) = &self.ready {
                let mut byte = [0u8; 1];
                let _ = (&*reader).read(&mut byte);
            }
        }
        Ok(event)
    }

    fn flush(&self) -> Result<()> {
        self.begin().map(|_| ())
    }

    fn root(&self) -> Window {
        ROOT
    }

    fn screen_size(&self) -> (u16, u16) {
        self.state.lock().size
    }

    fn intern_atom(&self, name: &str) -> Result<Atom> {
        drop(self.begin()?);
        Ok(self.intern(name))
    }

    fn query_pointer(&self, _window: Window) -> Result<(i16, i16)> {
        self.begin()?
            .pointer
            .ok_or_else(|| ScreenError::Protocol("pointer query failed".into()))
    }

    fn query_best_cursor(&self, _width: u16, _height: u16) -> Result<(u16, u16)> {
        Ok(self.begin()?.best_cursor)
    }

    fn create_bitmap(&self, width: u16, height: u16, data: &[u8]) -> Result<Pixmap> {
        let expected = (width as usize).div_ceil(8) * height as usize;
        if data.len() != expected {
            return Err(ScreenError::Protocol(format!(
                "bitmap data is {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        let mut state = self.begin()?;
        Ok(Self::next_resource(&mut state))
    }

    fn create_pixmap_cursor(&self, _source: Pixmap, _mask: Pixmap) -> Result<Cursor> {
        let mut state = self.begin()?;
        Ok(Self::next_resource(&mut state))
    }

    fn free_pixmap(&self, _pixmap: Pixmap) -> Result<()> {
        self.begin().map(|_| ())
    }

    fn free_cursor(&self, cursor: Cursor) -> Result<()> {
        self.begin()?.freed_cursors.push(cursor);
        Ok(())
    }

    fn refresh_keyboard_mapping(&self, event: &MappingNotifyEvent) -> Result<()> {
        if event.request == Mapping::KEYBOARD {
            self.begin()?.keymap_refreshes += 1;
        }
        Ok(())
    }

    fn keysym(&self, keycode: Keycode, column: usize) -> Option<Keysym> {
        // 'a'.. for keycodes 38.. in column 0
        (column == 0 && (38..64).contains(&keycode)).then(|| 0x61 + (keycode - 38) as Keysym)
    }

    fn create_window(&self, event_mask: EventMask) -> Result<Window> {
        let mut state = self.begin()?;
        let window = Self::next_resource(&mut state);
        state.windows.push(window);
        state.selected.insert(window, event_mask);
        Ok(window)
    }

    fn destroy_window(&self, window: Window) -> Result<()> {
        let mut state = self.begin()?;
        state.windows.retain(|&w| w != window);
        state.selected.remove(&window);
        Ok(())
    }

    fn select_input(&self, window: Window, event_mask: EventMask) -> Result<()> {
        self.begin()?.selected.insert(window, event_mask);
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Window> {
        Ok(self
            .begin()?
            .owners
            .get(&selection)
            .copied()
            .unwrap_or(x11rb::NONE))
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, _time: Timestamp) -> Result<()> {
        let mut state = self.begin()?;
        if owner == x11rb::NONE {
            state.owners.remove(&selection);
        } else {
            state.owners.insert(selection, owner);
        }
        Ok(())
    }

    fn convert_selection(
        &self,
        _requestor: Window,
        selection: Atom,
        target: Atom,
        _property: Atom,
        _time: Timestamp,
        _timeout: Duration,
    ) -> Result<Option<PropertyValue>> {
        let state = self.begin()?;
        if !state.owners.contains_key(&selection) {
            return Ok(None);
        }
        Ok(state
            .served
            .get(&selection)
            .and_then(|answers| answers.get(&target))
            .cloned())
    }

    fn change_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<()> {
        let value = PropertyValue {
            type_,
            format: 8,
            data: data.to_vec(),
        };
        self.begin()?.properties.insert((window, property), value);
        Ok(())
    }

    fn change_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<()> {
        let value = PropertyValue {
            type_,
            format: 32,
            data: data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        };
        self.begin()?.properties.insert((window, property), value);
        Ok(())
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        delete: bool,
    ) -> Result<Option<PropertyValue>> {
        let mut state = self.begin()?;
        if delete {
            Ok(state.properties.remove(&(window, property)))
        } else {
            Ok(state.properties.get(&(window, property)).cloned())
        }
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<()> {
        self.begin()?.properties.remove(&(window, property));
        Ok(())
    }

    fn send_selection_notify(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()> {
        self.begin()?.notifies.push(SentNotify {
            requestor,
            selection,
            target,
            property,
            time,
        });
        Ok(())
    }

    fn send_client_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> Result<()> {
        self.begin()?.client_messages.push((window, type_, data));
        Ok(())
    }

    fn server_time(&self, _window: Window, _timeout: Duration) -> Result<Timestamp> {
        let mut state = self.begin()?;
        state.time += 10;
        Ok(state.time)
    }

    fn max_request_bytes(&self) -> usize {
        self.state.lock().max_request_bytes
    }

    fn screen_saver(&self) -> Result<ScreenSaverSettings> {
        Ok(self.begin()?.saver)
    }

    fn set_screen_saver(&self, settings: &ScreenSaverSettings) -> Result<()> {
        self.begin()?.saver = *settings;
        Ok(())
    }

    fn force_screen_saver(&self, active: bool) -> Result<()> {
        self.begin()?.forced.push(active);
        Ok(())
    }
}

// ---- event builders ----

pub(crate) fn selection_clear(selection: Atom, owner: Window, time: Timestamp) -> Event {
    Event::SelectionClear(SelectionClearEvent {
        response_type: SELECTION_CLEAR_EVENT,
        sequence: 0,
        time,
        owner,
        selection,
    })
}

pub(crate) fn selection_request(
    owner: Window,
    requestor: Window,
    selection: Atom,
    target: Atom,
    property: Atom,
    time: Timestamp,
) -> Event {
    Event::SelectionRequest(SelectionRequestEvent {
        response_type: SELECTION_REQUEST_EVENT,
        sequence: 0,
        time,
        owner,
        requestor,
        selection,
        target,
        property,
    })
}

pub(crate) fn property_deleted(window: Window, atom: Atom, time: Timestamp) -> Event {
    Event::PropertyNotify(PropertyNotifyEvent {
        response_type: PROPERTY_NOTIFY_EVENT,
        sequence: 0,
        window,
        atom,
        time,
        state: Property::DELETE,
    })
}

pub(crate) fn destroy_notify(window: Window) -> Event {
    Event::DestroyNotify(DestroyNotifyEvent {
        response_type: DESTROY_NOTIFY_EVENT,
        sequence: 0,
        event: window,
        window,
    })
}

pub(crate) fn client_message(window: Window, type_: Atom, format: u8, value: u32) -> Event {
    Event::ClientMessage(ClientMessageEvent::new(
        format,
        window,
        type_,
        [value, 0, 0, 0, 0],
    ))
}

pub(crate) fn keyboard_mapping_changed() -> Event {
    Event::MappingNotify(MappingNotifyEvent {
        response_type: MAPPING_NOTIFY_EVENT,
        sequence: 0,
        request: Mapping::KEYBOARD,
        first_keycode: 8,
        count: 248,
    })
}

pub(crate) fn expose(window: Window) -> Event {
    Event::Expose(ExposeEvent {
        response_type: EXPOSE_EVENT,
        sequence: 0,
        window,
        x: 0,
        y: 0,
        width: 1,
        height: 1,
        count: 0,
    })
}
