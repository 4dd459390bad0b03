//! X11 connection over x11rb
//!
//! [`X11Display`] implements [`DisplayConnection`] on a pure-Rust
//! `RustConnection`.
//!
//! # Event backlog
//!
//! Some operations have to wait for a specific event: selection conversion
//! waits for `SelectionNotify` (and `PropertyNotify` for `INCR` transfers),
//! the server-time query waits for its own `PropertyNotify`. Unrelated events
//! read while waiting are parked in a backlog that [`X11Display::poll_event`]
//! returns first, so the event loop still sees them in order.
//!
//! # Disconnects
//!
//! Every connection-level failure is passed to
//! [`lifecycle::report_io_error`] before the error is returned.

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConnectionExt as _,
    CreateGCAux, CreateWindowAux, Cursor, EventMask, GetPropertyType, ImageFormat, Keycode,
    Keysym, Mapping, MappingNotifyEvent, Pixmap, PropMode, Property, QueryShapeOf, ScreenSaver,
    SelectionNotifyEvent, Timestamp, Window, WindowClass, SELECTION_NOTIFY_EVENT,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{
    lifecycle, next_connection_id, ConnectionId, DisplayConnection, PropertyValue,
    ScreenSaverSettings,
};
use crate::error::{open_failure, Result, ScreenError};

x11rb::atom_manager! {
    /// Atoms the connection itself needs
    DisplayAtoms: DisplayAtomsCookie {
        INCR,
        _LAMCO_TIMESTAMP,
    }
}

/// Cached keycode to keysym table
#[derive(Debug, Default)]
struct KeyboardMap {
    min_keycode: Keycode,
    keysyms_per_keycode: usize,
    keysyms: Vec<Keysym>,
}

impl KeyboardMap {
    fn lookup(&self, keycode: Keycode, column: usize) -> Option<Keysym> {
        if keycode < self.min_keycode || column >= self.keysyms_per_keycode {
            return None;
        }
        let index = (keycode - self.min_keycode) as usize * self.keysyms_per_keycode + column;
        self.keysyms.get(index).copied().filter(|&sym| sym != 0)
    }
}

/// Live connection to an X server
pub struct X11Display {
    id: ConnectionId,
    conn: RustConnection,
    screen_num: usize,
    atoms: DisplayAtoms,
    backlog: Mutex<VecDeque<Event>>,
    keymap: Mutex<KeyboardMap>,
}

impl X11Display {
    /// Connect to display `name` (e.g. `":0"`)
    pub fn connect(name: &str) -> Result<Self> {
        debug!("Connecting to X display \"{}\"", name);
        let (conn, screen_num) =
            RustConnection::connect(Some(name)).map_err(|e| open_failure(name, e))?;

        let atoms = DisplayAtoms::new(&conn)?.reply()?;

        let display = Self {
            id: next_connection_id(),
            conn,
            screen_num,
            atoms,
            backlog: Mutex::new(VecDeque::new()),
            keymap: Mutex::new(KeyboardMap::default()),
        };
        display.load_keyboard_mapping()?;

        let id = display.id;
        debug!(
            "Connected to \"{}\" (screen {}, connection {})",
            name, screen_num, id
        );
        Ok(display)
    }

    /// Run `f` and route connection failures to the disconnect handler
    fn request<T>(&self, f: impl FnOnce(&RustConnection) -> Result<T>) -> Result<T> {
        let result = f(&self.conn);
        if let Err(e) = &result {
            if e.is_disconnect() {
                lifecycle::report_io_error(self.id);
            }
        }
        result
    }

    fn screen(&self) -> &x11rb::protocol::xproto::Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    fn load_keyboard_mapping(&self) -> Result<()> {
        let setup = self.conn.setup();
        let (min, max) = (setup.min_keycode, setup.max_keycode);
        let count = max.saturating_sub(min).saturating_add(1);

        let reply = self.request(|conn| Ok(conn.get_keyboard_mapping(min, count)?.reply()?))?;
        let mut keymap = self.keymap.lock();
        keymap.min_keycode = min;
        keymap.keysyms_per_keycode = reply.keysyms_per_keycode as usize;
        keymap.keysyms = reply.keysyms;
        trace!(
            "Loaded keyboard mapping: {} keycodes, {} keysyms each",
            count,
            keymap.keysyms_per_keycode
        );
        Ok(())
    }

    /// Block until the connection is readable or `timeout` passes
    fn wait_readable(&self, timeout: Duration) -> Result<()> {
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
        let mut fds = [PollFd::new(self.conn.stream().as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(_) | Err(nix::errno::Errno::EINTR) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read events until `accept` takes one, parking the rest
    fn wait_for_event<T>(
        &self,
        deadline: Instant,
        what: &'static str,
        mut accept: impl FnMut(&Event) -> Option<T>,
    ) -> Result<T> {
        loop {
            let event = self.request(|conn| Ok(conn.poll_for_event()?))?;
            match event {
                Some(event) => match accept(&event) {
                    Some(value) => return Ok(value),
                    None => self.backlog.lock().push_back(event),
                },
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ScreenError::Timeout(what));
                    }
                    self.wait_readable(deadline - now)?;
                }
            }
        }
    }

    /// Receive an `INCR` transfer into `property` on `requestor`
    fn read_incremental(
        &self,
        requestor: Window,
        property: Atom,
        timeout: Duration,
    ) -> Result<Option<PropertyValue>> {
        let mut value = PropertyValue {
            type_: x11rb::NONE,
            format: 8,
            data: Vec::new(),
        };

        loop {
            // each chunk resets the deadline
            let deadline = Instant::now() + timeout;
            self.wait_for_event(deadline, "incremental transfer", |event| match event {
                Event::PropertyNotify(ev)
                    if ev.window == requestor
                        && ev.atom == property
                        && ev.state == Property::NEW_VALUE =>
                {
                    Some(())
                }
                _ => None,
            })?;

            let Some(chunk) = self.get_property(requestor, property, true)? else {
                continue;
            };
            if chunk.data.is_empty() {
                trace!("INCR transfer complete: {} bytes", value.data.len());
                return Ok(Some(value));
            }
            value.type_ = chunk.type_;
            value.format = chunk.format;
            value.data.extend_from_slice(&chunk.data);
        }
    }

    /// Repack byte-padded bitmap rows to the server's scanline padding
    fn pad_bitmap(&self, width: u16, height: u16, data: &[u8]) -> Vec<u8> {
        let pad_bits = (self.conn.setup().bitmap_format_scanline_pad as usize).max(8);
        let src_stride = (width as usize).div_ceil(8);
        let dst_stride = (width as usize).div_ceil(pad_bits) * pad_bits / 8;

        let mut out = vec![0u8; dst_stride * height as usize];
        for (row, src) in data.chunks(src_stride).take(height as usize).enumerate() {
            let start = row * dst_stride;
            out[start..start + src.len()].copy_from_slice(src);
        }
        out
    }
}

impl DisplayConnection for X11Display {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.conn.stream().as_fd())
    }

    fn poll_event(&self) -> Result<Option<Event>> {
        if let Some(event) = self.backlog.lock().pop_front() {
            return Ok(Some(event));
        }
        self.request(|conn| Ok(conn.poll_for_event()?))
    }

    fn flush(&self) -> Result<()> {
        self.request(|conn| Ok(conn.flush()?))
    }

    fn root(&self) -> Window {
        self.screen().root
    }

    fn screen_size(&self) -> (u16, u16) {
        let screen = self.screen();
        (screen.width_in_pixels, screen.height_in_pixels)
    }

    fn intern_atom(&self, name: &str) -> Result<Atom> {
        self.request(|conn| Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom))
    }

    fn query_pointer(&self, window: Window) -> Result<(i16, i16)> {
        let reply = self.request(|conn| Ok(conn.query_pointer(window)?.reply()?))?;
        if !reply.same_screen {
            return Err(ScreenError::Protocol("pointer is on another screen".into()));
        }
        Ok((reply.root_x, reply.root_y))
    }

    fn query_best_cursor(&self, width: u16, height: u16) -> Result<(u16, u16)> {
        let root = self.root();
        let reply = self.request(|conn| {
            Ok(conn
                .query_best_size(QueryShapeOf::LARGEST_CURSOR, root, width, height)?
                .reply()?)
        })?;
        Ok((reply.width, reply.height))
    }

    fn create_bitmap(&self, width: u16, height: u16, data: &[u8]) -> Result<Pixmap> {
        let root = self.root();
        let padded = self.pad_bitmap(width, height, data);
        self.request(|conn| {
            let pixmap = conn.generate_id()?;
            conn.create_pixmap(1, pixmap, root, width, height)?;

            let gc = conn.generate_id()?;
            conn.create_gc(gc, pixmap, &CreateGCAux::new().foreground(0).background(0))?;
            conn.put_image(
                ImageFormat::XY_PIXMAP,
                pixmap,
                gc,
                width,
                height,
                0,
                0,
                0,
                1,
                &padded,
            )?;
            conn.free_gc(gc)?;
            Ok(pixmap)
        })
    }

    fn create_pixmap_cursor(&self, source: Pixmap, mask: Pixmap) -> Result<Cursor> {
        self.request(|conn| {
            let cursor = conn.generate_id()?;
            conn.create_cursor(cursor, source, mask, 0, 0, 0, 0, 0, 0, 0, 0)?;
            Ok(cursor)
        })
    }

    fn free_pixmap(&self, pixmap: Pixmap) -> Result<()> {
        self.request(|conn| {
            conn.free_pixmap(pixmap)?;
            Ok(())
        })
    }

    fn free_cursor(&self, cursor: Cursor) -> Result<()> {
        self.request(|conn| {
            conn.free_cursor(cursor)?;
            Ok(())
        })
    }

    fn refresh_keyboard_mapping(&self, event: &MappingNotifyEvent) -> Result<()> {
        if event.request != Mapping::KEYBOARD {
            return Ok(());
        }
        debug!(
            "Keyboard mapping changed (keycodes {}..+{})",
            event.first_keycode, event.count
        );
        self.load_keyboard_mapping()
    }

    fn keysym(&self, keycode: Keycode, column: usize) -> Option<Keysym> {
        self.keymap.lock().lookup(keycode, column)
    }

    fn create_window(&self, event_mask: EventMask) -> Result<Window> {
        let root = self.root();
        self.request(|conn| {
            let window = conn.generate_id()?;
            conn.create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                window,
                root,
                0,
                0,
                1,
                1,
                0,
                WindowClass::INPUT_OUTPUT,
                0,
                &CreateWindowAux::new()
                    .event_mask(event_mask)
                    .override_redirect(1),
            )?;
            conn.flush()?;
            Ok(window)
        })
    }

    fn destroy_window(&self, window: Window) -> Result<()> {
        self.request(|conn| {
            conn.destroy_window(window)?;
            conn.flush()?;
            Ok(())
        })
    }

    fn select_input(&self, window: Window, event_mask: EventMask) -> Result<()> {
        self.request(|conn| {
            conn.change_window_attributes(
                window,
                &ChangeWindowAttributesAux::new().event_mask(event_mask),
            )?;
            Ok(())
        })
    }

    fn selection_owner(&self, selection: Atom) -> Result<Window> {
        self.request(|conn| Ok(conn.get_selection_owner(selection)?.reply()?.owner))
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: Timestamp) -> Result<()> {
        self.request(|conn| {
            conn.set_selection_owner(owner, selection, time)?;
            conn.flush()?;
            Ok(())
        })
    }

    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
        timeout: Duration,
    ) -> Result<Option<PropertyValue>> {
        self.request(|conn| {
            conn.convert_selection(requestor, selection, target, property, time)?;
            conn.flush()?;
            Ok(())
        })?;

        let notified = self.wait_for_event(
            Instant::now() + timeout,
            "selection conversion",
            |event| match event {
                Event::SelectionNotify(ev)
                    if ev.requestor == requestor && ev.selection == selection =>
                {
                    Some(ev.property)
                }
                _ => None,
            },
        )?;

        if notified == x11rb::NONE {
            return Ok(None);
        }

        let Some(value) = self.get_property(requestor, notified, true)? else {
            return Ok(None);
        };
        if value.type_ == self.atoms.INCR {
            trace!("Selection is sent incrementally");
            return self.read_incremental(requestor, notified, timeout);
        }
        Ok(Some(value))
    }

    fn change_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<()> {
        self.request(|conn| {
            conn.change_property8(PropMode::REPLACE, window, property, type_, data)?;
            Ok(())
        })
    }

    fn change_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<()> {
        self.request(|conn| {
            conn.change_property32(PropMode::REPLACE, window, property, type_, data)?;
            Ok(())
        })
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        delete: bool,
    ) -> Result<Option<PropertyValue>> {
        let reply = self.request(|conn| {
            Ok(conn
                .get_property(delete, window, property, GetPropertyType::ANY, 0, u32::MAX)?
                .reply()?)
        })?;
        if reply.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some(PropertyValue {
            type_: reply.type_,
            format: reply.format,
            data: reply.value,
        }))
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<()> {
        self.request(|conn| {
            conn.delete_property(window, property)?;
            conn.flush()?;
            Ok(())
        })
    }

    fn send_selection_notify(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()> {
        let event = SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time,
            requestor,
            selection,
            target,
            property,
        };
        self.request(|conn| {
            conn.send_event(false, requestor, EventMask::NO_EVENT, event)?;
            conn.flush()?;
            Ok(())
        })
    }

    fn send_client_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent::new(32, window, type_, data);
        self.request(|conn| {
            conn.send_event(false, window, EventMask::NO_EVENT, event)?;
            conn.flush()?;
            Ok(())
        })
    }

    fn server_time(&self, window: Window, timeout: Duration) -> Result<Timestamp> {
        let property = self.atoms._LAMCO_TIMESTAMP;
        self.request(|conn| {
            // appending nothing still generates PropertyNotify with a timestamp
            conn.change_property8(PropMode::APPEND, window, property, AtomEnum::INTEGER, &[])?;
            conn.flush()?;
            Ok(())
        })?;

        self.wait_for_event(Instant::now() + timeout, "server time", |event| match event {
            Event::PropertyNotify(ev) if ev.window == window && ev.atom == property => {
                Some(ev.time)
            }
            _ => None,
        })
    }

    fn max_request_bytes(&self) -> usize {
        self.conn.maximum_request_bytes()
    }

    fn screen_saver(&self) -> Result<ScreenSaverSettings> {
        let reply = self.request(|conn| Ok(conn.get_screen_saver()?.reply()?))?;
        Ok(ScreenSaverSettings {
            timeout: reply.timeout as i16,
            interval: reply.interval as i16,
            prefer_blanking: reply.prefer_blanking,
            allow_exposures: reply.allow_exposures,
        })
    }

    fn set_screen_saver(&self, settings: &ScreenSaverSettings) -> Result<()> {
        self.request(|conn| {
            conn.set_screen_saver(
                settings.timeout,
                settings.interval,
                settings.prefer_blanking,
                settings.allow_exposures,
            )?;
            conn.flush()?;
            Ok(())
        })
    }

    fn force_screen_saver(&self, active: bool) -> Result<()> {
        let mode = if active {
            ScreenSaver::ACTIVE
        } else {
            ScreenSaver::RESET
        };
        self.request(|conn| {
            conn.force_screen_saver(mode)?;
            conn.flush()?;
            Ok(())
        })
    }
}

impl Drop for X11Display {
    fn drop(&mut self) {
        let parked = self.backlog.get_mut().len();
        if parked > 0 {
            warn!("Closing display with {} undelivered events", parked);
        }
    }
}
