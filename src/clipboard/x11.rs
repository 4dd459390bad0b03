//! Selection-backed clipboard slot
//!
//! [`XClipboardSlot`] plays both sides of the selection protocol:
//!
//! - **Owner**: `empty()` takes the selection; conversion requests are
//!   answered from the locally held content, with `INCR` for large replies.
//! - **Reader**: when another client owns the selection, the first `has()` or
//!   `get()` of a transaction asks it for `TARGETS` and converts every
//!   supported format into a cache. Opening and emptying never convert.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};
use x11rb::protocol::xproto::{Atom, AtomEnum, EventMask, Timestamp, Window};
use x11rb::CURRENT_TIME;

use super::{Clipboard, ClipboardFormat, ClipboardId, ClipboardSlot};
use crate::display::DisplayConnection;
use crate::error::Result;

/// Upper bound for a single reply chunk
const MAX_CHUNK: usize = 256 * 1024;

/// Per-request overhead kept free when deriving the chunk size
const REQUEST_OVERHEAD: usize = 256;

/// Tunables for a slot
#[derive(Debug, Clone, Copy)]
pub struct SlotOptions {
    /// How long to wait for the owner when reading a foreign selection
    pub conversion_timeout: Duration,
    /// Largest reply sent in one property; 0 derives it from the server
    pub chunk_size: usize,
}

impl Default for SlotOptions {
    fn default() -> Self {
        Self {
            conversion_timeout: Duration::from_millis(1000),
            chunk_size: 0,
        }
    }
}

/// Atoms the slot speaks
#[derive(Debug, Clone, Copy)]
struct SlotAtoms {
    selection: Atom,
    property: Atom,
    targets: Atom,
    timestamp: Atom,
    incr: Atom,
    utf8_string: Atom,
    text: Atom,
    text_plain_utf8: Atom,
    text_plain: Atom,
    text_html: Atom,
}

impl SlotAtoms {
    fn intern(display: &dyn DisplayConnection, id: ClipboardId) -> Result<Self> {
        Ok(Self {
            selection: display.intern_atom(id.selection_name())?,
            property: display.intern_atom("_LAMCO_SELECTION")?,
            targets: display.intern_atom("TARGETS")?,
            timestamp: display.intern_atom("TIMESTAMP")?,
            incr: display.intern_atom("INCR")?,
            utf8_string: display.intern_atom("UTF8_STRING")?,
            text: display.intern_atom("TEXT")?,
            text_plain_utf8: display.intern_atom("text/plain;charset=utf-8")?,
            text_plain: display.intern_atom("text/plain")?,
            text_html: display.intern_atom("text/html")?,
        })
    }

    /// Targets that deliver `format`, most preferred first
    fn targets_for(&self, format: ClipboardFormat) -> Vec<Atom> {
        match format {
            ClipboardFormat::Text => vec![
                self.utf8_string,
                self.text_plain_utf8,
                AtomEnum::STRING.into(),
                self.text,
                self.text_plain,
            ],
            ClipboardFormat::Html => vec![self.text_html],
        }
    }

    fn format_of(&self, target: Atom) -> Option<ClipboardFormat> {
        ClipboardFormat::ALL
            .into_iter()
            .find(|&format| self.targets_for(format).contains(&target))
    }
}

/// A reply too large for one property, sent one chunk per deletion
#[derive(Debug)]
struct Transfer {
    requestor: Window,
    property: Atom,
    type_: Atom,
    data: Vec<u8>,
    sent: usize,
}

/// What a target converts to
struct Reply {
    type_: Atom,
    body: ReplyBody,
}

enum ReplyBody {
    Bytes(Vec<u8>),
    Words(Vec<u32>),
}

/// One selection, owned or read through one window
pub struct XClipboardSlot {
    display: Arc<dyn DisplayConnection>,
    id: ClipboardId,
    window: Window,
    atoms: SlotAtoms,
    options: SlotOptions,
    chunk_size: usize,

    open: bool,
    open_time: Timestamp,
    owner: bool,
    owned_time: Timestamp,
    data: BTreeMap<ClipboardFormat, Vec<u8>>,
    /// Foreign owner's content; `None` until read in this transaction
    foreign: RefCell<Option<BTreeMap<ClipboardFormat, Vec<u8>>>>,
    transfers: Vec<Transfer>,
}

impl XClipboardSlot {
    /// Slot for `id` owned through `window`
    pub fn new(
        display: Arc<dyn DisplayConnection>,
        window: Window,
        id: ClipboardId,
        options: SlotOptions,
    ) -> Result<Self> {
        let atoms = SlotAtoms::intern(display.as_ref(), id)?;
        let chunk_size = match options.chunk_size {
            0 => display
                .max_request_bytes()
                .saturating_sub(REQUEST_OVERHEAD)
                .clamp(1, MAX_CHUNK),
            n => n,
        };
        trace!(
            "Created {} slot on window 0x{:x} (chunk {} bytes)",
            id,
            window,
            chunk_size
        );

        Ok(Self {
            display,
            id,
            window,
            atoms,
            options,
            chunk_size,
            open: false,
            open_time: 0,
            owner: false,
            owned_time: 0,
            data: BTreeMap::new(),
            foreign: RefCell::new(None),
            transfers: Vec::new(),
        })
    }

    /// Clipboard this slot serves
    pub fn id(&self) -> ClipboardId {
        self.id
    }

    /// Whether this slot currently owns its selection
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Requests with an `INCR` transfer in flight
    pub fn pending_transfers(&self) -> usize {
        self.transfers.len()
    }

    fn owned_at(&self, time: Timestamp) -> bool {
        self.owner && (time == CURRENT_TIME || time >= self.owned_time)
    }

    /// Run `f` on the current content: ours while we own the selection,
    /// otherwise the foreign owner's, converted on first use while open
    fn with_content<R>(&self, f: impl FnOnce(&BTreeMap<ClipboardFormat, Vec<u8>>) -> R) -> R {
        if self.owner {
            return f(&self.data);
        }
        let mut foreign = self.foreign.borrow_mut();
        if self.open && foreign.is_none() {
            *foreign = Some(self.fetch_foreign(self.open_time));
        }
        f(foreign.as_ref().unwrap_or(&self.data))
    }

    /// Pull every supported format from the current foreign owner
    fn fetch_foreign(&self, time: Timestamp) -> BTreeMap<ClipboardFormat, Vec<u8>> {
        let mut data = BTreeMap::new();

        let owner = match self.display.selection_owner(self.atoms.selection) {
            Ok(owner) => owner,
            Err(e) => {
                warn!("Failed to query {} owner: {}", self.id, e);
                return data;
            }
        };
        if owner == x11rb::NONE {
            trace!("{} has no owner", self.id);
            return data;
        }

        let offered = match self.convert(self.atoms.targets, time) {
            Some(value) => value.as_u32s(),
            None => Vec::new(),
        };

        for format in ClipboardFormat::ALL {
            let candidates = self.atoms.targets_for(format);
            // owners that don't answer TARGETS still get asked for the best target
            let target = if offered.is_empty() {
                candidates.first().copied()
            } else {
                candidates.into_iter().find(|t| offered.contains(t))
            };
            let Some(target) = target else {
                continue;
            };
            if let Some(value) = self.convert(target, time) {
                trace!(
                    "Read {} bytes of {:?} from {} owner 0x{:x}",
                    value.data.len(),
                    format,
                    self.id,
                    owner
                );
                data.insert(format, value.data);
            }
        }
        data
    }

    fn convert(&self, target: Atom, time: Timestamp) -> Option<crate::display::PropertyValue> {
        match self.display.convert_selection(
            self.window,
            self.atoms.selection,
            target,
            self.atoms.property,
            time,
            self.options.conversion_timeout,
        ) {
            Ok(value) => value,
            Err(e) => {
                debug!("Conversion of {} to target {} failed: {}", self.id, target, e);
                None
            }
        }
    }

    /// Build the answer for `target`, or `None` to refuse
    fn reply_for(&self, target: Atom) -> Option<Reply> {
        let atom_type: Atom = AtomEnum::ATOM.into();
        let integer_type: Atom = AtomEnum::INTEGER.into();

        if target == self.atoms.targets {
            let mut targets = vec![self.atoms.targets, self.atoms.timestamp];
            for format in self.data.keys() {
                targets.extend(self.atoms.targets_for(*format));
            }
            return Some(Reply {
                type_: atom_type,
                body: ReplyBody::Words(targets),
            });
        }

        if target == self.atoms.timestamp {
            return Some(Reply {
                type_: integer_type,
                body: ReplyBody::Words(vec![self.owned_time]),
            });
        }

        let format = self.atoms.format_of(target)?;
        let data = self.data.get(&format)?;
        let type_ = if target == self.atoms.text {
            self.atoms.utf8_string
        } else {
            target
        };
        Some(Reply {
            type_,
            body: ReplyBody::Bytes(data.clone()),
        })
    }

    /// Write `reply` to `requestor` and notify it
    fn send_reply(
        &mut self,
        requestor: Window,
        target: Atom,
        property: Atom,
        time: Timestamp,
        reply: Reply,
    ) -> Result<()> {
        match reply.body {
            ReplyBody::Words(words) => {
                self.display
                    .change_property32(requestor, property, reply.type_, &words)?;
            }
            ReplyBody::Bytes(bytes) if bytes.len() <= self.chunk_size => {
                self.display
                    .change_property8(requestor, property, reply.type_, &bytes)?;
            }
            ReplyBody::Bytes(bytes) => {
                debug!(
                    "Starting INCR transfer of {} bytes to 0x{:x}",
                    bytes.len(),
                    requestor
                );
                self.display.select_input(
                    requestor,
                    EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY,
                )?;
                self.display.change_property32(
                    requestor,
                    property,
                    self.atoms.incr,
                    &[bytes.len() as u32],
                )?;
                self.transfers.retain(|t| {
                    !(t.requestor == requestor && t.property == property)
                });
                self.transfers.push(Transfer {
                    requestor,
                    property,
                    type_: reply.type_,
                    data: bytes,
                    sent: 0,
                });
            }
        }

        self.display.send_selection_notify(
            requestor,
            self.atoms.selection,
            target,
            property,
            time,
        )?;
        self.display.flush()
    }

    fn refuse(&self, requestor: Window, target: Atom, time: Timestamp) {
        let sent = self
            .display
            .send_selection_notify(requestor, self.atoms.selection, target, x11rb::NONE, time)
            .and_then(|()| self.display.flush());
        if let Err(e) = sent {
            debug!("Failed to refuse request from 0x{:x}: {}", requestor, e);
        }
    }
}

impl Clipboard for XClipboardSlot {
    fn open(&mut self, time: Timestamp) -> bool {
        if self.open {
            return false;
        }
        self.open = true;
        self.open_time = time;
        *self.foreign.get_mut() = None;
        true
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn empty(&mut self) -> bool {
        if !self.open {
            return false;
        }

        let time = self.open_time;
        let acquired = self
            .display
            .set_selection_owner(self.window, self.atoms.selection, time)
            .and_then(|()| self.display.selection_owner(self.atoms.selection));

        match acquired {
            Ok(owner) if owner == self.window => {
                self.data.clear();
                *self.foreign.get_mut() = None;
                self.transfers.clear();
                self.owner = true;
                self.owned_time = time;
                trace!("Took ownership of {} at {}", self.id, time);
                true
            }
            Ok(owner) => {
                warn!(
                    "Failed to take ownership of {}: owner is 0x{:x}",
                    self.id, owner
                );
                false
            }
            Err(e) => {
                warn!("Failed to take ownership of {}: {}", self.id, e);
                false
            }
        }
    }

    fn add(&mut self, format: ClipboardFormat, data: Vec<u8>) {
        if self.open && self.owner {
            self.data.insert(format, data);
        }
    }

    fn has(&self, format: ClipboardFormat) -> bool {
        self.with_content(|data| data.contains_key(&format))
    }

    fn get(&self, format: ClipboardFormat) -> Option<Vec<u8>> {
        self.with_content(|data| data.get(&format).cloned())
    }

    fn time(&self) -> Timestamp {
        self.owned_time
    }
}

impl ClipboardSlot for XClipboardSlot {
    fn lost(&mut self, time: Timestamp) {
        if self.owner {
            debug!("Lost ownership of {} at {}", self.id, time);
        }
        self.owner = false;
        self.data.clear();
        *self.foreign.get_mut() = None;
        self.transfers.clear();
    }

    fn add_request(
        &mut self,
        owner: Window,
        requestor: Window,
        target: Atom,
        time: Timestamp,
        property: Atom,
    ) {
        // obsolete clients send no property; ICCCM says use the target
        let property = if property == x11rb::NONE {
            target
        } else {
            property
        };

        let reply = if owner == self.window && self.owned_at(time) {
            self.reply_for(target)
        } else {
            None
        };

        let Some(reply) = reply else {
            trace!(
                "Refusing {} request from 0x{:x} for target {}",
                self.id,
                requestor,
                target
            );
            self.refuse(requestor, target, time);
            return;
        };

        if let Err(e) = self.send_reply(requestor, target, property, time, reply) {
            debug!("Failed to answer 0x{:x}: {}", requestor, e);
            self.transfers.retain(|t| t.requestor != requestor);
        }
    }

    fn process_request(&mut self, requestor: Window, _time: Timestamp, property: Atom) -> bool {
        let Some(index) = self
            .transfers
            .iter()
            .position(|t| t.requestor == requestor && t.property == property)
        else {
            return false;
        };

        let transfer = &mut self.transfers[index];
        let end = (transfer.sent + self.chunk_size).min(transfer.data.len());
        let chunk = &transfer.data[transfer.sent..end];
        let finished = chunk.is_empty();

        let written = self
            .display
            .change_property8(requestor, property, transfer.type_, chunk)
            .and_then(|()| self.display.flush());
        transfer.sent = end;

        match written {
            Ok(()) if finished => {
                trace!("INCR transfer to 0x{:x} complete", requestor);
                self.transfers.remove(index);
            }
            Ok(()) => {}
            Err(e) => {
                debug!("INCR transfer to 0x{:x} failed: {}", requestor, e);
                self.transfers.remove(index);
            }
        }
        true
    }

    fn destroy_request(&mut self, requestor: Window) -> bool {
        let before = self.transfers.len();
        self.transfers.retain(|t| t.requestor != requestor);
        before != self.transfers.len()
    }

    fn selection(&self) -> Atom {
        self.atoms.selection
    }

    fn window(&self) -> Window {
        self.window
    }
}
