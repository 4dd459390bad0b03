//! X11 Screen
//!
//! [`Screen`] owns the display connection and everything that lives on it:
//! the clipboard slots, the screen saver driver, the blank cursor and the
//! timer queue driving periodic jobs from the event loop.
//!
//! # Locking
//!
//! Two locks, never nested:
//!
//! - the **main lock** guards [`ScreenState`] (connection handle, window,
//!   slots, screen saver, stop flag) and serializes all protocol traffic
//!   that has to be ordered;
//! - the **timer lock** guards the [`TimerQueue`].
//!
//! External callbacks ([`ScreenReceiver`], [`ScreenEventHandler`], timer jobs)
//! always run with neither lock held, so they may call back into the screen.
//!
//! # Disconnects
//!
//! The connection layer reports a dead server through the process-wide
//! handler in [`display::lifecycle`](crate::display::lifecycle). The screen
//! registers itself there at construction and binds its connection at
//! `open()`. The report usually arrives while the failing request still holds
//! the main lock, so it only marks the screen as disconnected; the reporting
//! thread releases the lock first, then drops the stored handle, calls
//! [`ScreenReceiver::on_error`] and, under the default handler
//! ([`fatal_disconnect`]), exits with status 17.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use x11rb::protocol::xproto::{Atom, Cursor, Window};
use x11rb::protocol::Event;

use crate::clipboard::{copy, Clipboard, ClipboardId, ClipboardSlotSet};
use crate::config::Config;
use crate::display::lifecycle::{self, fatal_disconnect, AfterDisconnect, DisconnectTarget};
use crate::display::DisplayConnection;
use crate::error::{Result, ScreenError};
use crate::geometry::{self, ScreenShape};
use crate::screensaver::ScreenSaver;
use crate::timer::{Job, TimerQueue};

mod backend;
mod dispatch;
mod event_loop;

pub use backend::{DisplayBackend, X11Backend};
pub use event_loop::{LoopCanceller, LoopExit, WaitStrategy};

#[cfg(test)]
pub use backend::MockDisplayBackend;

use event_loop::LoopSignal;

thread_local! {
    /// This thread holds the main lock of the process's screen
    static HOLDS_MAIN_LOCK: Cell<bool> = const { Cell::new(false) };
}

/// Receives clipboard ownership changes and fatal errors
#[cfg_attr(test, mockall::automock)]
pub trait ScreenReceiver: Send + Sync {
    /// Another client took clipboard `id`
    fn on_grab_clipboard(&self, id: ClipboardId);

    /// The display connection is gone. The screen must not be used for
    /// server traffic afterwards.
    fn on_error(&self);
}

/// Sees every event the selection protocol does not consume
#[cfg_attr(test, mockall::automock)]
pub trait ScreenEventHandler: Send + Sync {
    /// Handle an event nothing else consumed
    fn on_event(&self, event: &Event);

    /// Look at an event first; true consumes it
    fn on_pre_dispatch(&self, event: &Event) -> bool;

    /// The screen saver was activated (`true`) or deactivated
    fn on_screensaver(&self, activated: bool);
}

/// Everything behind the main lock
struct ScreenState {
    display: Option<Arc<dyn DisplayConnection>>,
    root: Window,
    window: Option<Window>,
    shape: ScreenShape,
    cursor: Cursor,
    screensaver: Option<Box<dyn ScreenSaver>>,
    screensaver_notify: bool,
    screensaver_atom: Atom,
    slots: ClipboardSlotSet,
    stop: bool,
}

impl ScreenState {
    fn closed() -> Self {
        Self {
            display: None,
            root: x11rb::NONE,
            window: None,
            shape: ScreenShape::default(),
            cursor: x11rb::NONE,
            screensaver: None,
            screensaver_notify: false,
            screensaver_atom: x11rb::NONE,
            slots: ClipboardSlotSet::new(),
            stop: false,
        }
    }
}

/// State shared between the screen handle and the disconnect registry
pub(crate) struct Shared {
    state: Mutex<ScreenState>,
    timers: Mutex<TimerQueue>,
    signal: Arc<LoopSignal>,
    /// Set by the disconnect handler, which may run while the main lock is
    /// held further up the same stack
    disconnected: AtomicBool,
    /// `on_error` still owed to the receiver
    error_pending: AtomicBool,
    /// Terminate once `on_error` has run
    exit_on_error: AtomicBool,
    receiver: Arc<dyn ScreenReceiver>,
    handler: Arc<dyn ScreenEventHandler>,
    backend: Box<dyn DisplayBackend>,
    config: Config,
}

impl Shared {
    /// Take the main lock
    fn lock_state(&self) -> StateGuard<'_> {
        let guard = self.state.lock();
        HOLDS_MAIN_LOCK.with(|held| held.set(true));
        StateGuard {
            shared: self,
            guard,
        }
    }

    /// Deliver a recorded disconnect. Called with the main lock released.
    fn finish_disconnect(&self) {
        if !self.error_pending.swap(false, Ordering::SeqCst) {
            return;
        }
        self.state.lock().display = None;
        self.receiver.on_error();
        if self.exit_on_error.load(Ordering::SeqCst) {
            lifecycle::exit_disconnected();
        }
    }

    /// Drop everything living on the connection. The I/O error handler must
    /// be uninstalled first.
    fn teardown(&self, state: &mut ScreenState) {
        state.screensaver = None;
        state.slots.clear();
        state.window = None;

        let connected = !self.disconnected.load(Ordering::SeqCst);
        if let Some(display) = state.display.take() {
            if connected {
                if state.cursor != x11rb::NONE {
                    let _ = display.free_cursor(state.cursor);
                }
                let _ = display.flush();
            }
            lifecycle::unbind_connection();
            debug!("closed display");
        }
        state.cursor = x11rb::NONE;
        state.screensaver_atom = x11rb::NONE;
    }

    fn is_connected(&self, state: &ScreenState) -> bool {
        state.display.is_some() && !self.disconnected.load(Ordering::SeqCst)
    }

    /// Connection handle, unless closed or lost
    fn display_of(&self, state: &ScreenState) -> Option<Arc<dyn DisplayConnection>> {
        if self.disconnected.load(Ordering::SeqCst) {
            return None;
        }
        state.display.clone()
    }

    fn current_display(&self) -> Option<Arc<dyn DisplayConnection>> {
        let state = self.lock_state();
        self.display_of(&state)
    }

    fn timestamp_timeout(&self) -> Duration {
        Duration::from_millis(self.config.clipboard.conversion_timeout_ms)
    }
}

impl DisconnectTarget for Shared {
    fn on_disconnect(&self, then: AfterDisconnect) {
        self.disconnected.store(true, Ordering::SeqCst);
        if then == AfterDisconnect::Exit {
            self.exit_on_error.store(true, Ordering::SeqCst);
        }
        self.error_pending.store(true, Ordering::SeqCst);
        self.signal.wake();

        // under our own main lock, the guard delivers it on release
        if !HOLDS_MAIN_LOCK.with(Cell::get) {
            self.finish_disconnect();
        }
    }
}

/// Main lock guard that delivers a pending disconnect on release
struct StateGuard<'a> {
    shared: &'a Shared,
    guard: MutexGuard<'a, ScreenState>,
}

impl Deref for StateGuard<'_> {
    type Target = ScreenState;

    fn deref(&self) -> &ScreenState {
        &self.guard
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut ScreenState {
        &mut self.guard
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        HOLDS_MAIN_LOCK.with(|held| held.set(false));
        let shared = self.shared;
        if shared.error_pending.load(Ordering::SeqCst) {
            MutexGuard::unlocked(&mut self.guard, || shared.finish_disconnect());
        }
    }
}

/// Scoped access to the connection with the main lock held
///
/// The handle is `None` when the display is closed or was lost. Dropping the
/// lock wakes the event loop, since replies read through it may have queued
/// events behind the loop's back.
pub struct DisplayLock<'a> {
    guard: StateGuard<'a>,
    display: Option<Arc<dyn DisplayConnection>>,
}

impl DisplayLock<'_> {
    /// The connection, if there is one
    pub fn display(&self) -> Option<&dyn DisplayConnection> {
        self.display.as_deref()
    }
}

impl Drop for DisplayLock<'_> {
    fn drop(&mut self) {
        self.guard.shared.signal.wake();
    }
}

/// An X11 screen
pub struct Screen {
    shared: Arc<Shared>,
}

impl Screen {
    /// Create a closed screen
    ///
    /// Only one screen may exist per process; a second one fails with
    /// [`ScreenError::InstanceActive`].
    pub fn new(
        receiver: Arc<dyn ScreenReceiver>,
        handler: Arc<dyn ScreenEventHandler>,
        backend: Box<dyn DisplayBackend>,
        config: Config,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ScreenState::closed()),
            timers: Mutex::new(TimerQueue::new()),
            signal: Arc::new(LoopSignal::new()?),
            disconnected: AtomicBool::new(false),
            error_pending: AtomicBool::new(false),
            exit_on_error: AtomicBool::new(false),
            receiver,
            handler,
            backend,
            config,
        });

        let target: Arc<dyn DisconnectTarget> = shared.clone();
        lifecycle::claim(Arc::downgrade(&target))?;

        Ok(Self { shared })
    }

    // ---- lifecycle ----

    /// Connect to the display and set up the cursor, shape and screen saver
    ///
    /// The display is `[display] name` from the configuration, else `DISPLAY`,
    /// else `[display] fallback`.
    pub fn open(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if self.shared.is_connected(&state) {
            return Err(ScreenError::AlreadyOpen);
        }

        // whatever a lost connection left behind goes before reconnecting
        lifecycle::set_io_error_handler(None);
        self.shared.teardown(&mut state);
        lifecycle::set_io_error_handler(Some(fatal_disconnect));

        let name = self.shared.config.resolve_display();
        debug!("XOpenDisplay(\"{}\")", name);
        let display = self.shared.backend.connect(&name)?;

        self.shared.disconnected.store(false, Ordering::SeqCst);
        self.shared.exit_on_error.store(false, Ordering::SeqCst);
        lifecycle::bind_connection(display.id());

        match self.init_display(&mut state, &display) {
            Ok(()) => {
                state.display = Some(display);
                Ok(())
            }
            Err(e) => {
                lifecycle::unbind_connection();
                warn!("Failed to initialize display \"{}\": {}", name, e);
                Err(e)
            }
        }
    }

    fn init_display(
        &self,
        state: &mut ScreenState,
        display: &Arc<dyn DisplayConnection>,
    ) -> Result<()> {
        let root = display.root();
        let cursor = geometry::create_blank_cursor(display.as_ref())?;
        let shape = geometry::update_screen_shape(display.as_ref());

        let signal = display.intern_atom("SCREENSAVER")?;
        let screensaver = self.shared.backend.create_screensaver(display, signal)?;

        state.root = root;
        state.cursor = cursor;
        state.shape = shape;
        state.screensaver_atom = signal;
        state.screensaver = Some(screensaver);
        state.screensaver_notify = false;
        state.stop = false;
        Ok(())
    }

    /// Tear down the screen saver, clipboard slots, cursor and connection
    ///
    /// Safe to call when already closed.
    pub fn close(&self) {
        // teardown requests on a dead connection must not re-enter the handler
        lifecycle::set_io_error_handler(None);
        {
            let mut state = self.shared.lock_state();
            self.shared.teardown(&mut state);
        }
        self.shared.signal.wake();
    }

    /// Whether a live connection is held
    pub fn is_open(&self) -> bool {
        let state = self.shared.lock_state();
        self.shared.is_connected(&state)
    }

    /// Lock the screen and borrow its connection for a sequence of requests
    pub fn display_lock(&self) -> DisplayLock<'_> {
        let guard = self.shared.lock_state();
        let display = self.shared.display_of(&guard);
        DisplayLock { guard, display }
    }

    // ---- event loop ----

    /// Dispatch events and fire timers until stopped or cancelled
    ///
    /// Returns an error if the screen is not open or the connection fails.
    pub fn main_loop(&self) -> Result<LoopExit> {
        let display = self
            .shared
            .current_display()
            .ok_or(ScreenError::NotOpen)?;
        let strategy = WaitStrategy::from_config(&self.shared.config.event_loop, display.as_ref());
        drop(display);

        self.shared.run_loop(strategy)
    }

    /// Ask the event loop to return at its next check
    pub fn exit_main_loop(&self) {
        self.shared.lock_state().stop = true;
        self.shared.signal.wake();
    }

    /// Handle for cancelling the event loop from another thread
    pub fn canceller(&self) -> LoopCanceller {
        LoopCanceller::new(Arc::clone(&self.shared.signal))
    }

    // ---- timers ----

    /// Run `job` on the event loop every `period`, replacing any timer it has
    pub fn add_timer(&self, job: &Arc<dyn Job>, period: Duration) -> Result<()> {
        self.shared.timers.lock().add(job, period, Instant::now())?;
        // the loop may be waiting on an older, later deadline
        self.shared.signal.wake();
        Ok(())
    }

    /// Stop running `job`; no-op if it has no timer
    pub fn remove_timer(&self, job: &Arc<dyn Job>) {
        self.shared.timers.lock().remove(job);
    }

    // ---- clipboard ----

    /// Bind the clipboards to `window`, rebuilding every slot
    ///
    /// `window` must select `PropertyChange` events; timestamps are read
    /// through it. `None` unbinds and leaves no slots.
    pub fn set_window(&self, window: Option<Window>) -> Result<()> {
        {
            let mut state = self.shared.lock_state();
            let display = self.shared.display_of(&state).ok_or(ScreenError::NotOpen)?;

            let backend = &self.shared.backend;
            state.slots.bind(window, |window, id| {
                match backend.create_clipboard(&display, window, id) {
                    Ok(slot) => Some(slot),
                    Err(e) => {
                        warn!("Failed to create {} slot on 0x{:x}: {}", id, window, e);
                        None
                    }
                }
            });
            state.window = window;
        }
        self.shared.signal.wake();
        Ok(())
    }

    /// Window the clipboards are bound to
    pub fn window(&self) -> Option<Window> {
        self.shared.lock_state().window
    }

    /// Take ownership of clipboard `id` with the content of `src`, or with
    /// no content when `src` is `None`
    ///
    /// Fails when no slot is bound for `id`.
    pub fn set_clipboard(&self, id: ClipboardId, src: Option<&mut dyn Clipboard>) -> bool {
        let ok = {
            let mut state = self.shared.lock_state();
            let Some(display) = self.shared.display_of(&state) else {
                return false;
            };
            let Some(slot) = state.slots.get_mut(id) else {
                return false;
            };

            // ICCCM forbids CurrentTime here
            let time = match display.server_time(slot.window(), self.shared.timestamp_timeout()) {
                Ok(time) => time,
                Err(e) => {
                    warn!("Failed to get server time for {}: {}", id, e);
                    return false;
                }
            };

            match src {
                Some(src) => copy(slot, src, time),
                None => {
                    if slot.open(time) {
                        slot.empty();
                        slot.close();
                        true
                    } else {
                        false
                    }
                }
            }
        };
        self.shared.signal.wake();
        ok
    }

    /// Copy the current content of clipboard `id` into `dst`
    ///
    /// Fails when no slot is bound for `id`.
    pub fn get_clipboard(&self, id: ClipboardId, dst: &mut dyn Clipboard) -> bool {
        let ok = {
            let mut state = self.shared.lock_state();
            let Some(display) = self.shared.display_of(&state) else {
                return false;
            };
            let Some(slot) = state.slots.get_mut(id) else {
                return false;
            };

            let time = match display.server_time(slot.window(), self.shared.timestamp_timeout()) {
                Ok(time) => time,
                Err(e) => {
                    warn!("Failed to get server time for {}: {}", id, e);
                    return false;
                }
            };

            copy(dst, slot, time)
        };
        self.shared.signal.wake();
        ok
    }

    // ---- screen saver ----

    /// Start screen saver handling: either report activations to the event
    /// handler (`notify`) or keep the screen saver from starting
    pub fn open_screensaver(&self, notify: bool) {
        {
            let mut state = self.shared.lock_state();
            let window = state.window;
            state.screensaver_notify = notify;
            if let Some(saver) = state.screensaver.as_mut() {
                if notify {
                    saver.set_notify(window);
                } else {
                    saver.disable();
                }
            }
        }
        self.shared.signal.wake();
    }

    /// Undo [`Screen::open_screensaver`]
    pub fn close_screensaver(&self) {
        {
            let mut state = self.shared.lock_state();
            let notify = state.screensaver_notify;
            if let Some(saver) = state.screensaver.as_mut() {
                if notify {
                    saver.set_notify(None);
                } else {
                    saver.enable();
                }
            }
        }
        self.shared.signal.wake();
    }

    /// Activate or deactivate the screen saver now
    pub fn screensaver(&self, activate: bool) {
        {
            let mut state = self.shared.lock_state();
            if let Some(saver) = state.screensaver.as_mut() {
                if activate {
                    saver.activate();
                } else {
                    saver.deactivate();
                }
            }
        }
        self.shared.signal.wake();
    }

    // ---- geometry ----

    /// Screen rectangle as of `open()`
    pub fn shape(&self) -> ScreenShape {
        self.shared.lock_state().shape
    }

    /// Pointer position, or the screen center if it cannot be queried
    pub fn cursor_pos(&self) -> (i32, i32) {
        let pos = {
            let state = self.shared.lock_state();
            let Some(display) = self.shared.display_of(&state) else {
                return state.shape.center();
            };
            match display.query_pointer(state.root) {
                Ok((x, y)) => (x as i32, y as i32),
                Err(e) => {
                    debug!("Pointer query failed, using screen center: {}", e);
                    state.shape.center()
                }
            }
        };
        self.shared.signal.wake();
        pos
    }

    /// Center of the screen
    pub fn cursor_center(&self) -> (i32, i32) {
        self.shared.lock_state().shape.center()
    }

    /// Root window (`NONE` when closed)
    pub fn root(&self) -> Window {
        self.shared.lock_state().root
    }

    /// Invisible cursor (`NONE` when closed)
    pub fn blank_cursor(&self) -> Cursor {
        self.shared.lock_state().cursor
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if self.shared.lock_state().display.is_some() {
            self.close();
        }
        let target: Arc<dyn DisconnectTarget> = self.shared.clone();
        lifecycle::release(&target);
    }
}
