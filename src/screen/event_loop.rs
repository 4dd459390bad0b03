//! Event loop
//!
//! One iteration:
//!
//! ```text
//! lock ─ stop? ─ unlock
//!   └─> wait (no lock held) until: server data | wake socket | next timer deadline
//!         └─> cancelled? ─> return
//!               └─> fire due timers (timer lock only while collecting)
//!                     └─> drain events: lock ─ stop? ─ next event ─ unlock ─ dispatch
//! ```
//!
//! The stop flag set by `exit_main_loop` is only observed at the top of an
//! iteration and between events, never in the middle of a dispatch.

use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace, warn};

use super::Shared;
use crate::config::EventLoopConfig;
use crate::display::DisplayConnection;
use crate::error::{Result, ScreenError};

/// Why [`Screen::main_loop`](super::Screen::main_loop) returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `exit_main_loop()` was called
    Stopped,
    /// A [`LoopCanceller`] fired
    Cancelled,
}

/// How the loop waits for work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Block in `poll(2)` on the connection and the wake socket
    Poll,
    /// Check for events, sleep `interval`, repeat
    SleepPoll {
        /// Sleep between checks
        interval: Duration,
    },
}

impl WaitStrategy {
    /// Poll when the connection exposes a descriptor, otherwise sleep-poll
    pub fn detect(display: &dyn DisplayConnection, interval: Duration) -> Self {
        if display.poll_fd().is_some() {
            WaitStrategy::Poll
        } else {
            WaitStrategy::SleepPoll { interval }
        }
    }

    /// Strategy requested by `config`, downgraded when it cannot work
    pub fn from_config(config: &EventLoopConfig, display: &dyn DisplayConnection) -> Self {
        let interval = config.sleep_interval();
        match config.wait_strategy.as_str() {
            "sleep" => WaitStrategy::SleepPoll { interval },
            "poll" if display.poll_fd().is_none() => {
                warn!("Connection has no pollable descriptor; sleeping between event checks");
                WaitStrategy::SleepPoll { interval }
            }
            "poll" => WaitStrategy::Poll,
            _ => Self::detect(display, interval),
        }
    }
}

/// Wake socket and cancellation flag shared with [`LoopCanceller`]s
pub(crate) struct LoopSignal {
    cancelled: AtomicBool,
    reader: UnixStream,
    writer: UnixStream,
}

impl LoopSignal {
    pub(crate) fn new() -> Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            cancelled: AtomicBool::new(false),
            reader,
            writer,
        })
    }

    /// Interrupt a wait in progress (or make the next one return at once)
    pub(crate) fn wake(&self) {
        // a full socket already guarantees a wakeup
        let _ = (&self.writer).write(&[1]);
    }

    pub(super) fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.reader).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn take_cancelled(&self) -> bool {
        self.cancelled.swap(false, Ordering::SeqCst)
    }

    pub(super) fn fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

/// Handle that cancels a running event loop from any thread
#[derive(Clone)]
pub struct LoopCanceller {
    signal: Arc<LoopSignal>,
}

impl LoopCanceller {
    pub(crate) fn new(signal: Arc<LoopSignal>) -> Self {
        Self { signal }
    }

    /// Make the loop return [`LoopExit::Cancelled`] as soon as its wait ends
    pub fn cancel(&self) {
        self.signal.cancel();
    }
}

impl std::fmt::Debug for LoopCanceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopCanceller").finish_non_exhaustive()
    }
}

impl Shared {
    /// Run until stopped, cancelled, or the connection fails
    pub(super) fn run_loop(&self, strategy: WaitStrategy) -> Result<LoopExit> {
        debug!("Entering event loop ({:?})", strategy);
        loop {
            let display = {
                let mut state = self.lock_state();
                if state.stop {
                    state.stop = false;
                    debug!("Event loop stopped");
                    return Ok(LoopExit::Stopped);
                }
                self.display_of(&state).ok_or(ScreenError::NotOpen)?
            };

            match strategy {
                WaitStrategy::Poll => {
                    let timeout = self.timers.lock().next_wake(Instant::now());
                    self.wait_readable(display.as_ref(), timeout)?;
                    if self.signal.take_cancelled() {
                        debug!("Event loop cancelled");
                        return Ok(LoopExit::Cancelled);
                    }
                    self.process_timers();
                    self.drain_events(display.as_ref())?;
                }
                WaitStrategy::SleepPoll { interval } => {
                    if self.signal.take_cancelled() {
                        debug!("Event loop cancelled");
                        return Ok(LoopExit::Cancelled);
                    }
                    let fired = self.process_timers();
                    let dispatched = self.drain_events(display.as_ref())?;
                    if fired == 0 && dispatched == 0 {
                        std::thread::sleep(interval);
                    }
                }
            }
        }
    }

    /// Block until the server sends data, the loop is woken, or `timeout`
    /// passes. No lock is held.
    fn wait_readable(&self, display: &dyn DisplayConnection, timeout: Option<Duration>) -> Result<()> {
        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(timeout) => {
                // round up so a sub-millisecond deadline doesn't spin
                let millis = timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32;
                PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
            }
        };

        let mut fds = vec![PollFd::new(self.signal.fd(), PollFlags::POLLIN)];
        if let Some(fd) = display.poll_fd() {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }

        match poll(&mut fds, timeout) {
            Ok(_) | Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(e.into()),
        }
        self.signal.drain();
        Ok(())
    }

    /// Run every due timer job with no lock held. Returns how many ran.
    pub(super) fn process_timers(&self) -> usize {
        let due = self.timers.lock().process_due(Instant::now());
        let mut ran = 0;
        for job in due {
            // an earlier job in this batch may have removed this one
            let scheduled = self.timers.lock().is_scheduled(job.key());
            if !scheduled {
                continue;
            }
            if let Some(job) = job.upgrade() {
                job.run();
                ran += 1;
            }
        }
        if ran > 0 {
            trace!("Ran {} timer jobs", ran);
        }
        ran
    }

    /// Dispatch every queued event. Returns how many were dispatched.
    pub(super) fn drain_events(&self, display: &dyn DisplayConnection) -> Result<usize> {
        let mut dispatched = 0;
        loop {
            let event = {
                let state = self.lock_state();
                if state.stop || !self.is_connected(&state) {
                    break;
                }
                display.poll_event()?
            };
            let Some(event) = event else {
                break;
            };

            if !self.pre_dispatch(&event) {
                self.handler.on_event(&event);
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }
}
