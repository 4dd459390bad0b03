//! Screen Error Types
//!
//! Error handling for the X11 screen backend.
//!
//! Failures fall into four groups:
//!
//! - **Open failures** - the display connection could not be established.
//!   Returned synchronously from [`Screen::open`](crate::screen::Screen::open).
//! - **Disconnects** - the server dropped the connection. These are routed to
//!   the process-wide disconnect handler, which terminates the process.
//! - **Protocol errors** - an individual request failed on a live connection.
//! - **Contract violations** - e.g. scheduling a timer with a zero period.

use std::time::Duration;
use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

/// Result type for screen operations
pub type Result<T> = std::result::Result<T, ScreenError>;

/// Screen backend error types
#[derive(Error, Debug)]
pub enum ScreenError {
    /// Could not connect to the display server
    #[error("Failed to open display \"{display}\": {reason}")]
    OpenFailure {
        /// Display name that was tried
        display: String,
        /// Underlying reason
        reason: String,
    },

    /// Operation requires an open display
    #[error("Display is not open")]
    NotOpen,

    /// `open()` called twice without `close()`
    #[error("Display is already open")]
    AlreadyOpen,

    /// Another screen instance is alive in this process
    #[error("A screen instance is already active in this process")]
    InstanceActive,

    /// Timer scheduled with a zero period
    #[error("Invalid timer period: {0:?}")]
    InvalidTimerPeriod(Duration),

    /// The connection to the server failed
    #[error("X11 connection error: {0}")]
    Connection(String),

    /// The server rejected a request
    #[error("X11 protocol error: {0}")]
    Protocol(String),

    /// Waited too long for the server (selection conversion, server time)
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Poll on the connection descriptor failed
    #[error("Poll error: {0}")]
    Poll(#[from] nix::errno::Errno),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScreenError {
    /// Whether this error means the server connection is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ScreenError::Connection(_))
    }
}

impl From<ConnectionError> for ScreenError {
    fn from(e: ConnectionError) -> Self {
        ScreenError::Connection(e.to_string())
    }
}

impl From<ReplyError> for ScreenError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(e) => ScreenError::Protocol(format!("{:?}", e.error_kind)),
        }
    }
}

impl From<ReplyOrIdError> for ScreenError {
    fn from(e: ReplyOrIdError) -> Self {
        match e {
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(e) => ScreenError::Protocol(format!("{:?}", e.error_kind)),
            ReplyOrIdError::IdsExhausted => ScreenError::Protocol("resource ids exhausted".into()),
        }
    }
}

/// Build an [`ScreenError::OpenFailure`] from a connect error
pub(crate) fn open_failure(display: &str, e: ConnectError) -> ScreenError {
    ScreenError::OpenFailure {
        display: display.to_string(),
        reason: e.to_string(),
    }
}
